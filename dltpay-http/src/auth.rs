//! Wallet-auth tokens for the protected store endpoints.
//!
//! The service issues a short-lived `{signature, timestamp}` pair per wallet
//! from `POST /wallet/auth-token`. Protected requests carry it in the
//! [`WALLET_SIGNATURE_HEADER`] and [`WALLET_TIMESTAMP_HEADER`] headers.
//! [`WalletAuthCache`] keeps one token per wallet and fetches a new one
//! [`WalletAuthCache::REFRESH_BUFFER`] before the old one lapses.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use http::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::send_json;
use crate::error::HttpApiError;

/// Carries the token signature.
pub const WALLET_SIGNATURE_HEADER: HeaderName = HeaderName::from_static("x-wallet-signature");

/// Carries the timestamp the signature covers.
pub const WALLET_TIMESTAMP_HEADER: HeaderName = HeaderName::from_static("x-wallet-timestamp");

#[derive(Debug, Clone)]
struct CachedToken {
    signature: HeaderValue,
    timestamp: HeaderValue,
    refresh_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert(WALLET_SIGNATURE_HEADER, self.signature.clone());
        headers.insert(WALLET_TIMESTAMP_HEADER, self.timestamp.clone());
        headers
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    wallet_address: &'a str,
}

/// The service sends the timestamp as either a string or a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Text(String),
    Millis(u64),
}

impl Timestamp {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Millis(millis) => millis.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    timestamp: Option<Timestamp>,
    /// Lifetime in milliseconds.
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Per-wallet token cache, shared by clones of the owning client.
#[derive(Debug)]
pub struct WalletAuthCache {
    client: Client,
    url: Url,
    tokens: DashMap<String, CachedToken>,
}

impl WalletAuthCache {
    /// Tokens are refreshed this long before they lapse.
    pub const REFRESH_BUFFER: Duration = Duration::from_secs(60);

    /// Lifetime assumed when the service does not send `expires_in`.
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(5 * 60);

    /// A cache that fetches tokens from `url`.
    #[must_use]
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            tokens: DashMap::new(),
        }
    }

    /// Auth headers for `wallet`, fetching a token if none is fresh.
    ///
    /// # Errors
    ///
    /// [`HttpApiError`] if the token request fails or the service issues no
    /// usable token.
    pub async fn headers(&self, wallet: &str) -> Result<HeaderMap, HttpApiError> {
        let cached = self.tokens.get(wallet).map(|entry| entry.value().clone());
        match cached {
            Some(token) if token.is_fresh(Instant::now()) => Ok(token.headers()),
            _ => self.refresh(wallet).await,
        }
    }

    /// Fetches a new token for `wallet`, replacing any cached one.
    ///
    /// # Errors
    ///
    /// As for [`Self::headers`].
    pub async fn refresh(&self, wallet: &str) -> Result<HeaderMap, HttpApiError> {
        let unusable = |reason: &str| HttpApiError::AuthToken {
            wallet: wallet.to_owned(),
            reason: reason.to_owned(),
        };
        if wallet.is_empty() {
            return Err(unusable("no wallet address"));
        }
        let issued_at = Instant::now();
        let response: TokenResponse = send_json(
            self.client
                .post(self.url.clone())
                .json(&TokenRequest {
                    wallet_address: wallet,
                }),
            "POST /wallet/auth-token",
        )
        .await?;

        let signature = response
            .signature
            .filter(|s| !s.is_empty())
            .ok_or_else(|| unusable("missing signature"))?;
        let timestamp = response
            .timestamp
            .map(Timestamp::into_string)
            .ok_or_else(|| unusable("missing timestamp"))?;
        let lifetime = response
            .expires_in
            .map_or(Self::DEFAULT_LIFETIME, Duration::from_millis);
        let token = CachedToken {
            signature: HeaderValue::from_str(&signature)
                .map_err(|_| unusable("signature is not a valid header value"))?,
            timestamp: HeaderValue::from_str(&timestamp)
                .map_err(|_| unusable("timestamp is not a valid header value"))?,
            refresh_at: issued_at + lifetime.saturating_sub(Self::REFRESH_BUFFER),
        };

        #[cfg(feature = "telemetry")]
        tracing::debug!(wallet, lifetime_secs = lifetime.as_secs(), "wallet auth token refreshed");

        let headers = token.headers();
        self.tokens.insert(wallet.to_owned(), token);
        Ok(headers)
    }

    /// Whether a fresh token is cached for `wallet`.
    #[must_use]
    pub fn has_valid_token(&self, wallet: &str) -> bool {
        self.tokens
            .get(wallet)
            .is_some_and(|entry| entry.is_fresh(Instant::now()))
    }

    /// Forgets `wallet`'s token, or every token when `wallet` is `None`.
    pub fn clear(&self, wallet: Option<&str>) {
        match wallet {
            Some(wallet) => {
                self.tokens.remove(wallet);
            }
            None => self.tokens.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn cache(server: &MockServer) -> WalletAuthCache {
        let url = format!("{}/wallet/auth-token", server.uri()).parse().unwrap();
        WalletAuthCache::new(Client::new(), url)
    }

    #[tokio::test]
    async fn test_token_is_cached_per_wallet() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallet/auth-token"))
            .and(body_json(json!({"wallet_address": "rAlice"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "signature": "sig_a",
                "timestamp": 1_700_000_000_000_u64,
                "expires_in": 300_000,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache(&server);
        let first = cache.headers("rAlice").await.unwrap();
        let second = cache.headers("rAlice").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[WALLET_SIGNATURE_HEADER], "sig_a");
        assert_eq!(first[WALLET_TIMESTAMP_HEADER], "1700000000000");
        assert!(cache.has_valid_token("rAlice"));
        assert!(!cache.has_valid_token("rBob"));
    }

    #[tokio::test]
    async fn test_token_inside_refresh_buffer_is_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallet/auth-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "signature": "sig_a",
                "timestamp": "1700000000000",
                "expires_in": 60_000,
            })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache(&server);
        cache.headers("rAlice").await.unwrap();
        assert!(!cache.has_valid_token("rAlice"));
        cache.headers("rAlice").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallet/auth-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "signature": "sig_a",
                "timestamp": "1700000000000",
            })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache(&server);
        cache.headers("rAlice").await.unwrap();
        cache.clear(Some("rAlice"));
        assert!(!cache.has_valid_token("rAlice"));
        cache.headers("rAlice").await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_or_incomplete_tokens_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/wallet/auth-token"))
            .and(body_json(json!({"wallet_address": "rAlice"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/wallet/auth-token"))
            .and(body_json(json!({"wallet_address": "rBob"})))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"success": false, "error": "Unknown wallet"})),
            )
            .mount(&server)
            .await;

        let cache = cache(&server);
        assert!(matches!(
            cache.headers("rAlice").await,
            Err(HttpApiError::AuthToken { .. })
        ));
        assert!(matches!(
            cache.headers("rBob").await,
            Err(HttpApiError::Rejected { .. })
        ));
        assert!(matches!(
            cache.headers("").await,
            Err(HttpApiError::AuthToken { .. })
        ));
    }
}
