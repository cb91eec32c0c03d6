//! A [`PaymentApi`] implementation that talks to the remote payment service
//! over HTTP.
//!
//! [`HttpPaymentApi`] covers the wallet sign-request, tap, payment-link,
//! onboarding and display endpoints under one base URL (for example
//! `https://api.dltpays.com/api/v1/`). The rate quote lives outside that
//! prefix and gets its own URL.
//!
//! ## Error Handling
//!
//! The service answers refusals with a `{success: false, error}` envelope,
//! sometimes with a 200 status and sometimes with a 4xx. Both become
//! [`HttpApiError::Rejected`], which maps to [`ApiError::Rejected`] so the
//! core can classify the refusal code. Transport failures and 5xx statuses map
//! to [`ApiError::Network`].

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use dltpay::BoxFuture;
use dltpay::amount::Money;
use dltpay::api::{
    ApiError, DelegationTarget, DisplayUpdate, PaymentApi, PaymentLink, PushRequest, QrCharge,
    RateQuote, Receipt, SignResult, SignStatus, SplitShareRecord, TapPayment,
};
use dltpay::capability::{Limits, WalletStatus};
use dltpay::intent::{LineItem, PaymentIntent};
use dltpay::wallet::LedgerTransaction;
use http::{HeaderMap, Method, StatusCode};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::{Span, instrument};

use crate::auth::WalletAuthCache;
use crate::error::HttpApiError;

/// Default base URL of the payment service.
pub const DEFAULT_BASE_URL: &str = "https://api.dltpays.com/api/v1/";

/// Path of the quote endpoint, resolved against the service origin.
const CONVERT_PATH: &str = "/convert/gbp-to-rlusd";

/// A client for the remote payment service.
#[derive(Clone, Debug)]
pub struct HttpPaymentApi {
    /// Base URL of the versioned API (e.g. `https://api.dltpays.com/api/v1/`)
    base_url: Url,
    /// Full URL of the fiat-to-stablecoin quote endpoint
    convert_url: Url,
    /// Shared Reqwest HTTP client
    client: Client,
    /// Optional custom headers sent with each request
    headers: HeaderMap,
    /// Optional request timeout
    timeout: Option<Duration>,
    /// Per-wallet tokens for the protected store endpoints
    auth: Arc<WalletAuthCache>,
}

impl HttpPaymentApi {
    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the quote endpoint URL.
    #[must_use]
    pub const fn convert_url(&self) -> &Url {
        &self.convert_url
    }

    /// Returns any custom headers configured on the client.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the wallet-auth token cache.
    #[must_use]
    pub fn wallet_auth(&self) -> &WalletAuthCache {
        &self.auth
    }

    /// Constructs a new [`HttpPaymentApi`] from a base URL.
    ///
    /// The quote endpoint is resolved against the base URL's origin.
    ///
    /// # Errors
    ///
    /// Returns [`HttpApiError::UrlParse`] if endpoint URL construction fails.
    pub fn try_new(base_url: Url) -> Result<Self, HttpApiError> {
        let client = Client::new();
        let convert_url = base_url
            .join(CONVERT_PATH)
            .map_err(|e| HttpApiError::UrlParse {
                context: "Failed to construct quote URL",
                source: e,
            })?;
        let auth_url = base_url
            .join("./wallet/auth-token")
            .map_err(|e| HttpApiError::UrlParse {
                context: "Failed to construct ./wallet/auth-token URL",
                source: e,
            })?;
        Ok(Self {
            auth: Arc::new(WalletAuthCache::new(client.clone(), auth_url)),
            client,
            base_url,
            convert_url,
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the quote endpoint.
    #[must_use]
    pub fn with_convert_url(mut self, convert_url: Url) -> Self {
        self.convert_url = convert_url;
        self
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, HttpApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| HttpApiError::UrlParse {
                context: "Base URL cannot carry a path",
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self.client.request(method, url);
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        req
    }

    /// Generic POST helper.
    ///
    /// `context` is a human-readable identifier used in tracing and error
    /// messages (e.g. `"POST /nfc/payment"`).
    async fn post_json<T, R>(
        &self,
        url: Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, HttpApiError>
    where
        T: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        send_json(self.request(Method::POST, url).json(payload), context).await
    }

    /// Generic GET helper.
    async fn get_json<R>(&self, url: Url, context: &'static str) -> Result<R, HttpApiError>
    where
        R: DeserializeOwned,
    {
        send_json(self.request(Method::GET, url), context).await
    }

    /// POST to a wallet-protected endpoint, attaching the wallet's auth
    /// headers. A wallet with no token is sent unauthenticated and left to the
    /// server to refuse.
    async fn post_json_as<T, R>(
        &self,
        wallet: &str,
        url: Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, HttpApiError>
    where
        T: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let mut req = self.request(Method::POST, url).json(payload);
        match self.auth.headers(wallet).await {
            Ok(headers) => req = req.headers(headers),
            Err(err) => log_auth_unavailable(&err),
        }
        send_json(req, context).await
    }

    async fn push_request<T>(
        &self,
        url: Url,
        context: &'static str,
        payload: &T,
    ) -> Result<PushRequest, HttpApiError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let created: PushCreated = self.post_json(url, context, payload).await?;
        Ok(created.into())
    }

    async fn poll(&self, url: Url, context: &'static str) -> Result<SignStatus, HttpApiError> {
        let body: PollBody = self.get_json(url, context).await?;
        Ok(body.into_status())
    }

    async fn quote(&self, fiat_amount: Money) -> Result<RateQuote, HttpApiError> {
        const CONTEXT: &str = "GET /convert/gbp-to-rlusd";
        let mut url = self.convert_url.clone();
        url.query_pairs_mut()
            .append_pair("amount", &fiat_amount.to_string())
            .append_pair("capture", "true");
        let body: ConvertBody = self.get_json(url, CONTEXT).await?;
        let stablecoin_amount =
            Money::from_decimal(body.rlusd).map_err(|e| HttpApiError::InvalidField {
                context: CONTEXT,
                message: format!("rlusd: {e}"),
            })?;
        Ok(RateQuote {
            fiat_amount,
            stablecoin_amount,
            rate: body.rate.gbp_to_rlusd,
            price_age_ms: body.price_age_ms,
        })
    }
}

/// Sends a prepared request and decodes the response envelope.
///
/// A 200 whose body carries `success: false` (or a bare `error` with no
/// `status`) is a refusal. Any other status is a refusal if its body carries
/// an `error`, and an [`HttpApiError::HttpStatus`] otherwise.
#[cfg_attr(
    feature = "telemetry",
    instrument(
        name = "dltpay.http.request",
        skip_all,
        fields(
            http.context = context,
            otel.status_code = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    )
)]
pub(crate) async fn send_json<R>(
    req: RequestBuilder,
    context: &'static str,
) -> Result<R, HttpApiError>
where
    R: DeserializeOwned,
{
    let http_response = req
        .send()
        .await
        .map_err(|e| HttpApiError::Http { context, source: e })?;

    let result = if http_response.status() == StatusCode::OK {
        match http_response.json::<Map<String, Value>>().await {
            Ok(body) => decode_envelope(body, context),
            Err(e) => Err(HttpApiError::JsonDeserialization { context, source: e }),
        }
    } else {
        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|e| HttpApiError::ResponseBodyRead { context, source: e })?;
        Err(serde_json::from_str::<Map<String, Value>>(&body)
            .ok()
            .and_then(|envelope| refusal(&envelope, context, true))
            .unwrap_or_else(|| HttpApiError::HttpStatus {
                context,
                status,
                body,
            }))
    };

    record_result_on_span(&result);

    result
}

fn decode_envelope<R: DeserializeOwned>(
    body: Map<String, Value>,
    context: &'static str,
) -> Result<R, HttpApiError> {
    if let Some(err) = refusal(&body, context, false) {
        return Err(err);
    }
    serde_json::from_value(Value::Object(body))
        .map_err(|e| HttpApiError::Decode { context, source: e })
}

/// The refusal carried by `body`, if any. Poll responses report failure
/// through `status` and keep their `error` as detail.
fn refusal(
    body: &Map<String, Value>,
    context: &'static str,
    failed_status: bool,
) -> Option<HttpApiError> {
    let success = body.get("success").and_then(Value::as_bool);
    let message = body.get("error").and_then(Value::as_str);
    let refused = match success {
        Some(false) => true,
        Some(true) => false,
        None => message.is_some() && (failed_status || !body.contains_key("status")),
    };
    if !refused {
        return None;
    }
    Some(HttpApiError::Rejected {
        context,
        code: body.get("code").and_then(Value::as_str).map(str::to_owned),
        message: message.unwrap_or("request refused").to_owned(),
    })
}

/// Records the outcome of a request on a tracing span, including status and errors.
#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::event!(tracing::Level::WARN, error = %err, "Request to payment API failed");
        }
    }
}

/// Records the outcome of a request on a tracing span, including status and errors.
/// Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}

#[cfg(feature = "telemetry")]
fn log_auth_unavailable(err: &HttpApiError) {
    tracing::warn!(error = %err, "sending protected request without wallet auth");
}

#[cfg(not(feature = "telemetry"))]
const fn log_auth_unavailable(_err: &HttpApiError) {}

/// Converts a string URL into an [`HttpPaymentApi`], normalizing the trailing
/// slash so relative endpoints resolve under the given path.
impl TryFrom<&str> for HttpPaymentApi {
    type Error = HttpApiError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| HttpApiError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

impl TryFrom<String> for HttpPaymentApi {
    type Error = HttpApiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

/// Any of the sign-request creation responses.
#[derive(Debug, Deserialize)]
struct PushCreated {
    #[serde(alias = "login_id", alias = "payment_id", alias = "uuid")]
    request_id: String,
    #[serde(default, alias = "qr_png")]
    qr_payload: Option<String>,
    #[serde(default)]
    deep_link: Option<String>,
}

impl From<PushCreated> for PushRequest {
    fn from(created: PushCreated) -> Self {
        Self {
            request_id: created.request_id,
            qr_payload: created.qr_payload,
            deep_link: created.deep_link,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PollBody {
    status: String,
    wallet_address: Option<String>,
    tx_hash: Option<String>,
    receipt_id: Option<String>,
    error: Option<String>,
}

impl PollBody {
    fn into_status(self) -> SignStatus {
        SignStatus::from_wire(
            &self.status,
            SignResult {
                account: self.wallet_address,
                tx_hash: self.tx_hash,
                receipt_id: self.receipt_id,
            },
            self.error,
        )
    }
}

#[derive(Debug, Serialize)]
struct SignBody<'a> {
    tx_json: &'a LedgerTransaction,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct LinkCreate<'a> {
    store_id: &'a str,
    store_name: &'a str,
    vendor_wallet: &'a str,
    amount: Money,
    items: Vec<LineItem>,
    tip: Option<Money>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct LinkPay<'a> {
    card_uid: Option<&'a str>,
    payer_wallet: Option<&'a str>,
    tx_hash: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SplitBody {
    num_splits: u16,
}

#[derive(Debug, Deserialize)]
struct SplitCreated {
    splits: Vec<SplitShareRecord>,
}

#[derive(Debug, Serialize)]
struct StoreRef<'a> {
    store_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct DelegationState {
    #[serde(default, alias = "auto_sign_enabled")]
    auto_signing_enabled: bool,
}

#[derive(Debug, Serialize)]
struct StoreSettings<'a> {
    store_id: &'a str,
    wallet_address: &'a str,
    daily_limit: Money,
    auto_sign_max_single_payout: Money,
}

#[derive(Debug, Serialize)]
struct EnableAutosign<'a> {
    store_id: &'a str,
    wallet_address: &'a str,
    daily_limit: Money,
    max_single_payout: Money,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct RevokeBody<'a> {
    store_id: &'a str,
    tx_hash: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ConvertBody {
    rlusd: Decimal,
    rate: ConvertRate,
    #[serde(default)]
    price_age_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ConvertRate {
    gbp_to_rlusd: Decimal,
}

#[derive(Debug, Serialize)]
struct EmailBody<'a> {
    email: &'a str,
    payment_url: &'a str,
    store_name: &'a str,
    amount: Money,
}

impl PaymentApi for HttpPaymentApi {
    fn create_login_request(&self) -> BoxFuture<'_, Result<PushRequest, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["xaman", "login"])?;
            Ok(self.push_request(url, "POST /xaman/login", &Map::new()).await?)
        })
    }

    fn poll_login_status<'a>(
        &'a self,
        request_id: &'a str,
    ) -> BoxFuture<'a, Result<SignStatus, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["xaman", "login", "poll", request_id])?;
            Ok(self.poll(url, "GET /xaman/login/poll").await?)
        })
    }

    fn create_payment_request<'a>(
        &'a self,
        charge: &'a QrCharge,
    ) -> BoxFuture<'a, Result<PushRequest, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["xaman", "payment"])?;
            Ok(self.push_request(url, "POST /xaman/payment", charge).await?)
        })
    }

    fn poll_payment_status<'a>(
        &'a self,
        request_id: &'a str,
    ) -> BoxFuture<'a, Result<SignStatus, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["xaman", "payment", "poll", request_id])?;
            Ok(self.poll(url, "GET /xaman/payment/poll").await?)
        })
    }

    fn create_sign_request<'a>(
        &'a self,
        tx: &'a LedgerTransaction,
    ) -> BoxFuture<'a, Result<PushRequest, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["xaman", "sign"])?;
            Ok(self
                .push_request(url, "POST /xaman/sign", &SignBody { tx_json: tx })
                .await?)
        })
    }

    fn poll_sign_status<'a>(
        &'a self,
        request_id: &'a str,
    ) -> BoxFuture<'a, Result<SignStatus, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["xaman", "poll", request_id])?;
            Ok(self.poll(url, "GET /xaman/poll").await?)
        })
    }

    fn submit_tap_payment<'a>(
        &'a self,
        payment: &'a TapPayment,
    ) -> BoxFuture<'a, Result<Receipt, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["nfc", "payment"])?;
            Ok(self.post_json(url, "POST /nfc/payment", payment).await?)
        })
    }

    fn pay_link_with_card<'a>(
        &'a self,
        link_id: &'a str,
        payment: &'a TapPayment,
    ) -> BoxFuture<'a, Result<Receipt, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["payment-link", link_id, "pay"])?;
            let body = LinkPay {
                card_uid: Some(&payment.uid),
                payer_wallet: None,
                tx_hash: None,
            };
            Ok(self.post_json(url, "POST /payment-link/pay", &body).await?)
        })
    }

    fn create_payment_link<'a>(
        &'a self,
        intent: &'a PaymentIntent,
    ) -> BoxFuture<'a, Result<PaymentLink, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["payment-link", "create"])?;
            let body = LinkCreate {
                store_id: &intent.store_id,
                store_name: &intent.store_name,
                vendor_wallet: &intent.vendor_wallet,
                amount: intent.total(),
                items: intent.submission_items(),
                tip: intent.tip().is_positive().then(|| intent.tip()),
            };
            Ok(self.post_json(url, "POST /payment-link/create", &body).await?)
        })
    }

    fn confirm_link_payment<'a>(
        &'a self,
        link_id: &'a str,
        payer_wallet: &'a str,
        tx_hash: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["payment-link", link_id, "pay"])?;
            let body = LinkPay {
                card_uid: None,
                payer_wallet: Some(payer_wallet),
                tx_hash,
            };
            let _: IgnoredAny = self.post_json(url, "POST /payment-link/pay", &body).await?;
            Ok(())
        })
    }

    fn split_payment<'a>(
        &'a self,
        parent_id: &'a str,
        parts: u16,
    ) -> BoxFuture<'a, Result<Vec<SplitShareRecord>, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["payment-link", parent_id, "split"])?;
            let created: SplitCreated = self
                .post_json(url, "POST /payment-link/split", &SplitBody { num_splits: parts })
                .await?;
            Ok(created.splits)
        })
    }

    fn get_wallet_status<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, Result<WalletStatus, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["wallet", "status", address])?;
            Ok(self.get_json(url, "GET /wallet/status").await?)
        })
    }

    fn get_delegation_target<'a>(
        &'a self,
        store_id: &'a str,
    ) -> BoxFuture<'a, Result<DelegationTarget, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["xaman", "setup-autosign"])?;
            Ok(self
                .post_json(url, "POST /xaman/setup-autosign", &StoreRef { store_id })
                .await?)
        })
    }

    fn verify_delegation<'a>(&'a self, store_id: &'a str) -> BoxFuture<'a, Result<bool, ApiError>> {
        Box::pin(async move {
            let mut url = self.endpoint(&["xaman", "verify-autosign"])?;
            url.query_pairs_mut().append_pair("store_id", store_id);
            let state: DelegationState = self.get_json(url, "GET /xaman/verify-autosign").await?;
            Ok(state.auto_signing_enabled)
        })
    }

    fn update_limits<'a>(
        &'a self,
        store_id: &'a str,
        wallet: &'a str,
        limits: &'a Limits,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["store", "settings"])?;
            let body = StoreSettings {
                store_id,
                wallet_address: wallet,
                daily_limit: limits.daily_max,
                auto_sign_max_single_payout: limits.per_tx_max,
            };
            let _: IgnoredAny = self
                .post_json_as(wallet, url, "POST /store/settings", &body)
                .await?;
            Ok(())
        })
    }

    fn enable_attended_autosign<'a>(
        &'a self,
        store_id: &'a str,
        wallet: &'a str,
        limits: &'a Limits,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["store", "enable-autosign"])?;
            let body = EnableAutosign {
                store_id,
                wallet_address: wallet,
                daily_limit: limits.daily_max,
                max_single_payout: limits.per_tx_max,
            };
            let _: IgnoredAny = self
                .post_json_as(wallet, url, "POST /store/enable-autosign", &body)
                .await?;
            Ok(())
        })
    }

    fn revoke_confirm<'a>(
        &'a self,
        store_id: &'a str,
        tx_hash: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["store", "revoke-autosign"])?;
            let _: IgnoredAny = self
                .post_json(url, "POST /store/revoke-autosign", &RevokeBody { store_id, tx_hash })
                .await?;
            Ok(())
        })
    }

    fn convert(&self, fiat_amount: Money) -> BoxFuture<'_, Result<RateQuote, ApiError>> {
        Box::pin(async move { Ok(self.quote(fiat_amount).await?) })
    }

    fn email_payment_link<'a>(
        &'a self,
        email: &'a str,
        payment_url: &'a str,
        store_name: &'a str,
        amount: Money,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["payment-link", "send-email"])?;
            let email = email.trim().to_lowercase();
            let body = EmailBody {
                email: &email,
                payment_url,
                store_name,
                amount,
            };
            let _: IgnoredAny = self
                .post_json(url, "POST /payment-link/send-email", &body)
                .await?;
            Ok(())
        })
    }

    fn update_display<'a>(
        &'a self,
        update: &'a DisplayUpdate,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let url = self.endpoint(&["display", "update"])?;
            let _: IgnoredAny = self.post_json(url, "POST /display/update", update).await?;
            Ok(())
        })
    }
}
