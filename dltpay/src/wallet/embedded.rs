//! Embedded social-login wallet: the provider holds the key and submits
//! transactions directly.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};

use crate::api::BoxFuture;
use crate::capability::BackendKind;
use crate::wallet::{
    Connection, LedgerTransaction, SdkError, SubmitOutcome, Submission, WalletBackend,
    WalletError, WalletSession,
};

/// Identity provider assumed when the provider does not report one.
pub const DEFAULT_IDENTITY_PROVIDER: &str = "google";

/// The logged-in user as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderUser {
    /// Social connection used, such as `google` or `discord`.
    pub auth_connection: Option<String>,
}

/// JSON-RPC style provider surface.
pub trait EmbeddedProvider: Send + Sync {
    /// Runs the social login handshake.
    fn connect(&self) -> BoxFuture<'_, Result<ProviderUser, SdkError>>;

    /// Whether a provider session is live.
    fn is_connected(&self) -> bool;

    /// Calls a provider method.
    fn request<'a>(&'a self, method: &'a str, params: Value)
    -> BoxFuture<'a, Result<Value, SdkError>>;
}

/// [`WalletBackend`] over an [`EmbeddedProvider`].
pub struct EmbeddedBackend<P> {
    provider: Arc<P>,
    session: Mutex<Option<WalletSession>>,
}

impl<P> fmt::Debug for EmbeddedBackend<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedBackend").finish_non_exhaustive()
    }
}

impl<P: EmbeddedProvider> EmbeddedBackend<P> {
    /// A disconnected backend.
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            session: Mutex::new(None),
        }
    }

    fn set_session(&self, session: Option<WalletSession>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

/// Pulls a transaction hash out of the provider's submit response, which
/// varies between `hash`, `tx_hash` and `result.hash`.
fn extract_hash(response: &Value) -> Option<String> {
    [
        response.get("hash"),
        response.get("tx_hash"),
        response.get("result").and_then(|r| r.get("hash")),
        response.pointer("/result/tx_json/hash"),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| v.as_str().map(str::to_owned))
}

impl<P: EmbeddedProvider> WalletBackend for EmbeddedBackend<P> {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    fn connect(&self) -> BoxFuture<'_, Result<Connection, WalletError>> {
        Box::pin(async move {
            let user = self.provider.connect().await?;
            let accounts = self.provider.request("xrpl_getAccounts", Value::Null).await?;
            let address = accounts
                .as_array()
                .and_then(|a| a.first())
                .and_then(Value::as_str)
                .ok_or_else(|| WalletError::Rejected("No wallet address returned".to_owned()))?
                .to_owned();
            let session = WalletSession {
                address,
                backend: BackendKind::Embedded,
                identity_provider: Some(
                    user.auth_connection
                        .unwrap_or_else(|| DEFAULT_IDENTITY_PROVIDER.to_owned()),
                ),
            };
            self.set_session(Some(session.clone()));
            Ok(Connection::Ready(session))
        })
    }

    fn sign_and_submit<'a>(
        &'a self,
        tx: &'a LedgerTransaction,
    ) -> BoxFuture<'a, Result<SubmitOutcome, WalletError>> {
        Box::pin(async move {
            if !self.provider.is_connected() {
                return Err(WalletError::SessionExpired);
            }
            let response = self
                .provider
                .request("xrpl_submitTransaction", json!({ "transaction": tx }))
                .await?;
            if let Some(code) = response
                .pointer("/result/engine_result")
                .and_then(Value::as_str)
                .filter(|code| !code.starts_with("tes"))
            {
                return Err(WalletError::Rejected(code.to_owned()));
            }
            Ok(SubmitOutcome::Submitted(Submission {
                tx_hash: extract_hash(&response),
            }))
        })
    }

    fn session(&self) -> Option<WalletSession> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn restore(&self, session: WalletSession) {
        self.set_session(Some(session));
    }

    fn disconnect(&self) {
        self.set_session(None);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::capability::Stablecoin;

    /// Scriptable embedded provider recording every submitted transaction.
    #[derive(Debug)]
    pub(crate) struct FakeProvider {
        pub(crate) connected: AtomicBool,
        pub(crate) auth_connection: Option<String>,
        pub(crate) submitted: Mutex<Vec<Value>>,
        pub(crate) engine_result: String,
    }

    impl Default for FakeProvider {
        fn default() -> Self {
            Self {
                connected: AtomicBool::new(false),
                auth_connection: None,
                submitted: Mutex::new(Vec::new()),
                engine_result: "tesSUCCESS".to_owned(),
            }
        }
    }

    impl FakeProvider {
        pub(crate) fn submitted_types(&self) -> Vec<String> {
            self.submitted
                .lock()
                .unwrap()
                .iter()
                .map(|tx| tx["TransactionType"].as_str().unwrap().to_owned())
                .collect()
        }
    }

    impl EmbeddedProvider for FakeProvider {
        fn connect(&self) -> BoxFuture<'_, Result<ProviderUser, SdkError>> {
            Box::pin(async move {
                self.connected.store(true, Ordering::SeqCst);
                Ok(ProviderUser {
                    auth_connection: self.auth_connection.clone(),
                })
            })
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn request<'a>(
            &'a self,
            method: &'a str,
            params: Value,
        ) -> BoxFuture<'a, Result<Value, SdkError>> {
            Box::pin(async move {
                match method {
                    "xrpl_getAccounts" => Ok(json!(["rEmbedded"])),
                    "xrpl_submitTransaction" => {
                        let mut submitted = self.submitted.lock().unwrap();
                        submitted.push(params["transaction"].clone());
                        Ok(json!({
                            "result": {
                                "hash": format!("EMB{}", submitted.len()),
                                "engine_result": self.engine_result,
                            }
                        }))
                    }
                    other => Err(SdkError(format!("unknown method {other}"))),
                }
            })
        }
    }

    #[test]
    fn test_extract_hash_variants() {
        assert_eq!(extract_hash(&json!({"hash": "A"})), Some("A".into()));
        assert_eq!(extract_hash(&json!({"tx_hash": "B"})), Some("B".into()));
        assert_eq!(extract_hash(&json!({"result": {"hash": "C"}})), Some("C".into()));
        assert_eq!(extract_hash(&json!({"status": "ok"})), None);
    }

    #[tokio::test]
    async fn test_connect_defaults_identity_provider() {
        let backend = EmbeddedBackend::new(Arc::new(FakeProvider::default()));
        let Connection::Ready(session) = backend.connect().await.unwrap() else {
            panic!("embedded connects synchronously");
        };
        assert_eq!(session.address, "rEmbedded");
        assert_eq!(session.identity_provider.as_deref(), Some("google"));

        let backend = EmbeddedBackend::new(Arc::new(FakeProvider {
            auth_connection: Some("discord".into()),
            ..FakeProvider::default()
        }));
        let Connection::Ready(session) = backend.connect().await.unwrap() else {
            panic!("embedded connects synchronously");
        };
        assert_eq!(session.identity_provider.as_deref(), Some("discord"));
    }

    #[tokio::test]
    async fn test_submit_requires_live_provider_session() {
        let provider = Arc::new(FakeProvider::default());
        let backend = EmbeddedBackend::new(provider.clone());
        let tx = LedgerTransaction::trust_set("rEmbedded", Stablecoin::Rlusd);
        assert_eq!(
            backend.sign_and_submit(&tx).await.unwrap_err(),
            WalletError::SessionExpired
        );

        backend.connect().await.unwrap();
        let outcome = backend.sign_and_submit(&tx).await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Submitted(Submission {
                tx_hash: Some("EMB1".into())
            })
        );
    }

    #[tokio::test]
    async fn test_failed_engine_result_is_rejected() {
        let provider = Arc::new(FakeProvider {
            engine_result: "tecNO_LINE_INSUF_RESERVE".into(),
            ..FakeProvider::default()
        });
        let backend = EmbeddedBackend::new(provider);
        backend.connect().await.unwrap();
        let tx = LedgerTransaction::trust_set("rEmbedded", Stablecoin::Usdc);
        assert!(matches!(
            backend.sign_and_submit(&tx).await.unwrap_err(),
            WalletError::Rejected(code) if code.starts_with("tec")
        ));
    }
}
