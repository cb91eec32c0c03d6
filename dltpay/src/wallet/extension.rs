//! Browser-extension wallet with synchronous sign calls.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::api::BoxFuture;
use crate::capability::BackendKind;
use crate::wallet::{
    Connection, LedgerTransaction, SdkError, SubmitOutcome, Submission, WalletBackend,
    WalletError, WalletSession,
};

/// Where users are sent when the extension is missing.
pub const INSTALL_URL: &str = "https://crossmark.io";

/// Response to a sign-in prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignInResponse {
    /// The account the user picked; `None` if the prompt was closed.
    pub address: Option<String>,
}

/// Response to a sign-and-submit prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitResponse {
    /// The ledger validated the transaction.
    pub validated: bool,
    /// Transaction hash.
    pub hash: Option<String>,
    /// Engine result code, such as `tesSUCCESS`.
    pub engine_result: Option<String>,
}

/// The extension's SDK surface.
pub trait ExtensionSdk: Send + Sync {
    /// Whether the extension is present in this environment.
    fn is_installed(&self) -> bool;

    /// Prompts for sign-in and waits for the user.
    fn sign_in_and_wait(&self) -> BoxFuture<'_, Result<SignInResponse, SdkError>>;

    /// Prompts to sign and submit `tx` and waits for the ledger result.
    fn sign_and_submit_and_wait<'a>(
        &'a self,
        tx: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<SubmitResponse, SdkError>>;
}

/// [`WalletBackend`] over an [`ExtensionSdk`].
pub struct ExtensionBackend<S> {
    sdk: Arc<S>,
    session: Mutex<Option<WalletSession>>,
}

impl<S> fmt::Debug for ExtensionBackend<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionBackend").finish_non_exhaustive()
    }
}

impl<S: ExtensionSdk> ExtensionBackend<S> {
    /// A disconnected backend.
    #[must_use]
    pub fn new(sdk: Arc<S>) -> Self {
        Self {
            sdk,
            session: Mutex::new(None),
        }
    }

    fn require_installed(&self) -> Result<(), WalletError> {
        if self.sdk.is_installed() {
            Ok(())
        } else {
            Err(WalletError::NotDetected {
                backend: BackendKind::Extension.login_method(),
                install_url: INSTALL_URL,
            })
        }
    }

    fn set_session(&self, session: Option<WalletSession>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

impl<S: ExtensionSdk> WalletBackend for ExtensionBackend<S> {
    fn kind(&self) -> BackendKind {
        BackendKind::Extension
    }

    fn connect(&self) -> BoxFuture<'_, Result<Connection, WalletError>> {
        Box::pin(async move {
            self.require_installed()?;
            let response = self.sdk.sign_in_and_wait().await?;
            let address = response.address.ok_or(WalletError::UserCancelled)?;
            let session = WalletSession {
                address,
                backend: BackendKind::Extension,
                identity_provider: None,
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
            self.require_installed()?;
            let json = serde_json::to_value(tx)
                .map_err(|e| WalletError::Rejected(format!("unencodable transaction: {e}")))?;
            let response = self.sdk.sign_and_submit_and_wait(&json).await?;
            if !response.validated {
                return Err(WalletError::Rejected(
                    response
                        .engine_result
                        .unwrap_or_else(|| "not validated".to_owned()),
                ));
            }
            Ok(SubmitOutcome::Submitted(Submission {
                tx_hash: response.hash,
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::capability::Stablecoin;

    /// Scriptable extension SDK.
    #[derive(Debug)]
    pub(crate) struct FakeExtension {
        pub(crate) installed: bool,
        pub(crate) address: Option<String>,
        pub(crate) reject_with: Option<String>,
        pub(crate) submitted: Mutex<Vec<serde_json::Value>>,
        pub(crate) prompts: AtomicUsize,
    }

    impl Default for FakeExtension {
        fn default() -> Self {
            Self {
                installed: true,
                address: Some("rExtension".to_owned()),
                reject_with: None,
                submitted: Mutex::new(Vec::new()),
                prompts: AtomicUsize::new(0),
            }
        }
    }

    impl ExtensionSdk for FakeExtension {
        fn is_installed(&self) -> bool {
            self.installed
        }

        fn sign_in_and_wait(&self) -> BoxFuture<'_, Result<SignInResponse, SdkError>> {
            Box::pin(async move {
                Ok(SignInResponse {
                    address: self.address.clone(),
                })
            })
        }

        fn sign_and_submit_and_wait<'a>(
            &'a self,
            tx: &'a serde_json::Value,
        ) -> BoxFuture<'a, Result<SubmitResponse, SdkError>> {
            Box::pin(async move {
                self.prompts.fetch_add(1, Ordering::SeqCst);
                if let Some(reason) = &self.reject_with {
                    return Err(SdkError(reason.clone()));
                }
                self.submitted.lock().unwrap().push(tx.clone());
                Ok(SubmitResponse {
                    validated: true,
                    hash: Some(format!("HASH{}", self.prompts.load(Ordering::SeqCst))),
                    engine_result: Some("tesSUCCESS".to_owned()),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_missing_extension_is_not_detected() {
        let backend = ExtensionBackend::new(Arc::new(FakeExtension {
            installed: false,
            ..FakeExtension::default()
        }));
        let err = backend.connect().await.unwrap_err();
        assert!(matches!(err, WalletError::NotDetected { install_url: INSTALL_URL, .. }));
    }

    #[tokio::test]
    async fn test_connect_and_submit() {
        let sdk = Arc::new(FakeExtension::default());
        let backend = ExtensionBackend::new(sdk.clone());
        let Connection::Ready(session) = backend.connect().await.unwrap() else {
            panic!("extension connects synchronously");
        };
        assert_eq!(session.address, "rExtension");

        let tx = LedgerTransaction::trust_set("rExtension", Stablecoin::Rlusd);
        let outcome = backend.sign_and_submit(&tx).await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Submitted(Submission {
                tx_hash: Some("HASH1".into())
            })
        );
        assert_eq!(sdk.submitted.lock().unwrap()[0]["TransactionType"], "TrustSet");
    }

    #[tokio::test]
    async fn test_closed_prompt_and_rejection_are_cancellations() {
        let backend = ExtensionBackend::new(Arc::new(FakeExtension {
            address: None,
            reject_with: Some("User rejected the request".into()),
            ..FakeExtension::default()
        }));
        assert_eq!(backend.connect().await.unwrap_err(), WalletError::UserCancelled);
        let tx = LedgerTransaction::clear_signers("rX");
        assert_eq!(
            backend.sign_and_submit(&tx).await.unwrap_err(),
            WalletError::UserCancelled
        );
    }
}
