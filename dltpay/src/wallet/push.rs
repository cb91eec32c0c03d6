//! Push-notification wallet: every request is signed in the user's app and
//! observed by polling the payment API.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::api::{BoxFuture, PaymentApi, PushRequest, SignStatus};
use crate::capability::BackendKind;
use crate::poller::{SettlementPoller, WatchHandle, WatchOutcome};
use crate::wallet::{
    Connection, LedgerTransaction, SubmitOutcome, Submission, WalletBackend, WalletError,
    WalletSession,
};

/// Which poll endpoint a push request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// A login request.
    Login,
    /// A QR payment request.
    Payment,
    /// A generic transaction sign request.
    Sign,
}

/// Push-poll wallet backed by the payment API.
pub struct PushPollBackend {
    api: Arc<dyn PaymentApi>,
    session: Mutex<Option<WalletSession>>,
}

impl fmt::Debug for PushPollBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushPollBackend")
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}

impl PushPollBackend {
    /// A disconnected backend.
    #[must_use]
    pub fn new(api: Arc<dyn PaymentApi>) -> Self {
        Self {
            api,
            session: Mutex::new(None),
        }
    }

    fn set_session(&self, session: Option<WalletSession>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Starts watching `request` on the endpoint for `kind`.
    #[must_use]
    pub fn watch(
        &self,
        kind: RequestKind,
        request: &PushRequest,
        poller: SettlementPoller,
    ) -> WatchHandle<SignStatus> {
        watch_request(&self.api, kind, &request.request_id, poller)
    }

    /// Waits for the user to approve a login, storing the session on success.
    ///
    /// # Errors
    ///
    /// [`WalletError::SessionExpired`] if the request expires or `window`
    /// elapses, [`WalletError::UserCancelled`] if declined, and
    /// [`WalletError::Rejected`] if the API reports failure or no account.
    pub async fn await_login(
        &self,
        request: &PushRequest,
        window: Duration,
    ) -> Result<WalletSession, WalletError> {
        let poller = SettlementPoller::new(SettlementPoller::LOGIN_INTERVAL);
        let outcome = self
            .watch(RequestKind::Login, request, poller)
            .finished_within(window)
            .await;
        let result = signed_result(outcome)?;
        let address = result
            .account
            .ok_or_else(|| WalletError::Rejected("login signed without an account".to_owned()))?;
        let session = WalletSession {
            address,
            backend: BackendKind::PushPoll,
            identity_provider: None,
        };
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    /// Waits for the user to sign a transaction request.
    ///
    /// # Errors
    ///
    /// As for [`Self::await_login`].
    pub async fn await_signature(
        &self,
        request: &PushRequest,
        window: Duration,
    ) -> Result<Submission, WalletError> {
        let poller = SettlementPoller::new(SettlementPoller::PAYMENT_INTERVAL);
        let outcome = self
            .watch(RequestKind::Sign, request, poller)
            .finished_within(window)
            .await;
        let result = signed_result(outcome)?;
        Ok(Submission {
            tx_hash: result.tx_hash,
        })
    }
}

/// Polls `request_id` on the endpoint for `kind` until it is terminal.
#[must_use]
pub fn watch_request(
    api: &Arc<dyn PaymentApi>,
    kind: RequestKind,
    request_id: &str,
    poller: SettlementPoller,
) -> WatchHandle<SignStatus> {
    let api = Arc::clone(api);
    poller.watch(
        request_id,
        move |id| {
            let api = Arc::clone(&api);
            async move {
                match kind {
                    RequestKind::Login => api.poll_login_status(&id).await,
                    RequestKind::Payment => api.poll_payment_status(&id).await,
                    RequestKind::Sign => api.poll_sign_status(&id).await,
                }
            }
        },
        |_| {},
        |_| {},
    )
}

pub(crate) fn signed_result(
    outcome: WatchOutcome<SignStatus>,
) -> Result<crate::api::SignResult, WalletError> {
    match outcome {
        WatchOutcome::Terminal(SignStatus::Signed(result)) => Ok(result),
        WatchOutcome::Terminal(SignStatus::Expired) | WatchOutcome::TimedOut => {
            Err(WalletError::SessionExpired)
        }
        WatchOutcome::Terminal(SignStatus::Cancelled) | WatchOutcome::Cancelled => {
            Err(WalletError::UserCancelled)
        }
        WatchOutcome::Terminal(SignStatus::Failed(message)) => Err(WalletError::Rejected(message)),
        WatchOutcome::Terminal(SignStatus::Pending | SignStatus::Opened) => Err(
            WalletError::Rejected("watch ended on a non-terminal status".to_owned()),
        ),
    }
}

impl WalletBackend for PushPollBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PushPoll
    }

    fn connect(&self) -> BoxFuture<'_, Result<Connection, WalletError>> {
        Box::pin(async move {
            let request = self.api.create_login_request().await?;
            Ok(Connection::Pending(request))
        })
    }

    fn sign_and_submit<'a>(
        &'a self,
        tx: &'a LedgerTransaction,
    ) -> BoxFuture<'a, Result<SubmitOutcome, WalletError>> {
        Box::pin(async move {
            let request = self.api.create_sign_request(tx).await?;
            Ok(SubmitOutcome::AwaitingSignature(request))
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
