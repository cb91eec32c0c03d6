//! Delegated-signing onboarding.
//!
//! [`AutoSignOnboarding`] walks one connected wallet through the upgrade to
//! unattended payments:
//!
//! ```text
//! ConnectWallet → FundWallet → AddTrustlines → EnableAutopay → Complete
//! ```
//!
//! The current [`OnboardingStep`] is never stored. It is derived from the
//! [`WalletCapabilitySet`] on every read, so a refresh that reports new funds
//! or trustlines moves the flow forward without any bookkeeping.
//!
//! Only embedded wallets can hold a delegated signer. Push-poll and extension
//! wallets are complete once their trustlines are in place; an extension can
//! additionally opt into attended signing with
//! [`AutoSignOnboarding::enable_attended`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::api::PaymentApi;
use crate::capability::{BackendKind, Limits, Stablecoin, WalletCapabilitySet, WalletStatus, XRP_RESERVE_FLOOR};
use crate::error::PaymentError;
use crate::poller::{PollStatus, SettlementPoller, WatchHandle, WatchOutcome};
use crate::wallet::push::{RequestKind, signed_result, watch_request};
use crate::wallet::{
    Connection, LedgerTransaction, SubmitOutcome, Submission, WalletBackend, WalletSession,
};

/// Verification attempts before giving up on a signer list.
pub const VERIFY_ATTEMPTS: u32 = 5;
/// Backoff unit; attempt `n` waits `n` units first.
pub const VERIFY_BACKOFF: Duration = Duration::from_secs(2);
/// Pause between submitting a signer list and the first verification.
pub const SIGNER_SETTLE_DELAY: Duration = Duration::from_secs(2);
/// Pause after each embedded trustline so the ledger sees them in order.
pub const TRUSTLINE_PAUSE: Duration = Duration::from_secs(2);
/// How long a push-wallet sign request may stay unanswered.
pub const SIGN_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Where a wallet is in the onboarding flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OnboardingStep {
    /// No account connected.
    ConnectWallet,
    /// Unfunded or below the XRP reserve floor.
    FundWallet,
    /// A required stablecoin trustline is missing.
    AddTrustlines,
    /// Trustlines done; the delegated signer is not set.
    EnableAutopay,
    /// Ready for payments.
    Complete,
}

impl OnboardingStep {
    /// Snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectWallet => "connect_wallet",
            Self::FundWallet => "fund_wallet",
            Self::AddTrustlines => "add_trustlines",
            Self::EnableAutopay => "enable_autopay",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The step a capability set is at.
#[must_use]
pub fn derive_step(caps: &WalletCapabilitySet) -> OnboardingStep {
    if caps.address.is_none() {
        OnboardingStep::ConnectWallet
    } else if !caps.xrp_reserve_ok {
        OnboardingStep::FundWallet
    } else if !caps.missing_trustlines().is_empty() {
        OnboardingStep::AddTrustlines
    } else if caps.backend_kind.supports_delegation() && !caps.delegated_signer_configured {
        OnboardingStep::EnableAutopay
    } else {
        OnboardingStep::Complete
    }
}

/// A refresh watch ends once the wallet is funded and fully trusted.
impl PollStatus for WalletStatus {
    fn is_terminal(&self) -> bool {
        self.funded
            && self.xrp_balance >= XRP_RESERVE_FLOOR
            && self.rlusd_trustline
            && self.usdc_trustline
    }
}

/// Result of [`AutoSignOnboarding::add_trustlines`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustlineOutcome {
    /// The missing trustlines were submitted, in order.
    Added(Vec<Submission>),
    /// The wallet must add these itself; a later refresh picks them up.
    ManualActionRequired(Vec<crate::capability::Trustline>),
    /// Nothing was missing.
    AlreadyPresent,
}

/// Onboarding flow for one wallet connection.
pub struct AutoSignOnboarding {
    api: Arc<dyn PaymentApi>,
    backend: Arc<dyn WalletBackend>,
    caps: WalletCapabilitySet,
    store_id: String,
    attended: bool,
}

impl fmt::Debug for AutoSignOnboarding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSignOnboarding")
            .field("store_id", &self.store_id)
            .field("step", &self.step())
            .field("attended", &self.attended)
            .finish_non_exhaustive()
    }
}

impl AutoSignOnboarding {
    /// A flow for `store_id` over `backend`, picking up any live session.
    #[must_use]
    pub fn new(
        api: Arc<dyn PaymentApi>,
        backend: Arc<dyn WalletBackend>,
        store_id: impl Into<String>,
    ) -> Self {
        let mut caps = WalletCapabilitySet::new(backend.kind());
        caps.address = backend.session().map(|s| s.address);
        Self {
            api,
            backend,
            caps,
            store_id: store_id.into(),
            attended: false,
        }
    }

    /// The current step.
    #[must_use]
    pub fn step(&self) -> OnboardingStep {
        derive_step(&self.caps)
    }

    /// The capability set as last refreshed.
    #[must_use]
    pub const fn capabilities(&self) -> &WalletCapabilitySet {
        &self.caps
    }

    /// The active backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn WalletBackend> {
        &self.backend
    }

    /// Whether attended signing is on.
    #[must_use]
    pub const fn is_attended(&self) -> bool {
        self.attended
    }

    fn address(&self) -> Result<String, PaymentError> {
        self.caps
            .address
            .clone()
            .ok_or_else(|| PaymentError::WalletNotReady("connect a wallet first".to_owned()))
    }

    /// Connects the wallet.
    ///
    /// A [`Connection::Pending`] login must be completed out of band, then
    /// handed back with [`Self::attach_session`].
    ///
    /// # Errors
    ///
    /// The backend's failure.
    pub async fn connect(&mut self) -> Result<Connection, PaymentError> {
        let connection = self.backend.connect().await?;
        if let Connection::Ready(session) = &connection {
            self.adopt(session);
        }
        Ok(connection)
    }

    /// Adopts a session completed out of band or rehydrated from storage.
    pub fn attach_session(&mut self, session: WalletSession) {
        self.adopt(&session);
        self.backend.restore(session);
    }

    fn adopt(&mut self, session: &WalletSession) {
        if self.caps.address.as_deref() != Some(session.address.as_str()) {
            let limits = self.caps.limits;
            self.caps = WalletCapabilitySet::new(self.backend.kind()).with_address(&session.address);
            self.caps.limits = limits;
            self.attended = false;
        }
        #[cfg(feature = "telemetry")]
        tracing::info!(address = %session.address, backend = %session.backend, "wallet connected");
    }

    /// Drops the wallet connection and every capability learned about it.
    pub fn disconnect(&mut self) {
        self.backend.disconnect();
        self.caps = WalletCapabilitySet::new(self.backend.kind());
        self.attended = false;
    }

    /// Reloads funding and trustline state from the API.
    ///
    /// # Errors
    ///
    /// [`PaymentError::WalletNotReady`] before a wallet is connected, or the
    /// API's failure.
    pub async fn refresh(&mut self) -> Result<OnboardingStep, PaymentError> {
        let address = self.address()?;
        let status = self.api.get_wallet_status(&address).await?;
        self.caps.apply_status(&status);
        Ok(self.step())
    }

    /// Starts polling the wallet-status endpoint every
    /// [`SettlementPoller::WALLET_STATUS_INTERVAL`].
    ///
    /// `on_update` sees every non-terminal report; the watch ends on the first
    /// report of a funded wallet with both trustlines. Fold the reports back in
    /// with [`Self::apply_status`].
    ///
    /// # Errors
    ///
    /// [`PaymentError::WalletNotReady`] before a wallet is connected.
    pub fn spawn_refresh<U>(&self, on_update: U) -> Result<WatchHandle<WalletStatus>, PaymentError>
    where
        U: FnMut(&WalletStatus) + Send + 'static,
    {
        let address = self.address()?;
        let api = Arc::clone(&self.api);
        let poller = SettlementPoller::new(SettlementPoller::WALLET_STATUS_INTERVAL);
        Ok(poller.watch(
            address,
            move |address| {
                let api = Arc::clone(&api);
                async move { api.get_wallet_status(&address).await }
            },
            on_update,
            |_| {},
        ))
    }

    /// Folds an out-of-band status report into the capability set.
    pub fn apply_status(&mut self, status: &WalletStatus) -> OnboardingStep {
        self.caps.apply_status(status);
        self.step()
    }

    /// Polls until the wallet is funded with both trustlines, or `window`
    /// elapses, and returns the step reached.
    ///
    /// # Errors
    ///
    /// [`PaymentError::WalletNotReady`] before a wallet is connected, or the
    /// closing refresh's failure when the window elapses.
    pub async fn wait_for_wallet(&mut self, window: Duration) -> Result<OnboardingStep, PaymentError> {
        match self.spawn_refresh(|_| {})?.finished_within(window).await {
            WatchOutcome::Terminal(status) => Ok(self.apply_status(&status)),
            WatchOutcome::Cancelled | WatchOutcome::TimedOut => self.refresh().await,
        }
    }

    /// Adds whichever of the RLUSD and USDC trustlines are missing.
    ///
    /// Embedded wallets sign every line in one call, pausing
    /// [`TRUSTLINE_PAUSE`] after each. Extension wallets prompt once per line.
    /// Push-poll wallets cannot be driven here and get
    /// [`TrustlineOutcome::ManualActionRequired`].
    ///
    /// # Errors
    ///
    /// [`PaymentError::WalletNotReady`] unless connected and funded above the
    /// reserve floor, or the wallet's failure. Lines added before a failure
    /// stay recorded.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all, err, fields(store_id = %self.store_id)))]
    pub async fn add_trustlines(&mut self) -> Result<TrustlineOutcome, PaymentError> {
        let address = self.address()?;
        if !self.caps.xrp_reserve_ok {
            return Err(PaymentError::WalletNotReady(format!(
                "fund the wallet with at least {XRP_RESERVE_FLOOR} XRP first"
            )));
        }
        let missing: Vec<Stablecoin> = Stablecoin::REQUIRED
            .into_iter()
            .filter(|coin| !self.caps.has_trustline(*coin))
            .collect();
        if missing.is_empty() {
            return Ok(TrustlineOutcome::AlreadyPresent);
        }
        if self.caps.backend_kind == BackendKind::PushPoll {
            return Ok(TrustlineOutcome::ManualActionRequired(
                missing.into_iter().map(Stablecoin::trustline).collect(),
            ));
        }

        let mut added = Vec::with_capacity(missing.len());
        for coin in missing {
            let tx = LedgerTransaction::trust_set(&address, coin);
            let submission = self.submit(&tx).await?;
            self.caps.trustlines.insert(coin.trustline(), true);
            #[cfg(feature = "telemetry")]
            tracing::info!(%coin, tx_hash = submission.tx_hash.as_deref().unwrap_or_default(), "trustline added");
            added.push(submission);
            if self.caps.backend_kind == BackendKind::Embedded {
                tokio::time::sleep(TRUSTLINE_PAUSE).await;
            }
        }
        Ok(TrustlineOutcome::Added(added))
    }

    /// Grants the platform signer delegated signing rights and pushes
    /// `limits`.
    ///
    /// Skips the signer-list transaction when the API reports the signer is
    /// already in place. Verification runs up to [`VERIFY_ATTEMPTS`] times,
    /// waiting `attempt × VERIFY_BACKOFF` before each; the first confirmation
    /// wins and verification errors count as "not yet".
    ///
    /// # Errors
    ///
    /// [`PaymentError::Unsupported`] for non-embedded wallets,
    /// [`PaymentError::WalletNotReady`] before trustlines are in place or when
    /// the API reports the wallet needs funding (which also sends the flow
    /// back to [`OnboardingStep::FundWallet`]),
    /// [`PaymentError::VerificationTimeout`] when no attempt confirms, or the
    /// wallet's or API's failure.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all, err, fields(store_id = %self.store_id)))]
    pub async fn enable_autopay(&mut self, limits: Limits) -> Result<(), PaymentError> {
        if !self.caps.backend_kind.supports_delegation() {
            return Err(PaymentError::Unsupported {
                action: "auto-sign",
                backend: self.caps.backend_kind.login_method(),
            });
        }
        let address = self.address()?;
        if self.step() < OnboardingStep::EnableAutopay {
            return Err(PaymentError::WalletNotReady(format!(
                "finish the {} step first",
                self.step()
            )));
        }

        let target = self.api.get_delegation_target(&self.store_id).await?;
        if target.needs_funding {
            self.caps.funded = false;
            self.caps.xrp_reserve_ok = false;
            return Err(PaymentError::WalletNotReady(
                "wallet needs funding before auto-sign".to_owned(),
            ));
        }
        if !target.signer_exists {
            let tx = LedgerTransaction::delegate_signer(&address, &target.platform_signer_address);
            self.submit(&tx).await?;
            tokio::time::sleep(SIGNER_SETTLE_DELAY).await;
        }

        if !self.verify_delegation().await {
            return Err(PaymentError::VerificationTimeout {
                attempts: VERIFY_ATTEMPTS,
            });
        }

        self.api
            .update_limits(&self.store_id, &address, &limits)
            .await?;
        self.caps.limits = limits;
        self.caps.delegated_signer_configured = true;
        #[cfg(feature = "telemetry")]
        tracing::info!(%address, "auto-sign enabled");
        Ok(())
    }

    async fn verify_delegation(&self) -> bool {
        for attempt in 1..=VERIFY_ATTEMPTS {
            tokio::time::sleep(VERIFY_BACKOFF * attempt).await;
            match self.api.verify_delegation(&self.store_id).await {
                Ok(true) => return true,
                Ok(false) => {
                    #[cfg(feature = "telemetry")]
                    tracing::debug!(attempt, "signer not confirmed yet");
                }
                Err(err) => log_verify_error(attempt, &err),
            }
        }
        false
    }

    /// Enables attended signing for an extension wallet: each payment still
    /// prompts, within `limits`.
    ///
    /// # Errors
    ///
    /// [`PaymentError::Unsupported`] for other backends,
    /// [`PaymentError::WalletNotReady`] before a wallet is connected, or the
    /// API's failure.
    pub async fn enable_attended(&mut self, limits: Limits) -> Result<(), PaymentError> {
        if self.caps.backend_kind != BackendKind::Extension {
            return Err(PaymentError::Unsupported {
                action: "attended signing",
                backend: self.caps.backend_kind.login_method(),
            });
        }
        let address = self.address()?;
        self.api
            .enable_attended_autosign(&self.store_id, &address, &limits)
            .await?;
        self.caps.limits = limits;
        self.attended = true;
        Ok(())
    }

    /// Removes delegated signing.
    ///
    /// Clears the signer list through the active backend (waiting on the
    /// user's app for push-poll wallets), then confirms with the API using the
    /// transaction hash. An extension in attended mode only needs the API
    /// call.
    ///
    /// # Errors
    ///
    /// [`PaymentError::WalletNotReady`] before a wallet is connected, or the
    /// wallet's or API's failure. The delegated flag is left untouched on
    /// error.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all, err, fields(store_id = %self.store_id)))]
    pub async fn revoke(&mut self) -> Result<Submission, PaymentError> {
        let address = self.address()?;
        let submission = if self.attended && !self.caps.delegated_signer_configured {
            Submission::default()
        } else {
            self.submit(&LedgerTransaction::clear_signers(&address))
                .await?
        };
        self.api
            .revoke_confirm(&self.store_id, submission.tx_hash.as_deref())
            .await?;
        self.caps.delegated_signer_configured = false;
        self.attended = false;
        Ok(submission)
    }

    async fn submit(&self, tx: &LedgerTransaction) -> Result<Submission, PaymentError> {
        match self.backend.sign_and_submit(tx).await? {
            SubmitOutcome::Submitted(submission) => Ok(submission),
            SubmitOutcome::AwaitingSignature(request) => {
                let poller = SettlementPoller::new(SettlementPoller::PAYMENT_INTERVAL);
                let outcome = watch_request(&self.api, RequestKind::Sign, &request.request_id, poller)
                    .finished_within(SIGN_WINDOW)
                    .await;
                let result = signed_result(outcome)?;
                Ok(Submission {
                    tx_hash: result.tx_hash,
                })
            }
        }
    }
}

#[cfg(feature = "telemetry")]
fn log_verify_error(attempt: u32, err: &crate::api::ApiError) {
    tracing::warn!(attempt, error = %err, "signer verification failed");
}

#[cfg(not(feature = "telemetry"))]
const fn log_verify_error(_attempt: u32, _err: &crate::api::ApiError) {}
