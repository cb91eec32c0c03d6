//! The per-checkout payment state machine.
//!
//! A [`PaymentSession`] drives one [`PaymentIntent`] from `Idle` to `Settled`
//! over exactly one channel per attempt:
//!
//! ```text
//! Idle ─┬─ begin_qr ────► Qr ─────────┐
//!       ├─ begin_tap ───► WaitingNfc ─┼─► Processing ─┬─► Settled
//!       ├─ issue_link ──► LinkIssued  │               └─► Failed ──► (re-entry)
//!       └─ pay_with_wallet ───────────┘
//! ```
//!
//! `Idle` and `Failed` accept channel entry. Every entry checks the amount
//! floor and the intent's expiry before any network call. `Settled` is
//! reached at most once per session.
//!
//! A QR or push signature must arrive within the session's QR window
//! (default [`SettlementPoller::PAYMENT_WINDOW`]), or the attempt fails as
//! expired. [`PaymentSession::next_outcome`] is cancel-safe while waiting for
//! a signature.
//!
//! Tap submissions are serialized by the [`ChannelReader`]'s in-flight flag:
//! it is released after every submission, and the reader is reset once the
//! attempt reaches an outcome.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::amount::Money;
use crate::api::{ApiError, ApiErrorCode, PaymentApi, PaymentLink, PushRequest, QrCharge, Receipt, SignStatus, TapPayment};
use crate::error::PaymentError;
use crate::hooks::{HookSet, SessionHooks, SubmitContext, TransitionContext};
use crate::intent::{IntentStatus, PaymentIntent};
use crate::poller::{SettlementPoller, WatchHandle, WatchOutcome};
use crate::reader::{CardEvent, CardEvents, ChannelReader, ReaderError, normalize_card_id};
use crate::wallet::push::{RequestKind, watch_request};
use crate::wallet::{LedgerTransaction, SubmitOutcome, WalletBackend, WalletError};

/// How a payment reaches the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Payer scans a QR code with a push wallet.
    Qr,
    /// Payer taps a registered card.
    Tap,
    /// Payer opens a payment link.
    Link,
    /// Payer signs with their own connected wallet.
    Wallet,
}

/// Why an attempt failed, in terms the front end can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The request or intent expired.
    Expired,
    /// The payer declined.
    Cancelled,
    /// The card's wallet has not granted delegated signing.
    NoSignerAuthority,
    /// The payer's balance is too low.
    InsufficientFunds,
    /// Payer and vendor are the same account.
    SelfPayment,
    /// The card is not linked to a wallet.
    CardNotRegistered,
    /// The payer's wallet has not finished setup.
    WalletNotReady,
    /// Generic refusal with the server's message.
    Declined(String),
    /// Transport failure.
    Network,
}

impl FailureReason {
    /// Classifies an error.
    #[must_use]
    pub fn from_error(err: &PaymentError) -> Self {
        match err {
            PaymentError::Api(ApiError::Network(_)) | PaymentError::Wallet(WalletError::Network(_)) => {
                Self::Network
            }
            PaymentError::Api(ApiError::Rejected { code, message }) => match code {
                ApiErrorCode::NoSignerAuthority => Self::NoSignerAuthority,
                ApiErrorCode::InsufficientFunds => Self::InsufficientFunds,
                ApiErrorCode::SelfPaymentNotAllowed => Self::SelfPayment,
                ApiErrorCode::WalletNotReady => Self::WalletNotReady,
                ApiErrorCode::CardNotRegistered => Self::CardNotRegistered,
                ApiErrorCode::Other => Self::Declined(message.clone()),
            },
            PaymentError::Wallet(WalletError::UserCancelled) | PaymentError::Cancelled => {
                Self::Cancelled
            }
            PaymentError::Wallet(WalletError::SessionExpired) | PaymentError::Expired => {
                Self::Expired
            }
            PaymentError::Wallet(WalletError::NotDetected { .. })
            | PaymentError::WalletNotReady(_) => Self::WalletNotReady,
            PaymentError::SelfPayment => Self::SelfPayment,
            PaymentError::Wallet(WalletError::Rejected(message))
            | PaymentError::Aborted { message, .. } => Self::Declined(message.clone()),
            other => Self::Declined(other.to_string()),
        }
    }
}

/// Where a session stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No channel engaged.
    Idle,
    /// Waiting for a QR or push signature.
    Qr,
    /// Reader scanning for a card.
    WaitingNfc,
    /// Handed off to a payment link.
    LinkIssued,
    /// A submission is in flight.
    Processing,
    /// Confirmed on ledger.
    Settled,
    /// The last attempt failed.
    Failed(FailureReason),
}

impl SessionState {
    /// Snake-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Qr => "qr",
            Self::WaitingNfc => "waiting_nfc",
            Self::LinkIssued => "link_issued",
            Self::Processing => "processing",
            Self::Settled => "settled",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether a channel may be entered from here.
    #[must_use]
    pub const fn accepts_entry(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed(_))
    }

    /// Whether the attempt has an outcome.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Failed(_))
    }
}

/// Proof of settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Channel that settled.
    pub channel: Channel,
    /// Ledger hash, when reported.
    pub tx_hash: Option<String>,
    /// Server receipt id, when reported.
    pub receipt_id: Option<String>,
    /// Paying account, when known.
    pub payer: Option<String>,
}

/// Result of [`PaymentSession::pay_with_wallet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletPayment {
    /// The wallet signed and submitted synchronously.
    Settled(Settlement),
    /// A push wallet must sign; drive [`PaymentSession::next_outcome`].
    AwaitingSignature(PushRequest),
}

struct ActiveWatch {
    handle: WatchHandle<SignStatus>,
    channel: Channel,
    payer: Option<String>,
    deadline: Instant,
}

/// One checkout.
pub struct PaymentSession {
    api: Arc<dyn PaymentApi>,
    intent: PaymentIntent,
    state: SessionState,
    reader: Option<ChannelReader>,
    cards: Option<CardEvents>,
    watch: Option<ActiveWatch>,
    qr_payload: Option<String>,
    link: Option<PaymentLink>,
    settlement: Option<Settlement>,
    hooks: HookSet,
    poller: SettlementPoller,
    qr_window: Duration,
    staff_id: Option<String>,
    abort: CancellationToken,
}

impl fmt::Debug for PaymentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentSession")
            .field("intent", &self.intent.id)
            .field("state", &self.state)
            .field("settlement", &self.settlement)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl PaymentSession {
    /// An idle session for `intent`.
    #[must_use]
    pub fn new(api: Arc<dyn PaymentApi>, intent: PaymentIntent) -> Self {
        Self {
            api,
            intent,
            state: SessionState::Idle,
            reader: None,
            cards: None,
            watch: None,
            qr_payload: None,
            link: None,
            settlement: None,
            hooks: HookSet::default(),
            poller: SettlementPoller::new(SettlementPoller::PAYMENT_INTERVAL),
            qr_window: SettlementPoller::PAYMENT_WINDOW,
            staff_id: None,
            abort: CancellationToken::new(),
        }
    }

    /// Attaches the contactless reader used by the tap channel.
    #[must_use]
    pub fn with_reader(mut self, reader: ChannelReader) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Registers a lifecycle hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn SessionHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Overrides the QR confirmation poller.
    #[must_use]
    pub const fn with_poller(mut self, poller: SettlementPoller) -> Self {
        self.poller = poller;
        self
    }

    /// How long a QR or push signature request may stay unanswered before
    /// the attempt fails as expired.
    #[must_use]
    pub const fn with_qr_window(mut self, window: Duration) -> Self {
        self.qr_window = window;
        self
    }

    /// Attributes tap payments to a staff member.
    #[must_use]
    pub fn with_staff_id(mut self, staff_id: impl Into<String>) -> Self {
        self.staff_id = Some(staff_id.into());
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// The intent being paid.
    #[must_use]
    pub const fn intent(&self) -> &PaymentIntent {
        &self.intent
    }

    /// The settlement, once reached.
    #[must_use]
    pub const fn settlement(&self) -> Option<&Settlement> {
        self.settlement.as_ref()
    }

    /// The issued payment link, if any.
    #[must_use]
    pub const fn link(&self) -> Option<&PaymentLink> {
        self.link.as_ref()
    }

    /// QR payload currently on screen.
    #[must_use]
    pub fn qr_payload(&self) -> Option<&str> {
        self.qr_payload.as_deref()
    }

    /// The attached reader.
    #[must_use]
    pub const fn reader(&self) -> Option<&ChannelReader> {
        self.reader.as_ref()
    }

    /// A token that cancels the current channel attempt from another task.
    ///
    /// Each channel entry issues a fresh token, so fetch it after entering.
    #[must_use]
    pub fn canceller(&self) -> CancellationToken {
        self.abort.clone()
    }

    async fn enter(&mut self, state: SessionState) {
        #[cfg(feature = "telemetry")]
        tracing::debug!(
            intent = %self.intent.id,
            from = self.state.as_str(),
            to = state.as_str(),
            "session transition"
        );
        self.state = state;
        self.hooks
            .transitioned(TransitionContext {
                state: &self.state,
                intent: &self.intent,
                qr_payload: self.qr_payload.as_deref(),
            })
            .await;
    }

    fn prepare_entry(&mut self, action: &'static str) -> Result<(), PaymentError> {
        if !self.state.accepts_entry() {
            return Err(PaymentError::InvalidTransition {
                action,
                state: self.state.as_str(),
            });
        }
        self.intent.checked_total()?.require_positive()?;
        self.intent.ensure_open(SystemTime::now())?;
        if self.intent.status() == IntentStatus::Failed {
            self.intent.transition(IntentStatus::Pending)?;
        }
        self.abort = CancellationToken::new();
        Ok(())
    }

    /// Changes the tip.
    ///
    /// # Errors
    ///
    /// [`PaymentError::InvalidTransition`] while a QR, link or submission
    /// already carries the amount, [`PaymentError::AlreadySettled`] after
    /// settlement.
    pub fn set_tip(&mut self, tip: Money) -> Result<(), PaymentError> {
        if matches!(
            self.state,
            SessionState::Qr | SessionState::LinkIssued | SessionState::Processing
        ) {
            return Err(PaymentError::InvalidTransition {
                action: "change tip",
                state: self.state.as_str(),
            });
        }
        self.intent.set_tip(tip)
    }

    /// Shows a QR payment request and starts watching it.
    ///
    /// # Errors
    ///
    /// Entry checks (state, amount floor, expiry), a hook abort, or the API
    /// refusing to create the request. The session state is unchanged.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all, err, fields(intent = %self.intent.id)))]
    pub async fn begin_qr(&mut self) -> Result<PushRequest, PaymentError> {
        self.prepare_entry("show QR")?;
        self.hooks
            .before_submit(SubmitContext {
                intent: &self.intent,
                channel: Channel::Qr,
            })
            .await?;
        let charge = QrCharge {
            amount: self.intent.total(),
            vendor_wallet: self.intent.vendor_wallet.clone(),
            store_id: self.intent.store_id.clone(),
            store_name: self.intent.store_name.clone(),
        };
        let request = self.api.create_payment_request(&charge).await?;
        self.intent.transition(IntentStatus::QrIssued)?;
        let handle = watch_request(&self.api, RequestKind::Payment, &request.request_id, self.poller);
        self.watch = Some(ActiveWatch {
            handle,
            channel: Channel::Qr,
            payer: None,
            deadline: Instant::now() + self.qr_window,
        });
        self.qr_payload.clone_from(&request.qr_payload);
        self.enter(SessionState::Qr).await;
        Ok(request)
    }

    /// Starts the reader and waits for a card.
    ///
    /// # Errors
    ///
    /// Entry checks, a missing reader ([`ReaderError::NotSupported`]), or the
    /// reader failing to start.
    pub async fn begin_tap(&mut self) -> Result<(), PaymentError> {
        self.prepare_entry("start tap")?;
        let reader = self.reader.as_mut().ok_or(ReaderError::NotSupported)?;
        let cards = reader.start().await?;
        self.cards = Some(cards);
        self.enter(SessionState::WaitingNfc).await;
        Ok(())
    }

    /// Persists the intent server-side as a payment link.
    ///
    /// The payer drives their own session against the link; nothing is
    /// polled here.
    ///
    /// # Errors
    ///
    /// Entry checks or the API refusing to create the link.
    pub async fn issue_link(&mut self) -> Result<PaymentLink, PaymentError> {
        self.prepare_entry("issue link")?;
        let link = self.api.create_payment_link(&self.intent).await?;
        self.link = Some(link.clone());
        self.enter(SessionState::LinkIssued).await;
        Ok(link)
    }

    /// Waits for the engaged channel to reach an outcome.
    ///
    /// Reader errors are returned with the session still in `WaitingNfc`, so
    /// the caller may wait again.
    ///
    /// # Errors
    ///
    /// The failure that moved the session to `Failed`,
    /// [`PaymentError::Cancelled`] if the attempt was cancelled, or
    /// [`PaymentError::InvalidTransition`] when no channel is waiting.
    pub async fn next_outcome(&mut self) -> Result<Settlement, PaymentError> {
        match self.state {
            SessionState::Qr => self.await_signature().await,
            SessionState::WaitingNfc => self.await_card().await,
            _ => Err(PaymentError::InvalidTransition {
                action: "await outcome",
                state: self.state.as_str(),
            }),
        }
    }

    // The watch stays stored until an outcome is in hand, so a caller that
    // drops this future can wait again.
    async fn await_signature(&mut self) -> Result<Settlement, PaymentError> {
        let abort = self.abort.clone();
        let Some(active) = self.watch.as_mut() else {
            return Err(PaymentError::InvalidTransition {
                action: "await signature",
                state: self.state.as_str(),
            });
        };
        let deadline = active.deadline;
        let outcome = tokio::select! {
            biased;
            () = abort.cancelled() => WatchOutcome::Cancelled,
            outcome = active.handle.wait() => outcome,
            () = tokio::time::sleep_until(deadline) => WatchOutcome::TimedOut,
        };
        let Some(ActiveWatch { handle, channel, payer, .. }) = self.watch.take() else {
            return Err(PaymentError::InvalidTransition {
                action: "await signature",
                state: self.state.as_str(),
            });
        };
        handle.cancel();
        match outcome {
            WatchOutcome::Terminal(SignStatus::Signed(result)) => {
                self.enter(SessionState::Processing).await;
                let settlement = Settlement {
                    channel,
                    tx_hash: result.tx_hash,
                    receipt_id: result.receipt_id,
                    payer: result.account.or(payer),
                };
                self.settle(settlement).await
            }
            WatchOutcome::Terminal(SignStatus::Expired) => Err(self.fail(PaymentError::Expired).await),
            WatchOutcome::TimedOut => {
                #[cfg(feature = "telemetry")]
                tracing::info!(intent = %self.intent.id, request_id = handle.request_id(), "signature window elapsed");
                Err(self.fail(PaymentError::Expired).await)
            }
            WatchOutcome::Terminal(SignStatus::Cancelled) => {
                Err(self.fail(WalletError::UserCancelled.into()).await)
            }
            WatchOutcome::Terminal(SignStatus::Failed(message)) => {
                Err(self.fail(WalletError::Rejected(message).into()).await)
            }
            WatchOutcome::Terminal(SignStatus::Pending | SignStatus::Opened) => {
                let err = WalletError::Rejected("watch ended without an outcome".to_owned());
                Err(self.fail(err.into()).await)
            }
            WatchOutcome::Cancelled => {
                self.cancel().await;
                Err(PaymentError::Cancelled)
            }
        }
    }

    async fn await_card(&mut self) -> Result<Settlement, PaymentError> {
        let abort = self.abort.clone();
        let Some(cards) = self.cards.as_mut() else {
            return Err(PaymentError::InvalidTransition {
                action: "await card",
                state: self.state.as_str(),
            });
        };
        let next = tokio::select! {
            biased;
            () = abort.cancelled() => None,
            event = cards.next() => Some(event),
        };
        match next {
            None => {
                self.cancel().await;
                Err(PaymentError::Cancelled)
            }
            Some(Some(CardEvent::CardDetected(card_id))) => self.submit_card_id(card_id).await,
            Some(Some(CardEvent::Error(err))) => Err(err.into()),
            Some(None) => {
                self.cancel().await;
                Err(ReaderError::ReadError("reader stopped".to_owned()).into())
            }
        }
    }

    /// Submits a manually entered card id through the tap path.
    ///
    /// # Errors
    ///
    /// Entry checks, an unusable id, [`PaymentError::InvalidTransition`] if a
    /// submission is already in flight, or the submission's failure.
    pub async fn submit_card(&mut self, raw_card_id: &str) -> Result<Settlement, PaymentError> {
        if self.state == SessionState::WaitingNfc {
            self.intent.ensure_open(SystemTime::now())?;
        } else {
            self.prepare_entry("submit card")?;
        }
        let card_id = match &self.reader {
            Some(reader) => reader.claim_manual(raw_card_id)?.ok_or(
                PaymentError::InvalidTransition {
                    action: "submit card",
                    state: SessionState::Processing.as_str(),
                },
            )?,
            None => normalize_card_id(raw_card_id)?,
        };
        self.submit_card_id(card_id).await
    }

    async fn submit_card_id(&mut self, card_id: String) -> Result<Settlement, PaymentError> {
        let result = self.charge_card(card_id).await;
        if let Some(reader) = &self.reader {
            reader.release();
        }
        if self.abort.is_cancelled() {
            #[cfg(feature = "telemetry")]
            tracing::warn!(intent = %self.intent.id, settled = result.is_ok(), "discarding result of cancelled submission");
            self.cancel_now().await;
            return Err(PaymentError::Cancelled);
        }
        match result {
            Ok(receipt) => {
                self.settle(Settlement {
                    channel: Channel::Tap,
                    tx_hash: Some(receipt.tx_hash),
                    receipt_id: receipt.receipt_id,
                    payer: None,
                })
                .await
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn charge_card(&mut self, card_id: String) -> Result<Receipt, PaymentError> {
        self.intent.transition(IntentStatus::AwaitingSettlement)?;
        self.enter(SessionState::Processing).await;
        self.hooks
            .before_submit(SubmitContext {
                intent: &self.intent,
                channel: Channel::Tap,
            })
            .await?;
        let payment = TapPayment {
            uid: card_id,
            amount: self.intent.total(),
            vendor_wallet: self.intent.vendor_wallet.clone(),
            store_name: self.intent.store_name.clone(),
            store_id: self.intent.store_id.clone(),
            items: self.intent.submission_items(),
            tip_amount: self.intent.tip(),
            staff_id: self.staff_id.clone(),
            split_payment_id: self.intent.is_share().then(|| self.intent.id.clone()),
        };
        let receipt = if self.intent.is_payment_link {
            self.api.pay_link_with_card(&self.intent.id, &payment).await?
        } else {
            self.api.submit_tap_payment(&payment).await?
        };
        Ok(receipt)
    }

    /// Pays with the payer's own connected wallet.
    ///
    /// Push wallets return [`WalletPayment::AwaitingSignature`] and the
    /// session moves to `Qr`; finish with [`Self::next_outcome`].
    ///
    /// # Errors
    ///
    /// Entry checks, [`PaymentError::WalletNotReady`] without a connected
    /// wallet, [`PaymentError::SelfPayment`] when the payer is the vendor, or
    /// the wallet's failure.
    pub async fn pay_with_wallet(
        &mut self,
        backend: &dyn WalletBackend,
    ) -> Result<WalletPayment, PaymentError> {
        self.prepare_entry("pay with wallet")?;
        let payer = backend
            .session()
            .ok_or_else(|| PaymentError::WalletNotReady("connect a wallet first".to_owned()))?
            .address;
        if payer == self.intent.vendor_wallet {
            return Err(PaymentError::SelfPayment);
        }

        self.intent.transition(IntentStatus::AwaitingSettlement)?;
        self.enter(SessionState::Processing).await;
        let vetted = self
            .hooks
            .before_submit(SubmitContext {
                intent: &self.intent,
                channel: Channel::Wallet,
            })
            .await;
        if let Err(err) = vetted {
            return Err(self.fail(err).await);
        }

        let tx = LedgerTransaction::payment(
            &payer,
            &self.intent.vendor_wallet,
            self.intent.currency,
            self.intent.total(),
        );
        match backend.sign_and_submit(&tx).await {
            Ok(SubmitOutcome::Submitted(submission)) => {
                let settlement = Settlement {
                    channel: Channel::Wallet,
                    tx_hash: submission.tx_hash,
                    receipt_id: None,
                    payer: Some(payer),
                };
                self.settle(settlement).await.map(WalletPayment::Settled)
            }
            Ok(SubmitOutcome::AwaitingSignature(request)) => {
                let handle = watch_request(&self.api, RequestKind::Sign, &request.request_id, self.poller);
                self.watch = Some(ActiveWatch {
                    handle,
                    channel: Channel::Wallet,
                    payer: Some(payer),
                    deadline: Instant::now() + self.qr_window,
                });
                self.qr_payload.clone_from(&request.qr_payload);
                self.enter(SessionState::Qr).await;
                Ok(WalletPayment::AwaitingSignature(request))
            }
            Err(err) => Err(self.fail(err.into()).await),
        }
    }

    async fn settle(&mut self, settlement: Settlement) -> Result<Settlement, PaymentError> {
        if self.settlement.is_some() {
            return Err(PaymentError::AlreadySettled);
        }
        self.intent.transition(IntentStatus::Settled)?;
        self.settlement = Some(settlement.clone());
        self.qr_payload = None;
        self.finish_reader();
        #[cfg(feature = "telemetry")]
        tracing::info!(
            intent = %self.intent.id,
            channel = ?settlement.channel,
            tx_hash = settlement.tx_hash.as_deref().unwrap_or_default(),
            "payment settled"
        );
        self.enter(SessionState::Settled).await;

        if self.intent.is_payment_link && matches!(settlement.channel, Channel::Qr | Channel::Wallet) {
            self.confirm_link(&settlement).await;
        }
        Ok(settlement)
    }

    async fn confirm_link(&self, settlement: &Settlement) {
        let Some(payer) = settlement.payer.as_deref() else {
            #[cfg(feature = "telemetry")]
            tracing::debug!(intent = %self.intent.id, "no payer account, skipping link confirmation");
            return;
        };
        let confirmed = self
            .api
            .confirm_link_payment(&self.intent.id, payer, settlement.tx_hash.as_deref())
            .await;
        if let Err(err) = confirmed {
            log_confirm_error(&self.intent.id, &err);
        }
    }

    async fn fail(&mut self, err: PaymentError) -> PaymentError {
        let reason = FailureReason::from_error(&err);
        self.intent.mark_failed();
        self.watch = None;
        self.qr_payload = None;
        self.finish_reader();
        #[cfg(feature = "telemetry")]
        tracing::warn!(intent = %self.intent.id, ?reason, error = %err, "payment failed");
        self.enter(SessionState::Failed(reason)).await;
        err
    }

    fn finish_reader(&mut self) {
        self.cards = None;
        if let Some(reader) = self.reader.as_mut() {
            reader.release();
            reader.reset();
        }
    }

    /// Abandons the current attempt and returns to `Idle`.
    ///
    /// Stops any watch or reader. A no-op once the attempt has an outcome.
    pub async fn cancel(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.cancel_now().await;
    }

    async fn cancel_now(&mut self) {
        self.abort.cancel();
        self.watch = None;
        self.qr_payload = None;
        self.cards = None;
        if let Some(reader) = self.reader.as_mut() {
            reader.reset();
        }
        self.intent.rewind();
        if self.state != SessionState::Idle {
            self.enter(SessionState::Idle).await;
        }
    }

    /// Starts over with a new intent, keeping the reader and hooks.
    pub async fn reset(&mut self, intent: PaymentIntent) {
        self.abort.cancel();
        self.watch = None;
        self.qr_payload = None;
        self.cards = None;
        if let Some(reader) = self.reader.as_mut() {
            reader.reset();
        }
        self.intent = intent;
        self.link = None;
        self.settlement = None;
        self.enter(SessionState::Idle).await;
    }
}

#[cfg(feature = "telemetry")]
fn log_confirm_error(intent: &str, err: &ApiError) {
    tracing::warn!(intent, error = %err, "payment link confirmation failed");
}

#[cfg(not(feature = "telemetry"))]
const fn log_confirm_error(_intent: &str, _err: &ApiError) {}
