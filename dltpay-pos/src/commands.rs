//! Command execution.
//!
//! A [`Terminal`] owns the API client, the remembered vendor identity and the
//! operator console, and runs one [`Command`] against them. Every wait is
//! raced against the shutdown token so Ctrl-C abandons a checkout cleanly.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dltpay::PaymentError;
use dltpay::amount::Money;
use dltpay::api::{PaymentApi, PushRequest, RateQuote};
use dltpay::capability::{BackendKind, XRP_RESERVE_FLOOR};
use dltpay::hooks::DisplayMirror;
use dltpay::intent::PaymentIntent;
use dltpay::onboarding::{AutoSignOnboarding, OnboardingStep, TrustlineOutcome};
use dltpay::poller::SettlementPoller;
use dltpay::quote::{self, RateTicker};
use dltpay::reader::{ChannelReader, ContactlessDevice};
use dltpay::session::{PaymentSession, Settlement};
use dltpay::split::{ShareLink, SplitOrchestrator};
use dltpay::storage::{
    IdentityScope, PersistedIdentity, SafeStore, clear_identity, load_identity, save_identity,
};
use dltpay::wallet::push::PushPollBackend;
use dltpay::wallet::{Connection, WalletSession};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::{ChannelArg, ChargeArgs, Command, OnboardCommand, QuoteArgs, SplitArgs};
use crate::config::{PosConfig, StoreConfig};
use crate::console::Console;
use crate::device::LineDevice;
use crate::error::PosError;
use crate::store::FileStore;

/// How long `onboard trustlines --wait` watches for the new lines.
const TRUSTLINE_WAIT: Duration = Duration::from_secs(10 * 60);

/// One terminal run.
pub struct Terminal {
    config: PosConfig,
    api: Arc<dyn PaymentApi>,
    store: SafeStore,
    console: Console,
    device: Option<Arc<dyn ContactlessDevice>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("store_id", &self.config.store.store_id)
            .field("console", &self.console)
            .finish_non_exhaustive()
    }
}

impl Terminal {
    /// A terminal remembering its vendor identity in the configured session
    /// file.
    #[must_use]
    pub fn new(
        config: PosConfig,
        api: Arc<dyn PaymentApi>,
        console: Console,
        shutdown: CancellationToken,
    ) -> Self {
        let store = SafeStore::new(Arc::new(FileStore::open(&config.session_file)));
        Self {
            config,
            api,
            store,
            console,
            device: None,
            shutdown,
        }
    }

    /// Replaces the identity store.
    #[must_use]
    pub fn with_store(mut self, store: SafeStore) -> Self {
        self.store = store;
        self
    }

    /// Reads cards from `device` instead of stdin.
    #[must_use]
    pub fn with_device(mut self, device: Arc<dyn ContactlessDevice>) -> Self {
        self.device = Some(device);
        self
    }

    /// Runs `command` to completion.
    ///
    /// # Errors
    ///
    /// Incomplete configuration, a failed payment or onboarding step, or a
    /// console write failure. An operator cancel is not an error.
    pub async fn run(&mut self, command: Command) -> Result<(), PosError> {
        match command {
            Command::Charge(args) => self.charge(args).await,
            Command::Split(args) => self.split(args).await,
            Command::Quote(args) => self.quote(args).await,
            Command::Onboard(command) => self.onboard(command).await,
        }
    }

    fn store_config(&self) -> Result<StoreConfig, PosError> {
        Ok(self.config.store.require()?.clone())
    }

    fn new_intent(store: &StoreConfig, amount: Money) -> PaymentIntent {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        PaymentIntent::new(
            format!("pos_{millis}"),
            &store.vendor_wallet,
            &store.store_id,
            &store.store_name,
            amount,
        )
    }

    fn session(&self, intent: PaymentIntent, store: &StoreConfig) -> PaymentSession {
        let mut session = PaymentSession::new(Arc::clone(&self.api), intent)
            .with_qr_window(self.config.qr_window());
        if self.config.mirror_display {
            session = session.with_hook(Arc::new(DisplayMirror::new(Arc::clone(&self.api))));
        }
        if let Some(staff_id) = &store.staff_id {
            session = session.with_staff_id(staff_id);
        }
        session
    }

    /// Cancels `target` when the operator interrupts.
    fn cancel_on_shutdown(&self, target: CancellationToken) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => target.cancel(),
                () = target.cancelled() => {}
            }
        });
    }

    async fn charge(&mut self, args: ChargeArgs) -> Result<(), PosError> {
        let store = self.store_config()?;
        let intent = Self::new_intent(&store, args.amount).with_cart(args.items);
        let mut session = self.session(intent, &store);
        if args.channel == ChannelArg::Tap {
            let device = self
                .device
                .clone()
                .unwrap_or_else(|| Arc::new(LineDevice::stdin()));
            session = session.with_reader(ChannelReader::new(device));
        }
        if let Some(tip) = args.tip {
            session.set_tip(tip)?;
        }
        self.console.line(format_args!(
            "{} - total due £{}",
            store.store_name,
            session.intent().total()
        ))?;

        let outcome = match args.channel {
            ChannelArg::Qr => self.charge_qr(&mut session).await,
            ChannelArg::Tap => self.charge_tap(&mut session, args.attempts).await,
            ChannelArg::Link => return self.charge_link(&mut session).await,
        };
        match outcome {
            Ok(settlement) => self.report_settlement(&settlement),
            Err(PosError::Payment(PaymentError::Cancelled)) => {
                Ok(self.console.line("Payment cancelled.")?)
            }
            Err(err) => Err(err),
        }
    }

    async fn charge_qr(&mut self, session: &mut PaymentSession) -> Result<Settlement, PosError> {
        let total = session.intent().total();
        let ticker = RateTicker::start(Arc::clone(&self.api), total, |q: &RateQuote| {
            tracing::debug!(rlusd = %q.stablecoin_amount, rate = %q.rate, "quote refreshed");
        })
        .await;
        match &ticker {
            Ok(ticker) => {
                if let Some(quote) = ticker.latest() {
                    self.write_quote(&quote)?;
                }
            }
            Err(err) => tracing::warn!(error = %err, "live quote unavailable"),
        }

        let request = session.begin_qr().await?;
        self.cancel_on_shutdown(session.canceller());
        self.show_request(&request, "Scan with your wallet app to pay.")?;

        let outcome = session.next_outcome().await;
        if let Ok(ticker) = &ticker {
            ticker.stop();
        }
        Ok(outcome?)
    }

    async fn charge_tap(
        &mut self,
        session: &mut PaymentSession,
        attempts: u32,
    ) -> Result<Settlement, PosError> {
        let attempts = attempts.max(1);
        let mut failures = 0;
        session.begin_tap().await?;
        self.cancel_on_shutdown(session.canceller());
        self.console.line("Tap a card on the reader.")?;
        loop {
            let err = match session.next_outcome().await {
                Ok(settlement) => return Ok(settlement),
                Err(err @ PaymentError::Cancelled) => return Err(err.into()),
                Err(err) => err,
            };
            failures += 1;
            if failures >= attempts {
                return Err(err.into());
            }
            tracing::info!(failures, error = %err, "card attempt failed");
            // Re-arm before prompting so the next card is not missed.
            if session.state().accepts_entry() {
                session.begin_tap().await?;
                self.cancel_on_shutdown(session.canceller());
            }
            self.console
                .line(format_args!("{} Tap again.", err.user_message()))?;
        }
    }

    async fn charge_link(&mut self, session: &mut PaymentSession) -> Result<(), PosError> {
        let link = session.issue_link().await?;
        let intent = session.intent();
        let share = ShareLink::for_link(&link, intent.total(), &intent.store_name)?;
        self.console.line(share.share_text())?;
        self.console.qr(share.url.as_str())?;
        Ok(())
    }

    fn show_request(&mut self, request: &PushRequest, prompt: &str) -> Result<(), PosError> {
        // A PNG data URL cannot be re-encoded as a terminal QR.
        let scannable = request
            .deep_link
            .as_deref()
            .or(request.qr_payload.as_deref())
            .filter(|payload| !payload.starts_with("data:"));
        if let Some(payload) = scannable {
            self.console.qr(payload)?;
        }
        self.console.line(prompt)?;
        if let Some(deep_link) = &request.deep_link {
            self.console.line(format_args!("Or open: {deep_link}"))?;
        }
        Ok(())
    }

    fn report_settlement(&mut self, settlement: &Settlement) -> Result<(), PosError> {
        self.console.line("Payment complete.")?;
        if let Some(tx_hash) = &settlement.tx_hash {
            self.console.line(format_args!("Transaction: {tx_hash}"))?;
        }
        if let Some(receipt_id) = &settlement.receipt_id {
            self.console.line(format_args!("Receipt: {receipt_id}"))?;
        }
        Ok(())
    }

    async fn split(&mut self, args: SplitArgs) -> Result<(), PosError> {
        let store = self.store_config()?;
        let orchestrator = SplitOrchestrator::with_pay_base(Arc::clone(&self.api), &self.config.pay_base)?;
        let intent = Self::new_intent(&store, args.amount).as_payment_link();
        let mut session = PaymentSession::new(Arc::clone(&self.api), intent);
        let link = session.issue_link().await?;

        let mut parent = session.intent().clone();
        parent.id = link.payment_id;
        let group = orchestrator.split(&mut parent, args.parts).await?;
        self.console.line(format_args!(
            "Split £{} into {} shares.",
            group.total(),
            group.len()
        ))?;

        for index in 0..group.len() {
            let Some(share) = orchestrator.share_link(&group, index)? else {
                continue;
            };
            self.console.line("")?;
            self.console.line(share.share_text())?;
            self.console.qr(share.url.as_str())?;
            if let Some(email) = args.emails.get(index) {
                orchestrator.email(&share, email).await?;
                self.console.line(format_args!("Sent to {}", email.trim()))?;
            }
        }
        if args.emails.len() > group.len() {
            tracing::warn!(
                emails = args.emails.len(),
                shares = group.len(),
                "more email addresses than shares; extras ignored"
            );
        }
        Ok(())
    }

    async fn quote(&mut self, args: QuoteArgs) -> Result<(), PosError> {
        if !args.watch {
            let quote = quote::quote(self.api.as_ref(), args.amount).await?;
            return self.write_quote(&quote);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ticker = RateTicker::start(Arc::clone(&self.api), args.amount, move |q: &RateQuote| {
            tx.send(q.clone()).ok();
        })
        .await?;
        if let Some(quote) = ticker.latest() {
            self.write_quote(&quote)?;
        }
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(quote) => self.write_quote(&quote)?,
                    None => break,
                },
            }
        }
        ticker.stop();
        Ok(())
    }

    fn write_quote(&mut self, quote: &RateQuote) -> Result<(), PosError> {
        let stale = if quote.is_stale() { " (price may be out of date)" } else { "" };
        self.console.line(format_args!(
            "£{} ≈ {} RLUSD at {}{stale}",
            quote.fiat_amount, quote.stablecoin_amount, quote.rate
        ))?;
        Ok(())
    }

    async fn onboard(&mut self, command: OnboardCommand) -> Result<(), PosError> {
        let store = self.store_config()?;
        let backend = Arc::new(PushPollBackend::new(Arc::clone(&self.api)));
        let mut flow = AutoSignOnboarding::new(Arc::clone(&self.api), backend.clone(), &store.store_id);
        let shutdown = self.shutdown.clone();

        match command {
            OnboardCommand::Status { wallet } => {
                let session = match wallet {
                    Some(address) => Some(WalletSession {
                        address,
                        backend: BackendKind::PushPoll,
                        identity_provider: None,
                    }),
                    None => self.remembered_wallet()?,
                };
                if let Some(session) = session {
                    flow.attach_session(session);
                    flow.refresh().await?;
                }
                self.report_step(&flow)
            }
            OnboardCommand::Connect => {
                let session = match flow.connect().await? {
                    Connection::Ready(session) => session,
                    Connection::Pending(request) => {
                        self.show_request(&request, "Approve the sign-in in your wallet app.")?;
                        tokio::select! {
                            biased;
                            () = shutdown.cancelled() => {
                                return Ok(self.console.line("Sign-in cancelled.")?);
                            }
                            login = backend.await_login(&request, SettlementPoller::LOGIN_WINDOW) => {
                                login.map_err(PaymentError::from)?
                            }
                        }
                    }
                };
                flow.attach_session(session.clone());
                save_identity(&self.store, IdentityScope::Vendor, &PersistedIdentity::from(&session));
                self.console
                    .line(format_args!("Connected {}.", session.address))?;
                if session.address != store.vendor_wallet {
                    self.console.line(format_args!(
                        "Note: payments are still sent to the configured wallet {}.",
                        store.vendor_wallet
                    ))?;
                }
                flow.refresh().await?;
                self.report_step(&flow)
            }
            OnboardCommand::Trustlines { wait } => {
                self.require_wallet(&mut flow)?;
                flow.refresh().await?;
                match flow.add_trustlines().await? {
                    TrustlineOutcome::AlreadyPresent => {
                        self.console.line("RLUSD and USDC trustlines are present.")?;
                    }
                    TrustlineOutcome::Added(submissions) => {
                        for tx_hash in submissions.iter().filter_map(|s| s.tx_hash.as_deref()) {
                            self.console.line(format_args!("Trustline submitted: {tx_hash}"))?;
                        }
                    }
                    TrustlineOutcome::ManualActionRequired(lines) => {
                        self.console.line("Add these trustlines in your wallet app:")?;
                        for line in &lines {
                            self.console
                                .line(format_args!("  {} issued by {}", line.currency, line.issuer))?;
                        }
                        if wait {
                            self.console.line("Waiting for the wallet to report them...")?;
                            tokio::select! {
                                biased;
                                () = shutdown.cancelled() => return Ok(()),
                                step = flow.wait_for_wallet(TRUSTLINE_WAIT) => { step?; }
                            }
                        }
                    }
                }
                self.report_step(&flow)
            }
            OnboardCommand::Revoke => {
                self.require_wallet(&mut flow)?;
                flow.refresh().await?;
                self.console
                    .line("Approve the signer removal in your wallet app.")?;
                let submission = tokio::select! {
                    biased;
                    () = shutdown.cancelled() => {
                        return Ok(self.console.line("Revoke cancelled.")?);
                    }
                    revoked = flow.revoke() => revoked?,
                };
                self.console.line("Delegated signing revoked.")?;
                if let Some(tx_hash) = submission.tx_hash {
                    self.console.line(format_args!("Transaction: {tx_hash}"))?;
                }
                Ok(())
            }
            OnboardCommand::Disconnect => {
                match load_identity(&self.store, IdentityScope::Vendor) {
                    Some(identity) => {
                        clear_identity(&self.store, IdentityScope::Vendor);
                        self.console
                            .line(format_args!("Forgot wallet {}.", identity.wallet_address))?;
                    }
                    None => self.console.line("No wallet remembered.")?,
                }
                Ok(())
            }
        }
    }

    /// The remembered vendor wallet, if it is one this terminal can drive.
    fn remembered_wallet(&self) -> Result<Option<WalletSession>, PosError> {
        let Some(identity) = load_identity(&self.store, IdentityScope::Vendor) else {
            return Ok(None);
        };
        if identity.login_method != BackendKind::PushPoll {
            return Err(PosError::Usage(format!(
                "{} is connected with {}; manage it from the dashboard",
                identity.wallet_address,
                identity.login_method.login_method()
            )));
        }
        Ok(Some(identity.into()))
    }

    fn require_wallet(&self, flow: &mut AutoSignOnboarding) -> Result<(), PosError> {
        let session = self.remembered_wallet()?.ok_or_else(|| {
            PosError::Usage("no wallet connected; run `dltpay-pos onboard connect`".to_owned())
        })?;
        flow.attach_session(session);
        Ok(())
    }

    fn report_step(&mut self, flow: &AutoSignOnboarding) -> Result<(), PosError> {
        let caps = flow.capabilities();
        if let Some(address) = &caps.address {
            self.console.line(format_args!(
                "Wallet {address}: {} XRP",
                caps.xrp_balance
            ))?;
        }
        let step = flow.step();
        let next = match step {
            OnboardingStep::ConnectWallet => "Run `dltpay-pos onboard connect`.".to_owned(),
            OnboardingStep::FundWallet => {
                format!("Fund the account with at least {XRP_RESERVE_FLOOR} XRP.")
            }
            OnboardingStep::AddTrustlines => "Run `dltpay-pos onboard trustlines`.".to_owned(),
            OnboardingStep::EnableAutopay => "Enable auto-pay from the dashboard.".to_owned(),
            OnboardingStep::Complete => "Ready to take payments.".to_owned(),
        };
        self.console.line(format_args!("Step: {step}. {next}"))?;
        Ok(())
    }
}
