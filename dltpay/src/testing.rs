//! Scriptable test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use rust_decimal::Decimal;

use crate::amount::Money;
use crate::api::{
    ApiError, BoxFuture, DelegationTarget, DisplayUpdate, PaymentApi, PaymentLink, PushRequest,
    QrCharge, RateQuote, Receipt, SignStatus, SplitShareRecord, TapPayment,
};
use crate::capability::{BackendKind, Limits, WalletStatus};
use crate::intent::PaymentIntent;
use crate::wallet::{
    Connection, LedgerTransaction, SubmitOutcome, Submission, WalletBackend, WalletError,
    WalletSession,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

/// In-memory [`PaymentApi`].
///
/// Unscripted polls answer `Pending`, unscripted taps succeed, and every call
/// is counted by method name.
#[derive(Debug)]
pub(crate) struct MockApi {
    calls: Mutex<HashMap<&'static str, usize>>,
    next_id: AtomicUsize,
    login_script: Mutex<VecDeque<SignStatus>>,
    payment_script: Mutex<VecDeque<SignStatus>>,
    sign_script: Mutex<VecDeque<SignStatus>>,
    tap_script: Mutex<VecDeque<Result<Receipt, ApiError>>>,
    verify_script: Mutex<VecDeque<bool>>,
    split_failure: Mutex<Option<ApiError>>,
    wallet_status: Mutex<WalletStatus>,
    delegation: Mutex<DelegationTarget>,
    rate: Mutex<Decimal>,
    displays: Mutex<Vec<DisplayUpdate>>,
    tap_payments: Mutex<Vec<TapPayment>>,
    link_confirmations: Mutex<Vec<(String, String, Option<String>)>>,
    limits_updates: Mutex<Vec<(String, String, Limits)>>,
    emails: Mutex<Vec<String>>,
    revokes: Mutex<Vec<(String, Option<String>)>>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            next_id: AtomicUsize::new(0),
            login_script: Mutex::default(),
            payment_script: Mutex::default(),
            sign_script: Mutex::default(),
            tap_script: Mutex::default(),
            verify_script: Mutex::default(),
            split_failure: Mutex::default(),
            wallet_status: Mutex::default(),
            delegation: Mutex::new(DelegationTarget {
                platform_signer_address: "rPlatform".to_owned(),
                needs_funding: false,
                signer_exists: false,
            }),
            rate: Mutex::new(Decimal::ONE),
            displays: Mutex::default(),
            tap_payments: Mutex::default(),
            link_confirmations: Mutex::default(),
            limits_updates: Mutex::default(),
            emails: Mutex::default(),
            revokes: Mutex::default(),
        }
    }
}

impl MockApi {
    pub(crate) fn calls(&self, method: &str) -> usize {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    fn record(&self, method: &'static str) {
        *lock(&self.calls).entry(method).or_default() += 1;
    }

    fn push_request(&self) -> PushRequest {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        PushRequest {
            request_id: format!("req_{n}"),
            qr_payload: Some(format!("https://xumm.app/sign/req_{n}")),
            deep_link: None,
        }
    }

    pub(crate) fn script_login(&self, statuses: Vec<SignStatus>) {
        lock(&self.login_script).extend(statuses);
    }

    pub(crate) fn script_payment(&self, statuses: Vec<SignStatus>) {
        lock(&self.payment_script).extend(statuses);
    }

    pub(crate) fn script_sign(&self, statuses: Vec<SignStatus>) {
        lock(&self.sign_script).extend(statuses);
    }

    pub(crate) fn script_tap(&self, results: Vec<Result<Receipt, ApiError>>) {
        lock(&self.tap_script).extend(results);
    }

    pub(crate) fn script_verify(&self, answers: Vec<bool>) {
        lock(&self.verify_script).extend(answers);
    }

    pub(crate) fn fail_next_split(&self, err: ApiError) {
        *lock(&self.split_failure) = Some(err);
    }

    pub(crate) fn set_wallet_status(&self, status: WalletStatus) {
        *lock(&self.wallet_status) = status;
    }

    pub(crate) fn set_delegation(&self, target: DelegationTarget) {
        *lock(&self.delegation) = target;
    }

    pub(crate) fn set_rate(&self, rate: Decimal) {
        *lock(&self.rate) = rate;
    }

    pub(crate) fn displays(&self) -> Vec<DisplayUpdate> {
        lock(&self.displays).clone()
    }

    pub(crate) fn tap_payments(&self) -> Vec<TapPayment> {
        lock(&self.tap_payments).clone()
    }

    pub(crate) fn link_confirmations(&self) -> Vec<(String, String, Option<String>)> {
        lock(&self.link_confirmations).clone()
    }

    pub(crate) fn limits_updates(&self) -> Vec<(String, String, Limits)> {
        lock(&self.limits_updates).clone()
    }

    pub(crate) fn emails(&self) -> Vec<String> {
        lock(&self.emails).clone()
    }

    pub(crate) fn revokes(&self) -> Vec<(String, Option<String>)> {
        lock(&self.revokes).clone()
    }

    fn next_status(script: &Mutex<VecDeque<SignStatus>>) -> SignStatus {
        lock(script).pop_front().unwrap_or(SignStatus::Pending)
    }

    fn tap(&self, payment: &TapPayment) -> Result<Receipt, ApiError> {
        lock(&self.tap_payments).push(payment.clone());
        let n = lock(&self.tap_payments).len();
        lock(&self.tap_script).pop_front().unwrap_or_else(|| {
            Ok(Receipt {
                tx_hash: format!("TAP{n}"),
                receipt_id: Some(format!("rcpt_{n}")),
            })
        })
    }
}

impl PaymentApi for MockApi {
    fn create_login_request(&self) -> BoxFuture<'_, Result<PushRequest, ApiError>> {
        Box::pin(async move {
            self.record("create_login_request");
            Ok(self.push_request())
        })
    }

    fn poll_login_status<'a>(
        &'a self,
        _request_id: &'a str,
    ) -> BoxFuture<'a, Result<SignStatus, ApiError>> {
        Box::pin(async move {
            self.record("poll_login_status");
            Ok(Self::next_status(&self.login_script))
        })
    }

    fn create_payment_request<'a>(
        &'a self,
        _charge: &'a QrCharge,
    ) -> BoxFuture<'a, Result<PushRequest, ApiError>> {
        Box::pin(async move {
            self.record("create_payment_request");
            Ok(self.push_request())
        })
    }

    fn poll_payment_status<'a>(
        &'a self,
        _request_id: &'a str,
    ) -> BoxFuture<'a, Result<SignStatus, ApiError>> {
        Box::pin(async move {
            self.record("poll_payment_status");
            Ok(Self::next_status(&self.payment_script))
        })
    }

    fn create_sign_request<'a>(
        &'a self,
        _tx: &'a LedgerTransaction,
    ) -> BoxFuture<'a, Result<PushRequest, ApiError>> {
        Box::pin(async move {
            self.record("create_sign_request");
            Ok(self.push_request())
        })
    }

    fn poll_sign_status<'a>(
        &'a self,
        _request_id: &'a str,
    ) -> BoxFuture<'a, Result<SignStatus, ApiError>> {
        Box::pin(async move {
            self.record("poll_sign_status");
            Ok(Self::next_status(&self.sign_script))
        })
    }

    fn submit_tap_payment<'a>(
        &'a self,
        payment: &'a TapPayment,
    ) -> BoxFuture<'a, Result<Receipt, ApiError>> {
        Box::pin(async move {
            self.record("submit_tap_payment");
            self.tap(payment)
        })
    }

    fn pay_link_with_card<'a>(
        &'a self,
        _link_id: &'a str,
        payment: &'a TapPayment,
    ) -> BoxFuture<'a, Result<Receipt, ApiError>> {
        Box::pin(async move {
            self.record("pay_link_with_card");
            self.tap(payment)
        })
    }

    fn create_payment_link<'a>(
        &'a self,
        intent: &'a PaymentIntent,
    ) -> BoxFuture<'a, Result<PaymentLink, ApiError>> {
        Box::pin(async move {
            self.record("create_payment_link");
            Ok(PaymentLink {
                payment_id: intent.id.clone(),
                payment_url: format!("https://yesallofus.com/pay/{}", intent.id),
            })
        })
    }

    fn confirm_link_payment<'a>(
        &'a self,
        link_id: &'a str,
        payer_wallet: &'a str,
        tx_hash: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.record("confirm_link_payment");
            lock(&self.link_confirmations).push((
                link_id.to_owned(),
                payer_wallet.to_owned(),
                tx_hash.map(str::to_owned),
            ));
            Ok(())
        })
    }

    fn split_payment<'a>(
        &'a self,
        parent_id: &'a str,
        parts: u16,
    ) -> BoxFuture<'a, Result<Vec<SplitShareRecord>, ApiError>> {
        Box::pin(async move {
            self.record("split_payment");
            if let Some(err) = lock(&self.split_failure).take() {
                return Err(err);
            }
            Ok((1..=parts)
                .map(|i| SplitShareRecord {
                    payment_id: format!("{parent_id}-{i}"),
                    amount: Money::ZERO,
                    split_index: i,
                })
                .collect())
        })
    }

    fn get_wallet_status<'a>(
        &'a self,
        _address: &'a str,
    ) -> BoxFuture<'a, Result<WalletStatus, ApiError>> {
        Box::pin(async move {
            self.record("get_wallet_status");
            Ok(lock(&self.wallet_status).clone())
        })
    }

    fn get_delegation_target<'a>(
        &'a self,
        _store_id: &'a str,
    ) -> BoxFuture<'a, Result<DelegationTarget, ApiError>> {
        Box::pin(async move {
            self.record("get_delegation_target");
            Ok(lock(&self.delegation).clone())
        })
    }

    fn verify_delegation<'a>(&'a self, _store_id: &'a str) -> BoxFuture<'a, Result<bool, ApiError>> {
        Box::pin(async move {
            self.record("verify_delegation");
            Ok(lock(&self.verify_script).pop_front().unwrap_or(false))
        })
    }

    fn update_limits<'a>(
        &'a self,
        store_id: &'a str,
        wallet: &'a str,
        limits: &'a Limits,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.record("update_limits");
            lock(&self.limits_updates).push((store_id.to_owned(), wallet.to_owned(), *limits));
            Ok(())
        })
    }

    fn enable_attended_autosign<'a>(
        &'a self,
        _store_id: &'a str,
        _wallet: &'a str,
        _limits: &'a Limits,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.record("enable_attended_autosign");
            Ok(())
        })
    }

    fn revoke_confirm<'a>(
        &'a self,
        store_id: &'a str,
        tx_hash: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.record("revoke_confirm");
            lock(&self.revokes).push((store_id.to_owned(), tx_hash.map(str::to_owned)));
            Ok(())
        })
    }

    fn convert(&self, fiat_amount: Money) -> BoxFuture<'_, Result<RateQuote, ApiError>> {
        Box::pin(async move {
            self.record("convert");
            let rate = *lock(&self.rate);
            let stablecoin_amount = Money::from_decimal(fiat_amount.as_decimal() * rate)
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            Ok(RateQuote {
                fiat_amount,
                stablecoin_amount,
                rate,
                price_age_ms: Some(0),
            })
        })
    }

    fn email_payment_link<'a>(
        &'a self,
        email: &'a str,
        _payment_url: &'a str,
        _store_name: &'a str,
        _amount: Money,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.record("email_payment_link");
            lock(&self.emails).push(email.to_owned());
            Ok(())
        })
    }

    fn update_display<'a>(
        &'a self,
        update: &'a DisplayUpdate,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            self.record("update_display");
            lock(&self.displays).push(update.clone());
            Ok(())
        })
    }
}

/// A wallet that signs synchronously and records what it signed.
#[derive(Debug, Default)]
pub(crate) struct StaticWallet {
    session: Mutex<Option<WalletSession>>,
    submitted: Mutex<Vec<LedgerTransaction>>,
}

impl StaticWallet {
    pub(crate) fn connected(address: &str) -> Self {
        let wallet = Self::default();
        wallet.restore(WalletSession {
            address: address.to_owned(),
            backend: BackendKind::Extension,
            identity_provider: None,
        });
        wallet
    }

    pub(crate) fn submitted(&self) -> Vec<LedgerTransaction> {
        lock(&self.submitted).clone()
    }
}

impl WalletBackend for StaticWallet {
    fn kind(&self) -> BackendKind {
        BackendKind::Extension
    }

    fn connect(&self) -> BoxFuture<'_, Result<Connection, WalletError>> {
        Box::pin(async move {
            let session = self.session().unwrap_or_else(|| WalletSession {
                address: "rStatic".to_owned(),
                backend: BackendKind::Extension,
                identity_provider: None,
            });
            self.restore(session.clone());
            Ok(Connection::Ready(session))
        })
    }

    fn sign_and_submit<'a>(
        &'a self,
        tx: &'a LedgerTransaction,
    ) -> BoxFuture<'a, Result<SubmitOutcome, WalletError>> {
        Box::pin(async move {
            if self.session().is_none() {
                return Err(WalletError::SessionExpired);
            }
            let mut submitted = lock(&self.submitted);
            submitted.push(tx.clone());
            Ok(SubmitOutcome::Submitted(Submission {
                tx_hash: Some(format!("STATIC{}", submitted.len())),
            }))
        })
    }

    fn session(&self) -> Option<WalletSession> {
        lock(&self.session).clone()
    }

    fn restore(&self, session: WalletSession) {
        *lock(&self.session) = Some(session);
    }

    fn disconnect(&self) {
        *lock(&self.session) = None;
    }
}
