//! The remote payment API as seen by the core.
//!
//! [`PaymentApi`] is the single seam between the state machines in this crate
//! and the network. Every method returns a [`BoxFuture`] so the trait stays
//! dyn-compatible and can be shared as `Arc<dyn PaymentApi>`. The `dltpay-http`
//! crate provides the `reqwest` implementation.

use std::future::Future;
use std::pin::Pin;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::amount::Money;
use crate::capability::{Limits, WalletStatus};
use crate::intent::{LineItem, PaymentIntent};
use crate::poller::PollStatus;
use crate::wallet::LedgerTransaction;

/// Boxed, `Send` future returned by the API and wallet traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Machine-readable refusal codes returned by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorCode {
    /// The payer has not granted the platform signer.
    NoSignerAuthority,
    /// The payer cannot cover the amount.
    InsufficientFunds,
    /// Payer and vendor are the same account.
    SelfPaymentNotAllowed,
    /// The wallet has not finished setup.
    WalletNotReady,
    /// The tapped card is not linked to any wallet.
    CardNotRegistered,
    /// Anything else.
    Other,
}

impl ApiErrorCode {
    /// Classifies a refusal from its code and message.
    ///
    /// Without a known code, only messages about a card map to
    /// [`Self::CardNotRegistered`]; other "not found" refusals stay
    /// [`Self::Other`].
    #[must_use]
    pub fn classify(code: Option<&str>, message: &str) -> Self {
        let code = code.unwrap_or(message);
        match code {
            "NO_SIGNER_AUTHORITY" => return Self::NoSignerAuthority,
            "INSUFFICIENT_FUNDS" => return Self::InsufficientFunds,
            "SELF_PAYMENT_NOT_ALLOWED" => return Self::SelfPaymentNotAllowed,
            "WALLET_NOT_READY" => return Self::WalletNotReady,
            "CARD_NOT_REGISTERED" => return Self::CardNotRegistered,
            _ => {}
        }
        let lower = message.to_ascii_lowercase();
        if lower.contains("card")
            && ["not found", "not linked", "not registered", "not recognized"]
                .iter()
                .any(|needle| lower.contains(needle))
        {
            Self::CardNotRegistered
        } else {
            Self::Other
        }
    }
}

/// Failures talking to the payment API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The request did not complete.
    #[error("network error: {0}")]
    Network(String),
    /// The API answered with a refusal.
    #[error("{message}")]
    Rejected {
        /// Classified refusal code.
        code: ApiErrorCode,
        /// Server-provided message.
        message: String,
    },
    /// The response could not be understood.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// A refusal, classified from its raw code and message.
    #[must_use]
    pub fn rejected(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Rejected {
            code: ApiErrorCode::classify(code, &message),
            message,
        }
    }

    /// The refusal code, if this is a refusal.
    #[must_use]
    pub const fn code(&self) -> Option<ApiErrorCode> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A sign request delivered to a push-poll wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Identifier used when polling.
    pub request_id: String,
    /// Payload to render as a QR code (often a PNG data URL or a sign URL).
    pub qr_payload: Option<String>,
    /// Link that opens the wallet app directly.
    pub deep_link: Option<String>,
}

/// Outcome details of a signed push request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResult {
    /// The signing account, for login requests.
    pub account: Option<String>,
    /// Ledger hash, for transaction requests.
    pub tx_hash: Option<String>,
    /// Server receipt id, for payment requests.
    pub receipt_id: Option<String>,
}

/// Status of a push request as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignStatus {
    /// Not yet acted on.
    Pending,
    /// Opened in the wallet, not yet signed.
    Opened,
    /// Signed by the user.
    Signed(SignResult),
    /// The request lapsed.
    Expired,
    /// The user declined.
    Cancelled,
    /// The ledger or API reported failure.
    Failed(String),
}

impl SignStatus {
    /// Parses the status strings used by the API.
    #[must_use]
    pub fn from_wire(status: &str, result: SignResult, error: Option<String>) -> Self {
        match status {
            "signed" | "connected" | "settled" | "completed" | "success" => Self::Signed(result),
            "expired" => Self::Expired,
            "cancelled" | "canceled" | "rejected" => Self::Cancelled,
            "failed" | "error" => Self::Failed(error.unwrap_or_else(|| status.to_owned())),
            "opened" => Self::Opened,
            _ => Self::Pending,
        }
    }
}

impl PollStatus for SignStatus {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Signed(_) | Self::Expired | Self::Cancelled | Self::Failed(_)
        )
    }
}

/// A QR charge request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QrCharge {
    /// Amount to charge (tip included).
    pub amount: Money,
    /// Receiving account.
    pub vendor_wallet: String,
    /// Store id.
    pub store_id: String,
    /// Store display name.
    pub store_name: String,
}

/// A tap payment submission.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TapPayment {
    /// Normalized card identifier.
    pub uid: String,
    /// Amount to charge (tip included).
    pub amount: Money,
    /// Receiving account.
    pub vendor_wallet: String,
    /// Store display name.
    pub store_name: String,
    /// Store id.
    pub store_id: String,
    /// Cart lines, tip line included.
    pub items: Vec<LineItem>,
    /// Tip portion of `amount`.
    pub tip_amount: Money,
    /// Staff member taking the payment.
    pub staff_id: Option<String>,
    /// Share id when paying one share of a split link.
    pub split_payment_id: Option<String>,
}

/// Proof of a settled payment.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Ledger transaction hash.
    pub tx_hash: String,
    /// Server receipt id.
    pub receipt_id: Option<String>,
}

/// A created payment link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    /// Link id (also the intent id).
    pub payment_id: String,
    /// Public URL.
    pub payment_url: String,
}

/// One share allocated by the split endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitShareRecord {
    /// Share link id.
    pub payment_id: String,
    /// Server-computed amount, informational only.
    pub amount: Money,
    /// 1-based index within the group.
    pub split_index: u16,
}

/// The platform account that receives delegated signing rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationTarget {
    /// Platform signer address.
    pub platform_signer_address: String,
    /// The wallet needs funding before a signer list can be set.
    #[serde(default)]
    pub needs_funding: bool,
    /// The signer list is already in place.
    #[serde(default)]
    pub signer_exists: bool,
}

/// A live fiat-to-stablecoin conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateQuote {
    /// Fiat amount quoted.
    pub fiat_amount: Money,
    /// Stablecoin the payer will send.
    pub stablecoin_amount: Money,
    /// Fiat to stablecoin rate.
    pub rate: Decimal,
    /// Age of the underlying price, when reported.
    pub price_age_ms: Option<u64>,
}

impl PollStatus for RateQuote {
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Status shown on the customer-facing display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayStatus {
    /// Nothing in progress.
    Idle,
    /// Waiting for a tap.
    Ready,
    /// Submission in flight.
    Processing,
    /// Payment settled.
    Success,
    /// Payment failed.
    Error,
    /// QR code on screen.
    Qr,
    /// Split shares outstanding.
    SplitPending,
    /// Payment link issued.
    LinkPending,
}

/// A customer-display refresh.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayUpdate {
    /// Store id.
    pub store_id: String,
    /// Store display name.
    pub store_name: String,
    /// Cart lines.
    pub cart: Vec<LineItem>,
    /// Amount due.
    pub total: Money,
    /// What the display should show.
    pub status: DisplayStatus,
    /// QR payload, when one is on screen.
    pub qr_code: Option<String>,
    /// Tip included in `total`.
    pub tip: Option<Money>,
}

impl DisplayUpdate {
    /// Display state for an intent.
    #[must_use]
    pub fn for_intent(intent: &PaymentIntent, status: DisplayStatus) -> Self {
        Self {
            store_id: intent.store_id.clone(),
            store_name: intent.store_name.clone(),
            cart: intent.cart.clone(),
            total: intent.total(),
            status,
            qr_code: None,
            tip: intent.tip().is_positive().then(|| intent.tip()),
        }
    }
}

/// The remote payment API.
pub trait PaymentApi: Send + Sync {
    /// Starts a push-wallet login.
    fn create_login_request(&self) -> BoxFuture<'_, Result<PushRequest, ApiError>>;

    /// Polls a push-wallet login.
    fn poll_login_status<'a>(&'a self, request_id: &'a str)
    -> BoxFuture<'a, Result<SignStatus, ApiError>>;

    /// Creates a QR payment request for a push wallet.
    fn create_payment_request<'a>(
        &'a self,
        charge: &'a QrCharge,
    ) -> BoxFuture<'a, Result<PushRequest, ApiError>>;

    /// Polls a QR payment request.
    fn poll_payment_status<'a>(
        &'a self,
        request_id: &'a str,
    ) -> BoxFuture<'a, Result<SignStatus, ApiError>>;

    /// Creates a generic sign request (trustlines, signer lists) for a push wallet.
    fn create_sign_request<'a>(
        &'a self,
        tx: &'a LedgerTransaction,
    ) -> BoxFuture<'a, Result<PushRequest, ApiError>>;

    /// Polls a generic sign request.
    fn poll_sign_status<'a>(&'a self, request_id: &'a str)
    -> BoxFuture<'a, Result<SignStatus, ApiError>>;

    /// Submits a tap payment.
    fn submit_tap_payment<'a>(
        &'a self,
        payment: &'a TapPayment,
    ) -> BoxFuture<'a, Result<Receipt, ApiError>>;

    /// Pays a payment link with a tapped card.
    fn pay_link_with_card<'a>(
        &'a self,
        link_id: &'a str,
        payment: &'a TapPayment,
    ) -> BoxFuture<'a, Result<Receipt, ApiError>>;

    /// Persists an intent server-side as a payment link.
    fn create_payment_link<'a>(
        &'a self,
        intent: &'a PaymentIntent,
    ) -> BoxFuture<'a, Result<PaymentLink, ApiError>>;

    /// Records that a payment link was paid by a wallet.
    fn confirm_link_payment<'a>(
        &'a self,
        link_id: &'a str,
        payer_wallet: &'a str,
        tx_hash: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    /// Splits a payment link into `parts` shares.
    fn split_payment<'a>(
        &'a self,
        parent_id: &'a str,
        parts: u16,
    ) -> BoxFuture<'a, Result<Vec<SplitShareRecord>, ApiError>>;

    /// Reads funding and trustline state for an address.
    fn get_wallet_status<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, Result<WalletStatus, ApiError>>;

    /// Fetches the delegation target for a store.
    fn get_delegation_target<'a>(
        &'a self,
        store_id: &'a str,
    ) -> BoxFuture<'a, Result<DelegationTarget, ApiError>>;

    /// Asks whether delegation is in place for a store.
    fn verify_delegation<'a>(&'a self, store_id: &'a str) -> BoxFuture<'a, Result<bool, ApiError>>;

    /// Pushes spending limits for a delegated wallet.
    fn update_limits<'a>(
        &'a self,
        store_id: &'a str,
        wallet: &'a str,
        limits: &'a Limits,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    /// Enables attended signing for an extension wallet.
    fn enable_attended_autosign<'a>(
        &'a self,
        store_id: &'a str,
        wallet: &'a str,
        limits: &'a Limits,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    /// Confirms a revocation once the ledger transaction is in.
    fn revoke_confirm<'a>(
        &'a self,
        store_id: &'a str,
        tx_hash: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    /// Quotes a fiat amount in stablecoin.
    fn convert(&self, fiat_amount: Money) -> BoxFuture<'_, Result<RateQuote, ApiError>>;

    /// Emails a payment link.
    fn email_payment_link<'a>(
        &'a self,
        email: &'a str,
        payment_url: &'a str,
        store_name: &'a str,
        amount: Money,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    /// Mirrors checkout state to the customer-facing display.
    fn update_display<'a>(&'a self, update: &'a DisplayUpdate)
    -> BoxFuture<'a, Result<(), ApiError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_codes_and_messages() {
        assert_eq!(
            ApiErrorCode::classify(Some("INSUFFICIENT_FUNDS"), "whatever"),
            ApiErrorCode::InsufficientFunds
        );
        assert_eq!(
            ApiErrorCode::classify(None, "SELF_PAYMENT_NOT_ALLOWED"),
            ApiErrorCode::SelfPaymentNotAllowed
        );
        assert_eq!(
            ApiErrorCode::classify(None, "Card not recognized"),
            ApiErrorCode::CardNotRegistered
        );
        assert_eq!(
            ApiErrorCode::classify(Some("E42"), "Card is not linked to a wallet"),
            ApiErrorCode::CardNotRegistered
        );
        assert_eq!(ApiErrorCode::classify(None, "Declined"), ApiErrorCode::Other);
        assert_eq!(ApiErrorCode::classify(None, "Card not found"), ApiErrorCode::CardNotRegistered);
        for message in ["Payment not found", "Payment link not found", "Store not registered"] {
            assert_eq!(ApiErrorCode::classify(None, message), ApiErrorCode::Other, "{message}");
        }
    }

    #[test]
    fn test_sign_status_terminality() {
        let signed = SignStatus::from_wire("signed", SignResult::default(), None);
        assert!(signed.is_terminal());
        assert!(SignStatus::from_wire("expired", SignResult::default(), None).is_terminal());
        assert!(SignStatus::from_wire("cancelled", SignResult::default(), None).is_terminal());
        assert!(!SignStatus::from_wire("pending", SignResult::default(), None).is_terminal());
        assert!(!SignStatus::from_wire("opened", SignResult::default(), None).is_terminal());
    }

    #[test]
    fn test_tap_payment_omits_empty_optionals() {
        let payment = TapPayment {
            uid: "04A1B2".into(),
            amount: Money::parse("5").unwrap(),
            vendor_wallet: "rVendor".into(),
            store_name: "Cafe".into(),
            store_id: "s1".into(),
            items: vec![],
            tip_amount: Money::ZERO,
            staff_id: None,
            split_payment_id: None,
        };
        let json = serde_json::to_value(&payment).unwrap();
        assert!(json.get("split_payment_id").is_none());
        assert!(json.get("staff_id").is_none());
        assert_eq!(json["amount"], 5.0);
    }
}
