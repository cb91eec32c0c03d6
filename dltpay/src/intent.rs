//! Payment intents: one checkout as the server records it.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::amount::{AmountError, Money};
use crate::capability::Stablecoin;
use crate::error::PaymentError;

/// Lifecycle of a [`PaymentIntent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Created, no channel engaged.
    Pending,
    /// A QR sign request has been issued.
    QrIssued,
    /// A submission is on its way to the ledger.
    AwaitingSettlement,
    /// Confirmed on ledger. Terminal.
    Settled,
    /// Past its expiry. Terminal.
    Expired,
    /// Last attempt failed; may be retried.
    Failed,
}

impl IntentStatus {
    /// Terminal statuses accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Expired)
    }

    /// Whether `self → next` is a legal move.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use IntentStatus::{AwaitingSettlement, Expired, Failed, Pending, QrIssued, Settled};
        matches!(
            (self, next),
            (Pending, QrIssued | AwaitingSettlement | Expired | Failed)
                | (QrIssued, AwaitingSettlement | Pending | Settled | Expired | Failed)
                | (AwaitingSettlement, Settled | Failed | Pending)
                | (Failed, Pending | Expired)
        )
    }

    /// Snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::QrIssued => "qr_issued",
            Self::AwaitingSettlement => "awaiting_settlement",
            Self::Settled => "settled",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

/// One cart line.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Catalogue id, absent for synthesized lines.
    pub product_id: Option<String>,
    /// Display name.
    pub name: String,
    /// Units.
    pub quantity: u32,
    /// Price of one unit.
    pub unit_price: Money,
    /// `unit_price × quantity`.
    pub line_total: Money,
}

impl LineItem {
    /// A catalogue line; `line_total` is computed.
    ///
    /// # Errors
    ///
    /// [`AmountError::TooLarge`] if the line total passes [`Money::MAX`].
    pub fn new(name: impl Into<String>, quantity: u32, unit_price: Money) -> Result<Self, AmountError> {
        let line_total = Money::from_decimal(unit_price.as_decimal() * rust_decimal::Decimal::from(quantity))?;
        Ok(Self {
            product_id: None,
            name: name.into(),
            quantity,
            unit_price,
            line_total,
        })
    }

    /// Attaches a catalogue id.
    #[must_use]
    pub fn with_product_id(mut self, id: impl Into<String>) -> Self {
        self.product_id = Some(id.into());
        self
    }

    fn synthesized(name: &str, amount: Money) -> Self {
        Self {
            product_id: None,
            name: name.to_owned(),
            quantity: 1,
            unit_price: amount,
            line_total: amount,
        }
    }
}

/// A single checkout.
///
/// Immutable once created apart from [`tip`](Self::tip) and
/// [`status`](Self::status), both of which go through checked setters.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntent {
    /// Server-side id (payment link id, or a local id for in-store checkouts).
    pub id: String,
    /// Merchant receiving account.
    pub vendor_wallet: String,
    /// Merchant store id.
    pub store_id: String,
    /// Merchant display name.
    pub store_name: String,
    /// Amount due before tip.
    pub amount: Money,
    /// Settlement currency.
    pub currency: Stablecoin,
    /// Cart lines; empty for manual-amount checkouts.
    pub cart: Vec<LineItem>,
    tip: Money,
    /// After this instant every channel refuses the intent.
    pub expiry: Option<SystemTime>,
    /// Position within a split group (1-based), for shares.
    pub split_index: Option<u16>,
    /// Size of the split group, for shares.
    pub total_splits: Option<u16>,
    /// The intent lives server-side at a payment-link URL.
    pub is_payment_link: bool,
    split_into: Option<u16>,
    status: IntentStatus,
}

impl PaymentIntent {
    /// A pending RLUSD intent with an empty cart.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        vendor_wallet: impl Into<String>,
        store_id: impl Into<String>,
        store_name: impl Into<String>,
        amount: Money,
    ) -> Self {
        Self {
            id: id.into(),
            vendor_wallet: vendor_wallet.into(),
            store_id: store_id.into(),
            store_name: store_name.into(),
            amount,
            currency: Stablecoin::Rlusd,
            cart: Vec::new(),
            tip: Money::ZERO,
            expiry: None,
            split_index: None,
            total_splits: None,
            is_payment_link: false,
            split_into: None,
            status: IntentStatus::Pending,
        }
    }

    /// Marks the intent as backed by a payment link.
    #[must_use]
    pub const fn as_payment_link(mut self) -> Self {
        self.is_payment_link = true;
        self
    }

    /// Sets the cart.
    #[must_use]
    pub fn with_cart(mut self, cart: Vec<LineItem>) -> Self {
        self.cart = cart;
        self
    }

    /// Sets the expiry instant.
    #[must_use]
    pub const fn with_expiry(mut self, expiry: SystemTime) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Sets the settlement currency.
    #[must_use]
    pub const fn with_currency(mut self, currency: Stablecoin) -> Self {
        self.currency = currency;
        self
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> IntentStatus {
        self.status
    }

    /// Current tip.
    #[must_use]
    pub const fn tip(&self) -> Money {
        self.tip
    }

    /// Amount plus tip.
    ///
    /// # Errors
    ///
    /// [`AmountError::TooLarge`] if the sum passes [`Money::MAX`].
    pub fn checked_total(&self) -> Result<Money, AmountError> {
        self.amount.checked_add(self.tip)
    }

    /// Amount plus tip for display, capped at [`Money::MAX`]. Every channel
    /// entry goes through [`Self::checked_total`] first.
    #[must_use]
    pub fn total(&self) -> Money {
        self.checked_total().unwrap_or(Money::MAX)
    }

    /// Whether this intent is one share of a split.
    #[must_use]
    pub const fn is_share(&self) -> bool {
        self.split_index.is_some()
    }

    /// Number of shares this intent was split into, once split.
    #[must_use]
    pub const fn split_into(&self) -> Option<u16> {
        self.split_into
    }

    /// Whether the expiry has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expiry.is_some_and(|e| now >= e)
    }

    /// Changes the tip. Allowed until the intent is settled.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::AlreadySettled`] once settled, or an
    /// [`AmountError`] if the total would pass [`Money::MAX`].
    pub fn set_tip(&mut self, tip: Money) -> Result<(), PaymentError> {
        if self.status == IntentStatus::Settled {
            return Err(PaymentError::AlreadySettled);
        }
        self.amount.checked_add(tip)?;
        self.tip = tip;
        Ok(())
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidTransition`] otherwise.
    pub fn transition(&mut self, next: IntentStatus) -> Result<(), PaymentError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::InvalidTransition {
                action: next.as_str(),
                state: self.status.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Refuses channel entry for expired or settled intents, marking an
    /// overdue intent [`IntentStatus::Expired`] on the way.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Expired`] or [`PaymentError::AlreadySettled`].
    pub fn ensure_open(&mut self, now: SystemTime) -> Result<(), PaymentError> {
        match self.status {
            IntentStatus::Settled => return Err(PaymentError::AlreadySettled),
            IntentStatus::Expired => return Err(PaymentError::Expired),
            _ => {}
        }
        if self.is_expired_at(now) {
            self.status = IntentStatus::Expired;
            return Err(PaymentError::Expired);
        }
        Ok(())
    }

    /// Items submitted with a tap payment.
    ///
    /// An empty cart becomes one `Payment` line for the amount. A positive
    /// tip is appended as a `Tip` line.
    #[must_use]
    pub fn submission_items(&self) -> Vec<LineItem> {
        let mut items = if self.cart.is_empty() {
            vec![LineItem::synthesized("Payment", self.amount)]
        } else {
            self.cart.clone()
        };
        if self.tip.is_positive() {
            items.push(LineItem::synthesized("Tip", self.tip));
        }
        items
    }

    /// Records a failed attempt unless the intent is already terminal.
    pub(crate) fn mark_failed(&mut self) {
        if !self.status.is_terminal() {
            self.status = IntentStatus::Failed;
        }
    }

    /// Returns an in-progress or failed intent to `pending` after a cancel.
    pub(crate) const fn rewind(&mut self) {
        if matches!(
            self.status,
            IntentStatus::QrIssued | IntentStatus::AwaitingSettlement | IntentStatus::Failed
        ) {
            self.status = IntentStatus::Pending;
        }
    }

    /// Records that the intent was split into `parts` shares.
    pub(crate) const fn record_split(&mut self, parts: u16) {
        self.split_into = Some(parts);
    }

    /// Builds a share of this intent.
    pub(crate) fn share(&self, id: String, amount: Money, index: u16, total: u16) -> Self {
        Self {
            id,
            amount,
            cart: Vec::new(),
            tip: Money::ZERO,
            split_index: Some(index),
            total_splits: Some(total),
            is_payment_link: true,
            split_into: None,
            status: IntentStatus::Pending,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn intent() -> PaymentIntent {
        PaymentIntent::new("pl_1", "rVendor", "store_1", "Cafe", Money::parse("12.50").unwrap())
    }

    #[test]
    fn test_settled_and_expired_are_terminal() {
        assert!(IntentStatus::Settled.is_terminal());
        assert!(IntentStatus::Expired.is_terminal());
        assert!(!IntentStatus::Failed.is_terminal());
        assert!(!IntentStatus::Settled.can_transition_to(IntentStatus::Pending));
    }

    #[test]
    fn test_cancel_restarts_qr_flow() {
        let mut i = intent();
        i.transition(IntentStatus::QrIssued).unwrap();
        i.transition(IntentStatus::Pending).unwrap();
        i.transition(IntentStatus::AwaitingSettlement).unwrap();
        i.transition(IntentStatus::Settled).unwrap();
        assert!(i.transition(IntentStatus::Pending).is_err());
    }

    #[test]
    fn test_tip_rejected_once_settled() {
        let mut i = intent();
        i.set_tip(Money::parse("1.50").unwrap()).unwrap();
        assert_eq!(i.total().to_string(), "14.00");
        i.transition(IntentStatus::AwaitingSettlement).unwrap();
        i.transition(IntentStatus::Settled).unwrap();
        assert!(matches!(i.set_tip(Money::ZERO), Err(PaymentError::AlreadySettled)));
    }

    #[test]
    fn test_tip_cannot_push_total_past_max() {
        let mut i = PaymentIntent::new("pl_2", "rVendor", "store_1", "Cafe", Money::MAX);
        assert!(matches!(
            i.set_tip(Money::parse("0.01").unwrap()),
            Err(PaymentError::Amount(AmountError::TooLarge))
        ));
        assert_eq!(i.tip(), Money::ZERO);
        assert_eq!(i.checked_total(), Ok(Money::MAX));

        i.amount = Money::MAX;
        i.tip = Money::parse("1").unwrap();
        assert_eq!(i.checked_total(), Err(AmountError::TooLarge));
    }

    #[test]
    fn test_submission_items_synthesize_payment_and_tip() {
        let mut i = intent();
        let items = i.submission_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Payment");

        i.cart = vec![LineItem::new("Flat white", 2, Money::parse("3.20").unwrap()).unwrap().with_product_id("p1")];
        i.set_tip(Money::parse("1").unwrap()).unwrap();
        let items = i.submission_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].line_total.to_string(), "6.40");
        assert_eq!(items[1].name, "Tip");
    }

    #[test]
    fn test_ensure_open_marks_expired() {
        let now = SystemTime::now();
        let mut i = intent().with_expiry(now - Duration::from_secs(1));
        assert!(matches!(i.ensure_open(now), Err(PaymentError::Expired)));
        assert_eq!(i.status(), IntentStatus::Expired);
    }
}
