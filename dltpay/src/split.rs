//! Bill splitting.
//!
//! [`SplitOrchestrator::split`] turns one payment-link intent into `n`
//! share intents and records the split on the parent, so the same parent is
//! never split twice. The API allocates the share ids; the amounts are
//! computed here with [`Money::split_even`], so shares differ by at most a
//! penny and always sum to the parent amount.
//!
//! Shares are paid one at a time, each through its own
//! [`PaymentSession`](crate::session::PaymentSession). The [`SplitGroup`]
//! tracks which share is due next and when the bill is fully paid.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::amount::Money;
use crate::api::{PaymentApi, PaymentLink};
use crate::error::PaymentError;
use crate::intent::{IntentStatus, PaymentIntent};
use crate::qr;

/// Fewest shares a bill may be split into.
pub const MIN_SHARES: u16 = 2;
/// Most shares a bill may be split into.
pub const MAX_SHARES: u16 = 100;
/// Public base for payment-link URLs.
pub const DEFAULT_PAY_BASE: &str = "https://yesallofus.com/pay/";

/// A parent intent and its shares.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitGroup {
    /// Id of the intent that was split.
    pub parent_intent_id: String,
    total: Money,
    shares: Vec<PaymentIntent>,
    all_paid: bool,
}

impl SplitGroup {
    /// Shares in payment order.
    #[must_use]
    pub fn shares(&self) -> &[PaymentIntent] {
        &self.shares
    }

    /// Number of shares.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shares.len()
    }

    /// Whether the group has no shares.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// Sum of the share amounts, which is the parent amount.
    #[must_use]
    pub const fn total(&self) -> Money {
        self.total
    }

    /// Index of the lowest unpaid share, or `None` once every share is paid.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.shares
            .iter()
            .position(|s| s.status() != IntentStatus::Settled)
    }

    /// The share due next.
    #[must_use]
    pub fn current_share(&self) -> Option<&PaymentIntent> {
        self.current_index().map(|i| &self.shares[i])
    }

    /// Whether every share has settled.
    #[must_use]
    pub const fn all_paid(&self) -> bool {
        self.all_paid
    }

    /// Records that share `share_id` settled and returns the new
    /// [`current_index`](Self::current_index). Settling a share twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`PaymentError::InvalidTransition`] for an unknown or expired share.
    pub fn mark_settled(&mut self, share_id: &str) -> Result<Option<usize>, PaymentError> {
        let share = self
            .shares
            .iter_mut()
            .find(|s| s.id == share_id)
            .ok_or(PaymentError::InvalidTransition {
                action: "settle share",
                state: "unknown share",
            })?;
        if share.status() != IntentStatus::Settled {
            if share.status() != IntentStatus::AwaitingSettlement {
                share.transition(IntentStatus::Pending)?;
                share.transition(IntentStatus::AwaitingSettlement)?;
            }
            share.transition(IntentStatus::Settled)?;
        }
        self.all_paid = self
            .shares
            .iter()
            .all(|s| s.status() == IntentStatus::Settled);
        Ok(self.current_index())
    }
}

/// A shareable payment link: URL, QR forms and message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    /// Link id.
    pub payment_id: String,
    /// Public URL.
    pub url: Url,
    /// Amount due on the link.
    pub amount: Money,
    /// Store display name.
    pub store_name: String,
    /// `(index, total)`, 1-based, for split shares.
    pub position: Option<(u16, u16)>,
}

impl ShareLink {
    /// The link for a server-issued payment link.
    ///
    /// # Errors
    ///
    /// [`PaymentError::Url`] if the server URL does not parse.
    pub fn for_link(
        link: &PaymentLink,
        amount: Money,
        store_name: impl Into<String>,
    ) -> Result<Self, PaymentError> {
        Ok(Self {
            payment_id: link.payment_id.clone(),
            url: Url::parse(&link.payment_url)?,
            amount,
            store_name: store_name.into(),
            position: None,
        })
    }

    /// SVG QR code of the URL.
    ///
    /// # Errors
    ///
    /// [`PaymentError::Qr`] if the URL does not fit.
    pub fn qr_svg(&self) -> Result<String, PaymentError> {
        Ok(qr::svg(self.url.as_str())?)
    }

    /// SVG QR code as a `data:` URI.
    ///
    /// # Errors
    ///
    /// As for [`Self::qr_svg`].
    pub fn qr_data_uri(&self) -> Result<String, PaymentError> {
        Ok(qr::svg_data_uri(self.url.as_str())?)
    }

    /// Message text for sharing the link.
    #[must_use]
    pub fn share_text(&self) -> String {
        match self.position {
            Some((index, total)) => format!(
                "Your share ({index} of {total}) of the bill at {}: £{}. Pay here: {}",
                self.store_name, self.amount, self.url
            ),
            None => format!(
                "Pay £{} to {}: {}",
                self.amount, self.store_name, self.url
            ),
        }
    }
}

/// Splits payment links and hands out their shares.
pub struct SplitOrchestrator {
    api: Arc<dyn PaymentApi>,
    pay_base: Url,
}

impl fmt::Debug for SplitOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitOrchestrator")
            .field("pay_base", &self.pay_base.as_str())
            .finish_non_exhaustive()
    }
}

impl SplitOrchestrator {
    /// An orchestrator publishing links under [`DEFAULT_PAY_BASE`].
    ///
    /// # Errors
    ///
    /// Never in practice; the default base is a valid URL.
    pub fn new(api: Arc<dyn PaymentApi>) -> Result<Self, PaymentError> {
        Self::with_pay_base(api, DEFAULT_PAY_BASE)
    }

    /// An orchestrator publishing links under `pay_base`. A trailing slash is
    /// added if missing.
    ///
    /// # Errors
    ///
    /// [`PaymentError::Url`] if `pay_base` does not parse.
    pub fn with_pay_base(api: Arc<dyn PaymentApi>, pay_base: &str) -> Result<Self, PaymentError> {
        let mut normalized = pay_base.trim_end_matches('/').to_owned();
        normalized.push('/');
        Ok(Self {
            api,
            pay_base: Url::parse(&normalized)?,
        })
    }

    /// Splits `parent` into `parts` shares and marks it as split.
    ///
    /// # Errors
    ///
    /// [`PaymentError::InvalidSplitCount`] outside `2..=100`,
    /// [`PaymentError::AlreadySettled`] for a settled parent,
    /// [`PaymentError::AlreadySplit`] for a parent already split or itself a
    /// share, an [`AmountError`](crate::amount::AmountError) if a share would
    /// be less than a penny, [`PaymentError::SplitMismatch`] if the API
    /// allocates the wrong number of shares, or the API's own failure. On
    /// error no shares are produced and the parent stays unsplit.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip_all, err, fields(parent = %parent.id, parts)))]
    pub async fn split(
        &self,
        parent: &mut PaymentIntent,
        parts: u16,
    ) -> Result<SplitGroup, PaymentError> {
        if !(MIN_SHARES..=MAX_SHARES).contains(&parts) {
            return Err(PaymentError::InvalidSplitCount {
                requested: parts,
                min: MIN_SHARES,
                max: MAX_SHARES,
            });
        }
        if parent.status() == IntentStatus::Settled {
            return Err(PaymentError::AlreadySettled);
        }
        if parent.is_share() || parent.split_into().is_some() {
            return Err(PaymentError::AlreadySplit(parent.id.clone()));
        }
        let amounts = parent.amount.split_even(parts)?;

        let mut records = self.api.split_payment(&parent.id, parts).await?;
        if records.len() != usize::from(parts) {
            return Err(PaymentError::SplitMismatch {
                expected: parts,
                actual: records.len(),
            });
        }
        records.sort_by_key(|r| r.split_index);
        let shares = records
            .into_iter()
            .zip(amounts)
            .zip(1..=parts)
            .map(|((record, amount), index)| parent.share(record.payment_id, amount, index, parts))
            .collect();

        parent.record_split(parts);

        #[cfg(feature = "telemetry")]
        tracing::info!(parent = %parent.id, parts, "payment split");

        Ok(SplitGroup {
            parent_intent_id: parent.id.clone(),
            total: parent.amount,
            shares,
            all_paid: false,
        })
    }

    /// The public URL of a payment link.
    ///
    /// # Errors
    ///
    /// [`PaymentError::Url`] if the id cannot be joined onto the base.
    pub fn link_url(&self, payment_id: &str) -> Result<Url, PaymentError> {
        Ok(self.pay_base.join(payment_id)?)
    }

    /// The share link for share `index`, or `None` if the index is out of
    /// range or the share is already paid.
    ///
    /// # Errors
    ///
    /// As for [`Self::link_url`].
    pub fn share_link(
        &self,
        group: &SplitGroup,
        index: usize,
    ) -> Result<Option<ShareLink>, PaymentError> {
        let Some(share) = group.shares.get(index) else {
            return Ok(None);
        };
        if share.status() == IntentStatus::Settled {
            return Ok(None);
        }
        Ok(Some(ShareLink {
            payment_id: share.id.clone(),
            url: self.link_url(&share.id)?,
            amount: share.amount,
            store_name: share.store_name.clone(),
            position: share.split_index.zip(share.total_splits),
        }))
    }

    /// Emails a link to `email`.
    ///
    /// # Errors
    ///
    /// [`PaymentError::InvalidEmail`] unless the trimmed address contains an
    /// `@`, or the API's failure.
    pub async fn email(&self, link: &ShareLink, email: &str) -> Result<(), PaymentError> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(PaymentError::InvalidEmail(email));
        }
        self.api
            .email_payment_link(&email, link.url.as_str(), &link.store_name, link.amount)
            .await?;
        Ok(())
    }
}
