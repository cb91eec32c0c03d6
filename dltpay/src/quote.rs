//! Live fiat-to-stablecoin quotes.
//!
//! The QR screen shows the stablecoin amount the payer will send. The rate
//! drifts while the code is on screen, so [`RateTicker`] re-quotes every
//! [`SettlementPoller::PRICE_INTERVAL`] and keeps the latest quote.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::amount::Money;
use crate::api::{PaymentApi, RateQuote};
use crate::error::PaymentError;
use crate::poller::{SettlementPoller, WatchHandle};

/// Quotes whose price is older than this are flagged stale.
pub const MAX_PRICE_AGE: Duration = Duration::from_secs(60);

impl RateQuote {
    /// Whether the underlying price is older than [`MAX_PRICE_AGE`].
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.price_age_ms
            .is_some_and(|age| Duration::from_millis(age) > MAX_PRICE_AGE)
    }
}

/// Quotes `fiat_amount` once.
///
/// # Errors
///
/// An [`AmountError`](crate::amount::AmountError) for a zero amount, or the
/// API's failure.
pub async fn quote(api: &dyn PaymentApi, fiat_amount: Money) -> Result<RateQuote, PaymentError> {
    let amount = fiat_amount.require_positive()?;
    Ok(api.convert(amount).await?)
}

/// Background re-quoting of one amount. Dropping the ticker stops it.
pub struct RateTicker {
    latest: Arc<Mutex<Option<RateQuote>>>,
    handle: WatchHandle<RateQuote>,
}

impl fmt::Debug for RateTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateTicker")
            .field("latest", &self.latest())
            .finish_non_exhaustive()
    }
}

impl RateTicker {
    /// Quotes `fiat_amount` now, then keeps re-quoting it in the background.
    ///
    /// `on_update` sees every refreshed quote. A failed refresh keeps the
    /// previous quote.
    ///
    /// # Errors
    ///
    /// As for [`quote`], for the initial quote only.
    pub async fn start<U>(
        api: Arc<dyn PaymentApi>,
        fiat_amount: Money,
        mut on_update: U,
    ) -> Result<Self, PaymentError>
    where
        U: FnMut(&RateQuote) + Send + 'static,
    {
        let first = quote(api.as_ref(), fiat_amount).await?;
        let latest = Arc::new(Mutex::new(Some(first)));
        let sink = Arc::clone(&latest);
        let poller = SettlementPoller::new(SettlementPoller::PRICE_INTERVAL);
        let handle = poller.watch(
            fiat_amount.to_string(),
            move |_| {
                let api = Arc::clone(&api);
                async move { api.convert(fiat_amount).await }
            },
            move |q: &RateQuote| {
                *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(q.clone());
                on_update(q);
            },
            |_| {},
        );
        Ok(Self { latest, handle })
    }

    /// The most recent quote.
    #[must_use]
    pub fn latest(&self) -> Option<RateQuote> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops re-quoting.
    pub fn stop(&self) {
        self.handle.cancel();
    }
}
