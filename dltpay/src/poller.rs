//! Cooperative polling of remote request status.
//!
//! [`SettlementPoller::watch`] drives one probe per tick until the probe
//! reports a terminal status or the watch is cancelled. It backs push-wallet
//! login, QR payment confirmation, price refresh and wallet-status refresh.
//!
//! Ticks within one watch never overlap: the next sleep starts only after the
//! previous probe has resolved. Probe errors are logged and the watch keeps
//! going. There is no built-in deadline; wrap [`WatchHandle::finished_within`]
//! around a watch that must give up.

use std::fmt::{self, Display};
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A polled status that may end the watch.
pub trait PollStatus {
    /// Whether this status ends the watch.
    fn is_terminal(&self) -> bool;
}

/// How a watch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome<S> {
    /// The probe reported a terminal status.
    Terminal(S),
    /// The watch was cancelled first.
    Cancelled,
    /// The caller's window elapsed; the watch has been cancelled.
    TimedOut,
}

/// Handle to a running watch.
///
/// Dropping the handle cancels the watch.
pub struct WatchHandle<S> {
    request_id: String,
    token: CancellationToken,
    join: Option<JoinHandle<Option<S>>>,
}

impl<S> fmt::Debug for WatchHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("request_id", &self.request_id)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<S> WatchHandle<S> {
    /// The request being watched.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Stops the watch. Any in-flight probe result is discarded.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A token that cancels this watch when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the watch task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the watch to end.
    pub async fn finished(mut self) -> WatchOutcome<S> {
        self.wait().await
    }

    /// Waits for the watch to end without giving up the handle.
    ///
    /// Cancel-safe: dropping the future leaves the watch running, and a later
    /// call picks up where this one stopped.
    pub async fn wait(&mut self) -> WatchOutcome<S> {
        let Some(join) = self.join.as_mut() else {
            return WatchOutcome::Cancelled;
        };
        let result = join.await;
        self.join = None;
        match result {
            Ok(Some(status)) => WatchOutcome::Terminal(status),
            Ok(None) | Err(_) => WatchOutcome::Cancelled,
        }
    }

    /// Waits for the watch to end, cancelling it after `window`.
    pub async fn finished_within(self, window: Duration) -> WatchOutcome<S> {
        let token = self.token.clone();
        if let Ok(outcome) = tokio::time::timeout(window, self.finished()).await {
            outcome
        } else {
            token.cancel();
            WatchOutcome::TimedOut
        }
    }
}

impl<S> Drop for WatchHandle<S> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawns and tracks polling watches at a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPoller {
    interval: Duration,
}

impl SettlementPoller {
    /// Interval for QR payment confirmation.
    pub const PAYMENT_INTERVAL: Duration = Duration::from_secs(2);
    /// Interval for push-wallet login.
    pub const LOGIN_INTERVAL: Duration = Duration::from_secs(3);
    /// Interval for live rate refresh.
    pub const PRICE_INTERVAL: Duration = Duration::from_secs(10);
    /// Interval for wallet-status refresh during onboarding.
    pub const WALLET_STATUS_INTERVAL: Duration = Duration::from_secs(10);
    /// How long a push-wallet login may stay unanswered.
    pub const LOGIN_WINDOW: Duration = Duration::from_secs(5 * 60);
    /// How long a QR payment request may stay unsigned.
    pub const PAYMENT_WINDOW: Duration = Duration::from_secs(5 * 60);

    /// A poller ticking every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// The tick interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts watching `request_id`.
    ///
    /// After each interval `probe` is called with the request id. A terminal
    /// status fires `on_terminal` once and ends the watch; any other status
    /// fires `on_update`. Probe errors are logged and swallowed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch<S, E, P, Fut, U, T>(
        &self,
        request_id: impl Into<String>,
        mut probe: P,
        mut on_update: U,
        on_terminal: T,
    ) -> WatchHandle<S>
    where
        S: PollStatus + Send + 'static,
        E: Display + Send + 'static,
        P: FnMut(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, E>> + Send,
        U: FnMut(&S) + Send + 'static,
        T: FnOnce(&S) + Send + 'static,
    {
        let request_id = request_id.into();
        let token = CancellationToken::new();
        let interval = self.interval;
        let id = request_id.clone();
        let task_token = token.clone();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = task_token.cancelled() => return None,
                    () = tokio::time::sleep(interval) => {}
                }
                let result = tokio::select! {
                    biased;
                    () = task_token.cancelled() => return None,
                    result = probe(id.clone()) => result,
                };
                match result {
                    Ok(status) if status.is_terminal() => {
                        on_terminal(&status);
                        return Some(status);
                    }
                    Ok(status) => on_update(&status),
                    Err(err) => log_probe_error(&id, &err),
                }
            }
        });

        WatchHandle {
            request_id,
            token,
            join: Some(join),
        }
    }
}

#[cfg(feature = "telemetry")]
fn log_probe_error<E: Display>(request_id: &str, err: &E) {
    tracing::warn!(request_id, error = %err, "poll probe failed, retrying next tick");
}

#[cfg(not(feature = "telemetry"))]
fn log_probe_error<E: Display>(_request_id: &str, _err: &E) {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Status {
        Pending,
        Expired,
    }

    impl PollStatus for Status {
        fn is_terminal(&self) -> bool {
            matches!(self, Self::Expired)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_on_third_tick_fires_terminal_once() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let updates = Arc::new(AtomicUsize::new(0));
        let terminals = Arc::new(AtomicUsize::new(0));

        let probe_ticks = Arc::clone(&ticks);
        let update_count = Arc::clone(&updates);
        let terminal_count = Arc::clone(&terminals);
        let handle = SettlementPoller::new(SettlementPoller::LOGIN_INTERVAL).watch(
            "login_1",
            move |_id| {
                let n = probe_ticks.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    Ok::<_, String>(if n == 3 { Status::Expired } else { Status::Pending })
                }
            },
            move |_| {
                update_count.fetch_add(1, Ordering::SeqCst);
            },
            move |status| {
                assert_eq!(*status, Status::Expired);
                terminal_count.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(
            handle.finished_within(SettlementPoller::LOGIN_WINDOW).await,
            WatchOutcome::Terminal(Status::Expired)
        );
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert_eq!(terminals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_are_swallowed() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let probe_ticks = Arc::clone(&ticks);
        let handle = SettlementPoller::new(Duration::from_secs(2)).watch(
            "pay_1",
            move |_id| {
                let n = probe_ticks.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 | 1 => Err("connection reset".to_owned()),
                        _ => Ok(Status::Expired),
                    }
                }
            },
            |_: &Status| {},
            |_| {},
        );
        assert_eq!(handle.finished().await, WatchOutcome::Terminal(Status::Expired));
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let probe_ticks = Arc::clone(&ticks);
        let handle = SettlementPoller::new(Duration::from_secs(2)).watch(
            "pay_2",
            move |_id| {
                probe_ticks.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(Status::Pending) }
            },
            |_| {},
            |_| panic!("never terminal"),
        );
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        handle.cancel();
        let seen = ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 2);
        assert_eq!(handle.finished().await, WatchOutcome::Cancelled);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_elapses_without_terminal() {
        let handle = SettlementPoller::new(SettlementPoller::LOGIN_INTERVAL).watch(
            "login_2",
            |_id| async { Ok::<_, String>(Status::Pending) },
            |_| {},
            |_| {},
        );
        let token = handle.cancellation_token();
        assert_eq!(
            handle.finished_within(SettlementPoller::LOGIN_WINDOW).await,
            WatchOutcome::TimedOut
        );
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_keeps_the_watch() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let probe_ticks = Arc::clone(&ticks);
        let mut handle = SettlementPoller::new(Duration::from_secs(2)).watch(
            "pay_3",
            move |_id| {
                let n = probe_ticks.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok::<_, String>(if n == 5 { Status::Expired } else { Status::Pending }) }
            },
            |_| {},
            |_| {},
        );
        assert!(
            tokio::time::timeout(Duration::from_secs(5), handle.wait())
                .await
                .is_err()
        );
        assert!(!handle.cancellation_token().is_cancelled());
        assert_eq!(handle.wait().await, WatchOutcome::Terminal(Status::Expired));
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        assert_eq!(handle.wait().await, WatchOutcome::Cancelled);
    }
}
