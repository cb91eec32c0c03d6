//! Contactless card reading with duplicate suppression.
//!
//! [`ChannelReader`] wraps a [`ContactlessDevice`] and turns its raw reads
//! into at most one [`CardEvent::CardDetected`] per physical tap. The rules
//! live in [`ScanGuardState`]:
//!
//! - a read within [`DEBOUNCE_WINDOW`] of the previous read is dropped;
//! - a read while a previous card is still being submitted is dropped;
//! - otherwise the card id is normalized and handed off once.
//!
//! The owner calls [`ChannelReader::release`] once the submission resolves and
//! [`ChannelReader::reset`] on a terminal payment outcome.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::BoxFuture;

/// Reads closer together than this are treated as one tap.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);

const EVENT_BUFFER: usize = 8;

/// Reader failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReaderError {
    /// The device has no contactless capability.
    #[error("NFC is not supported on this device")]
    NotSupported,
    /// The user declined the permission prompt.
    #[error("NFC permission denied")]
    PermissionDenied,
    /// A read produced an unusable payload.
    #[error("Error reading card: {0}")]
    ReadError(String),
    /// `start` was called while already scanning.
    #[error("reader is already active")]
    AlreadyActive,
}

/// Raw events from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A tag was read.
    Reading {
        /// Serial number as reported, e.g. `04:a1:b2:c3`.
        serial_number: String,
    },
    /// The device failed to read a tag.
    ReadingError(String),
}

/// Events delivered to the reader's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEvent {
    /// A card was accepted; carries the normalized id.
    CardDetected(String),
    /// A read failed.
    Error(ReaderError),
}

/// The device-level contactless capability.
pub trait ContactlessDevice: Send + Sync {
    /// Whether the capability exists at all.
    fn is_supported(&self) -> bool;

    /// Starts scanning. Events arrive on the returned channel until `abort`
    /// is cancelled or the device closes it.
    fn scan(
        &self,
        abort: CancellationToken,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<DeviceEvent>, ReaderError>>;

    /// Haptic confirmation of an accepted read.
    fn pulse(&self) {}
}

/// Why a read was admitted or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Hand the card off.
    Accepted,
    /// Too soon after the previous read.
    Debounced,
    /// A previous card is still being submitted.
    InFlight,
}

/// Guard flags for one reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanGuardState {
    active: bool,
    in_flight: bool,
    last_read: Option<Instant>,
}

impl ScanGuardState {
    /// Whether a scan is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a card is being submitted.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// When the last read was seen.
    #[must_use]
    pub const fn last_read(&self) -> Option<Instant> {
        self.last_read
    }

    /// Applies the debounce and in-flight rules to a read at `now`.
    pub fn admit(&mut self, now: Instant) -> Admission {
        if self
            .last_read
            .is_some_and(|last| now.saturating_duration_since(last) < DEBOUNCE_WINDOW)
        {
            return Admission::Debounced;
        }
        self.last_read = Some(now);
        if self.in_flight {
            return Admission::InFlight;
        }
        self.in_flight = true;
        Admission::Accepted
    }

    /// Claims the in-flight slot for a manually entered id. No debounce.
    pub fn claim(&mut self) -> Admission {
        if self.in_flight {
            return Admission::InFlight;
        }
        self.in_flight = true;
        Admission::Accepted
    }

    /// Clears the in-flight flag after a submission resolves.
    pub const fn release(&mut self) {
        self.in_flight = false;
    }

    /// Restores the guard after a terminal outcome. The last-read timestamp
    /// survives so a lingering card is still debounced.
    pub const fn reset(&mut self) {
        self.active = false;
        self.in_flight = false;
    }
}

/// Strips `:`, `-` and whitespace from a serial and uppercases it.
///
/// # Errors
///
/// Returns [`ReaderError::ReadError`] if nothing remains.
pub fn normalize_card_id(raw: &str) -> Result<String, ReaderError> {
    let id: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-') && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if id.is_empty() {
        Err(ReaderError::ReadError("empty card identifier".to_owned()))
    } else {
        Ok(id)
    }
}

/// Stream of accepted cards and read errors.
#[derive(Debug)]
pub struct CardEvents {
    rx: mpsc::Receiver<CardEvent>,
}

impl CardEvents {
    /// The next event, or `None` once the reader stops.
    pub async fn next(&mut self) -> Option<CardEvent> {
        self.rx.recv().await
    }
}

/// Owns one scan lifecycle over a [`ContactlessDevice`].
pub struct ChannelReader {
    device: Arc<dyn ContactlessDevice>,
    guard: Arc<Mutex<ScanGuardState>>,
    abort: Option<CancellationToken>,
}

impl fmt::Debug for ChannelReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReader")
            .field("guard", &self.guard_state())
            .finish_non_exhaustive()
    }
}

impl ChannelReader {
    /// A stopped reader over `device`.
    #[must_use]
    pub fn new(device: Arc<dyn ContactlessDevice>) -> Self {
        Self {
            device,
            guard: Arc::new(Mutex::new(ScanGuardState::default())),
            abort: None,
        }
    }

    fn with_guard<R>(&self, f: impl FnOnce(&mut ScanGuardState) -> R) -> R {
        let mut guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Snapshot of the guard flags.
    #[must_use]
    pub fn guard_state(&self) -> ScanGuardState {
        self.with_guard(|g| *g)
    }

    /// Starts scanning.
    ///
    /// # Errors
    ///
    /// [`ReaderError::AlreadyActive`] if a scan is running (the device is not
    /// touched), [`ReaderError::NotSupported`] if the device lacks the
    /// capability, or whatever the device's `scan` reports.
    pub async fn start(&mut self) -> Result<CardEvents, ReaderError> {
        let already = self.with_guard(|g| std::mem::replace(&mut g.active, true));
        if already {
            return Err(ReaderError::AlreadyActive);
        }
        if !self.device.is_supported() {
            self.with_guard(|g| g.active = false);
            return Err(ReaderError::NotSupported);
        }

        let abort = CancellationToken::new();
        let mut raw = match self.device.scan(abort.clone()).await {
            Ok(rx) => rx,
            Err(err) => {
                self.with_guard(|g| g.active = false);
                return Err(err);
            }
        };
        self.abort = Some(abort.clone());

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let guard = Arc::clone(&self.guard);
        let device = Arc::clone(&self.device);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = abort.cancelled() => break,
                    event = raw.recv() => event,
                };
                let Some(event) = event else { break };
                let forwarded = match event {
                    DeviceEvent::Reading { serial_number } => {
                        let admission = guard
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .admit(Instant::now());
                        match admission {
                            Admission::Accepted => match normalize_card_id(&serial_number) {
                                Ok(id) => {
                                    device.pulse();
                                    CardEvent::CardDetected(id)
                                }
                                Err(err) => {
                                    guard.lock().unwrap_or_else(PoisonError::into_inner).release();
                                    CardEvent::Error(err)
                                }
                            },
                            Admission::Debounced | Admission::InFlight => {
                                #[cfg(feature = "telemetry")]
                                tracing::debug!(?admission, "dropped card read");
                                continue;
                            }
                        }
                    }
                    DeviceEvent::ReadingError(message) => {
                        CardEvent::Error(ReaderError::ReadError(message))
                    }
                };
                if tx.send(forwarded).await.is_err() {
                    break;
                }
            }
        });

        Ok(CardEvents { rx })
    }

    /// Stops scanning. A no-op when not active.
    pub fn stop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.cancel();
        }
        self.with_guard(|g| g.active = false);
    }

    /// Clears the in-flight flag once a submission resolves.
    pub fn release(&self) {
        self.with_guard(ScanGuardState::release);
    }

    /// Stops scanning and restores the guard after a terminal outcome.
    pub fn reset(&mut self) {
        self.stop();
        self.with_guard(ScanGuardState::reset);
    }

    /// Claims the in-flight slot for a manually typed card id.
    ///
    /// # Errors
    ///
    /// [`ReaderError::ReadError`] if the id is empty after normalization.
    /// Returns `Ok(None)` when a submission is already in flight.
    pub fn claim_manual(&self, raw: &str) -> Result<Option<String>, ReaderError> {
        let id = normalize_card_id(raw)?;
        Ok((self.with_guard(ScanGuardState::claim) == Admission::Accepted).then_some(id))
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// A device whose reads are pushed by the test.
    #[derive(Debug, Default)]
    pub(crate) struct FakeDevice {
        pub(crate) unsupported: bool,
        pub(crate) deny: bool,
        pub(crate) scans: AtomicUsize,
        pub(crate) pulses: AtomicUsize,
        pub(crate) feed: Mutex<Option<mpsc::Sender<DeviceEvent>>>,
    }

    impl FakeDevice {
        pub(crate) async fn tap(&self, serial: &str) {
            let tx = self.feed.lock().unwrap().clone().unwrap();
            tx.send(DeviceEvent::Reading {
                serial_number: serial.to_owned(),
            })
            .await
            .unwrap();
            tokio::task::yield_now().await;
        }
    }

    impl ContactlessDevice for FakeDevice {
        fn is_supported(&self) -> bool {
            !self.unsupported
        }

        fn scan(
            &self,
            _abort: CancellationToken,
        ) -> BoxFuture<'_, Result<mpsc::Receiver<DeviceEvent>, ReaderError>> {
            Box::pin(async move {
                if self.deny {
                    return Err(ReaderError::PermissionDenied);
                }
                self.scans.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = mpsc::channel(16);
                *self.feed.lock().unwrap() = Some(tx);
                Ok(rx)
            })
        }

        fn pulse(&self) {
            self.pulses.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_normalize_strips_separators() {
        assert_eq!(normalize_card_id("04:a1:b2:c3").unwrap(), "04A1B2C3");
        assert_eq!(normalize_card_id(" 04-a1 b2 ").unwrap(), "04A1B2");
        assert!(normalize_card_id("::").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_debounce_and_in_flight() {
        let mut guard = ScanGuardState::default();
        let t0 = Instant::now();
        assert_eq!(guard.admit(t0), Admission::Accepted);
        assert_eq!(guard.admit(t0 + Duration::from_millis(4_999)), Admission::Debounced);
        // Past the window but the first card is still in flight.
        assert_eq!(guard.admit(t0 + Duration::from_secs(6)), Admission::InFlight);
        guard.release();
        // The in-flight drop above still refreshed the timestamp.
        assert_eq!(guard.admit(t0 + Duration::from_secs(8)), Admission::Debounced);
        assert_eq!(guard.admit(t0 + Duration::from_secs(12)), Admission::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_reads_inside_window_forward_once() {
        let device = Arc::new(FakeDevice::default());
        let mut reader = ChannelReader::new(device.clone());
        let mut events = reader.start().await.unwrap();

        device.tap("04:aa:bb").await;
        tokio::time::advance(Duration::from_millis(1_200)).await;
        device.tap("04:aa:bb").await;

        assert_eq!(events.next().await, Some(CardEvent::CardDetected("04AABB".into())));
        reader.stop();
        assert_eq!(events.next().await, None);
        assert_eq!(device.pulses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected_without_touching_device() {
        let device = Arc::new(FakeDevice::default());
        let mut reader = ChannelReader::new(device.clone());
        let _events = reader.start().await.unwrap();
        assert_eq!(reader.start().await.unwrap_err(), ReaderError::AlreadyActive);
        assert_eq!(device.scans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_failures_leave_reader_inactive() {
        let mut reader = ChannelReader::new(Arc::new(FakeDevice {
            unsupported: true,
            ..FakeDevice::default()
        }));
        assert_eq!(reader.start().await.unwrap_err(), ReaderError::NotSupported);
        assert!(!reader.guard_state().is_active());

        let mut reader = ChannelReader::new(Arc::new(FakeDevice {
            deny: true,
            ..FakeDevice::default()
        }));
        assert_eq!(reader.start().await.unwrap_err(), ReaderError::PermissionDenied);
        assert!(!reader.guard_state().is_active());
    }

    #[test]
    fn test_manual_claim_respects_in_flight() {
        let reader = ChannelReader::new(Arc::new(FakeDevice::default()));
        assert_eq!(reader.claim_manual("ab:cd").unwrap(), Some("ABCD".into()));
        assert_eq!(reader.claim_manual("ab:cd").unwrap(), None);
        reader.release();
        assert!(reader.claim_manual("ab:cd").unwrap().is_some());
    }
}
