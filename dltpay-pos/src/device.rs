//! A contactless reader fed by lines of text.
//!
//! USB card readers in keyboard-wedge mode type each card serial followed by
//! Enter, so a headless terminal reads them from stdin. Each non-empty line is
//! one read. Lines arriving while no scan is active are dropped.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use dltpay::BoxFuture;
use dltpay::reader::{ContactlessDevice, DeviceEvent, ReaderError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;
type Sink = Arc<Mutex<Option<(u64, mpsc::Sender<DeviceEvent>)>>>;

/// Reads card serials line by line.
pub struct LineDevice {
    source: Mutex<Option<LineSource>>,
    sink: Sink,
    scans: Mutex<u64>,
}

impl fmt::Debug for LineDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineDevice").finish_non_exhaustive()
    }
}

impl LineDevice {
    /// Queue depth between the input pump and the reader.
    const BUFFER: usize = 8;

    /// A device reading from `source`.
    #[must_use]
    pub fn new(source: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            source: Mutex::new(Some(Box::new(source))),
            sink: Arc::new(Mutex::new(None)),
            scans: Mutex::new(0),
        }
    }

    /// A device reading from the process's stdin.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }

    /// Starts forwarding lines on the first scan. The pump outlives
    /// individual scans so the reader can be restarted.
    fn start_pump(&self) {
        let Some(source) = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            let mut lines = source.lines();
            loop {
                let event = match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => DeviceEvent::Reading {
                        serial_number: line.trim().to_owned(),
                    },
                    Ok(None) => break,
                    Err(err) => DeviceEvent::ReadingError(err.to_string()),
                };
                let tx = sink
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .map(|(_, tx)| tx.clone());
                if let Some(tx) = tx
                    && tx.try_send(event).is_err()
                {
                    tracing::debug!("reader busy, card read dropped");
                }
            }
            tracing::debug!("card input closed");
            sink.lock().unwrap_or_else(PoisonError::into_inner).take();
        });
    }
}

impl ContactlessDevice for LineDevice {
    fn is_supported(&self) -> bool {
        true
    }

    fn scan(
        &self,
        abort: CancellationToken,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<DeviceEvent>, ReaderError>> {
        Box::pin(async move {
            self.start_pump();
            let scan_id = {
                let mut scans = self.scans.lock().unwrap_or_else(PoisonError::into_inner);
                *scans += 1;
                *scans
            };
            let (tx, rx) = mpsc::channel(Self::BUFFER);
            *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some((scan_id, tx));

            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                abort.cancelled().await;
                let mut slot = sink.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.as_ref().is_some_and(|(id, _)| *id == scan_id) {
                    slot.take();
                }
            });
            Ok(rx)
        })
    }
}
