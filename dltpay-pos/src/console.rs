//! Operator-facing output.

use std::fmt;
use std::io::{self, Write};

use dltpay::qr;

/// Where command output goes. Logs go to tracing; this is what the operator
/// reads at the till.
pub struct Console {
    out: Box<dyn Write + Send>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Console {
    /// Console writing to `out`.
    #[must_use]
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    /// Console on the process's stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Writes one line.
    ///
    /// # Errors
    ///
    /// The underlying write failure.
    pub fn line(&mut self, text: impl fmt::Display) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    /// Renders `data` as a terminal QR code, falling back to the raw text
    /// when it is too long to encode.
    ///
    /// # Errors
    ///
    /// The underlying write failure.
    pub fn qr(&mut self, data: &str) -> io::Result<()> {
        match qr::terminal(data) {
            Ok(code) => self.line(code),
            Err(err) => {
                tracing::debug!(error = %err, "QR too large for the terminal");
                self.line(data)
            }
        }
    }
}
