//! dltpay point-of-sale terminal.
//!
//! # Usage
//!
//! ```bash
//! # Take £12.50 by QR code
//! dltpay-pos charge --amount 12.50
//!
//! # Wait for a card on a keyboard-wedge reader
//! dltpay-pos charge --amount 4.20 --channel tap --item "Flat white:1:4.20"
//!
//! # Split a bill four ways
//! dltpay-pos split --amount 86 --parts 4
//!
//! # Configure logging level
//! RUST_LOG=debug dltpay-pos onboard status
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `pos.toml`)
//! - `API_URL` - Override the payment API base URL
//! - `RUST_LOG` - Log level filter (default: `info`)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dltpay_http::HttpPaymentApi;
use tracing_subscriber::EnvFilter;

use dltpay_pos::Terminal;
use dltpay_pos::cli::Cli;
use dltpay_pos::config::PosConfig;
use dltpay_pos::console::Console;
use dltpay_pos::error::PosError;
use dltpay_pos::util::SigDown;

/// How long a command may take to wind down after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout belongs to the operator console.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("{e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), PosError> {
    let mut config = PosConfig::load_from(&cli.config)?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    tracing::debug!(
        api_url = %config.api_url,
        store_id = %config.store.store_id,
        "Loaded configuration"
    );

    let mut api = HttpPaymentApi::try_from(config.api_url.as_str())?;
    if let Some(timeout) = config.request_timeout() {
        api = api.with_timeout(timeout);
    }

    let sig_down = SigDown::try_new().map_err(PosError::Signal)?;
    let mut terminal = Terminal::new(
        config,
        Arc::new(api),
        Console::stdout(),
        sig_down.cancellation_token(),
    );

    let command = terminal.run(cli.command);
    tokio::pin!(command);
    tokio::select! {
        result = &mut command => result,
        () = sig_down.recv() => {
            if let Ok(result) = tokio::time::timeout(SHUTDOWN_GRACE, &mut command).await {
                result
            } else {
                tracing::warn!("Command did not stop in time, exiting");
                std::process::exit(130);
            }
        }
    }
}
