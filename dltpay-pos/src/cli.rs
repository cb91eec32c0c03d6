//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dltpay::amount::Money;
use dltpay::intent::LineItem;

use crate::config::DEFAULT_CONFIG_PATH;

/// Headless point-of-sale terminal for RLUSD and USDC payments.
#[derive(Debug, Parser)]
#[command(name = "dltpay-pos", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override the payment API base URL.
    #[arg(long, env = "API_URL")]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Terminal commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Take a payment by QR, card tap or payment link.
    Charge(ChargeArgs),
    /// Split a bill into payment links, one per payer.
    Split(SplitArgs),
    /// Quote a fiat amount in RLUSD.
    Quote(QuoteArgs),
    /// Set up the vendor wallet.
    #[command(subcommand)]
    Onboard(OnboardCommand),
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChannelArg {
    /// Show a QR code for the customer's wallet app.
    Qr,
    /// Wait for a contactless card on the reader.
    Tap,
    /// Issue a payment link.
    Link,
}

/// Arguments for `charge`.
#[derive(Debug, Args)]
pub struct ChargeArgs {
    /// Amount in GBP, before tip.
    #[arg(long)]
    pub amount: Money,

    /// Tip in GBP.
    #[arg(long)]
    pub tip: Option<Money>,

    /// Payment channel.
    #[arg(long, value_enum, default_value_t = ChannelArg::Qr)]
    pub channel: ChannelArg,

    /// Cart line as `name:quantity:unit_price`. Repeatable.
    #[arg(long = "item", value_parser = parse_item)]
    pub items: Vec<LineItem>,

    /// Card reads to attempt before giving up on a tap payment.
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,
}

/// Arguments for `split`.
#[derive(Debug, Args)]
pub struct SplitArgs {
    /// Bill total in GBP.
    #[arg(long)]
    pub amount: Money,

    /// Number of payers.
    #[arg(long)]
    pub parts: u16,

    /// Email each share's link, in share order. Repeatable.
    #[arg(long = "email")]
    pub emails: Vec<String>,
}

/// Arguments for `quote`.
#[derive(Debug, Args)]
pub struct QuoteArgs {
    /// Amount in GBP.
    #[arg(long)]
    pub amount: Money,

    /// Keep re-quoting until interrupted.
    #[arg(long)]
    pub watch: bool,
}

/// Vendor wallet onboarding.
#[derive(Debug, Subcommand)]
pub enum OnboardCommand {
    /// Show which onboarding step the vendor wallet is at.
    Status {
        /// Check this address instead of the remembered wallet.
        #[arg(long)]
        wallet: Option<String>,
    },
    /// Sign in with the wallet app and remember the account.
    Connect,
    /// Add the RLUSD and USDC trustlines.
    Trustlines {
        /// Wait for the wallet to report both lines.
        #[arg(long)]
        wait: bool,
    },
    /// Remove the platform signer from the vendor account.
    Revoke,
    /// Forget the remembered wallet.
    Disconnect,
}

/// Parses `name:quantity:unit_price`. The name may itself contain colons.
fn parse_item(raw: &str) -> Result<LineItem, String> {
    let mut parts = raw.rsplitn(3, ':');
    let (Some(price), Some(quantity), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected name:quantity:unit_price, got `{raw}`"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err("item name is empty".to_owned());
    }
    let quantity: u32 = quantity
        .trim()
        .parse()
        .map_err(|_| format!("invalid quantity `{quantity}`"))?;
    if quantity == 0 {
        return Err("item quantity must be at least 1".to_owned());
    }
    let price = Money::parse(price).map_err(|e| format!("invalid price `{price}`: {e}"))?;
    LineItem::new(name, quantity, price).map_err(|e| format!("invalid item `{raw}`: {e}"))
}
