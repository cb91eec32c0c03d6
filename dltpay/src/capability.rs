//! What a connected wallet can currently do.
//!
//! A [`WalletCapabilitySet`] is the onboarding flow's view of one wallet:
//! which backend it lives in, whether the account is funded above reserve,
//! which stablecoin trustlines exist and whether a delegated signer is set.
//! Only [`crate::onboarding::AutoSignOnboarding`] mutates it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::Money;

/// Minimum XRP balance (base reserve plus headroom for two trustlines)
/// before trustlines may be added.
pub const XRP_RESERVE_FLOOR: Decimal = Decimal::from_parts(15, 0, 0, false, 1);

/// Trust limit requested for each stablecoin line.
pub const TRUSTLINE_LIMIT: &str = "1000000";

/// Stablecoins accepted by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stablecoin {
    /// Ripple USD.
    Rlusd,
    /// Circle USD Coin.
    Usdc,
}

impl Stablecoin {
    /// Every stablecoin a wallet must trust before it can receive payments.
    pub const REQUIRED: [Self; 2] = [Self::Rlusd, Self::Usdc];

    /// 160-bit hex currency code used on the ledger.
    #[must_use]
    pub const fn currency_code(self) -> &'static str {
        match self {
            Self::Rlusd => "524C555344000000000000000000000000000000",
            Self::Usdc => "5553444300000000000000000000000000000000",
        }
    }

    /// Issuing account for the currency.
    #[must_use]
    pub const fn issuer(self) -> &'static str {
        match self {
            Self::Rlusd => "rMxCKbEDwqr76QuheSUMdEGf4B9xJ8m5De",
            Self::Usdc => "rcEGREd8NmkKRE8GE424sksyt1tJVFZwu",
        }
    }

    /// The trustline descriptor for this currency.
    #[must_use]
    pub const fn trustline(self) -> Trustline {
        Trustline {
            currency: self,
            issuer: self.issuer(),
        }
    }
}

impl fmt::Display for Stablecoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rlusd => "RLUSD",
            Self::Usdc => "USDC",
        })
    }
}

/// A `{currency, issuer}` pair identifying one trustline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Trustline {
    /// Currency held on the line.
    pub currency: Stablecoin,
    /// Issuer the wallet trusts.
    pub issuer: &'static str,
}

/// The three wallet integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Mobile wallet driven by push notification or QR, observed by polling.
    PushPoll,
    /// Browser extension with synchronous sign calls.
    Extension,
    /// Embedded social-login provider that signs directly.
    Embedded,
}

impl BackendKind {
    /// The login-method string persisted in session storage.
    #[must_use]
    pub const fn login_method(self) -> &'static str {
        match self {
            Self::PushPoll => "xaman",
            Self::Extension => "crossmark",
            Self::Embedded => "web3auth",
        }
    }

    /// Maps a stored login-method string back to a backend.
    #[must_use]
    pub fn from_login_method(method: &str) -> Option<Self> {
        match method {
            "xaman" => Some(Self::PushPoll),
            "crossmark" => Some(Self::Extension),
            "web3auth" => Some(Self::Embedded),
            _ => None,
        }
    }

    /// Whether the backend can hold a delegated signer grant.
    #[must_use]
    pub const fn supports_delegation(self) -> bool {
        matches!(self, Self::Embedded)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.login_method())
    }
}

/// Error returned when parsing an unknown login method.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown login method: {0}")]
pub struct UnknownLoginMethod(pub String);

impl FromStr for BackendKind {
    type Err = UnknownLoginMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_login_method(s).ok_or_else(|| UnknownLoginMethod(s.to_owned()))
    }
}

/// Spending caps applied to delegated signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Largest single payment the delegate may sign.
    pub per_tx_max: Money,
    /// Total the delegate may sign per day.
    pub daily_max: Money,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            per_tx_max: Money::from_whole(100),
            daily_max: Money::from_whole(1_000),
        }
    }
}

impl Limits {
    /// Default caps for customer tap-to-pay wallets.
    #[must_use]
    pub fn customer() -> Self {
        Self {
            per_tx_max: Money::from_whole(25),
            daily_max: Money::from_whole(25),
        }
    }
}

/// Account state reported by the wallet-status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WalletStatus {
    /// The account exists on the ledger.
    #[serde(default)]
    pub funded: bool,
    /// XRP balance.
    #[serde(default)]
    pub xrp_balance: Decimal,
    /// RLUSD trustline present.
    #[serde(default)]
    pub rlusd_trustline: bool,
    /// USDC trustline present.
    #[serde(default)]
    pub usdc_trustline: bool,
    /// RLUSD balance, when reported.
    #[serde(default)]
    pub rlusd_balance: Option<Decimal>,
}

/// The onboarding flow's view of one connected wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletCapabilitySet {
    /// Classic address, once connected.
    pub address: Option<String>,
    /// Which integration holds the keys.
    pub backend_kind: BackendKind,
    /// Account activated on the ledger.
    pub funded: bool,
    /// XRP balance last reported.
    pub xrp_balance: Decimal,
    /// `xrp_balance` clears [`XRP_RESERVE_FLOOR`].
    pub xrp_reserve_ok: bool,
    /// Presence of each required trustline.
    pub trustlines: HashMap<Trustline, bool>,
    /// The platform signer is on the account's signer list.
    pub delegated_signer_configured: bool,
    /// Caps pushed with the delegation.
    pub limits: Limits,
}

impl WalletCapabilitySet {
    /// A blank set for a backend with no connected account.
    #[must_use]
    pub fn new(backend_kind: BackendKind) -> Self {
        Self {
            address: None,
            backend_kind,
            funded: false,
            xrp_balance: Decimal::ZERO,
            xrp_reserve_ok: false,
            trustlines: Stablecoin::REQUIRED
                .iter()
                .map(|c| (c.trustline(), false))
                .collect(),
            delegated_signer_configured: false,
            limits: Limits::default(),
        }
    }

    /// Sets the connected address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Folds a wallet-status report into the set.
    pub fn apply_status(&mut self, status: &WalletStatus) {
        self.funded = status.funded;
        self.xrp_balance = status.xrp_balance;
        self.xrp_reserve_ok = status.funded && status.xrp_balance >= XRP_RESERVE_FLOOR;
        self.trustlines
            .insert(Stablecoin::Rlusd.trustline(), status.rlusd_trustline);
        self.trustlines
            .insert(Stablecoin::Usdc.trustline(), status.usdc_trustline);
    }

    /// Whether the given trustline is present.
    #[must_use]
    pub fn has_trustline(&self, currency: Stablecoin) -> bool {
        self.trustlines
            .get(&currency.trustline())
            .copied()
            .unwrap_or(false)
    }

    /// Required trustlines not yet present, in [`Stablecoin::REQUIRED`] order.
    #[must_use]
    pub fn missing_trustlines(&self) -> Vec<Trustline> {
        Stablecoin::REQUIRED
            .iter()
            .filter(|c| !self.has_trustline(**c))
            .map(|c| c.trustline())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_method_round_trip() {
        for kind in [BackendKind::PushPoll, BackendKind::Extension, BackendKind::Embedded] {
            assert_eq!(kind.login_method().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("metamask".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_reserve_floor_is_one_and_a_half() {
        assert_eq!(XRP_RESERVE_FLOOR.to_string(), "1.5");
    }

    #[test]
    fn test_apply_status_tracks_reserve_and_trustlines() {
        let mut caps = WalletCapabilitySet::new(BackendKind::Embedded).with_address("rAlice");
        assert_eq!(caps.missing_trustlines().len(), 2);

        caps.apply_status(&WalletStatus {
            funded: true,
            xrp_balance: Decimal::new(14, 1),
            rlusd_trustline: true,
            ..WalletStatus::default()
        });
        assert!(!caps.xrp_reserve_ok);
        assert_eq!(caps.missing_trustlines(), vec![Stablecoin::Usdc.trustline()]);

        caps.apply_status(&WalletStatus {
            funded: true,
            xrp_balance: Decimal::new(15, 1),
            rlusd_trustline: true,
            usdc_trustline: true,
            rlusd_balance: None,
        });
        assert!(caps.xrp_reserve_ok);
        assert!(caps.missing_trustlines().is_empty());
    }

    #[test]
    fn test_wallet_status_tolerates_missing_fields() {
        let status: WalletStatus =
            serde_json::from_str(r#"{"funded":true,"xrp_balance":"12.5"}"#).unwrap();
        assert!(status.funded);
        assert!(!status.usdc_trustline);
    }
}
