//! Wallet backends behind one capability surface.
//!
//! Three integrations with nothing in common share the [`WalletBackend`]
//! trait:
//!
//! - [`push::PushPollBackend`]: a mobile wallet that receives sign requests by
//!   push or QR. Every operation completes out of band and is observed by
//!   polling.
//! - [`extension::ExtensionBackend`]: a browser extension with blocking sign
//!   calls.
//! - [`embedded::EmbeddedBackend`]: a social-login provider that holds the key
//!   and signs directly.
//!
//! Sessions and onboarding depend only on the trait. The active backend is
//! chosen by the stored login method through [`BackendRegistry`].

pub mod embedded;
pub mod extension;
pub mod push;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::amount::Money;
use crate::api::{ApiError, BoxFuture, PushRequest};
use crate::capability::{BackendKind, Stablecoin, TRUSTLINE_LIMIT};
use crate::error::ErrorKind;

/// Failures common to every wallet backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// The user dismissed the prompt.
    #[error("cancelled by user")]
    UserCancelled,
    /// The wallet software is not installed.
    #[error("{backend} not detected")]
    NotDetected {
        /// Backend login method.
        backend: &'static str,
        /// Where to install it.
        install_url: &'static str,
    },
    /// The backend has no live session.
    #[error("wallet session expired")]
    SessionExpired,
    /// Transport failure.
    #[error("network error: {0}")]
    Network(String),
    /// The ledger or wallet refused the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl WalletError {
    /// Taxonomy bucket.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UserCancelled => ErrorKind::UserCancelled,
            Self::NotDetected { .. } => ErrorKind::NotDetected,
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::Network(_) => ErrorKind::NetworkError,
            Self::Rejected(_) => ErrorKind::Declined,
        }
    }

    /// Maps an SDK error message onto the common failures.
    #[must_use]
    pub fn from_sdk_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if ["user rejected", "cancel", "closed", "denied", "declined"]
            .iter()
            .any(|n| lower.contains(n))
        {
            Self::UserCancelled
        } else if ["not connected", "session", "expired", "login required"]
            .iter()
            .any(|n| lower.contains(n))
        {
            Self::SessionExpired
        } else if ["network", "fetch", "timeout", "timed out"]
            .iter()
            .any(|n| lower.contains(n))
        {
            Self::Network(message.to_owned())
        } else {
            Self::Rejected(message.to_owned())
        }
    }
}

impl From<ApiError> for WalletError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(message) => Self::Network(message),
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// An error raised by a third-party wallet SDK.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SdkError(pub String);

impl From<SdkError> for WalletError {
    fn from(err: SdkError) -> Self {
        Self::from_sdk_message(&err.0)
    }
}

/// An issued-currency amount in ledger JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedAmount {
    /// 160-bit hex currency code.
    pub currency: String,
    /// Issuer account.
    pub issuer: String,
    /// Decimal value as a string.
    pub value: String,
}

impl IssuedAmount {
    /// `value` of `coin`.
    #[must_use]
    pub fn new(coin: Stablecoin, value: impl Into<String>) -> Self {
        Self {
            currency: coin.currency_code().to_owned(),
            issuer: coin.issuer().to_owned(),
            value: value.into(),
        }
    }
}

/// `{"SignerEntry": {...}}` wrapper used by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerEntryWrapper {
    /// The entry.
    #[serde(rename = "SignerEntry")]
    pub signer_entry: SignerEntry,
}

/// One authorized signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignerEntry {
    /// Delegate account.
    pub account: String,
    /// Weight toward the quorum.
    pub signer_weight: u16,
}

/// The ledger transactions this crate builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "TransactionType", rename_all_fields = "PascalCase")]
pub enum LedgerTransaction {
    /// Stablecoin transfer.
    Payment {
        /// Sender.
        account: String,
        /// Receiver.
        destination: String,
        /// What is sent.
        amount: IssuedAmount,
    },
    /// Trustline grant.
    TrustSet {
        /// Trusting account.
        account: String,
        /// Currency, issuer and limit.
        limit_amount: IssuedAmount,
    },
    /// Signer-list replacement. Quorum 0 with no entries clears the list.
    SignerListSet {
        /// Account whose signer list changes.
        account: String,
        /// Required weight.
        signer_quorum: u32,
        /// Authorized delegates.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        signer_entries: Vec<SignerEntryWrapper>,
    },
}

impl LedgerTransaction {
    /// A stablecoin payment.
    #[must_use]
    pub fn payment(from: &str, to: &str, coin: Stablecoin, amount: Money) -> Self {
        Self::Payment {
            account: from.to_owned(),
            destination: to.to_owned(),
            amount: IssuedAmount::new(coin, amount.to_string()),
        }
    }

    /// A trustline to `coin` at the standard limit.
    #[must_use]
    pub fn trust_set(account: &str, coin: Stablecoin) -> Self {
        Self::TrustSet {
            account: account.to_owned(),
            limit_amount: IssuedAmount::new(coin, TRUSTLINE_LIMIT),
        }
    }

    /// Quorum 1 with `delegate` as the single weight-1 signer.
    #[must_use]
    pub fn delegate_signer(account: &str, delegate: &str) -> Self {
        Self::SignerListSet {
            account: account.to_owned(),
            signer_quorum: 1,
            signer_entries: vec![SignerEntryWrapper {
                signer_entry: SignerEntry {
                    account: delegate.to_owned(),
                    signer_weight: 1,
                },
            }],
        }
    }

    /// Quorum 0, which removes every delegate.
    #[must_use]
    pub fn clear_signers(account: &str) -> Self {
        Self::SignerListSet {
            account: account.to_owned(),
            signer_quorum: 0,
            signer_entries: Vec::new(),
        }
    }

    /// The originating account.
    #[must_use]
    pub fn account(&self) -> &str {
        match self {
            Self::Payment { account, .. }
            | Self::TrustSet { account, .. }
            | Self::SignerListSet { account, .. } => account,
        }
    }

    /// The ledger transaction type name.
    #[must_use]
    pub const fn transaction_type(&self) -> &'static str {
        match self {
            Self::Payment { .. } => "Payment",
            Self::TrustSet { .. } => "TrustSet",
            Self::SignerListSet { .. } => "SignerListSet",
        }
    }
}

/// A connected wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSession {
    /// Classic address.
    pub address: String,
    /// Which backend holds it.
    pub backend: BackendKind,
    /// Social provider label for embedded logins.
    pub identity_provider: Option<String>,
}

/// Result of [`WalletBackend::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// Connected immediately.
    Ready(WalletSession),
    /// The user must approve in their wallet app; poll `request`.
    Pending(PushRequest),
}

/// A submitted transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    /// Ledger hash, when the backend reports one.
    pub tx_hash: Option<String>,
}

/// Result of [`WalletBackend::sign_and_submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Signed and submitted.
    Submitted(Submission),
    /// Waiting on the user's wallet app; poll `request`.
    AwaitingSignature(PushRequest),
}

/// One wallet integration.
pub trait WalletBackend: Send + Sync {
    /// Which integration this is.
    fn kind(&self) -> BackendKind;

    /// Connects, or starts a connection that completes out of band.
    fn connect(&self) -> BoxFuture<'_, Result<Connection, WalletError>>;

    /// Signs and submits `tx`.
    fn sign_and_submit<'a>(
        &'a self,
        tx: &'a LedgerTransaction,
    ) -> BoxFuture<'a, Result<SubmitOutcome, WalletError>>;

    /// The live session, if any.
    fn session(&self) -> Option<WalletSession>;

    /// Reinstates a session rehydrated from storage.
    fn restore(&self, session: WalletSession);

    /// Drops the session.
    fn disconnect(&self);
}

/// Backends available to this process, looked up by login method.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    push: Option<Arc<dyn WalletBackend>>,
    extension: Option<Arc<dyn WalletBackend>>,
    embedded: Option<Arc<dyn WalletBackend>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("push", &self.push.is_some())
            .field("extension", &self.extension.is_some())
            .field("embedded", &self.embedded.is_some())
            .finish()
    }
}

impl BackendRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend under its own kind, replacing any previous one.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn WalletBackend>) -> Self {
        let slot = match backend.kind() {
            BackendKind::PushPoll => &mut self.push,
            BackendKind::Extension => &mut self.extension,
            BackendKind::Embedded => &mut self.embedded,
        };
        *slot = Some(backend);
        self
    }

    /// The backend for `kind`.
    #[must_use]
    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn WalletBackend>> {
        match kind {
            BackendKind::PushPoll => self.push.clone(),
            BackendKind::Extension => self.extension.clone(),
            BackendKind::Embedded => self.embedded.clone(),
        }
    }

    /// The backend for a stored login-method string.
    #[must_use]
    pub fn select(&self, login_method: &str) -> Option<Arc<dyn WalletBackend>> {
        BackendKind::from_login_method(login_method).and_then(|kind| self.get(kind))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_signer_list_set_wire_shape() {
        let tx = LedgerTransaction::delegate_signer("rAlice", "rPlatform");
        assert_eq!(
            serde_json::to_value(&tx).unwrap(),
            json!({
                "TransactionType": "SignerListSet",
                "Account": "rAlice",
                "SignerQuorum": 1,
                "SignerEntries": [{"SignerEntry": {"Account": "rPlatform", "SignerWeight": 1}}]
            })
        );
        let clear = serde_json::to_value(LedgerTransaction::clear_signers("rAlice")).unwrap();
        assert_eq!(clear["SignerQuorum"], 0);
        assert!(clear.get("SignerEntries").is_none());
    }

    #[test]
    fn test_trust_set_wire_shape() {
        let tx = LedgerTransaction::trust_set("rAlice", Stablecoin::Usdc);
        assert_eq!(
            serde_json::to_value(&tx).unwrap(),
            json!({
                "TransactionType": "TrustSet",
                "Account": "rAlice",
                "LimitAmount": {
                    "currency": "5553444300000000000000000000000000000000",
                    "issuer": "rcEGREd8NmkKRE8GE424sksyt1tJVFZwu",
                    "value": "1000000"
                }
            })
        );
    }

    #[test]
    fn test_sdk_messages_map_to_taxonomy() {
        assert_eq!(
            WalletError::from_sdk_message("User rejected the request"),
            WalletError::UserCancelled
        );
        assert_eq!(
            WalletError::from_sdk_message("Wallet not connected"),
            WalletError::SessionExpired
        );
        assert!(matches!(
            WalletError::from_sdk_message("Failed to fetch"),
            WalletError::Network(_)
        ));
        assert!(matches!(
            WalletError::from_sdk_message("tecNO_LINE"),
            WalletError::Rejected(_)
        ));
    }
}
