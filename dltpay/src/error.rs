//! Error types for payment sessions and onboarding.
//!
//! Every failure surfaced to callers is a [`PaymentError`]. Each error maps to
//! an [`ErrorKind`] in a small taxonomy, and each kind to a [`Remediation`]
//! telling the front end what to offer the user next.

use std::sync::LazyLock;

use regex::Regex;

use crate::amount::AmountError;
use crate::api::{ApiError, ApiErrorCode};
use crate::reader::ReaderError;
use crate::wallet::WalletError;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The user dismissed a prompt. Shown silently.
    UserCancelled,
    /// The wallet integration is missing.
    NotDetected,
    /// The wallet session is gone; the user must sign in again.
    SessionExpired,
    /// Transport failure; safe to retry.
    NetworkError,
    /// The payer's balance cannot cover the payment.
    InsufficientFunds,
    /// The payer has not granted delegated signing.
    NoSignerAuthority,
    /// Payer and payee are the same account.
    SelfPayment,
    /// The wallet must finish onboarding first.
    WalletNotReady,
    /// Delegation could not be confirmed.
    VerificationTimeout,
    /// The request itself was invalid (amount, state, split count).
    InvalidRequest,
    /// Any other refusal.
    Declined,
}

/// What to offer the user after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Nothing to do.
    None,
    /// Link to install the wallet.
    InstallWallet {
        /// Where to get it.
        url: &'static str,
    },
    /// Sign in again.
    Reauthenticate,
    /// Fund the wallet.
    TopUp,
    /// Route into onboarding.
    Onboarding,
    /// Try the same action again.
    Retry,
}

impl ErrorKind {
    /// Suggested next step for this kind of failure.
    #[must_use]
    pub const fn remediation(self) -> Remediation {
        match self {
            Self::UserCancelled | Self::SelfPayment | Self::InvalidRequest => Remediation::None,
            Self::NotDetected => Remediation::InstallWallet {
                url: crate::wallet::extension::INSTALL_URL,
            },
            Self::SessionExpired => Remediation::Reauthenticate,
            Self::InsufficientFunds => Remediation::TopUp,
            Self::NoSignerAuthority | Self::WalletNotReady => Remediation::Onboarding,
            Self::NetworkError | Self::VerificationTimeout | Self::Declined => Remediation::Retry,
        }
    }
}

/// Errors surfaced by sessions, splits and onboarding.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// A wallet backend call failed.
    #[error(transparent)]
    Wallet(#[from] WalletError),
    /// The payment API failed or refused.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The contactless reader failed.
    #[error(transparent)]
    Reader(#[from] ReaderError),
    /// An amount was malformed or below the floor.
    #[error(transparent)]
    Amount(#[from] AmountError),
    /// The operation is not valid in the current state.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        /// What was attempted.
        action: &'static str,
        /// The state it was attempted in.
        state: &'static str,
    },
    /// The intent has already settled.
    #[error("payment already settled")]
    AlreadySettled,
    /// The session was cancelled before it reached an outcome.
    #[error("payment cancelled")]
    Cancelled,
    /// The intent has passed its expiry.
    #[error("payment has expired")]
    Expired,
    /// The intent is already split or is itself a share.
    #[error("payment {0} has already been split")]
    AlreadySplit(String),
    /// Split count outside the accepted range.
    #[error("split count must be between {min} and {max}, got {requested}")]
    InvalidSplitCount {
        /// Requested shares.
        requested: u16,
        /// Lower bound.
        min: u16,
        /// Upper bound.
        max: u16,
    },
    /// The server returned a different number of shares than requested.
    #[error("expected {expected} split shares, server returned {actual}")]
    SplitMismatch {
        /// Requested shares.
        expected: u16,
        /// Shares returned.
        actual: usize,
    },
    /// Payer wallet equals vendor wallet.
    #[error("cannot pay your own store")]
    SelfPayment,
    /// The wallet must be funded or connected first.
    #[error("wallet not ready: {0}")]
    WalletNotReady(String),
    /// Delegation was not confirmed within the retry budget.
    #[error("Signer setup failed: not confirmed after {attempts} attempts")]
    VerificationTimeout {
        /// Attempts made.
        attempts: u32,
    },
    /// The backend cannot perform this action.
    #[error("{action} is not supported by the {backend} wallet")]
    Unsupported {
        /// What was attempted.
        action: &'static str,
        /// Backend login method.
        backend: &'static str,
    },
    /// An email address without an `@`.
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    /// A share link could not be built.
    #[error("invalid payment URL: {0}")]
    Url(#[from] url::ParseError),
    /// A payload was too long to encode as a QR code.
    #[error("QR encoding failed: {0}")]
    Qr(#[from] qrcode::types::QrError),
    /// A lifecycle hook vetoed the submission.
    #[error("{reason}: {message}")]
    Aborted {
        /// Machine-readable reason.
        reason: String,
        /// Human-readable message.
        message: String,
    },
}

impl PaymentError {
    /// Taxonomy bucket for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Wallet(e) => e.kind(),
            Self::Api(e) => e.kind(),
            Self::Reader(_) => ErrorKind::Declined,
            Self::Amount(_)
            | Self::InvalidTransition { .. }
            | Self::AlreadySettled
            | Self::Expired
            | Self::AlreadySplit(_)
            | Self::InvalidSplitCount { .. }
            | Self::Unsupported { .. }
            | Self::InvalidEmail(_)
            | Self::Url(_)
            | Self::Qr(_) => ErrorKind::InvalidRequest,
            Self::SplitMismatch { .. } | Self::Aborted { .. } => ErrorKind::Declined,
            Self::Cancelled => ErrorKind::UserCancelled,
            Self::SelfPayment => ErrorKind::SelfPayment,
            Self::WalletNotReady(_) => ErrorKind::WalletNotReady,
            Self::VerificationTimeout { .. } => ErrorKind::VerificationTimeout,
        }
    }

    /// Suggested next step.
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        self.kind().remediation()
    }

    /// Short copy safe to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::UserCancelled => "Cancelled.".to_owned(),
            ErrorKind::NotDetected => "Wallet extension not detected.".to_owned(),
            ErrorKind::SessionExpired => "Your wallet session expired. Please sign in again.".to_owned(),
            ErrorKind::InsufficientFunds => "Insufficient funds in your wallet".to_owned(),
            ErrorKind::NoSignerAuthority => {
                "Tap to pay is not enabled for this card. Set up your wallet first.".to_owned()
            }
            ErrorKind::SelfPayment => "Cannot pay yourself".to_owned(),
            ErrorKind::WalletNotReady => "Please set up your wallet first".to_owned(),
            ErrorKind::VerificationTimeout => "Signer setup failed. Please try again.".to_owned(),
            ErrorKind::NetworkError | ErrorKind::InvalidRequest | ErrorKind::Declined => {
                sanitize_message(&self.to_string())
            }
        }
    }
}

impl ApiError {
    /// Taxonomy bucket for an API failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::NetworkError,
            Self::Decode(_) => ErrorKind::Declined,
            Self::Rejected { code, .. } => match code {
                ApiErrorCode::NoSignerAuthority => ErrorKind::NoSignerAuthority,
                ApiErrorCode::InsufficientFunds => ErrorKind::InsufficientFunds,
                ApiErrorCode::SelfPaymentNotAllowed => ErrorKind::SelfPayment,
                ApiErrorCode::WalletNotReady | ApiErrorCode::CardNotRegistered => {
                    ErrorKind::WalletNotReady
                }
                ApiErrorCode::Other => ErrorKind::Declined,
            },
        }
    }
}

/// Ledger engine result codes such as `tecPATH_DRY` or `temBAD_AMOUNT`.
static LEDGER_RESULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bte[cmf][A-Z_]{2,}").expect("valid regex"));

/// Rewrites raw ledger or transport text into short user copy.
///
/// Ledger result codes (`tec…`, `tem…`, `tef…`) become a generic failure,
/// timeouts and network faults get their own line, wallet rejections read as
/// a cancellation, and anything long or stack-trace shaped is replaced.
#[must_use]
pub fn sanitize_message(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    if LEDGER_RESULT.is_match(raw) {
        return "Transaction failed. Please try again.".to_owned();
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return "Request timed out. Please try again.".to_owned();
    }
    if lower.contains("network") || lower.contains("fetch") || lower.contains("connection") {
        return "Network error. Please check your connection.".to_owned();
    }
    if lower.contains("user rejected") {
        return "Setup cancelled.".to_owned();
    }
    if raw.len() > 100 || raw.contains("Error:") || raw.contains("at ") {
        return "Something went wrong. Please try again.".to_owned();
    }
    raw.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_ledger_codes() {
        assert_eq!(
            sanitize_message("tecPATH_DRY"),
            "Transaction failed. Please try again."
        );
        assert_eq!(
            sanitize_message("engine_result temBAD_AMOUNT"),
            "Transaction failed. Please try again."
        );
    }

    #[test]
    fn test_sanitize_transport_and_rejection() {
        assert_eq!(
            sanitize_message("Request Timeout"),
            "Request timed out. Please try again."
        );
        assert_eq!(
            sanitize_message("NetworkError when attempting to fetch resource."),
            "Network error. Please check your connection."
        );
        assert_eq!(sanitize_message("User rejected the request"), "Setup cancelled.");
    }

    #[test]
    fn test_sanitize_hides_internals() {
        assert_eq!(
            sanitize_message("TypeError: x is undefined at foo (bar.js:1)"),
            "Something went wrong. Please try again."
        );
        assert_eq!(sanitize_message(&"x".repeat(101)), "Something went wrong. Please try again.");
        assert_eq!(sanitize_message("Card declined"), "Card declined");
    }

    #[test]
    fn test_kind_and_remediation() {
        let err = PaymentError::Api(ApiError::rejected(
            Some("NO_SIGNER_AUTHORITY"),
            "payer has no signer",
        ));
        assert_eq!(err.kind(), ErrorKind::NoSignerAuthority);
        assert_eq!(err.remediation(), Remediation::Onboarding);

        let err = PaymentError::Api(ApiError::Network("connection reset".into()));
        assert_eq!(err.remediation(), Remediation::Retry);

        let err = PaymentError::VerificationTimeout { attempts: 5 };
        assert_eq!(err.kind(), ErrorKind::VerificationTimeout);
        assert!(err.to_string().starts_with("Signer setup failed"));

        let err = PaymentError::Wallet(WalletError::NotDetected {
            backend: "crossmark",
            install_url: crate::wallet::extension::INSTALL_URL,
        });
        assert!(matches!(err.remediation(), Remediation::InstallWallet { .. }));
    }
}
