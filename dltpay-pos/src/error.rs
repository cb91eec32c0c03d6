//! Error types for the terminal.

use dltpay::PaymentError;
use dltpay_http::HttpApiError;

use crate::config::ConfigError;

/// Errors that end a terminal command.
#[derive(Debug, thiserror::Error)]
pub enum PosError {
    /// Configuration could not be loaded or is incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The API client could not be built.
    #[error("payment API: {0}")]
    Client(#[from] HttpApiError),

    /// A payment, split or onboarding step failed.
    #[error("{}", .0.user_message())]
    Payment(#[from] PaymentError),

    /// Writing to the console failed.
    #[error("console: {0}")]
    Console(#[from] std::io::Error),

    /// Signal handlers could not be installed.
    #[error("signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// The command cannot run with the current wallet or arguments.
    #[error("{0}")]
    Usage(String),
}

impl PosError {
    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Usage(_) => 2,
            Self::Client(_) | Self::Payment(_) | Self::Console(_) | Self::Signal(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use dltpay::wallet::WalletError;

    use super::*;

    #[test]
    fn test_payment_errors_show_user_copy() {
        let err = PosError::from(PaymentError::from(WalletError::UserCancelled));
        assert_eq!(err.to_string(), "Cancelled.");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_config_errors_are_usage_failures() {
        let err = PosError::from(ConfigError::Unresolved("store.store_id"));
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("store.store_id"));
    }
}
