//! Terminal configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! api_url = "https://api.dltpays.com/api/v1"
//! pay_base = "https://yesallofus.com/pay/"
//! request_timeout_secs = 20
//!
//! [store]
//! store_id = "$STORE_ID"
//! store_name = "Corner Cafe"
//! vendor_wallet = "${VENDOR_WALLET}"
//! staff_id = "till-1"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `pos.toml`)
//! - `API_URL` - Override the payment API base URL
//! - Store secrets referenced by `$VAR` in the config file

use std::path::{Path, PathBuf};
use std::time::Duration;

use dltpay::poller::SettlementPoller;
use dltpay::split::DEFAULT_PAY_BASE;
use dltpay_http::DEFAULT_BASE_URL;
use serde::{Deserialize, Serialize};

/// Config file used when `CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "pos.toml";

/// Failures loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A required value is empty or still references an unset variable.
    #[error("`{0}` is not set (missing env var?)")]
    Unresolved(&'static str),
}

/// Top-level terminal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosConfig {
    /// Base URL of the versioned payment API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base under which payment links are published.
    #[serde(default = "default_pay_base")]
    pub pay_base: String,

    /// Per-request timeout; none when unset.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// How long a customer has to sign a QR payment.
    #[serde(default = "default_qr_window_secs")]
    pub qr_window_secs: u64,

    /// Where the vendor's wallet identity is remembered between runs.
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,

    /// Mirror checkout state to the customer-facing display.
    #[serde(default = "default_true")]
    pub mirror_display: bool,

    /// The store this terminal takes payments for.
    #[serde(default)]
    pub store: StoreConfig,
}

/// The merchant identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store id.
    #[serde(default)]
    pub store_id: String,
    /// Display name on receipts and the customer display.
    #[serde(default)]
    pub store_name: String,
    /// Receiving account. Supports `$VAR` / `${VAR}` expansion.
    #[serde(default)]
    pub vendor_wallet: String,
    /// Staff member recorded on tap payments.
    #[serde(default)]
    pub staff_id: Option<String>,
}

impl StoreConfig {
    /// Checks that every field a payment needs is set and expanded.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Unresolved`] naming the first missing field.
    pub fn require(&self) -> Result<&Self, ConfigError> {
        for (name, value) in [
            ("store.store_id", &self.store_id),
            ("store.store_name", &self.store_name),
            ("store.vendor_wallet", &self.vendor_wallet),
        ] {
            let value = value.trim();
            if value.is_empty() || value.starts_with('$') {
                return Err(ConfigError::Unresolved(name));
            }
        }
        Ok(self)
    }
}

fn default_api_url() -> String {
    DEFAULT_BASE_URL.to_owned()
}

fn default_pay_base() -> String {
    DEFAULT_PAY_BASE.to_owned()
}

const fn default_qr_window_secs() -> u64 {
    SettlementPoller::PAYMENT_WINDOW.as_secs()
}

fn default_session_file() -> PathBuf {
    PathBuf::from(".dltpay-session.json")
}

const fn default_true() -> bool {
    true
}

impl PosConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `pos.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::load_from(Path::new(&path))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the defaults. After loading, `$VAR` / `${VAR}`
    /// references are expanded from the process environment and `API_URL`
    /// overrides the file value.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?
        } else {
            String::new()
        };

        let mut config = Self::parse(&content, |name| std::env::var(name).ok())?;
        if let Ok(api_url) = std::env::var("API_URL") {
            config.api_url = api_url;
        }
        Ok(config)
    }

    /// Parses `content`, expanding variables through `lookup`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for invalid TOML.
    pub fn parse(
        content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&expand_vars(content, lookup))?)
    }

    /// The request timeout, if configured.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// The QR signing window. Zero falls back to the default.
    #[must_use]
    pub fn qr_window(&self) -> Duration {
        if self.qr_window_secs == 0 {
            SettlementPoller::PAYMENT_WINDOW
        } else {
            Duration::from_secs(self.qr_window_secs)
        }
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string through `lookup`.
///
/// Unresolved variables are left as-is.
fn expand_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.next_if_eq(&'{').is_some();

        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        match lookup(&name).filter(|_| !name.is_empty()) {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_expand_both_syntaxes() {
        let lookup = env(&[("STORE", "s1"), ("WALLET", "rVendor")]);
        assert_eq!(expand_vars("id=$STORE w=${WALLET}!", &lookup), "id=s1 w=rVendor!");
        assert_eq!(expand_vars("cost $5 and $", &lookup), "cost $5 and $");
        assert_eq!(expand_vars("${MISSING} $ALSO_MISSING", &lookup), "${MISSING} $ALSO_MISSING");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = PosConfig::parse("", env(&[])).unwrap();
        assert_eq!(config.api_url, DEFAULT_BASE_URL);
        assert_eq!(config.pay_base, DEFAULT_PAY_BASE);
        assert!(config.mirror_display);
        assert!(config.request_timeout().is_none());
        assert_eq!(config.qr_window(), SettlementPoller::PAYMENT_WINDOW);
        assert!(matches!(
            config.store.require(),
            Err(ConfigError::Unresolved("store.store_id"))
        ));
    }

    #[test]
    fn test_store_section_with_expansion() {
        let toml = r#"
            request_timeout_secs = 20
            qr_window_secs = 90
            mirror_display = false

            [store]
            store_id = "$STORE_ID"
            store_name = "Corner Cafe"
            vendor_wallet = "${VENDOR_WALLET}"
            staff_id = "till-1"
        "#;
        let config = PosConfig::parse(toml, env(&[("STORE_ID", "store_1"), ("VENDOR_WALLET", "rVendor")]))
            .unwrap();
        let store = config.store.require().unwrap();
        assert_eq!(store.store_id, "store_1");
        assert_eq!(store.vendor_wallet, "rVendor");
        assert_eq!(store.staff_id.as_deref(), Some("till-1"));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(20)));
        assert_eq!(config.qr_window(), Duration::from_secs(90));
        assert!(!config.mirror_display);
    }

    #[test]
    fn test_unexpanded_wallet_is_unresolved() {
        let toml = r#"
            [store]
            store_id = "store_1"
            store_name = "Corner Cafe"
            vendor_wallet = "$VENDOR_WALLET"
        "#;
        let config = PosConfig::parse(toml, env(&[])).unwrap();
        assert!(matches!(
            config.store.require(),
            Err(ConfigError::Unresolved("store.vendor_wallet"))
        ));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            PosConfig::parse("api_url = [", env(&[])),
            Err(ConfigError::Parse(_))
        ));
    }
}
