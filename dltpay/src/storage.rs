//! Session-scoped key/value storage and the persisted wallet identity.
//!
//! The host's session storage may be missing or full. [`SafeStore`] wraps it
//! with an in-memory fallback so reads and writes never fail outright: a write
//! the primary refuses lands in memory, and reads check memory when the
//! primary has nothing.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::capability::BackendKind;
use crate::wallet::{BackendRegistry, WalletBackend, WalletSession};

/// The backing store refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session storage unavailable: {0}")]
pub struct StorageError(pub String);

/// Host session storage.
pub trait SessionStore: Send + Sync {
    /// The value under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// [`StorageError`] if the store is unavailable or full.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`.
    fn remove(&self, key: &str);
}

/// A process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes every key.
    pub fn clear(&self) {
        self.entries().clear();
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }
}

/// A primary store with an in-memory fallback.
pub struct SafeStore {
    primary: Option<Arc<dyn SessionStore>>,
    fallback: MemoryStore,
}

impl fmt::Debug for SafeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeStore")
            .field("primary", &self.primary.is_some())
            .finish_non_exhaustive()
    }
}

impl SafeStore {
    /// Wraps `primary`.
    #[must_use]
    pub fn new(primary: Arc<dyn SessionStore>) -> Self {
        Self {
            primary: Some(primary),
            fallback: MemoryStore::default(),
        }
    }

    /// A store with no primary, for hosts without session storage.
    #[must_use]
    pub fn memory_only() -> Self {
        Self {
            primary: None,
            fallback: MemoryStore::default(),
        }
    }

    /// Reads and deserializes a JSON value; malformed JSON reads as absent.
    #[must_use]
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }

    /// Serializes and stores a JSON value. Values that fail to serialize are
    /// skipped.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.set(key, &raw);
        }
    }

    /// Reads `key`, preferring the primary store.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.primary
            .as_ref()
            .and_then(|p| p.get(key))
            .or_else(|| self.fallback.get(key))
    }

    /// Writes `key`, falling back to memory if the primary refuses.
    pub fn set(&self, key: &str, value: &str) {
        if let Some(primary) = &self.primary {
            match primary.set(key, value) {
                Ok(()) => return,
                Err(err) => log_fallback(key, &err),
            }
        }
        self.fallback
            .entries()
            .insert(key.to_owned(), value.to_owned());
    }

    /// Removes `key` from both stores.
    pub fn remove(&self, key: &str) {
        self.fallback.remove(key);
        if let Some(primary) = &self.primary {
            primary.remove(key);
        }
    }
}

#[cfg(feature = "telemetry")]
fn log_fallback(key: &str, err: &StorageError) {
    tracing::debug!(key, error = %err, "session storage write failed, keeping value in memory");
}

#[cfg(not(feature = "telemetry"))]
const fn log_fallback(_key: &str, _err: &StorageError) {}

/// Whose identity is stored: the paying customer or the vendor at the till.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityScope {
    /// The payer-facing surface.
    Customer,
    /// The merchant dashboard and terminal.
    Vendor,
}

struct IdentityKeys {
    address: &'static str,
    login_method: &'static str,
    provider: &'static str,
}

impl IdentityScope {
    const fn keys(self) -> IdentityKeys {
        match self {
            Self::Customer => IdentityKeys {
                address: "walletAddress",
                login_method: "loginMethod",
                provider: "socialProvider",
            },
            Self::Vendor => IdentityKeys {
                address: "vendorWalletAddress",
                login_method: "vendorLoginMethod",
                provider: "vendorSocialProvider",
            },
        }
    }
}

/// The wallet connection remembered across reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedIdentity {
    /// Connected address.
    pub wallet_address: String,
    /// Backend that holds it.
    pub login_method: BackendKind,
    /// Social provider, for embedded logins.
    pub identity_provider: Option<String>,
}

impl From<&WalletSession> for PersistedIdentity {
    fn from(session: &WalletSession) -> Self {
        Self {
            wallet_address: session.address.clone(),
            login_method: session.backend,
            identity_provider: session.identity_provider.clone(),
        }
    }
}

impl From<PersistedIdentity> for WalletSession {
    fn from(identity: PersistedIdentity) -> Self {
        Self {
            address: identity.wallet_address,
            backend: identity.login_method,
            identity_provider: identity.identity_provider,
        }
    }
}

/// Stores `identity` under `scope`'s keys.
pub fn save_identity(store: &SafeStore, scope: IdentityScope, identity: &PersistedIdentity) {
    let keys = scope.keys();
    store.set(keys.address, &identity.wallet_address);
    store.set(keys.login_method, identity.login_method.login_method());
    match &identity.identity_provider {
        Some(provider) => store.set(keys.provider, provider),
        None => store.remove(keys.provider),
    }
}

/// The identity stored under `scope`, if complete and recognised.
#[must_use]
pub fn load_identity(store: &SafeStore, scope: IdentityScope) -> Option<PersistedIdentity> {
    let keys = scope.keys();
    let wallet_address = store.get(keys.address).filter(|a| !a.is_empty())?;
    let login_method = BackendKind::from_login_method(&store.get(keys.login_method)?)?;
    Some(PersistedIdentity {
        wallet_address,
        login_method,
        identity_provider: store.get(keys.provider),
    })
}

/// Forgets the identity stored under `scope`.
pub fn clear_identity(store: &SafeStore, scope: IdentityScope) {
    let keys = scope.keys();
    for key in [keys.address, keys.login_method, keys.provider] {
        store.remove(key);
    }
}

/// Restores the stored identity into the matching backend from `registry`
/// and returns that backend.
#[must_use]
pub fn rehydrate(
    store: &SafeStore,
    scope: IdentityScope,
    registry: &BackendRegistry,
) -> Option<Arc<dyn WalletBackend>> {
    let identity = load_identity(store, scope)?;
    let backend = registry.get(identity.login_method)?;
    #[cfg(feature = "telemetry")]
    tracing::debug!(address = %identity.wallet_address, backend = %identity.login_method, "restoring wallet session");
    backend.restore(identity.into());
    Some(backend)
}
