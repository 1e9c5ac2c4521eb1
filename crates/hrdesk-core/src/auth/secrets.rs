use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;

/// Account name every hrdesk entry is stored under; the service name
/// distinguishes the secrets.
const ACCOUNT_NAME: &str = "hrdesk";

/// Service prefix for production entries
const DEFAULT_NAMESPACE: &str = "hrdesk";

/// The fixed set of secrets persisted by the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKey {
    AccessToken,
    RefreshToken,
    User,
    Pin,
    BiometryEnabled,
    BiometryMarker,
}

impl SecretKey {
    pub const ALL: [SecretKey; 6] = [
        SecretKey::AccessToken,
        SecretKey::RefreshToken,
        SecretKey::User,
        SecretKey::Pin,
        SecretKey::BiometryEnabled,
        SecretKey::BiometryMarker,
    ];

    /// Entry name within a service namespace
    pub fn name(self) -> &'static str {
        match self {
            SecretKey::AccessToken => "accessToken",
            SecretKey::RefreshToken => "refreshToken",
            SecretKey::User => "user",
            SecretKey::Pin => "pin",
            SecretKey::BiometryEnabled => "biometryEnabled",
            SecretKey::BiometryMarker => "biometryMarker",
        }
    }

    /// Keychain service identifier under the default namespace
    pub fn service(self) -> String {
        format!("{}.{}", DEFAULT_NAMESPACE, self.name())
    }
}

/// Scoped key/value store for secrets.
///
/// `get` returns `Ok(None)` for a key that was never set; `delete` of a
/// missing key succeeds.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: SecretKey) -> Result<Option<String>>;
    fn set(&self, key: SecretKey, value: &str) -> Result<()>;
    fn delete(&self, key: SecretKey) -> Result<()>;
}

/// Secrets held in the OS keychain, one entry per key under
/// `<namespace>.<name>`
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    namespace: String,
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringSecretStore {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn service(&self, key: SecretKey) -> String {
        format!("{}.{}", self.namespace, key.name())
    }

    fn entry(&self, key: SecretKey) -> Result<Entry> {
        Entry::new(&self.service(key), ACCOUNT_NAME).context("Failed to create keyring entry")
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self, key: SecretKey) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to retrieve {} from keychain", self.service(key))
            }),
        }
    }

    fn set(&self, key: SecretKey, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .with_context(|| format!("Failed to store {} in keychain", self.service(key)))
    }

    fn delete(&self, key: SecretKey) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to delete {} from keychain", self.service(key))
            }),
        }
    }
}

/// Process-local store, for platforms without a keychain and for tests
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<SecretKey, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SecretKey, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Secret store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: SecretKey) -> Result<Option<String>> {
        Ok(self.entries()?.get(&key).cloned())
    }

    fn set(&self, key: SecretKey, value: &str) -> Result<()> {
        self.entries()?.insert(key, value.to_string());
        Ok(())
    }

    fn delete(&self, key: SecretKey) -> Result<()> {
        self.entries()?.remove(&key);
        Ok(())
    }
}
