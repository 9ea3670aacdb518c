use std::collections::HashMap;
use std::sync::Mutex;

use harvest_core::config::PlatformConfig;
use harvest_core::error::HarvestError;
use tracing::debug;

/// Keychain service all codeharvest tokens are stored under.
pub const SERVICE: &str = "codeharvest";

/// Trait for access-token storage backends.
pub trait CredentialStore: Send + Sync {
    /// Store a token under the given key.
    fn store(&self, key: &str, token: &str) -> Result<(), HarvestError>;

    /// Retrieve a token by key.
    fn get(&self, key: &str) -> Result<Option<String>, HarvestError>;

    /// Delete a stored token. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), HarvestError>;
}

fn credential_error(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::CredentialError {
        message: e.to_string(),
    }
}

/// OS keychain-backed store using the `keyring` crate.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, HarvestError> {
        keyring::Entry::new(&self.service, key).map_err(credential_error)
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn store(&self, key: &str, token: &str) -> Result<(), HarvestError> {
        self.entry(key)?
            .set_password(token)
            .map_err(credential_error)
    }

    fn get(&self, key: &str) -> Result<Option<String>, HarvestError> {
        match self.entry(key)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(credential_error(e)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), HarvestError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(credential_error(e)),
        }
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(key: &str, token: &str) -> Self {
        let store = Self::new();
        if let Ok(mut tokens) = store.tokens.lock() {
            tokens.insert(key.to_string(), token.to_string());
        }
        store
    }
}

impl CredentialStore for MemoryStore {
    fn store(&self, key: &str, token: &str) -> Result<(), HarvestError> {
        self.tokens
            .lock()
            .map_err(credential_error)?
            .insert(key.to_string(), token.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, HarvestError> {
        Ok(self.tokens.lock().map_err(credential_error)?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), HarvestError> {
        self.tokens.lock().map_err(credential_error)?.remove(key);
        Ok(())
    }
}

/// Key a platform's token is stored under.
pub fn token_key(platform: &str) -> String {
    format!("{SERVICE}:{platform}")
}

/// Fill in the access token of `config` from `store` when the configuration
/// file left it empty. A token is required either way.
pub fn resolve_token(
    config: PlatformConfig,
    store: &dyn CredentialStore,
) -> Result<PlatformConfig, HarvestError> {
    if config.has_token() {
        return Ok(config);
    }
    let key = token_key(&config.name);
    match store.get(&key)? {
        Some(token) if !token.trim().is_empty() => {
            debug!(platform = %config.name, "access token loaded from credential store");
            Ok(config.with_access_token(token.trim()))
        }
        _ => Err(HarvestError::config(format!(
            "platform '{}' has no AccessToken and none is stored under '{key}'; \
             run `codeharvest token set {}`",
            config.name, config.name
        ))),
    }
}
