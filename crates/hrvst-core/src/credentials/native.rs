use std::collections::BTreeSet;

use keyring::Entry;
use tracing::debug;

use super::{is_locked_message, SecretBackend, StoreError};

/// Service name every hrvst secret is filed under in the OS keychain
pub const SERVICE_NAME: &str = "hrvst-cli";

/// Reserved entry holding the list of stored keys. OS vaults cannot
/// enumerate entries by service, so the index is kept alongside them.
const INDEX_ACCOUNT: &str = "__hrvst_index__";

/// OS keychain backend (macOS Keychain, Windows Credential Manager or the
/// freedesktop Secret Service, whichever `keyring` was built for).
pub struct KeyringBackend {
    service: String,
    name: &'static str,
}

impl KeyringBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            name,
        }
    }

    /// Use a different service name, so tests and side-by-side installs do
    /// not share entries.
    pub fn with_service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service, key).map_err(map_keyring_error)
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn load_index(&self) -> Result<BTreeSet<String>, StoreError> {
        match self.read(INDEX_ACCOUNT)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                location: format!("{} keychain index", self.service),
                source,
            }),
            None => Ok(BTreeSet::new()),
        }
    }

    fn save_index(&self, index: &BTreeSet<String>) -> Result<(), StoreError> {
        let raw = serde_json::to_string(index).map_err(|source| StoreError::Corrupt {
            location: format!("{} keychain index", self.service),
            source,
        })?;
        self.entry(INDEX_ACCOUNT)?
            .set_password(&raw)
            .map_err(map_keyring_error)
    }
}

impl SecretBackend for KeyringBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(map_keyring_error)?;

        let mut index = self.load_index()?;
        if index.insert(key.to_string()) {
            self.save_index(&index)?;
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {}
            Err(keyring::Error::NoEntry) => debug!(key = key, "No keychain entry to delete"),
            Err(e) => return Err(map_keyring_error(e)),
        }

        let mut index = self.load_index()?;
        if index.remove(key) {
            self.save_index(&index)?;
        }
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load_index()?.into_iter().collect())
    }
}

fn map_keyring_error(err: keyring::Error) -> StoreError {
    let message = err.to_string();
    if is_locked_message(&message) {
        StoreError::Locked(message)
    } else {
        StoreError::Backend(message)
    }
}
