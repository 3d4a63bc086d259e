use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use super::StoreError;

/// A place secrets can live outside process memory.
///
/// Implementations must treat `delete` of an unknown key as success and
/// return `Ok(None)` from `get` when nothing is stored.
pub trait SecretBackend: Send + Sync {
    /// Short name used in logs and `hrvst status`.
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn list_keys(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory backend, used by tests and as a scratch store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SecretBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries().keys().cloned().collect())
    }
}

/// Runs every operation of the wrapped backend on a worker thread and gives
/// up after `timeout`. Used for D-Bus secret services, which can hang
/// indefinitely when no agent answers.
pub struct TimeoutBackend {
    inner: Arc<dyn SecretBackend>,
    timeout: Duration,
}

impl TimeoutBackend {
    pub fn new(inner: Arc<dyn SecretBackend>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SecretBackend) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(f(inner.as_ref()));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    backend = self.inner.name(),
                    op = op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Secret store operation timed out"
                );
                Err(StoreError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Backend(format!(
                "{} worker exited during {}",
                self.inner.name(),
                op
            ))),
        }
    }
}

impl SecretBackend for TimeoutBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.run("get", move |b| b.get(&key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.run("set", move |b| b.set(&key, &value))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.run("delete", move |b| b.delete(&key))
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        self.run("list_keys", |b| b.list_keys())
    }
}
