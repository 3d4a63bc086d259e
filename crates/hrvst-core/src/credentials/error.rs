use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not logged in as {email} (client {client}) - run `hrvst login`")]
    NotAuthenticated { client: String, email: String },

    #[error("Email is required to store a token")]
    MissingEmail,

    #[error("Invalid email {0:?} - ':' is not allowed")]
    InvalidEmail(String),

    #[error("Refresh token is required to store a token")]
    MissingRefreshToken,

    #[error("Account id is required to store a token")]
    MissingAccountId,

    #[error("Invalid client name {0:?} - use letters, digits, '.', '_' or '-'")]
    InvalidClient(String),

    #[error("Malformed credential key {0:?}")]
    InvalidKey(String),

    #[error("Secret store is locked: {0}")]
    Locked(String),

    #[error("Unknown keyring backend {0:?} (expected auto, file, keychain, wincred or secret-service)")]
    UnknownBackend(String),

    #[error("Keyring backend {backend} is not available on {os}")]
    UnsupportedBackend { backend: String, os: String },

    #[error("Secret store did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Secret store error: {0}")]
    Backend(String),

    #[error("Corrupt credential data in {location}: {source}")]
    Corrupt {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not find a config directory for the credential file")]
    NoConfigDir,

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_locked(&self) -> bool {
        matches!(self, StoreError::Locked(_))
    }

    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, StoreError::NotAuthenticated { .. })
    }
}
