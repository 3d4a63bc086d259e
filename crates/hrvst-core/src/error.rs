use std::time::Duration;

use thiserror::Error;

use crate::api::ApiError;
use crate::credentials::StoreError;

/// Failures of the authorization flows and the access token cache.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth client id and secret are required (set HRVST_CLIENT_ID and HRVST_CLIENT_SECRET)")]
    MissingClientCredentials,

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Authorization state mismatch - the callback did not come from this login attempt")]
    StateMismatch,

    #[error("Authorization response did not include a code")]
    MissingCode,

    #[error("No refresh token returned - run `hrvst login --force-consent` to grant offline access again")]
    MissingRefreshToken,

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(#[source] ApiError),

    #[error("Account lookup failed: {0}")]
    DirectoryFailed(#[source] ApiError),

    #[error("No Harvest accounts are available for this user")]
    NoAccounts,

    #[error("Invalid account selection: {0:?}")]
    InvalidSelection(String),

    #[error("Timed out after {0:?} waiting for authorization")]
    Timeout(Duration),

    #[error("Could not listen for the OAuth callback on {addr}: {source}")]
    CallbackBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Opening a browser is not supported on {0}")]
    UnsupportedPlatform(String),

    #[error("Failed to launch browser: {0}")]
    BrowserLaunch(#[source] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid personal access token: {0}")]
    InvalidPat(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Console I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// No usable credential is stored; the user has to log in.
    pub fn is_not_authenticated(&self) -> bool {
        match self {
            AuthError::Store(e) => e.is_not_authenticated(),
            _ => false,
        }
    }

    /// The secret store needs to be unlocked before anything can proceed.
    pub fn is_store_locked(&self) -> bool {
        match self {
            AuthError::Store(e) => e.is_locked(),
            _ => false,
        }
    }

    /// The underlying API call was rejected with 401.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            AuthError::ExchangeFailed(e) | AuthError::DirectoryFailed(e) => e.is_unauthorized(),
            _ => false,
        }
    }
}
