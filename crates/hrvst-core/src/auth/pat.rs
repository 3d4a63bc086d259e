use tracing::info;

use super::session::CachedAccess;
use crate::api::{AccountDirectory, ApiError};
use crate::credentials::{CredentialStore, TokenRecord, PAT_CLIENT};
use crate::error::AuthError;
use crate::models::User;

pub const ACCESS_TOKEN_ENV: &str = "HARVEST_ACCESS_TOKEN";
pub const ACCOUNT_ID_ENV: &str = "HARVEST_ACCOUNT_ID";

/// A long-lived token issued from the Harvest developer page, bound to one
/// account.
#[derive(Clone, PartialEq, Eq)]
pub struct PersonalAccessToken {
    pub token: String,
    pub account_id: i64,
}

impl std::fmt::Debug for PersonalAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonalAccessToken")
            .field("token", &"<redacted>")
            .field("account_id", &self.account_id)
            .finish()
    }
}

impl PersonalAccessToken {
    /// Build from raw user input.
    pub fn new(token: &str, account_id: &str) -> Result<Self, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidPat("token is empty".to_string()));
        }
        let account_id = account_id.trim();
        let id = account_id
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| AuthError::InvalidPat(format!("account id {:?} is not a positive number", account_id)))?;
        Ok(Self {
            token: token.to_string(),
            account_id: id,
        })
    }

    /// Read `HARVEST_ACCESS_TOKEN` / `HARVEST_ACCOUNT_ID`.
    pub fn from_env() -> Result<Option<Self>, AuthError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `None` when no token is set. A token without a valid account id is
    /// an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = match lookup(ACCESS_TOKEN_ENV).filter(|t| !t.trim().is_empty()) {
            Some(token) => token,
            None => return Ok(None),
        };
        let account_id = lookup(ACCOUNT_ID_ENV).unwrap_or_default();
        if account_id.trim().is_empty() {
            return Err(AuthError::InvalidPat(format!(
                "{} is set but {} is not",
                ACCESS_TOKEN_ENV, ACCOUNT_ID_ENV
            )));
        }
        Self::new(&token, &account_id).map(Some)
    }

    /// Ask Harvest who the token belongs to.
    pub async fn validate(&self, directory: &dyn AccountDirectory) -> Result<User, AuthError> {
        directory
            .current_user(&self.token, self.account_id)
            .await
            .map_err(|e| match e {
                ApiError::Unauthorized => {
                    AuthError::InvalidPat("Harvest rejected the token for this account".to_string())
                }
                other => AuthError::DirectoryFailed(other),
            })
    }

    /// Validate the token and store it under the `pat` client.
    pub async fn login(
        &self,
        directory: &dyn AccountDirectory,
        store: &CredentialStore,
    ) -> Result<(User, TokenRecord), AuthError> {
        let user = self.validate(directory).await?;
        let record = store.set(PAT_CLIENT, &user.email, self.account_id, &self.token, &[])?;
        info!(email = %record.email, account_id = record.account_id, "Saved personal access token");
        Ok((user, record))
    }

    pub fn as_access(&self) -> CachedAccess {
        CachedAccess::non_expiring(&self.token, self.account_id)
    }
}
