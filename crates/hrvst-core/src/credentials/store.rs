use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{open_backend, select_backend, HostEnv, MemoryBackend, SecretBackend, StoreError};

/// Client name used when none is given
pub const DEFAULT_CLIENT: &str = "default";

/// Synthetic client that personal access tokens are filed under
pub const PAT_CLIENT: &str = "pat";

const KEY_PREFIX: &str = "token";

/// A stored long-lived credential.
///
/// For OAuth logins `refresh_token` is the refresh token; for personal
/// access tokens it holds the PAT itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub client: String,
    pub email: String,
    pub account_id: i64,
    pub refresh_token: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// What is written under a key. Client and email live in the key itself.
#[derive(Debug, Serialize, Deserialize)]
struct StoredValue {
    refresh_token: String,
    #[serde(default)]
    account_id: i64,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
}

/// Lowercase and trim a client name, falling back to `DEFAULT_CLIENT`.
pub fn normalize_client(client: &str) -> Result<String, StoreError> {
    let normalized = client.trim().to_lowercase();
    if normalized.is_empty() {
        return Ok(DEFAULT_CLIENT.to_string());
    }
    let allowed = normalized
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
    if !allowed {
        return Err(StoreError::InvalidClient(client.to_string()));
    }
    Ok(normalized)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn encode_key(client: &str, email: &str) -> String {
    format!("{}:{}:{}", KEY_PREFIX, client, email)
}

/// Split a key into (client, email). The legacy `token:<email>` form maps
/// to the default client.
pub fn decode_key(key: &str) -> Result<(String, String), StoreError> {
    let invalid = || StoreError::InvalidKey(key.to_string());

    let rest = key
        .strip_prefix(KEY_PREFIX)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or_else(invalid)?;

    let parts: Vec<&str> = rest.split(':').collect();
    match parts.as_slice() {
        [email] if !email.is_empty() => Ok((DEFAULT_CLIENT.to_string(), email.to_string())),
        [client, email] if !client.is_empty() && !email.is_empty() => {
            Ok((client.to_string(), email.to_string()))
        }
        _ => Err(invalid()),
    }
}

fn legacy_key(email: &str) -> String {
    format!("{}:{}", KEY_PREFIX, email)
}

/// Refresh tokens keyed by (client, email), persisted in a `SecretBackend`.
pub struct CredentialStore {
    backend: Box<dyn SecretBackend>,
}

impl CredentialStore {
    pub fn new(backend: Box<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by process memory only.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Open the backend the selection policy picks for this host.
    pub fn open(requested_backend: &str, file_path: PathBuf) -> Result<Self, StoreError> {
        let host = HostEnv::detect();
        let choice = select_backend(requested_backend, &host)?;
        debug!(
            backend = choice.kind.name(),
            forced_file = choice.forced_file,
            os = %host.os,
            "Selected credential backend"
        );
        Ok(Self::new(open_backend(&choice, &host, file_path)?))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Save a credential, replacing any existing one for (client, email).
    pub fn set(
        &self,
        client: &str,
        email: &str,
        account_id: i64,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenRecord, StoreError> {
        self.write(client, email, account_id, refresh_token, scopes, Utc::now())
    }

    /// Swap in a rotated refresh token, keeping the rest of `record`
    /// (including when it was created).
    pub fn replace_refresh_token(
        &self,
        record: &TokenRecord,
        refresh_token: &str,
    ) -> Result<TokenRecord, StoreError> {
        self.write(
            &record.client,
            &record.email,
            record.account_id,
            refresh_token,
            &record.scopes,
            record.created_at,
        )
    }

    fn write(
        &self,
        client: &str,
        email: &str,
        account_id: i64,
        refresh_token: &str,
        scopes: &[String],
        created_at: DateTime<Utc>,
    ) -> Result<TokenRecord, StoreError> {
        let client = normalize_client(client)?;
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(StoreError::MissingEmail);
        }
        if email.contains(':') {
            return Err(StoreError::InvalidEmail(email));
        }
        if refresh_token.trim().is_empty() {
            return Err(StoreError::MissingRefreshToken);
        }
        if account_id <= 0 {
            return Err(StoreError::MissingAccountId);
        }

        let value = StoredValue {
            refresh_token: refresh_token.trim().to_string(),
            account_id,
            scopes: scopes.to_vec(),
            created_at,
        };
        let key = encode_key(&client, &email);
        let raw = serde_json::to_string(&value).map_err(|source| StoreError::Corrupt {
            location: key.clone(),
            source,
        })?;
        self.backend.set(&key, &raw)?;
        if client == DEFAULT_CLIENT {
            // the legacy entry would otherwise be listed alongside the new one
            self.backend.delete(&legacy_key(&email))?;
        }
        debug!(client = %client, email = %email, account_id, backend = self.backend.name(), "Stored token");

        Ok(TokenRecord {
            client,
            email,
            account_id,
            refresh_token: value.refresh_token,
            scopes: value.scopes,
            created_at: value.created_at,
        })
    }

    /// Load the credential for (client, email).
    pub fn get(&self, client: &str, email: &str) -> Result<TokenRecord, StoreError> {
        let client = normalize_client(client)?;
        let email = normalize_email(email);

        let key = encode_key(&client, &email);
        let mut raw = self.backend.get(&key)?;
        if raw.is_none() && client == DEFAULT_CLIENT && !email.is_empty() {
            raw = self.backend.get(&legacy_key(&email))?;
        }

        match raw {
            Some(raw) => Self::parse(&key, &client, &email, &raw),
            None => Err(StoreError::NotAuthenticated { client, email }),
        }
    }

    /// Remove the credential for (client, email). Missing entries are fine.
    pub fn delete(&self, client: &str, email: &str) -> Result<(), StoreError> {
        let client = normalize_client(client)?;
        let email = normalize_email(email);

        self.backend.delete(&encode_key(&client, &email))?;
        if client == DEFAULT_CLIENT && !email.is_empty() {
            self.backend.delete(&legacy_key(&email))?;
        }
        debug!(client = %client, email = %email, "Deleted token");
        Ok(())
    }

    /// Every readable credential in the backend.
    pub fn list(&self) -> Result<Vec<TokenRecord>, StoreError> {
        let mut records = Vec::new();
        for key in self.backend.list_keys()? {
            let (client, email) = match decode_key(&key) {
                Ok(parts) => parts,
                Err(_) => {
                    debug!(key = %key, "Skipping foreign key in secret store");
                    continue;
                }
            };
            let Some(raw) = self.backend.get(&key)? else {
                continue;
            };
            match Self::parse(&key, &client, &email, &raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable credential"),
            }
        }
        Ok(records)
    }

    fn parse(key: &str, client: &str, email: &str, raw: &str) -> Result<TokenRecord, StoreError> {
        let value: StoredValue = serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
            location: key.to_string(),
            source,
        })?;
        Ok(TokenRecord {
            client: client.to_string(),
            email: email.to_string(),
            account_id: value.account_id,
            refresh_token: value.refresh_token,
            scopes: value.scopes,
            created_at: value.created_at,
        })
    }
}
