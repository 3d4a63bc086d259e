use async_trait::async_trait;
use reqwest::header;
use tracing::debug;

use super::{ApiClient, ApiError};
use crate::models::{Account, AccountsResponse, User};

/// Product tag of Harvest time-tracking accounts
pub const HARVEST_PRODUCT: &str = "harvest";

/// Header selecting the account a Harvest v2 API call acts on
const ACCOUNT_ID_HEADER: &str = "Harvest-Account-Id";

/// Read-only identity lookups.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// The user behind an OAuth access token and every account they can use.
    async fn accounts(&self, access_token: &str) -> Result<AccountsResponse, ApiError>;

    /// The user behind a token acting on one account. Works for personal
    /// access tokens, which the accounts endpoint does not accept.
    async fn current_user(&self, access_token: &str, account_id: i64) -> Result<User, ApiError>;
}

#[async_trait]
impl AccountDirectory for ApiClient {
    async fn accounts(&self, access_token: &str) -> Result<AccountsResponse, ApiError> {
        if access_token.trim().is_empty() {
            return Err(ApiError::MissingAccessToken);
        }
        let request = self
            .http()
            .get(&self.endpoints().accounts_url)
            .bearer_auth(access_token);
        let resp: AccountsResponse = ApiClient::send_json(request, "accounts response").await?;
        debug!(user_id = resp.user.id, accounts = resp.accounts.len(), "Fetched accounts");
        Ok(resp)
    }

    async fn current_user(&self, access_token: &str, account_id: i64) -> Result<User, ApiError> {
        if access_token.trim().is_empty() {
            return Err(ApiError::MissingAccessToken);
        }
        let request = self
            .http()
            .get(&self.endpoints().current_user_url)
            .bearer_auth(access_token)
            .header(ACCOUNT_ID_HEADER, account_id.to_string())
            .header(header::CONTENT_TYPE, "application/json");
        ApiClient::send_json(request, "user response").await
    }
}

/// Accounts whose product matches `product` (case-insensitive), in their
/// original order. When nothing matches, the full list comes back
/// unchanged: older accounts carry no product tag.
pub fn filter_accounts(accounts: &[Account], product: &str) -> Vec<Account> {
    let matching: Vec<Account> = accounts
        .iter()
        .filter(|a| a.is_product(product))
        .cloned()
        .collect();
    if matching.is_empty() {
        accounts.to_vec()
    } else {
        matching
    }
}
