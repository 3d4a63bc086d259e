//! Shared HTTP plumbing for Harvest API calls.

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Harvest ID OAuth2 authorization page
pub const AUTHORIZE_URL: &str = "https://id.getharvest.com/oauth2/authorize";

/// Harvest ID OAuth2 token endpoint
pub const TOKEN_URL: &str = "https://id.getharvest.com/api/v2/oauth2/token";

/// Accounts reachable with an access token
pub const ACCOUNTS_URL: &str = "https://id.getharvest.com/api/v2/accounts";

/// Identity of a personal access token's owner
pub const CURRENT_USER_URL: &str = "https://api.harvestapp.com/v2/users/me";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Harvest rejects requests without a User-Agent naming the application.
const USER_AGENT: &str = concat!("hrvst/", env!("CARGO_PKG_VERSION"));

/// Where the Harvest services live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub accounts_url: String,
    pub current_user_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            accounts_url: ACCOUNTS_URL.to_string(),
            current_user_url: CURRENT_USER_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// All endpoints under one base URL, same paths as production.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/oauth2/authorize", base),
            token_url: format!("{}/api/v2/oauth2/token", base),
            accounts_url: format!("{}/api/v2/accounts", base),
            current_user_url: format!("{}/v2/users/me", base),
        }
    }
}

/// API client for Harvest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    endpoints: Endpoints,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(endpoints: Endpoints) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Check if response is successful, returning an error with body if not.
    pub(crate) async fn check_response(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "Request failed");
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a request and decode its JSON body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, ApiError> {
        let response = request
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
    }
}
