//! Interactive OAuth2 authorization: browser with a local callback, or
//! manual copy/paste of the redirect URL.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::Url;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::browser::BrowserLauncher;
use super::callback::{parse_redirect_input, redirect_uri, CallbackServer};
use crate::api::{filter_accounts, AccountDirectory, TokenEndpoint, AUTHORIZE_URL, HARVEST_PRODUCT};
use crate::credentials::{normalize_email, CredentialStore, TokenRecord};
use crate::error::AuthError;
use crate::models::{Account, TokenSet, User};

// ============================================================================
// Constants
// ============================================================================

/// Loopback port registered as the OAuth application's redirect
pub const DEFAULT_CALLBACK_PORT: u16 = 8484;

/// Overall deadline for one login attempt
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Random bytes in the `state` correlation token
const STATE_BYTES: usize = 32;

/// Settings for one authorization flow.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub callback_port: u16,
    pub timeout: Duration,
    /// Accounts of this product are preferred when choosing an account
    pub product: String,
    pub scopes: Vec<String>,
    /// Show the consent screen even if the user already granted access
    pub force_consent: bool,
}

impl OAuthConfig {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.trim().to_string(),
            authorize_url: AUTHORIZE_URL.to_string(),
            callback_port: DEFAULT_CALLBACK_PORT,
            timeout: DEFAULT_LOGIN_TIMEOUT,
            product: HARVEST_PRODUCT.to_string(),
            scopes: Vec::new(),
            force_consent: false,
        }
    }

    fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() || self.client_secret.trim().is_empty() {
            return Err(AuthError::MissingClientCredentials);
        }
        Ok(())
    }
}

/// Fresh URL-safe correlation token.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Authorization page URL asking for offline (refresh-capable) access.
pub fn build_authorize_url(
    config: &OAuthConfig,
    redirect_uri: &str,
    state: &str,
) -> Result<String, AuthError> {
    let mut url = Url::parse(&config.authorize_url)
        .map_err(|e| AuthError::InvalidUrl(format!("{}: {}", config.authorize_url, e)))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("client_id", &config.client_id);
        query.append_pair("response_type", "code");
        query.append_pair("redirect_uri", redirect_uri);
        query.append_pair("state", state);
        query.append_pair("access_type", "offline");
        if config.force_consent {
            query.append_pair("prompt", "consent");
        }
        if !config.scopes.is_empty() {
            query.append_pair("scope", &config.scopes.join(" "));
        }
    }
    Ok(url.to_string())
}

/// Result of a completed login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Lowercased, trimmed email of the user who consented
    pub email: String,
    pub user: User,
    pub account: Account,
    pub refresh_token: String,
    pub token: TokenSet,
}

impl LoginOutcome {
    pub fn account_id(&self) -> i64 {
        self.account.id
    }
}

/// Persist a login under `client`. Scopes come from the token response,
/// falling back to what was requested.
pub fn save_login(
    store: &CredentialStore,
    client: &str,
    outcome: &LoginOutcome,
    requested_scopes: &[String],
) -> Result<TokenRecord, AuthError> {
    let mut scopes = outcome.token.scopes();
    if scopes.is_empty() {
        scopes = requested_scopes.to_vec();
    }
    let record = store.set(
        client,
        &outcome.email,
        outcome.account_id(),
        &outcome.refresh_token,
        &scopes,
    )?;
    info!(client = %record.client, email = %record.email, account_id = record.account_id, "Saved login");
    Ok(record)
}

/// Ask the user to pick one of `accounts` by 1-based index. A single
/// account is picked without asking.
pub fn select_account(
    accounts: &[Account],
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<Account, AuthError> {
    match accounts {
        [] => return Err(AuthError::NoAccounts),
        [only] => return Ok(only.clone()),
        _ => {}
    }

    writeln!(output, "Multiple accounts available:")?;
    for (i, account) in accounts.iter().enumerate() {
        writeln!(output, "  {}) {} [{}] (id {})", i + 1, account.name, account.product, account.id)?;
    }
    write!(output, "Select an account [1-{}]: ", accounts.len())?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let choice = line.trim();
    match choice.parse::<usize>() {
        Ok(n) if (1..=accounts.len()).contains(&n) => Ok(accounts[n - 1].clone()),
        _ => Err(AuthError::InvalidSelection(choice.to_string())),
    }
}

/// Drives the consent flows.
pub struct Authorizer {
    config: OAuthConfig,
    tokens: Arc<dyn TokenEndpoint>,
    directory: Arc<dyn AccountDirectory>,
}

impl Authorizer {
    pub fn new(
        config: OAuthConfig,
        tokens: Arc<dyn TokenEndpoint>,
        directory: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self {
            config,
            tokens,
            directory,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Log in by opening the authorization page in a browser and catching
    /// the redirect on a local listener.
    ///
    /// `input` is only read if the user has to choose between accounts.
    pub async fn login_with_browser(
        &self,
        browser: &dyn BrowserLauncher,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<LoginOutcome, AuthError> {
        self.config.validate()?;
        let deadline = Instant::now() + self.config.timeout;
        let state = generate_state();

        let mut server = CallbackServer::bind(self.config.callback_port, &state).await?;
        let redirect = server.redirect_uri();
        let url = build_authorize_url(&self.config, &redirect, &state)?;

        writeln!(output, "Opening your browser to authorize hrvst.")?;
        writeln!(output, "If it does not open, visit:\n\n  {}\n", url)?;
        output.flush()?;
        if let Err(e) = browser.open(&url) {
            warn!(error = %e, "Could not open a browser");
        }

        let code = server.wait(deadline, self.config.timeout).await?;
        drop(server);
        debug!("Received authorization code");

        self.finish(&code, &redirect, input, output).await
    }

    /// Log in by having the user paste the redirect URL they land on.
    pub async fn login_manual(
        &self,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<LoginOutcome, AuthError> {
        self.config.validate()?;
        let deadline = Instant::now() + self.config.timeout;
        let state = generate_state();
        let redirect = redirect_uri(self.config.callback_port);
        let url = build_authorize_url(&self.config, &redirect, &state)?;

        writeln!(output, "Open this URL in a browser and approve access:\n\n  {}\n", url)?;
        writeln!(output, "Your browser will then fail to load a localhost page. That is expected.")?;
        write!(output, "Paste the full URL from the address bar: ")?;
        output.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        if Instant::now() >= deadline {
            return Err(AuthError::Timeout(self.config.timeout));
        }
        let code = parse_redirect_input(&line)?.into_code(&state, false)?;

        self.finish(&code, &redirect, input, output).await
    }

    async fn finish(
        &self,
        code: &str,
        redirect_uri: &str,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<LoginOutcome, AuthError> {
        let token = self
            .tokens
            .exchange_code(code, redirect_uri)
            .await
            .map_err(AuthError::ExchangeFailed)?;
        let refresh_token = token
            .refresh_token()
            .ok_or(AuthError::MissingRefreshToken)?
            .to_string();

        let directory = self
            .directory
            .accounts(&token.access_token)
            .await
            .map_err(AuthError::DirectoryFailed)?;
        if directory.accounts.is_empty() {
            return Err(AuthError::NoAccounts);
        }
        let candidates = filter_accounts(&directory.accounts, &self.config.product);
        let account = select_account(&candidates, input, output)?;

        Ok(LoginOutcome {
            email: normalize_email(&directory.user.email),
            user: directory.user,
            account,
            refresh_token,
            token,
        })
    }
}
