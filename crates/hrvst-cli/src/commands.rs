use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use hrvst_core::api::{AccountDirectory, ApiClient, ApiError, Endpoints, OAuthClient, TokenEndpoint};
use hrvst_core::auth::{
    save_login, AccessTokenCache, Authorizer, CachedAccess, OAuthConfig, PersonalAccessToken,
    SystemBrowser,
};
use hrvst_core::credentials::{normalize_client, normalize_email, CredentialStore, PAT_CLIENT};
use hrvst_core::{AuthError, Config};

use crate::cli::{LoginArgs, LogoutArgs};

/// Everything a command needs, built once in `main`.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<CredentialStore>,
    pub endpoints: Endpoints,
}

impl AppContext {
    pub fn open(config: Config, keyring_backend: Option<&str>) -> Result<Self> {
        let backend = keyring_backend.unwrap_or_else(|| config.keyring_backend());
        let file_path = Config::credentials_path()?;
        let store = CredentialStore::open(backend, file_path)
            .with_context(|| format!("Failed to open credential store ({})", backend))?;
        debug!(backend = store.backend_name(), "Credential store ready");

        Ok(Self {
            config,
            store: Arc::new(store),
            endpoints: Endpoints::default(),
        })
    }

    fn api(&self) -> Result<ApiClient> {
        Ok(ApiClient::new(self.endpoints.clone())?)
    }

    fn oauth_client(&self) -> Result<OAuthClient> {
        let (id, secret) = self.client_credentials()?;
        Ok(OAuthClient::new(self.api()?, &id, &secret))
    }

    fn client_credentials(&self) -> Result<(String, String)> {
        match (&self.config.client_id, &self.config.client_secret) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                Ok((id.clone(), secret.clone()))
            }
            _ => Err(AuthError::MissingClientCredentials.into()),
        }
    }

    /// Email of the active login.
    fn active_email(&self) -> Result<String> {
        match self.config.email.as_deref().map(normalize_email) {
            Some(email) if !email.is_empty() => Ok(email),
            _ => bail!("No active login - run `hrvst login`"),
        }
    }

    fn remember_login(&mut self, client: &str, email: &str) -> Result<()> {
        self.config.client = Some(client.to_string());
        self.config.email = Some(email.to_string());
        self.config.save().context("Failed to save config")?;
        Ok(())
    }

    /// The credential API calls should use: a personal access token from
    /// the environment, or else the active stored login.
    fn access(&self) -> Result<Access> {
        if let Some(pat) = PersonalAccessToken::from_env()? {
            debug!("Using personal access token from the environment");
            return Ok(Access::Pat(pat));
        }

        let email = self.active_email()?;
        let client = self.config.client_name();
        let tokens: Arc<dyn TokenEndpoint> = if client == PAT_CLIENT {
            // never called for PAT records
            Arc::new(OAuthClient::new(self.api()?, "", ""))
        } else {
            Arc::new(self.oauth_client()?)
        };
        let cache = AccessTokenCache::new(self.store.clone(), tokens, client, &email)?;
        Ok(Access::Cached(cache))
    }
}

enum Access {
    Pat(PersonalAccessToken),
    Cached(AccessTokenCache),
}

impl Access {
    async fn current(&self) -> Result<CachedAccess, AuthError> {
        match self {
            Access::Pat(pat) => Ok(pat.as_access()),
            Access::Cached(cache) => cache.current().await,
        }
    }

    async fn invalidate(&self) {
        if let Access::Cached(cache) = self {
            cache.invalidate().await;
        }
    }
}

pub async fn login(ctx: &mut AppContext, args: LoginArgs) -> Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();

    if args.pat {
        return login_pat(ctx, &mut input, &mut output).await;
    }

    let client = match args.client.as_deref() {
        Some(name) => normalize_client(name)?,
        None => normalize_client(ctx.config.client_name())?,
    };
    if client == PAT_CLIENT {
        bail!("Client name {:?} is reserved - use `hrvst login --pat`", PAT_CLIENT);
    }

    let (id, secret) = ctx.client_credentials()?;
    let mut config = OAuthConfig::new(&id, &secret);
    config.authorize_url = ctx.endpoints.authorize_url.clone();
    config.force_consent = args.force_consent;
    let requested_scopes = config.scopes.clone();

    let api = ctx.api()?;
    let authorizer = Authorizer::new(
        config,
        Arc::new(OAuthClient::new(api.clone(), &id, &secret)),
        Arc::new(api),
    );

    let outcome = if args.manual {
        authorizer.login_manual(&mut input, &mut output).await?
    } else {
        authorizer
            .login_with_browser(&SystemBrowser, &mut input, &mut output)
            .await?
    };

    let record = save_login(&ctx.store, &client, &outcome, &requested_scopes)?;
    ctx.remember_login(&record.client, &record.email)?;

    writeln!(
        output,
        "Logged in as {} <{}> on {} (account {}).",
        outcome.user.full_name(),
        record.email,
        outcome.account.name,
        record.account_id
    )?;
    Ok(())
}

async fn login_pat(ctx: &mut AppContext, input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
    let pat = match PersonalAccessToken::from_env()? {
        Some(pat) => pat,
        None => {
            write!(output, "Harvest account ID: ")?;
            output.flush()?;
            let mut account_id = String::new();
            input.read_line(&mut account_id)?;
            let token = rpassword::prompt_password("Personal access token: ")
                .context("Failed to read token")?;
            PersonalAccessToken::new(&token, &account_id)?
        }
    };

    let api = ctx.api()?;
    let (user, record) = pat.login(&api, &ctx.store).await?;
    ctx.remember_login(&record.client, &record.email)?;

    writeln!(
        output,
        "Saved personal access token for {} <{}> (account {}).",
        user.full_name(),
        record.email,
        record.account_id
    )?;
    Ok(())
}

pub fn logout(ctx: &mut AppContext, args: LogoutArgs) -> Result<()> {
    let email = match args.email.as_deref() {
        Some(email) => normalize_email(email),
        None => ctx.active_email()?,
    };
    let client = normalize_client(args.client.as_deref().unwrap_or(ctx.config.client_name()))?;

    ctx.store.delete(&client, &email)?;

    let was_active = ctx.config.email.as_deref().map(normalize_email).as_deref() == Some(email.as_str())
        && ctx.config.client_name() == client;
    if was_active {
        ctx.config.email = None;
        ctx.config.save().context("Failed to save config")?;
    }

    println!("Logged out {} (client {}).", email, client);
    Ok(())
}

pub fn status(ctx: &AppContext) -> Result<()> {
    let records = ctx.store.list()?;
    println!("Credential backend: {}", ctx.store.backend_name());

    if records.is_empty() {
        println!("No stored logins. Run `hrvst login`.");
        return Ok(());
    }

    let active_email = ctx.config.email.as_deref().map(normalize_email);
    let active_client = ctx.config.client_name().to_lowercase();
    for record in records {
        let active = active_email.as_deref() == Some(record.email.as_str()) && record.client == active_client;
        println!(
            "{} {:<12} {:<32} account {:<10} since {}",
            if active { "*" } else { " " },
            record.client,
            record.email,
            record.account_id,
            record.created_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    Ok(())
}

pub async fn token(ctx: &AppContext) -> Result<()> {
    let access = ctx.access()?.current().await?;
    println!("{}", access.access_token);
    Ok(())
}

pub async fn whoami(ctx: &AppContext) -> Result<()> {
    let access = ctx.access()?;
    let api = ctx.api()?;

    let mut current = access.current().await?;
    let first = api.current_user(&current.access_token, current.account_id).await;
    let user = match first {
        Err(ApiError::Unauthorized) => {
            debug!("Access token rejected, retrying with a fresh one");
            access.invalidate().await;
            current = access.current().await?;
            api.current_user(&current.access_token, current.account_id)
                .await
                .map_err(AuthError::DirectoryFailed)?
        }
        other => other.map_err(AuthError::DirectoryFailed)?,
    };

    println!("{} <{}>", user.full_name(), user.email);
    println!("Account: {}", current.account_id);
    if current.expires_at > chrono::Utc::now() {
        println!("Token valid for {}s", current.seconds_until_expiry());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(config: Config) -> AppContext {
        AppContext {
            config,
            store: Arc::new(CredentialStore::in_memory()),
            endpoints: Endpoints::default(),
        }
    }

    #[test]
    fn test_client_credentials_required() {
        let ctx = context(Config {
            client_id: Some("id".to_string()),
            client_secret: Some(" ".to_string()),
            ..Default::default()
        });
        let err = ctx.client_credentials().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::MissingClientCredentials)
        ));
    }

    #[test]
    fn test_open_reports_unknown_backend_with_context() {
        let err = match AppContext::open(Config::default(), Some("bogus")) {
            Ok(_) => panic!("unknown backend accepted"),
            Err(err) => err,
        };
        // Without a config directory the path lookup fails first.
        if err.chain().any(|cause| cause.downcast_ref::<hrvst_core::credentials::StoreError>().is_some()) {
            assert!(format!("{:#}", err).starts_with("Failed to open credential store (bogus)"));
        }
    }

    #[test]
    fn test_active_email_is_normalized() {
        let ctx = context(Config {
            email: Some(" Me@Example.com ".to_string()),
            ..Default::default()
        });
        assert_eq!(ctx.active_email().unwrap(), "me@example.com");
        assert!(context(Config::default()).active_email().is_err());
    }

    #[tokio::test]
    async fn test_stored_pat_is_served_without_refresh() {
        let ctx = context(Config {
            email: Some("me@example.com".to_string()),
            client: Some(PAT_CLIENT.to_string()),
            ..Default::default()
        });
        ctx.store.set(PAT_CLIENT, "me@example.com", 42, "pat-token", &[]).unwrap();

        let cache = AccessTokenCache::new(
            ctx.store.clone(),
            Arc::new(OAuthClient::new(ctx.api().unwrap(), "", "")),
            PAT_CLIENT,
            "me@example.com",
        )
        .unwrap();
        let access = Access::Cached(cache).current().await.unwrap();
        assert_eq!(access.access_token, "pat-token");
        assert_eq!(access.account_id, 42);
    }
}
