//! Authentication: interactive OAuth login, personal access tokens and the
//! in-memory access token cache.
//!
//! This module provides:
//! - `Authorizer`: browser and manual authorization-code flows
//! - `CallbackServer`: the localhost responder the browser redirects to
//! - `AccessTokenCache`: refreshes access tokens from stored refresh tokens
//! - `PersonalAccessToken`: the non-interactive alternative

pub mod browser;
pub mod callback;
pub mod flow;
pub mod pat;
pub mod session;

pub use browser::{browser_command, BrowserLauncher, SystemBrowser};
pub use callback::{parse_query, parse_redirect_input, redirect_uri, CallbackParams, CallbackServer, CALLBACK_PATH};
pub use flow::{
    build_authorize_url, generate_state, save_login, select_account, Authorizer, LoginOutcome,
    OAuthConfig, DEFAULT_CALLBACK_PORT, DEFAULT_LOGIN_TIMEOUT,
};
pub use pat::{PersonalAccessToken, ACCESS_TOKEN_ENV, ACCOUNT_ID_ENV};
pub use session::{AccessTokenCache, CachedAccess};
