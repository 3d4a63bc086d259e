//! HTTP clients for the Harvest ID service.
//!
//! This module provides:
//! - `ApiClient`: shared reqwest client plus the endpoint URLs
//! - `TokenEndpoint` / `OAuthClient`: authorization-code and refresh grants
//! - `AccountDirectory`: "who am I and which accounts can I use"
//!
//! Endpoint URLs are passed in through `Endpoints` so tests can point the
//! clients at a local mock server.

pub mod client;
pub mod directory;
pub mod error;
pub mod oauth;

pub use client::{ApiClient, Endpoints, AUTHORIZE_URL};
pub use directory::{filter_accounts, AccountDirectory, HARVEST_PRODUCT};
pub use error::ApiError;
pub use oauth::{OAuthClient, TokenEndpoint};
