//! Data models for Harvest identity responses.
//!
//! This module contains the data structures returned by the Harvest ID
//! service and the OAuth2 token endpoint:
//!
//! - `User`, `Account`, `AccountsResponse`: who is logged in and which
//!   Harvest/Forecast accounts they can reach
//! - `TokenSet`: access/refresh credentials minted by the token endpoint

pub mod account;
pub mod token;

pub use account::{Account, AccountsResponse, User};
pub use token::TokenSet;
