//! Core library for hrvst: Harvest authentication, credential storage and
//! the HTTP clients they need.

pub mod api;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod models;

pub use config::{Config, ConfigError};
pub use error::AuthError;
