//! hrvst - log in to Harvest from the command line.
//!
//! Stores a refresh token (or personal access token) in the OS keyring and
//! prints short-lived access tokens on demand.

mod cli;
mod commands;
mod error;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};
use commands::AppContext;
use hrvst_core::Config;

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // RUST_LOG controls the level, e.g. RUST_LOG=hrvst_core=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?.with_env();
    let mut ctx = AppContext::open(config, cli.keyring_backend.as_deref())?;

    match cli.command {
        Commands::Login(args) => commands::login(&mut ctx, args).await,
        Commands::Logout(args) => commands::logout(&mut ctx, args),
        Commands::Status => commands::status(&ctx),
        Commands::Token => commands::token(&ctx).await,
        Commands::Whoami => commands::whoami(&ctx).await,
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();
    debug!(version = env!("CARGO_PKG_VERSION"), "hrvst starting");

    if let Err(err) = run(cli).await {
        error::handle_error(err);
    }
}
