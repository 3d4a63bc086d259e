use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "hrvst")]
#[command(version, about = "Log in to Harvest and mint access tokens")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Secret storage: auto, file, keychain, wincred or secret-service
    #[arg(long, global = true, env = "HRVST_KEYRING_BACKEND")]
    pub keyring_backend: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authorize hrvst with your Harvest account
    Login(LoginArgs),

    /// Remove a stored login
    Logout(LogoutArgs),

    /// List stored logins
    Status,

    /// Print a fresh access token
    Token,

    /// Show the user behind the active login
    Whoami,
}

#[derive(Args, Debug, Default)]
pub struct LoginArgs {
    /// Paste the redirect URL instead of using a local callback
    #[arg(long, conflicts_with = "pat")]
    pub manual: bool,

    /// Show the consent screen again (use when no refresh token comes back)
    #[arg(long, conflicts_with = "pat")]
    pub force_consent: bool,

    /// Use a personal access token instead of OAuth
    #[arg(long)]
    pub pat: bool,

    /// Name to file this login under
    #[arg(long)]
    pub client: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct LogoutArgs {
    /// Email of the login to remove (defaults to the active login)
    #[arg(long)]
    pub email: Option<String>,

    /// Client the login is filed under
    #[arg(long)]
    pub client: Option<String>,
}
