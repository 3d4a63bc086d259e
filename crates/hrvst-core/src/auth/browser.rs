use std::process::{Command, Stdio};

use crate::credentials::policy::LINUX_FAMILY;
use crate::error::AuthError;

/// Something that can show the user a URL.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), AuthError>;
}

/// Opens URLs with the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), AuthError> {
        browser_command(std::env::consts::OS, url)?
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(AuthError::BrowserLaunch)?;
        Ok(())
    }
}

/// The command that opens `url` on `os`.
pub fn browser_command(os: &str, url: &str) -> Result<Command, AuthError> {
    let mut cmd = match os {
        "macos" => Command::new("open"),
        "windows" => {
            // explorer.exe misreads some URLs as paths
            let mut cmd = Command::new("rundll32");
            cmd.arg("url.dll,FileProtocolHandler");
            cmd
        }
        os if LINUX_FAMILY.contains(&os) => Command::new("xdg-open"),
        other => return Err(AuthError::UnsupportedPlatform(other.to_string())),
    };
    cmd.arg(url);
    Ok(cmd)
}
