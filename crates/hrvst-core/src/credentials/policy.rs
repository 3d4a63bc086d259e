use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{FileBackend, KeyringBackend, SecretBackend, StoreError, TimeoutBackend};

/// Upper bound for a single Secret Service call.
/// Long enough for an unlock prompt, short enough that a dead D-Bus agent
/// does not hang the CLI.
pub const SECRET_SERVICE_TIMEOUT: Duration = Duration::from_secs(15);

/// Environment variable announcing a D-Bus session bus
const SESSION_BUS_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";

/// Operating systems where the Secret Service is the native vault
pub const LINUX_FAMILY: &[&str] = &["linux", "freebsd", "openbsd", "netbsd", "dragonfly"];

/// Error text the various vaults use when they need to be unlocked first.
const LOCKED_PHRASES: &[&str] = &[
    "is locked",
    "locked collection",
    "keyring is locked",
    "needs to be unlocked",
    "unlock the keyring",
    "prompt dismissed",
    "prompt was dismissed",
    "user interaction is not allowed",
    "interaction not allowed",
    "no unlock",
];

/// OS-native secret vaults hrvst knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeVault {
    Keychain,
    WinCred,
    SecretService,
}

impl NativeVault {
    pub fn name(&self) -> &'static str {
        match self {
            NativeVault::Keychain => "keychain",
            NativeVault::WinCred => "wincred",
            NativeVault::SecretService => "secret-service",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "keychain" => Some(NativeVault::Keychain),
            "wincred" => Some(NativeVault::WinCred),
            "secret-service" => Some(NativeVault::SecretService),
            _ => None,
        }
    }

    /// The vault a host OS ships with, if any.
    pub fn for_os(os: &str) -> Option<Self> {
        match os {
            "macos" | "ios" => Some(NativeVault::Keychain),
            "windows" => Some(NativeVault::WinCred),
            os if LINUX_FAMILY.contains(&os) => Some(NativeVault::SecretService),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Native(NativeVault),
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::File => "file",
            BackendKind::Native(vault) => vault.name(),
        }
    }
}

/// Outcome of the backend selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendChoice {
    pub kind: BackendKind,
    /// Per-operation deadline, applied by wrapping the backend.
    pub timeout: Option<Duration>,
    /// True when `auto` fell back to the file backend because no secret
    /// bus was found.
    pub forced_file: bool,
}

/// The facts about the host the policy looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnv {
    pub os: String,
    pub secret_bus_address: Option<String>,
}

impl HostEnv {
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            secret_bus_address: std::env::var(SESSION_BUS_ENV)
                .ok()
                .filter(|addr| !addr.trim().is_empty()),
        }
    }

    pub fn is_linux_family(&self) -> bool {
        LINUX_FAMILY.contains(&self.os.as_str())
    }

    pub fn has_secret_bus(&self) -> bool {
        self.secret_bus_address.is_some()
    }
}

/// Decide which secret backend to use.
///
/// `""`/`"auto"` picks the host's native vault, except on Linux-family hosts
/// without a session bus, where the file backend is forced. Talking to the
/// Secret Service always gets a per-operation timeout. Explicit names are
/// honored as-is; anything else is a configuration error.
pub fn select_backend(requested: &str, host: &HostEnv) -> Result<BackendChoice, StoreError> {
    let requested = requested.trim().to_lowercase();

    let (kind, forced_file) = match requested.as_str() {
        "" | "auto" => {
            if host.is_linux_family() && !host.has_secret_bus() {
                (BackendKind::File, true)
            } else {
                match NativeVault::for_os(&host.os) {
                    Some(vault) => (BackendKind::Native(vault), false),
                    None => (BackendKind::File, false),
                }
            }
        }
        "file" => (BackendKind::File, false),
        other => match NativeVault::from_name(other) {
            Some(vault) => (BackendKind::Native(vault), false),
            None => return Err(StoreError::UnknownBackend(other.to_string())),
        },
    };

    let timeout = match kind {
        BackendKind::Native(NativeVault::SecretService)
            if host.is_linux_family() && host.has_secret_bus() =>
        {
            Some(SECRET_SERVICE_TIMEOUT)
        }
        _ => None,
    };

    Ok(BackendChoice {
        kind,
        timeout,
        forced_file,
    })
}

/// Build the backend a `BackendChoice` describes.
pub fn open_backend(
    choice: &BackendChoice,
    host: &HostEnv,
    file_path: PathBuf,
) -> Result<Box<dyn SecretBackend>, StoreError> {
    match choice.kind {
        BackendKind::File => {
            if choice.forced_file {
                info!(
                    path = %file_path.display(),
                    "No D-Bus session found; storing credentials in a private file"
                );
            }
            Ok(Box::new(FileBackend::new(file_path)))
        }
        BackendKind::Native(vault) => {
            if NativeVault::for_os(&host.os) != Some(vault) {
                return Err(StoreError::UnsupportedBackend {
                    backend: vault.name().to_string(),
                    os: host.os.clone(),
                });
            }
            let backend = KeyringBackend::new(vault.name());
            match choice.timeout {
                Some(timeout) => {
                    debug!(backend = vault.name(), timeout_ms = timeout.as_millis() as u64, "Using keyring with timeout");
                    Ok(Box::new(TimeoutBackend::new(Arc::new(backend), timeout)))
                }
                None => Ok(Box::new(backend)),
            }
        }
    }
}

/// Whether backend error text says the vault must be unlocked first.
pub fn is_locked_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    LOCKED_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(os: &str, bus: Option<&str>) -> HostEnv {
        HostEnv {
            os: os.to_string(),
            secret_bus_address: bus.map(String::from),
        }
    }

    #[test]
    fn test_auto_on_linux_without_bus_forces_file() {
        for requested in ["", "auto", " AUTO "] {
            let choice = select_backend(requested, &host("linux", None)).unwrap();
            assert_eq!(choice.kind, BackendKind::File);
            assert!(choice.forced_file);
            assert_eq!(choice.timeout, None);
        }
        let choice = select_backend("", &host("freebsd", None)).unwrap();
        assert!(choice.forced_file);
    }

    #[test]
    fn test_auto_on_linux_with_bus_uses_secret_service_with_timeout() {
        let choice =
            select_backend("auto", &host("linux", Some("unix:path=/run/user/1000/bus"))).unwrap();
        assert_eq!(choice.kind, BackendKind::Native(NativeVault::SecretService));
        assert!(!choice.forced_file);
        assert_eq!(choice.timeout, Some(SECRET_SERVICE_TIMEOUT));
    }

    #[test]
    fn test_non_linux_never_forces_file() {
        let choice = select_backend("", &host("macos", None)).unwrap();
        assert_eq!(choice.kind, BackendKind::Native(NativeVault::Keychain));
        assert!(!choice.forced_file);
        assert_eq!(choice.timeout, None);

        let choice = select_backend("auto", &host("windows", None)).unwrap();
        assert_eq!(choice.kind, BackendKind::Native(NativeVault::WinCred));
        assert!(!choice.forced_file);
    }

    #[test]
    fn test_explicit_names_are_honored() {
        let linux = host("linux", None);
        assert_eq!(select_backend("file", &linux).unwrap().kind, BackendKind::File);
        assert!(!select_backend("file", &linux).unwrap().forced_file);
        assert_eq!(
            select_backend("secret-service", &linux).unwrap().kind,
            BackendKind::Native(NativeVault::SecretService)
        );
        assert_eq!(
            select_backend("file", &host("macos", None)).unwrap().kind,
            BackendKind::File
        );
        assert_eq!(
            select_backend("Keychain", &host("macos", None)).unwrap().kind,
            BackendKind::Native(NativeVault::Keychain)
        );
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        let err = select_backend("pass", &host("linux", None)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownBackend(name) if name == "pass"));
    }

    #[test]
    fn test_open_native_for_other_os_fails() {
        let linux = host("linux", Some("unix:path=/tmp/bus"));
        let choice = select_backend("keychain", &linux).unwrap();
        let err = open_backend(&choice, &linux, PathBuf::from("/tmp/unused.json"))
            .err()
            .expect("keychain must be rejected on linux");
        assert!(matches!(err, StoreError::UnsupportedBackend { .. }));
    }

    #[test]
    fn test_open_file_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let linux = host("linux", None);
        let choice = select_backend("", &linux).unwrap();
        let backend = open_backend(&choice, &linux, dir.path().join("c.json")).unwrap();
        assert_eq!(backend.name(), "file");
    }

    #[test]
    fn test_is_locked_message() {
        assert!(is_locked_message("Cannot create an item in a locked collection"));
        assert!(is_locked_message("The keyring is locked"));
        assert!(is_locked_message("Prompt dismissed"));
        assert!(is_locked_message(
            "User interaction is not allowed. (errSecInteractionNotAllowed)"
        ));
        assert!(!is_locked_message("No matching entry found in secure storage"));
        assert!(!is_locked_message("connection refused"));
    }
}
