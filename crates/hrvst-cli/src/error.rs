use hrvst_core::credentials::StoreError;
use hrvst_core::AuthError;

/// Print `err` plus a hint for the failures users can fix themselves, then exit.
pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("Error: {:#}", err);

    if let Some(hint) = suggestion(&err) {
        eprintln!("\n{}", hint);
    }

    std::process::exit(1);
}

fn suggestion(err: &anyhow::Error) -> Option<&'static str> {
    if is_store_locked(err) {
        return Some(
            "Your keyring is locked. Unlock it (for example by logging in to your desktop \
session or running `gnome-keyring-daemon --unlock`), or use the file backend with \
`--keyring-backend file`.",
        );
    }
    if is_not_authenticated(err) {
        return Some("Run `hrvst login` first.");
    }
    None
}

fn is_store_locked(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<AuthError>()
            .is_some_and(AuthError::is_store_locked)
            || cause.downcast_ref::<StoreError>().is_some_and(StoreError::is_locked)
    })
}

fn is_not_authenticated(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<AuthError>()
            .is_some_and(AuthError::is_not_authenticated)
            || cause
                .downcast_ref::<StoreError>()
                .is_some_and(StoreError::is_not_authenticated)
    })
}
