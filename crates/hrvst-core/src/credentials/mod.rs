//! Persistent credential storage.
//!
//! This module provides:
//! - `CredentialStore`: refresh tokens keyed by (client, email)
//! - `SecretBackend`: the storage engine contract, with native keyring,
//!   plaintext file and in-memory implementations
//! - `select_backend`: the policy deciding which engine a host gets
//!
//! Keys look like `token:<client>:<email>`; the older `token:<email>` form
//! is still read and belongs to the default client.

pub mod backend;
pub mod error;
pub mod file;
pub mod native;
pub mod policy;
pub mod store;

pub use backend::{MemoryBackend, SecretBackend, TimeoutBackend};
pub use error::StoreError;
pub use file::FileBackend;
pub use native::KeyringBackend;
pub use policy::{
    is_locked_message, open_backend, select_backend, BackendChoice, BackendKind, HostEnv,
    NativeVault,
};
pub use store::{
    decode_key, encode_key, normalize_client, normalize_email, CredentialStore, TokenRecord,
    DEFAULT_CLIENT, PAT_CLIENT,
};
