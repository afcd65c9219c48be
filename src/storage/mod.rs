//! Durable storage subsystem.
//!
//! # Data Flow
//! ```text
//! BackupNetworkStore ──records──▶ kv.rs (KeyValueStore, key "backup_networks")
//!         └────────────secrets──▶ credentials.rs (CredentialStore, opaque refs)
//! ResilientDispatcher ─snapshot─▶ kv.rs (KeyValueStore, key "dispatch_queue")
//! ```
//!
//! # Design Decisions
//! - Values are self-describing JSON lists, written whole on every change
//! - File writes are atomic (temp file + rename)
//! - Secrets never touch the key-value store

pub mod credentials;
pub mod kv;

use std::path::Path;

use thiserror::Error;

pub use credentials::{
    CredentialError, CredentialRef, CredentialStore, KeyringCredentialStore, MemoryCredentialStore,
};
pub use kv::{FileStore, KeyValueStore, MemoryStore};

/// Errors from durable key-value persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("corrupt value under '{key}': {message}")]
    Corrupt { key: String, message: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
