//! Secure credential storage.
//!
//! Secrets are never persisted with the network catalogue. The catalogue only
//! holds an opaque [`CredentialRef`]; the secret lives in a
//! [`CredentialStore`] such as the OS keychain.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque handle naming one stored secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(String);

impl CredentialRef {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from credential storage.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Platform store refused or failed the operation.
    #[error("credential storage error: {0}")]
    Storage(String),

    /// Handle could not be mapped onto the platform store.
    #[error("invalid credential reference '{0}'")]
    InvalidRef(String),
}

/// Get / set / delete secrets by handle.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when nothing is stored under `cred_ref`.
    fn get(&self, cred_ref: &CredentialRef) -> Result<Option<String>, CredentialError>;

    fn set(&self, cred_ref: &CredentialRef, secret: &str) -> Result<(), CredentialError>;

    /// Deleting a missing secret is not an error.
    fn delete(&self, cred_ref: &CredentialRef) -> Result<(), CredentialError>;
}

/// OS keychain / kernel keyring backed store.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    /// All entries are filed under `service`, keyed by the handle.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, cred_ref: &CredentialRef) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(&self.service, cred_ref.as_str()).map_err(|e| match e {
            keyring::Error::Invalid(..) | keyring::Error::TooLong(..) => {
                CredentialError::InvalidRef(cred_ref.to_string())
            }
            other => CredentialError::Storage(other.to_string()),
        })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, cred_ref: &CredentialRef) -> Result<Option<String>, CredentialError> {
        match self.entry(cred_ref)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::Storage(e.to_string())),
        }
    }

    fn set(&self, cred_ref: &CredentialRef, secret: &str) -> Result<(), CredentialError> {
        self.entry(cred_ref)?
            .set_password(secret)
            .map_err(|e| CredentialError::Storage(e.to_string()))
    }

    fn delete(&self, cred_ref: &CredentialRef) -> Result<(), CredentialError> {
        match self.entry(cred_ref)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Storage(e.to_string())),
        }
    }
}

/// In-memory credential store with write-failure injection.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<CredentialRef, String>>,
    fail_writes: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().expect("credential mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<(), CredentialError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(CredentialError::Storage("write failure injected".to_string()))
        } else {
            Ok(())
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, cred_ref: &CredentialRef) -> Result<Option<String>, CredentialError> {
        let secrets = self.secrets.lock().expect("credential mutex poisoned");
        Ok(secrets.get(cred_ref).cloned())
    }

    fn set(&self, cred_ref: &CredentialRef, secret: &str) -> Result<(), CredentialError> {
        self.check_writable()?;
        let mut secrets = self.secrets.lock().expect("credential mutex poisoned");
        secrets.insert(cred_ref.clone(), secret.to_string());
        Ok(())
    }

    fn delete(&self, cred_ref: &CredentialRef) -> Result<(), CredentialError> {
        self.check_writable()?;
        let mut secrets = self.secrets.lock().expect("credential mutex poisoned");
        secrets.remove(cred_ref);
        Ok(())
    }
}
