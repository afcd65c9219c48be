//! Backup network records.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::storage::{CredentialError, CredentialRef, StoreError};

/// One alternate network profile failover may switch to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupNetwork {
    pub id: Uuid,
    pub name: String,
    /// Higher ranks are tried first.
    pub priority_rank: i32,
    pub secure: bool,
    /// Handle of the stored secret; `None` for open networks.
    pub credential_ref: Option<CredentialRef>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl BackupNetwork {
    /// Handle the secret of network `id` is stored under.
    pub fn credential_ref_for(id: &Uuid) -> CredentialRef {
        CredentialRef::new(format!("network.{id}"))
    }
}

/// Catalogue order: rank descending, then oldest first.
pub fn sort_networks(networks: &mut [BackupNetwork]) {
    networks.sort_by(|a, b| {
        b.priority_rank
            .cmp(&a.priority_rank)
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[derive(Debug, Error)]
pub enum NetworkStoreError {
    #[error("backup network {0} not found")]
    NotFound(Uuid),

    #[error("network name must not be empty")]
    InvalidName,

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}
