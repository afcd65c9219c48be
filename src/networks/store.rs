//! Durable, priority-ordered backup network catalogue.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::clock::now_ms;
use crate::networks::types::{sort_networks, BackupNetwork, NetworkStoreError};
use crate::storage::{CredentialRef, CredentialStore, KeyValueStore, StoreError};

/// Storage key holding the JSON record list.
pub const NETWORKS_KEY: &str = "backup_networks";

/// Catalogue of backup networks.
///
/// Record and credential writes are transactional: the credential is written
/// first, and a failed record write restores the previous credential. The
/// in-memory list changes only after both writes succeed.
pub struct BackupNetworkStore {
    kv: Arc<dyn KeyValueStore>,
    credentials: Arc<dyn CredentialStore>,
    records: RwLock<Vec<BackupNetwork>>,
}

impl BackupNetworkStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            kv,
            credentials,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Restore the catalogue from durable storage. A missing key is an empty
    /// catalogue.
    pub fn load(&self) -> Result<usize, NetworkStoreError> {
        let mut loaded: Vec<BackupNetwork> = match self.kv.get(NETWORKS_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                key: NETWORKS_KEY.to_string(),
                message: e.to_string(),
            })?,
            None => Vec::new(),
        };
        sort_networks(&mut loaded);

        let count = loaded.len();
        *self.records.write().expect("network store lock poisoned") = loaded;
        tracing::info!(count, "Loaded backup networks");
        Ok(count)
    }

    /// Insert or replace the network called `name` (trimmed).
    ///
    /// Re-adding keeps the existing id and creation time. A non-empty
    /// `secret` makes the record secure; re-adding without one makes it open
    /// and deletes the stored secret.
    pub fn add(
        &self,
        name: &str,
        secret: Option<&str>,
        priority_rank: i32,
    ) -> Result<BackupNetwork, NetworkStoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(NetworkStoreError::InvalidName);
        }
        let secret = secret.filter(|s| !s.is_empty());

        let mut records = self.records.write().expect("network store lock poisoned");
        let existing = records.iter().find(|n| n.name == name).cloned();

        let id = existing.as_ref().map(|n| n.id).unwrap_or_else(Uuid::new_v4);
        let created_at = existing.as_ref().map(|n| n.created_at).unwrap_or_else(now_ms);
        let cred_ref = BackupNetwork::credential_ref_for(&id);

        let record = BackupNetwork {
            id,
            name: name.to_string(),
            priority_rank,
            secure: secret.is_some(),
            credential_ref: secret.map(|_| cred_ref.clone()),
            created_at,
        };

        // Remember what the credential slot held so it can be put back.
        let had_credential = existing.as_ref().is_some_and(|n| n.secure);
        let previous_secret = if had_credential {
            self.credentials.get(&cred_ref)?
        } else {
            None
        };

        match secret {
            Some(secret) => self.credentials.set(&cred_ref, secret)?,
            None if had_credential => self.credentials.delete(&cred_ref)?,
            None => {}
        }

        let mut next: Vec<BackupNetwork> = records.iter().filter(|n| n.id != id).cloned().collect();
        next.push(record.clone());
        sort_networks(&mut next);

        if let Err(e) = self.persist(&next) {
            self.restore_credential(&cred_ref, previous_secret.as_deref());
            return Err(e);
        }

        *records = next;
        tracing::info!(
            network_id = %id,
            name,
            priority_rank,
            secure = record.secure,
            replaced = existing.is_some(),
            "Saved backup network"
        );
        Ok(record)
    }

    /// Delete a network and its stored secret.
    pub fn remove(&self, id: &Uuid) -> Result<BackupNetwork, NetworkStoreError> {
        let mut records = self.records.write().expect("network store lock poisoned");
        let record = records
            .iter()
            .find(|n| n.id == *id)
            .cloned()
            .ok_or(NetworkStoreError::NotFound(*id))?;

        let previous_secret = match &record.credential_ref {
            Some(cred_ref) => {
                let secret = self.credentials.get(cred_ref)?;
                self.credentials.delete(cred_ref)?;
                secret
            }
            None => None,
        };

        let next: Vec<BackupNetwork> = records.iter().filter(|n| n.id != *id).cloned().collect();
        if let Err(e) = self.persist(&next) {
            if let Some(cred_ref) = &record.credential_ref {
                self.restore_credential(cred_ref, previous_secret.as_deref());
            }
            return Err(e);
        }

        *records = next;
        tracing::info!(network_id = %id, name = %record.name, "Removed backup network");
        Ok(record)
    }

    /// Change the rank of one network and re-sort.
    pub fn update_priority(
        &self,
        id: &Uuid,
        priority_rank: i32,
    ) -> Result<BackupNetwork, NetworkStoreError> {
        let mut records = self.records.write().expect("network store lock poisoned");
        let mut next = records.clone();
        let record = next
            .iter_mut()
            .find(|n| n.id == *id)
            .ok_or(NetworkStoreError::NotFound(*id))?;
        record.priority_rank = priority_rank;
        let updated = record.clone();
        sort_networks(&mut next);

        self.persist(&next)?;
        *records = next;
        tracing::info!(network_id = %id, priority_rank, "Updated backup network priority");
        Ok(updated)
    }

    /// All networks in failover order.
    pub fn list(&self) -> Vec<BackupNetwork> {
        self.records.read().expect("network store lock poisoned").clone()
    }

    pub fn get(&self, id: &Uuid) -> Option<BackupNetwork> {
        self.records
            .read()
            .expect("network store lock poisoned")
            .iter()
            .find(|n| n.id == *id)
            .cloned()
    }

    /// Stored secret of `network`, `None` for open networks.
    pub fn credential(&self, network: &BackupNetwork) -> Result<Option<String>, NetworkStoreError> {
        match &network.credential_ref {
            Some(cred_ref) => Ok(self.credentials.get(cred_ref)?),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("network store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, records: &[BackupNetwork]) -> Result<(), NetworkStoreError> {
        let bytes = serde_json::to_vec(records).map_err(|e| StoreError::Corrupt {
            key: NETWORKS_KEY.to_string(),
            message: e.to_string(),
        })?;
        self.kv.set(NETWORKS_KEY, &bytes)?;
        Ok(())
    }

    fn restore_credential(&self, cred_ref: &CredentialRef, previous: Option<&str>) {
        let restored = match previous {
            Some(secret) => self.credentials.set(cred_ref, secret),
            None => self.credentials.delete(cred_ref),
        };
        if let Err(e) = restored {
            tracing::error!(
                credential_ref = %cred_ref,
                error = %e,
                "Failed to roll back credential after record write failure"
            );
        }
    }
}

impl std::fmt::Debug for BackupNetworkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupNetworkStore")
            .field("networks", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryCredentialStore, MemoryStore};

    struct Fixture {
        kv: Arc<MemoryStore>,
        creds: Arc<MemoryCredentialStore>,
        store: BackupNetworkStore,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryStore::new());
        let creds = Arc::new(MemoryCredentialStore::new());
        let store = BackupNetworkStore::new(kv.clone(), creds.clone());
        Fixture { kv, creds, store }
    }

    #[test]
    fn test_upsert_by_name_keeps_identity() {
        let f = fixture();
        let first = f.store.add("Home", Some("secretA"), 3).unwrap();
        let second = f.store.add("  Home ", Some("secretB"), 5).unwrap();

        let list = f.store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(list[0].priority_rank, 5);
        assert_eq!(f.store.credential(&list[0]).unwrap().as_deref(), Some("secretB"));
    }

    #[test]
    fn test_readd_without_secret_makes_open() {
        let f = fixture();
        f.store.add("Cafe", Some("latte"), 1).unwrap();
        let open = f.store.add("Cafe", None, 1).unwrap();

        assert!(!open.secure);
        assert!(open.credential_ref.is_none());
        assert!(f.creds.is_empty());
    }

    #[test]
    fn test_empty_secret_is_open() {
        let f = fixture();
        let net = f.store.add("Guest", Some(""), 0).unwrap();
        assert!(!net.secure);
        assert!(f.creds.is_empty());
    }

    #[test]
    fn test_invalid_name() {
        let f = fixture();
        assert!(matches!(f.store.add("   ", None, 1), Err(NetworkStoreError::InvalidName)));
    }

    #[test]
    fn test_failed_record_write_leaves_no_credential() {
        let f = fixture();
        f.kv.fail_writes(true);

        let err = f.store.add("Office", Some("pw"), 2).unwrap_err();
        assert!(matches!(err, NetworkStoreError::Storage(_)));
        assert!(f.creds.is_empty());
        assert!(f.store.is_empty());
    }

    #[test]
    fn test_failed_record_write_restores_previous_secret() {
        let f = fixture();
        let net = f.store.add("Office", Some("old"), 2).unwrap();
        f.kv.fail_writes(true);

        assert!(f.store.add("Office", Some("new"), 9).is_err());
        assert!(f.store.add("Office", None, 9).is_err());
        assert!(f.store.remove(&net.id).is_err());

        let kept = f.store.get(&net.id).unwrap();
        assert_eq!(kept.priority_rank, 2);
        assert_eq!(f.store.credential(&kept).unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn test_failed_credential_write_changes_nothing() {
        let f = fixture();
        f.creds.fail_writes(true);
        assert!(matches!(
            f.store.add("Office", Some("pw"), 2),
            Err(NetworkStoreError::Credential(_))
        ));
        assert!(f.store.is_empty());
        assert!(f.kv.get(NETWORKS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_remove_and_priority() {
        let f = fixture();
        let a = f.store.add("A", None, 1).unwrap();
        let b = f.store.add("B", Some("pw"), 2).unwrap();

        let names: Vec<_> = f.store.list().into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["B", "A"]);

        f.store.update_priority(&a.id, 10).unwrap();
        let names: Vec<_> = f.store.list().into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["A", "B"]);

        f.store.remove(&b.id).unwrap();
        assert!(f.creds.is_empty());
        assert!(matches!(f.store.remove(&b.id), Err(NetworkStoreError::NotFound(_))));
        assert!(matches!(
            f.store.update_priority(&b.id, 1),
            Err(NetworkStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_reload_restores_order() {
        let f = fixture();
        f.store.add("Low", None, 1).unwrap();
        f.store.add("High", Some("pw"), 7).unwrap();

        let reopened = BackupNetworkStore::new(f.kv.clone(), f.creds.clone());
        assert_eq!(reopened.load().unwrap(), 2);
        assert_eq!(reopened.list(), f.store.list());
    }

    #[test]
    fn test_corrupt_catalogue_is_an_error() {
        let f = fixture();
        f.kv.set(NETWORKS_KEY, b"{oops").unwrap();
        assert!(matches!(
            f.store.load(),
            Err(NetworkStoreError::Storage(StoreError::Corrupt { .. }))
        ));
    }
}
