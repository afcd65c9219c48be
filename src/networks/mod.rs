//! Backup network catalogue.
//!
//! # Data Flow
//! ```text
//! admin API / embedder
//!     → store.rs (upsert by trimmed name, rank order)
//!         ├─ secret → CredentialStore (handle "network.<id>")
//!         └─ records → KeyValueStore ("backup_networks")
//!     → FailoverCoordinator reads list() in order
//! ```

pub mod store;
pub mod types;

pub use store::{BackupNetworkStore, NETWORKS_KEY};
pub use types::{sort_networks, BackupNetwork, NetworkStoreError};
