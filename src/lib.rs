//! Connectivity-aware call dispatch with automatic network failover.

pub mod admin;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod dispatch;
pub mod events;
pub mod failover;
pub mod lifecycle;
pub mod networks;
pub mod observability;
pub mod resilience;
pub mod storage;
pub mod transport;

pub use config::LinkguardConfig;
pub use connectivity::ConnectivityMonitor;
pub use dispatch::ResilientDispatcher;
pub use failover::FailoverCoordinator;
pub use lifecycle::{Services, Shutdown};
pub use networks::BackupNetworkStore;
