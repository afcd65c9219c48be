//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LinkguardConfig (validated, immutable)
//!     → sections handed to subsystems at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → failover / dispatcher policy swapped via ArcSwap
//! ```
//!
//! # Design Decisions
//! - Only policy sections are hot-reloaded; storage, admin and source
//!   settings need a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AttachmentConfig, DispatcherConfig, FailoverConfig, LinkguardConfig,
    MonitorConfig, ObservabilityConfig, PrimaryAttachment, ProbeConfig, SourceConfig,
    StorageConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;
