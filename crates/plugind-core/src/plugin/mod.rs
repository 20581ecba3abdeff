//! Plugin Module
//!
//! Lifecycle management for git-backed CI plugins.
//!
//! - `repository`: persisted name -> Plugin store
//! - `git`: version control gateway (`VersionControl`, `GitCli`)
//! - `sync`: mirror / tag / materialize engine
//! - `service`: state machine, background installs, cancellation
//! - `events`: status-change publish/subscribe

pub mod catalog;
pub mod events;
pub mod git;
pub mod repository;
pub mod service;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

// Re-exports
pub use catalog::{load_catalog, CATALOG_FILE};
pub use events::{EventBus, Subscription, SubscriptionId};
pub use git::{GitCli, VersionControl};
pub use repository::{PluginRepository, SNAPSHOT_FILE};
pub use service::PluginLifecycleService;
pub use sync::{GitSyncEngine, SyncOutcome, UNTAGGED_REVISION};
pub use types::{
    CatalogEntry, FailurePolicy, InstallOutcome, Plugin, PluginStatus, PluginStatusChangeEvent,
};
