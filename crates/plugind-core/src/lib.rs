pub mod config;
pub mod error;
pub mod plugin;

pub use config::Config;
pub use error::{PluginError, Result};
pub use plugin::{
    load_catalog, CatalogEntry, EventBus, FailurePolicy, GitCli, GitSyncEngine, InstallOutcome,
    Plugin, PluginLifecycleService, PluginRepository, PluginStatus, PluginStatusChangeEvent,
    Subscription, SubscriptionId, SyncOutcome, VersionControl,
};
