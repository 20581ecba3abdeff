use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin not found: {name}")]
    NotFound { name: String },

    #[error("Plugin '{name}' is already being installed")]
    AlreadyInstalling { name: String },

    #[error("Sync failed for {context}: {cause}")]
    SyncFailed { context: String, cause: String },

    #[error("Failed to persist plugin snapshot {path}: {source}")]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Duplicate plugin in catalog: {name}")]
    DuplicatePlugin { name: String },

    #[error("Failed to parse catalog {path}: {message}")]
    CatalogParse { path: PathBuf, message: String },

    #[error("Failed to parse plugin snapshot {path}: {message}")]
    SnapshotParse { path: PathBuf, message: String },

    #[error("Failed to parse config {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Unknown config key: {key}")]
    ConfigKeyNotFound { key: String },

    #[error("Invalid config value for {key}: {value}")]
    InvalidConfigValue { key: String, value: String },

    #[error("Home directory not found")]
    HomeNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;

impl PluginError {
    pub(crate) fn sync_failed(context: impl Into<String>, cause: impl ToString) -> Self {
        Self::SyncFailed {
            context: context.into(),
            cause: cause.to_string(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 2,
            Self::SyncFailed { .. } => 3,
            Self::AlreadyInstalling { .. } => 4,
            Self::PersistenceFailure { .. } | Self::SnapshotParse { .. } => 5,
            Self::ConfigParse { .. } | Self::CatalogParse { .. } | Self::DuplicatePlugin { .. } => 6,
            _ => 1,
        }
    }
}
