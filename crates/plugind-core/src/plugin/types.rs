//! Plugin type definitions
//!
//! Records shared by the repository, the sync engine and the lifecycle service.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Install status of a plugin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginStatus {
    /// Known but not installed, or install cancelled
    #[default]
    Pending,
    /// Install task running
    Installing,
    /// Working copy materialized at `tag`
    Installed,
    /// Last install failed and the failure policy is sticky
    Error,
}

impl PluginStatus {
    /// Whether this status ends an install cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Installed | Self::Error)
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Installing => write!(f, "INSTALLING"),
            Self::Installed => write!(f, "INSTALLED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// A git-backed plugin tracked by the repository
///
/// Unknown fields in a stored snapshot are dropped on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    /// Unique name, immutable after creation
    pub name: String,
    /// Remote git URL (or local path) the plugin is fetched from
    pub details: String,
    /// Installed version, `None` until the first successful install
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub status: PluginStatus,
    /// Cancellation request for an in-flight or upcoming install
    #[serde(default)]
    pub stopped: bool,
}

impl Plugin {
    pub fn new(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            details: details.into(),
            tag: None,
            status: PluginStatus::Pending,
            stopped: false,
        }
    }

    /// Mark as installed at `tag`
    pub(crate) fn mark_installed(&mut self, tag: String) {
        self.tag = Some(tag);
        self.status = PluginStatus::Installed;
        self.stopped = false;
    }

    /// Return to `PENDING`, clearing any cancellation request
    pub(crate) fn mark_pending(&mut self) {
        self.status = PluginStatus::Pending;
        self.stopped = false;
    }
}

/// Entry of the bootstrap catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub details: String,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            details: details.into(),
        }
    }
}

impl From<CatalogEntry> for Plugin {
    fn from(entry: CatalogEntry) -> Self {
        Plugin::new(entry.name, entry.details)
    }
}

/// Published once per status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStatusChangeEvent {
    pub plugin_name: String,
    pub status: PluginStatus,
    pub timestamp: DateTime<Utc>,
}

impl PluginStatusChangeEvent {
    pub fn new(plugin_name: impl Into<String>, status: PluginStatus) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Status an install lands in when sync fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Sticky `ERROR`, cleared by a new install or `reset`
    #[default]
    Error,
    /// Back to `PENDING`, retryable like a cancelled install
    Pending,
}

impl FailurePolicy {
    pub fn status(&self) -> PluginStatus {
        match self {
            Self::Error => PluginStatus::Error,
            Self::Pending => PluginStatus::Pending,
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "pending" => Ok(Self::Pending),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

/// What a background or synchronous install ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { tag: String },
    Cancelled,
}
