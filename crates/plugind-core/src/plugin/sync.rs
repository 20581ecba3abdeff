//! Git sync engine
//!
//! Keeps one bare mirror per plugin and materializes the working copy at the
//! latest tag.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{PluginError, Result};
use crate::plugin::git::VersionControl;
use crate::plugin::types::Plugin;

/// Tag recorded for a plugin whose remote has no tags
pub const UNTAGGED_REVISION: &str = "HEAD";

/// Result of a sync that may be cancelled between blocking steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced(String),
    Cancelled,
}

/// Git sync engine - mirror, resolve, materialize
pub struct GitSyncEngine {
    vcs: Arc<dyn VersionControl>,
    /// Working copies (`<plugins_dir>/<name>`)
    plugins_dir: PathBuf,
    /// Bare mirrors (`<mirrors_dir>/<name>.git`)
    mirrors_dir: PathBuf,
}

impl GitSyncEngine {
    pub fn new(vcs: Arc<dyn VersionControl>, plugins_dir: PathBuf, mirrors_dir: PathBuf) -> Self {
        Self {
            vcs,
            plugins_dir,
            mirrors_dir,
        }
    }

    /// Working copy path of a plugin
    pub fn workspace_path(&self, name: &str) -> PathBuf {
        self.plugins_dir.join(name)
    }

    /// Mirror path of a plugin
    pub fn mirror_path(&self, name: &str) -> PathBuf {
        self.mirrors_dir.join(format!("{}.git", name))
    }

    /// Bring the plugin's working copy to the latest upstream tag and return it
    pub fn sync(&self, plugin: &Plugin) -> Result<String> {
        match self.sync_until(plugin, || Ok(false))? {
            SyncOutcome::Synced(tag) => Ok(tag),
            SyncOutcome::Cancelled => Err(PluginError::sync_failed(&plugin.name, "cancelled")),
        }
    }

    /// `sync` with `cancelled` checked before and after every blocking git call
    pub fn sync_until<C>(&self, plugin: &Plugin, cancelled: C) -> Result<SyncOutcome>
    where
        C: Fn() -> Result<bool>,
    {
        let mirror = self.mirror_path(&plugin.name);
        let workspace = self.workspace_path(&plugin.name);

        if cancelled()? {
            return Ok(SyncOutcome::Cancelled);
        }
        self.vcs.ensure_mirror(&plugin.details, &mirror)?;
        if cancelled()? {
            return Ok(SyncOutcome::Cancelled);
        }

        let latest = self.vcs.latest_tag(&mirror)?;
        let tag = latest
            .clone()
            .unwrap_or_else(|| UNTAGGED_REVISION.to_string());

        if !needs_materialize(plugin, latest.as_deref(), &workspace) {
            debug!(plugin = %plugin.name, tag = %tag, "workspace already at latest tag");
            return Ok(SyncOutcome::Synced(tag));
        }

        if cancelled()? {
            return Ok(SyncOutcome::Cancelled);
        }
        self.vcs
            .materialize(&mirror, latest.as_deref(), &workspace)?;
        info!(
            plugin = %plugin.name,
            tag = %tag,
            workspace = %workspace.display(),
            "workspace materialized"
        );

        if cancelled()? {
            return Ok(SyncOutcome::Cancelled);
        }
        Ok(SyncOutcome::Synced(tag))
    }
}

fn needs_materialize(plugin: &Plugin, latest: Option<&str>, workspace: &Path) -> bool {
    match latest {
        // Untagged remotes follow the default branch, which may have moved.
        None => true,
        Some(tag) => plugin.tag.as_deref() != Some(tag) || !workspace.is_dir(),
    }
}
