use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::error::{PluginError, Result};
use crate::plugin::{
    CatalogEntry, FailurePolicy, GitCli, GitSyncEngine, PluginLifecycleService, PluginRepository,
    SNAPSHOT_FILE,
};

const CONFIG_FILE: &str = "config.toml";
const BASE_DIR_NAME: &str = ".plugind";

/// Default config template with rich comments
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# plugind configuration file
# Location: ~/.plugind/config.toml

[workspace]
# Where plugin working copies are checked out (one directory per plugin)
# Default: <base_dir>/plugins
# plugins_dir = "/var/lib/plugind/plugins"

# Where bare git mirrors are kept (<name>.git per plugin)
# Default: <base_dir>/mirrors
# mirrors_dir = "/var/cache/plugind/mirrors"

# Plugin state snapshot, relative to the base directory
snapshot_file = "plugin_cache.json"

[install]
# Status after a failed install: "error" (sticky) or "pending" (retryable)
on_failure = "error"

[git]
# git executable
program = "git"
"#;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub git: GitConfig,
}

/// Workspace layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub plugins_dir: Option<PathBuf>,
    #[serde(default)]
    pub mirrors_dir: Option<PathBuf>,
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

fn default_snapshot_file() -> String {
    SNAPSHOT_FILE.to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            plugins_dir: None,
            mirrors_dir: None,
            snapshot_file: default_snapshot_file(),
        }
    }
}

/// Install behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

/// git adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_git_program")]
    pub program: String,
}

fn default_git_program() -> String {
    "git".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: default_git_program(),
        }
    }
}

impl Config {
    /// Default base directory (~/.plugind)
    pub fn default_base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(PluginError::HomeNotFound)?;
        Ok(home.join(BASE_DIR_NAME))
    }

    /// Load config from base directory
    pub fn load(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content).map_err(|e| PluginError::ConfigParse {
            path: path.clone(),
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// Save config to base directory
    pub fn save(&self, base_dir: &Path) -> Result<()> {
        let path = base_dir.join(CONFIG_FILE);
        fs::create_dir_all(base_dir)?;

        let content = toml::to_string_pretty(self).map_err(|e| PluginError::ConfigParse {
            path: path.clone(),
            message: e.to_string(),
        })?;

        fs::write(&path, content)?;
        Ok(())
    }

    /// Get config file path
    pub fn path(base_dir: &Path) -> PathBuf {
        base_dir.join(CONFIG_FILE)
    }

    /// Initialize config with default template (rich comments)
    pub fn init(base_dir: &Path) -> Result<PathBuf> {
        let path = base_dir.join(CONFIG_FILE);
        fs::create_dir_all(base_dir)?;

        if !path.exists() {
            fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        }

        Ok(path)
    }

    pub fn plugins_dir(&self, base_dir: &Path) -> PathBuf {
        self.workspace
            .plugins_dir
            .clone()
            .unwrap_or_else(|| base_dir.join("plugins"))
    }

    pub fn mirrors_dir(&self, base_dir: &Path) -> PathBuf {
        self.workspace
            .mirrors_dir
            .clone()
            .unwrap_or_else(|| base_dir.join("mirrors"))
    }

    pub fn snapshot_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.workspace.snapshot_file)
    }

    /// Wire repository, git adapter and sync engine into a service
    pub fn open_service(
        &self,
        base_dir: &Path,
        catalog: Vec<CatalogEntry>,
        runtime: Handle,
    ) -> Result<PluginLifecycleService> {
        let repository = PluginRepository::open(self.snapshot_path(base_dir), catalog)?;
        let engine = GitSyncEngine::new(
            Arc::new(GitCli::new(self.git.program.clone())),
            self.plugins_dir(base_dir),
            self.mirrors_dir(base_dir),
        );

        Ok(PluginLifecycleService::new(repository, engine, runtime)
            .with_failure_policy(self.install.on_failure))
    }

    /// Get a config value by dot-notation key
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Set a config value by dot-notation key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "workspace.plugins_dir" => self.workspace.plugins_dir = optional_path(value),
            "workspace.mirrors_dir" => self.workspace.mirrors_dir = optional_path(value),
            "workspace.snapshot_file" => {
                if value.is_empty() {
                    return Err(invalid(key, value));
                }
                self.workspace.snapshot_file = value.to_string();
            }
            "install.on_failure" => {
                self.install.on_failure = value.parse().map_err(|_| invalid(key, value))?;
            }
            "git.program" => {
                if value.is_empty() {
                    return Err(invalid(key, value));
                }
                self.git.program = value.to_string();
            }
            _ => {
                return Err(PluginError::ConfigKeyNotFound {
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }

    /// List all config keys with their current values
    pub fn list(&self) -> Vec<(String, String)> {
        let show_path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };

        vec![
            (
                "workspace.plugins_dir".to_string(),
                show_path(&self.workspace.plugins_dir),
            ),
            (
                "workspace.mirrors_dir".to_string(),
                show_path(&self.workspace.mirrors_dir),
            ),
            (
                "workspace.snapshot_file".to_string(),
                self.workspace.snapshot_file.clone(),
            ),
            (
                "install.on_failure".to_string(),
                self.install.on_failure.to_string(),
            ),
            ("git.program".to_string(), self.git.program.clone()),
        ]
    }
}

/// Empty value resets to the default location
fn optional_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn invalid(key: &str, value: &str) -> PluginError {
    PluginError::InvalidConfigValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
