//! Plugin Repository
//!
//! Durable name -> Plugin store backed by a JSON snapshot (`plugin_cache.json`).
//!
//! Several processes may share one snapshot. Every write holds an exclusive lock
//! on `plugin_cache.json.lock` and starts from the records currently on disk.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{PluginError, Result};
use crate::plugin::catalog::check_unique;
use crate::plugin::types::{CatalogEntry, Plugin, PluginStatus};

pub const SNAPSHOT_FILE: &str = "plugin_cache.json";

type Snapshot = IndexMap<String, Plugin>;

/// Plugin Repository - catalog-ordered plugin records with a persisted snapshot
pub struct PluginRepository {
    snapshot_path: PathBuf,
    plugins: RwLock<Snapshot>,
    /// Serializes "copy, mutate, write snapshot, commit"
    writer: Mutex<()>,
}

impl PluginRepository {
    /// Open the repository for `catalog`, restoring state from an existing snapshot
    ///
    /// Catalog order and `details` win. Snapshot entries for names no longer in the
    /// catalog are dropped. Interrupted installs come back as `PENDING`; a saved stop
    /// request is kept for the next install to honor.
    pub fn open(snapshot_path: PathBuf, catalog: Vec<CatalogEntry>) -> Result<Self> {
        check_unique(&catalog)?;

        let lock = lock_snapshot(&snapshot_path)?;
        let mut saved = load_snapshot(&snapshot_path)?;
        let mut plugins = Snapshot::with_capacity(catalog.len());

        for entry in catalog {
            let plugin = match saved.shift_remove(&entry.name) {
                Some(mut restored) => {
                    restored.details = entry.details;
                    if restored.status == PluginStatus::Installing {
                        restored.status = PluginStatus::Pending;
                    }
                    if restored.status == PluginStatus::Installed && restored.tag.is_none() {
                        restored.status = PluginStatus::Pending;
                    }
                    restored
                }
                None => Plugin::from(entry),
            };
            plugins.insert(plugin.name.clone(), plugin);
        }

        if !saved.is_empty() {
            debug!(dropped = saved.len(), "dropping snapshot entries missing from catalog");
        }

        write_snapshot(&snapshot_path, &plugins)?;
        drop(lock);
        info!(
            path = %snapshot_path.display(),
            plugins = plugins.len(),
            "plugin repository opened"
        );

        Ok(Self {
            snapshot_path,
            plugins: RwLock::new(plugins),
            writer: Mutex::new(()),
        })
    }

    /// Get the snapshot file path
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// All plugins in catalog order
    pub fn list(&self) -> Vec<Plugin> {
        self.plugins.read().values().cloned().collect()
    }

    /// Look up a plugin by exact name
    pub fn find(&self, name: &str) -> Result<Plugin> {
        self.plugins
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                name: name.to_string(),
            })
    }

    /// Replace the stored record for `plugin.name` and persist
    pub fn update(&self, plugin: &Plugin) -> Result<Plugin> {
        let (updated, ()) = self.modify(&plugin.name, |stored| *stored = plugin.clone())?;
        Ok(updated)
    }

    /// Pick up records written by other processes sharing the snapshot
    pub fn refresh(&self) -> Result<()> {
        let _writer = self.writer.lock();
        let _lock = lock_snapshot(&self.snapshot_path)?;

        let next = self.merge_saved()?;
        *self.plugins.write() = next;
        Ok(())
    }

    /// Atomically read-modify-write one record and persist the snapshot
    ///
    /// `f` sees the record as last written by any process. The in-memory record
    /// changes only after the snapshot write succeeded.
    pub fn modify<F, R>(&self, name: &str, f: F) -> Result<(Plugin, R)>
    where
        F: FnOnce(&mut Plugin) -> R,
    {
        let _writer = self.writer.lock();
        let _lock = lock_snapshot(&self.snapshot_path)?;

        let mut next = self.merge_saved()?;
        let stored = next.get_mut(name).ok_or_else(|| PluginError::NotFound {
            name: name.to_string(),
        })?;

        let out = f(stored);
        stored.name = name.to_string();
        let updated = stored.clone();

        write_snapshot(&self.snapshot_path, &next)?;
        *self.plugins.write() = next;

        debug!(
            plugin = %updated.name,
            status = %updated.status,
            stopped = updated.stopped,
            "plugin record updated"
        );
        Ok((updated, out))
    }

    /// Current records overlaid with their on-disk state; `details` stays ours
    fn merge_saved(&self) -> Result<Snapshot> {
        let mut saved = load_snapshot(&self.snapshot_path)?;
        let current = self.plugins.read();

        Ok(current
            .iter()
            .map(|(name, plugin)| {
                let merged = match saved.shift_remove(name) {
                    Some(stored) => Plugin {
                        name: name.clone(),
                        details: plugin.details.clone(),
                        ..stored
                    },
                    None => plugin.clone(),
                };
                (name.clone(), merged)
            })
            .collect())
    }
}

/// Exclusive cross-process lock on the snapshot, released on drop
fn lock_snapshot(path: &Path) -> Result<File> {
    let persistence = |source: std::io::Error| PluginError::PersistenceFailure {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(persistence)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path.with_extension("json.lock"))
        .map_err(persistence)?;
    file.lock_exclusive().map_err(persistence)?;
    Ok(file)
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    if !path.exists() {
        return Ok(Snapshot::new());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| PluginError::SnapshotParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Write the full snapshot to a temp file and rename it over the old one
fn write_snapshot(path: &Path, plugins: &Snapshot) -> Result<()> {
    let persistence = |source: std::io::Error| PluginError::PersistenceFailure {
        path: path.to_path_buf(),
        source,
    };

    let content = serde_json::to_string_pretty(plugins)
        .map_err(|e| persistence(std::io::Error::other(e)))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(persistence)?;
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(persistence)?;
    fs::rename(&tmp, path).map_err(persistence)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn catalog() -> Vec<CatalogEntry> {
        ["flowCli", "flowCliB", "flowCliC", "flowCliE", "fircli"]
            .iter()
            .map(|name| CatalogEntry::new(*name, format!("https://example.com/{}.git", name)))
            .collect()
    }

    fn create_test_repository() -> (PluginRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let repo =
            PluginRepository::open(temp_dir.path().join(SNAPSHOT_FILE), catalog()).unwrap();
        (repo, temp_dir)
    }

    #[test]
    fn test_list_matches_catalog() {
        let (repo, _temp) = create_test_repository();

        let plugins = repo.list();
        assert_eq!(plugins.len(), catalog().len());
        for entry in catalog() {
            assert!(repo.find(&entry.name).is_ok());
        }
        assert_eq!(plugins[0].name, "flowCli");
        assert_eq!(plugins[4].name, "fircli");
    }

    #[test]
    fn test_find_unknown() {
        let (repo, _temp) = create_test_repository();
        let err = repo.find("nope").unwrap_err();
        assert!(matches!(err, PluginError::NotFound { .. }));
    }

    #[test]
    fn test_update_is_visible_to_find() {
        let (repo, _temp) = create_test_repository();

        let mut plugin = repo.find("flowCliC").unwrap();
        plugin.status = PluginStatus::Installed;
        plugin.tag = Some("1.0".to_string());
        repo.update(&plugin).unwrap();

        let plugin = repo.find("flowCliC").unwrap();
        assert_eq!(plugin.status, PluginStatus::Installed);
        assert_eq!(plugin.tag.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_update_unknown_name_fails() {
        let (repo, _temp) = create_test_repository();

        let ghost = Plugin::new("ghost", "https://example.com/ghost.git");
        let err = repo.update(&ghost).unwrap_err();
        assert!(matches!(err, PluginError::NotFound { name } if name == "ghost"));
        assert_eq!(repo.list().len(), catalog().len());
    }

    #[test]
    fn test_update_writes_snapshot() {
        let (repo, _temp) = create_test_repository();

        let mut plugin = repo.find("flowCli").unwrap();
        plugin.stopped = true;
        repo.update(&plugin).unwrap();

        let content = fs::read_to_string(repo.snapshot_path()).unwrap();
        let saved: Snapshot = serde_json::from_str(&content).unwrap();
        assert!(saved["flowCli"].stopped);
        assert_eq!(saved.len(), catalog().len());
    }

    #[test]
    fn test_reopen_restores_state() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SNAPSHOT_FILE);

        {
            let repo = PluginRepository::open(path.clone(), catalog()).unwrap();
            let mut plugin = repo.find("flowCliB").unwrap();
            plugin.mark_installed("2.0".to_string());
            repo.update(&plugin).unwrap();

            let mut plugin = repo.find("flowCliE").unwrap();
            plugin.status = PluginStatus::Installing;
            plugin.stopped = true;
            repo.update(&plugin).unwrap();
        }

        let repo = PluginRepository::open(path, catalog()).unwrap();
        let b = repo.find("flowCliB").unwrap();
        assert_eq!(b.status, PluginStatus::Installed);
        assert_eq!(b.tag.as_deref(), Some("2.0"));

        let e = repo.find("flowCliE").unwrap();
        assert_eq!(e.status, PluginStatus::Pending);
        assert!(e.stopped);
    }

    #[test]
    fn test_reopen_takes_details_from_catalog_and_drops_removed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SNAPSHOT_FILE);
        PluginRepository::open(path.clone(), catalog()).unwrap();

        let next = vec![CatalogEntry::new("flowCli", "/srv/git/flowCli.git")];
        let repo = PluginRepository::open(path, next).unwrap();

        assert_eq!(repo.list().len(), 1);
        assert_eq!(repo.find("flowCli").unwrap().details, "/srv/git/flowCli.git");
    }

    #[test]
    fn test_open_rejects_corrupt_snapshot() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SNAPSHOT_FILE);
        fs::write(&path, "[1, 2").unwrap();

        let result = PluginRepository::open(path, catalog());
        assert!(matches!(result, Err(PluginError::SnapshotParse { .. })));
    }

    #[test]
    fn test_failed_write_keeps_memory_unchanged() {
        let (repo, temp) = create_test_repository();

        // A directory where the temp file should go makes the write fail.
        fs::create_dir_all(temp.path().join("plugin_cache.json.tmp")).unwrap();

        let mut plugin = repo.find("flowCli").unwrap();
        plugin.status = PluginStatus::Error;
        let err = repo.update(&plugin).unwrap_err();

        assert!(matches!(err, PluginError::PersistenceFailure { .. }));
        assert_eq!(repo.find("flowCli").unwrap().status, PluginStatus::Pending);
    }

    #[test]
    fn test_two_repositories_share_one_snapshot() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SNAPSHOT_FILE);
        let installer = PluginRepository::open(path.clone(), catalog()).unwrap();
        let operator = PluginRepository::open(path.clone(), catalog()).unwrap();

        installer
            .modify("flowCliC", |p| p.status = PluginStatus::Installing)
            .unwrap();
        operator.modify("flowCliC", |p| p.stopped = true).unwrap();

        // The installer's next write starts from the operator's record.
        installer
            .modify("flowCliB", |p| p.tag = Some("1.0".to_string()))
            .unwrap();
        assert!(installer.find("flowCliC").unwrap().stopped);

        let content = fs::read_to_string(&path).unwrap();
        let saved: Snapshot = serde_json::from_str(&content).unwrap();
        assert!(saved["flowCliC"].stopped);
        assert_eq!(saved["flowCliC"].status, PluginStatus::Installing);
        assert_eq!(saved["flowCliB"].tag.as_deref(), Some("1.0"));

        operator.refresh().unwrap();
        assert_eq!(
            operator.find("flowCliB").unwrap().tag.as_deref(),
            Some("1.0")
        );
    }

    #[test]
    fn test_merge_keeps_catalog_details() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SNAPSHOT_FILE);
        let old = PluginRepository::open(path.clone(), catalog()).unwrap();

        let moved = vec![CatalogEntry::new("flowCli", "/srv/git/flowCli.git")];
        let new = PluginRepository::open(path, moved).unwrap();
        new.modify("flowCli", |p| p.tag = Some("2.0".to_string()))
            .unwrap();

        old.refresh().unwrap();
        let plugin = old.find("flowCli").unwrap();
        assert_eq!(plugin.tag.as_deref(), Some("2.0"));
        assert_eq!(plugin.details, "https://example.com/flowCli.git");
        assert_eq!(old.list().len(), catalog().len());
    }

    #[test]
    fn test_concurrent_updates_to_different_names() {
        let (repo, _temp) = create_test_repository();
        let repo = Arc::new(repo);

        let handles: Vec<_> = catalog()
            .into_iter()
            .map(|entry| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        repo.modify(&entry.name, |p| p.tag = Some(format!("{}", i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = fs::read_to_string(repo.snapshot_path()).unwrap();
        let saved: Snapshot = serde_json::from_str(&content).unwrap();
        for entry in catalog() {
            assert_eq!(saved[&entry.name].tag.as_deref(), Some("9"));
        }
    }
}
