//! In-memory `VersionControl` for tests

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Condvar, Mutex};

use crate::error::{PluginError, Result};
use crate::plugin::git::VersionControl;

#[derive(Default)]
struct State {
    /// remote -> tags in push order
    remotes: HashMap<String, Vec<String>>,
    /// mirror -> tags as of the last fetch
    mirrors: HashMap<PathBuf, Vec<String>>,
    mirror_calls: usize,
    materialized: Vec<Option<String>>,
    fail_mirror: bool,
    /// ensure_mirror blocks while set
    held: bool,
}

#[derive(Default)]
pub struct FakeVcs {
    state: Mutex<State>,
    released: Condvar,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_tag(&self, remote: &str, tag: &str) {
        self.state
            .lock()
            .remotes
            .entry(remote.to_string())
            .or_default()
            .push(tag.to_string());
    }

    pub fn fail_mirror(&self, fail: bool) {
        self.state.lock().fail_mirror = fail;
    }

    /// Make `ensure_mirror` block until `release`
    pub fn hold(&self) {
        self.state.lock().held = true;
    }

    pub fn release(&self) {
        self.state.lock().held = false;
        self.released.notify_all();
    }

    pub fn mirror_count(&self) -> usize {
        self.state.lock().mirror_calls
    }

    pub fn materialize_count(&self) -> usize {
        self.state.lock().materialized.len()
    }

    pub fn materialized_tags(&self) -> Vec<Option<String>> {
        self.state.lock().materialized.clone()
    }
}

impl VersionControl for FakeVcs {
    fn ensure_mirror(&self, remote: &str, mirror: &Path) -> Result<()> {
        let mut state = self.state.lock();
        while state.held {
            self.released.wait(&mut state);
        }

        state.mirror_calls += 1;
        if state.fail_mirror {
            return Err(PluginError::sync_failed(
                format!("mirror {}", mirror.display()),
                "remote unreachable",
            ));
        }

        let tags = state.remotes.get(remote).cloned().unwrap_or_default();
        state.mirrors.insert(mirror.to_path_buf(), tags);
        Ok(())
    }

    fn latest_tag(&self, mirror: &Path) -> Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .mirrors
            .get(mirror)
            .and_then(|tags| tags.last().cloned()))
    }

    fn materialize(&self, _mirror: &Path, tag: Option<&str>, workspace: &Path) -> Result<()> {
        fs::create_dir_all(workspace)?;
        fs::write(workspace.join(".tag"), tag.unwrap_or("HEAD"))?;
        self.state.lock().materialized.push(tag.map(str::to_string));
        Ok(())
    }
}
