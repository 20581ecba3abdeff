//! Version control gateway
//!
//! Mirror, tag and checkout operations behind the `VersionControl` trait, with a
//! `git` command-line adapter.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{PluginError, Result};

/// Capability interface consumed by the sync engine
///
/// Every call may block on network or disk. Failures are `SyncFailed`.
pub trait VersionControl: Send + Sync {
    /// Create a bare mirror of `remote` at `mirror`, or fetch into the existing one
    fn ensure_mirror(&self, remote: &str, mirror: &Path) -> Result<()>;

    /// Most recently created tag in the mirror
    fn latest_tag(&self, mirror: &Path) -> Result<Option<String>>;

    /// Replace `workspace` with a checkout of `mirror` at `tag` (default branch if `None`)
    fn materialize(&self, mirror: &Path, tag: Option<&str>, workspace: &Path) -> Result<()>;
}

/// `git` command-line adapter
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run git and return stdout, mapping any failure to `SyncFailed`
    fn run<I, S>(&self, context: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        // Never block on a credentials prompt in a background task.
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        debug!(command = ?cmd, "running git");
        let output = cmd
            .output()
            .map_err(|e| PluginError::sync_failed(context, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PluginError::sync_failed(
                context,
                format!("git exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn is_mirror(mirror: &Path) -> bool {
        mirror.join("HEAD").is_file()
    }

    /// `remote.origin.url` of an existing mirror
    fn origin_url(&self, mirror: &Path) -> Option<String> {
        self.run(
            "origin url",
            [
                OsStr::new("--git-dir"),
                mirror.as_os_str(),
                OsStr::new("config"),
                OsStr::new("--get"),
                OsStr::new("remote.origin.url"),
            ],
        )
        .ok()
        .map(|url| url.trim().to_string())
    }
}

impl VersionControl for GitCli {
    fn ensure_mirror(&self, remote: &str, mirror: &Path) -> Result<()> {
        let context = format!("mirror {}", mirror.display());

        let current = Self::is_mirror(mirror)
            .then(|| self.origin_url(mirror))
            .flatten();

        if current.as_deref() == Some(remote) {
            self.run(
                &context,
                [
                    OsStr::new("--git-dir"),
                    mirror.as_os_str(),
                    OsStr::new("fetch"),
                    OsStr::new("--prune"),
                    OsStr::new("--tags"),
                    OsStr::new("origin"),
                ],
            )?;
            return Ok(());
        }

        if let Some(previous) = current {
            info!(
                mirror = %mirror.display(),
                from = %previous,
                to = %remote,
                "remote changed, re-cloning mirror"
            );
        }

        let parent = mirror.parent().unwrap_or(mirror);
        fs::create_dir_all(parent).map_err(|e| PluginError::sync_failed(&context, e))?;

        // Clone next to the target and rename, so a failed clone leaves nothing behind.
        let staging = sibling(mirror, "clone");
        remove_path(&staging).map_err(|e| PluginError::sync_failed(&context, e))?;

        let cloned = self.run(
            &context,
            [
                OsStr::new("clone"),
                OsStr::new("--mirror"),
                OsStr::new("--quiet"),
                OsStr::new(remote),
                staging.as_os_str(),
            ],
        );
        if let Err(e) = cloned {
            let _ = remove_path(&staging);
            return Err(e);
        }

        remove_path(mirror).map_err(|e| PluginError::sync_failed(&context, e))?;
        fs::rename(&staging, mirror).map_err(|e| PluginError::sync_failed(&context, e))?;
        Ok(())
    }

    fn latest_tag(&self, mirror: &Path) -> Result<Option<String>> {
        let context = format!("tags of {}", mirror.display());

        // The last --sort key is the primary one: creation date, then version order.
        let stdout = self.run(
            &context,
            [
                OsStr::new("--git-dir"),
                mirror.as_os_str(),
                OsStr::new("for-each-ref"),
                OsStr::new("--sort=-v:refname"),
                OsStr::new("--sort=-creatordate"),
                OsStr::new("--count=1"),
                OsStr::new("--format=%(refname:short)"),
                OsStr::new("refs/tags"),
            ],
        )?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }

    fn materialize(&self, mirror: &Path, tag: Option<&str>, workspace: &Path) -> Result<()> {
        let context = format!("checkout {}", workspace.display());

        let parent = workspace.parent().unwrap_or(workspace);
        fs::create_dir_all(parent).map_err(|e| PluginError::sync_failed(&context, e))?;

        let staging = sibling(workspace, "checkout");
        remove_path(&staging).map_err(|e| PluginError::sync_failed(&context, e))?;

        let mut args: Vec<&OsStr> = vec![OsStr::new("clone"), OsStr::new("--quiet")];
        if let Some(tag) = tag {
            args.push(OsStr::new("--branch"));
            args.push(OsStr::new(tag));
        }
        args.push(mirror.as_os_str());
        args.push(staging.as_os_str());

        if let Err(e) = self.run(&context, args) {
            let _ = remove_path(&staging);
            return Err(e);
        }

        // The previous checkout stays valid until the new one is complete.
        remove_path(workspace).map_err(|e| PluginError::sync_failed(&context, e))?;
        fs::rename(&staging, workspace).map_err(|e| PluginError::sync_failed(&context, e))?;
        Ok(())
    }
}

/// `<dir>/.<name>.<suffix>` next to `path`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", name, suffix))
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{git_available, Upstream};
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sibling_path() {
        let path = Path::new("/var/plugind/mirrors/demo.git");
        assert_eq!(
            sibling(path, "clone"),
            PathBuf::from("/var/plugind/mirrors/.demo.git.clone")
        );
    }

    #[test]
    fn test_missing_remote_is_sync_failed() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let git = GitCli::default();

        let mirror = temp.path().join("mirrors/ghost.git");
        let err = git
            .ensure_mirror(&temp.path().join("nope").to_string_lossy(), &mirror)
            .unwrap_err();

        assert!(matches!(err, PluginError::SyncFailed { .. }));
        assert!(!mirror.exists());
        assert!(!temp.path().join("mirrors/.ghost.git.clone").exists());
    }

    #[test]
    fn test_missing_program_is_sync_failed() {
        let temp = TempDir::new().unwrap();
        let git = GitCli::new("plugind-no-such-git");
        let err = git.latest_tag(temp.path()).unwrap_err();
        assert!(matches!(err, PluginError::SyncFailed { .. }));
    }

    #[test]
    fn test_mirror_tags_and_checkout() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let upstream = Upstream::init(temp.path().join("upstream"));
        upstream.commit_file("readme.md", "hello");

        let git = GitCli::default();
        let mirror = temp.path().join("mirrors/demo.git");
        let workspace = temp.path().join("plugins/demo");

        git.ensure_mirror(&upstream.url(), &mirror).unwrap();
        assert_eq!(git.latest_tag(&mirror).unwrap(), None);

        git.materialize(&mirror, None, &workspace).unwrap();
        assert!(workspace.join("readme.md").exists());

        upstream.tag("1.0");
        upstream.commit_file("test.md", "more");
        upstream.tag("2.0");

        git.ensure_mirror(&upstream.url(), &mirror).unwrap();
        assert_eq!(git.latest_tag(&mirror).unwrap().as_deref(), Some("2.0"));

        git.materialize(&mirror, Some("1.0"), &workspace).unwrap();
        assert!(workspace.join("readme.md").exists());
        assert!(!workspace.join("test.md").exists());

        git.materialize(&mirror, Some("2.0"), &workspace).unwrap();
        assert!(workspace.join("test.md").exists());
    }

    #[test]
    fn test_mirror_follows_remote_change() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let first = Upstream::init(temp.path().join("first"));
        first.commit_file("a.md", "a");
        first.tag("1.0");
        let second = Upstream::init(temp.path().join("second"));
        second.commit_file("b.md", "b");
        second.tag("5.0");

        let git = GitCli::default();
        let mirror = temp.path().join("mirrors/demo.git");

        git.ensure_mirror(&first.url(), &mirror).unwrap();
        assert_eq!(git.latest_tag(&mirror).unwrap().as_deref(), Some("1.0"));

        git.ensure_mirror(&second.url(), &mirror).unwrap();
        assert_eq!(git.origin_url(&mirror).as_deref(), Some(second.url().as_str()));
        assert_eq!(git.latest_tag(&mirror).unwrap().as_deref(), Some("5.0"));
        assert!(!temp.path().join("mirrors/.demo.git.clone").exists());
    }

    #[test]
    fn test_failed_checkout_keeps_previous_workspace() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let upstream = Upstream::init(temp.path().join("upstream"));
        upstream.commit_file("readme.md", "hello");
        upstream.tag("1.0");

        let git = GitCli::default();
        let mirror = temp.path().join("mirrors/demo.git");
        let workspace = temp.path().join("plugins/demo");

        git.ensure_mirror(&upstream.url(), &mirror).unwrap();
        git.materialize(&mirror, Some("1.0"), &workspace).unwrap();

        let err = git
            .materialize(&mirror, Some("9.9"), &workspace)
            .unwrap_err();
        assert!(matches!(err, PluginError::SyncFailed { .. }));
        assert!(workspace.join("readme.md").exists());
    }
}
