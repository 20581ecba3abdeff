//! Plugin Lifecycle Service
//!
//! High-level API for installing plugins: status transitions, background installs
//! with cooperative cancellation, and status events.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::error::{PluginError, Result};
use crate::plugin::events::{EventBus, Subscription};
use crate::plugin::repository::PluginRepository;
use crate::plugin::sync::{GitSyncEngine, SyncOutcome};
use crate::plugin::types::{
    FailurePolicy, InstallOutcome, Plugin, PluginStatus, PluginStatusChangeEvent,
};

/// Plugin Lifecycle Service - orchestrates installs for every cataloged plugin
///
/// At most one install runs per plugin name. A second `install` or
/// `exec_install_or_update` for a busy name is rejected with `AlreadyInstalling`.
pub struct PluginLifecycleService {
    inner: Arc<Inner>,
    runtime: Handle,
    on_failure: FailurePolicy,
}

struct Inner {
    repository: PluginRepository,
    engine: GitSyncEngine,
    events: EventBus,
    in_flight: Mutex<HashSet<String>>,
}

/// Holds the single-flight slot of one plugin until dropped
struct FlightGuard {
    inner: Arc<Inner>,
    name: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.name);
    }
}

impl PluginLifecycleService {
    /// Create a service whose background installs run on `runtime`'s blocking pool
    pub fn new(repository: PluginRepository, engine: GitSyncEngine, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                engine,
                events: EventBus::new(),
                in_flight: Mutex::new(HashSet::new()),
            }),
            runtime,
            on_failure: FailurePolicy::default(),
        }
    }

    /// Set where a failed install lands (`ERROR` by default)
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Get the repository
    pub fn repository(&self) -> &PluginRepository {
        &self.inner.repository
    }

    /// Get the sync engine
    pub fn engine(&self) -> &GitSyncEngine {
        &self.inner.engine
    }

    /// Get the event bus
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.on_failure
    }

    /// Listen for status changes from now on
    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    pub fn list(&self) -> Vec<Plugin> {
        self.inner.repository.list()
    }

    pub fn find(&self, name: &str) -> Result<Plugin> {
        self.inner.repository.find(name)
    }

    /// Whether an install currently holds the plugin's slot
    pub fn is_installing(&self, name: &str) -> bool {
        self.inner.in_flight.lock().contains(name)
    }

    /// Install or update `plugin` on the calling thread
    ///
    /// The stored record for `plugin.name` is used; other fields of `plugin` are
    /// ignored. Blocks until sync finishes. Sync errors are returned after the
    /// failure state has been persisted and published.
    pub fn exec_install_or_update(&self, plugin: &Plugin) -> Result<Plugin> {
        let guard = Inner::claim(&self.inner, &plugin.name)?;
        self.inner.exec(guard, self.on_failure)
    }

    /// Schedule an install of `name` in the background and return immediately
    ///
    /// A pending stop request is honored right here: the plugin goes back to
    /// `PENDING` and no sync is attempted. Background failures are only visible
    /// as status events and through `find`.
    pub fn install(&self, name: &str) -> Result<()> {
        self.inner.repository.find(name)?;
        let guard = Inner::claim(&self.inner, name)?;

        let (plugin, cancelled) = self.inner.repository.modify(name, |p| {
            if p.stopped {
                p.mark_pending();
                true
            } else {
                false
            }
        })?;

        if cancelled {
            info!(plugin = %name, "install cancelled before start");
            drop(guard);
            self.inner.publish(&plugin);
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let on_failure = self.on_failure;
        self.runtime
            .spawn_blocking(move || inner.run_background(guard, on_failure));
        Ok(())
    }

    /// Request cancellation of the current or next install of `name`
    ///
    /// Only raises the token; the install task honors it at its next checkpoint.
    pub fn stop(&self, name: &str) -> Result<Plugin> {
        let (plugin, ()) = self.inner.repository.modify(name, |p| p.stopped = true)?;
        info!(plugin = %name, status = %plugin.status, "stop requested");
        Ok(plugin)
    }

    /// Put an idle plugin back to `PENDING`
    pub fn reset(&self, name: &str) -> Result<Plugin> {
        let guard = Inner::claim(&self.inner, name)?;
        let (plugin, ()) = self.inner.repository.modify(name, Plugin::mark_pending)?;
        drop(guard);
        self.inner.publish(&plugin);
        Ok(plugin)
    }
}

impl Inner {
    fn claim(inner: &Arc<Inner>, name: &str) -> Result<FlightGuard> {
        if !inner.in_flight.lock().insert(name.to_string()) {
            return Err(PluginError::AlreadyInstalling {
                name: name.to_string(),
            });
        }
        Ok(FlightGuard {
            inner: Arc::clone(inner),
            name: name.to_string(),
        })
    }

    fn publish(&self, plugin: &Plugin) {
        self.events
            .publish(PluginStatusChangeEvent::new(&plugin.name, plugin.status));
    }

    fn exec(&self, guard: FlightGuard, on_failure: FailurePolicy) -> Result<Plugin> {
        let name = guard.name.clone();

        let (plugin, ()) = self
            .repository
            .modify(&name, |p| p.status = PluginStatus::Installing)?;
        self.publish(&plugin);
        info!(plugin = %name, details = %plugin.details, "installing");

        match self.engine.sync(&plugin) {
            Ok(tag) => {
                let (plugin, ()) = self.repository.modify(&name, |p| p.mark_installed(tag))?;
                drop(guard);
                self.publish(&plugin);
                info!(plugin = %name, tag = ?plugin.tag, "installed");
                Ok(plugin)
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "install failed");
                let (plugin, ()) = self
                    .repository
                    .modify(&name, |p| apply_failure(p, on_failure))?;
                drop(guard);
                self.publish(&plugin);
                Err(e)
            }
        }
    }

    fn run_background(&self, guard: FlightGuard, on_failure: FailurePolicy) {
        let name = guard.name.clone();
        match self.install_with_checkpoints(&name, on_failure) {
            Ok((plugin, outcome)) => {
                drop(guard);
                self.publish(&plugin);
                match outcome {
                    Some(InstallOutcome::Installed { tag }) => {
                        info!(plugin = %name, tag = %tag, "installed")
                    }
                    Some(InstallOutcome::Cancelled) => info!(plugin = %name, "install cancelled"),
                    None => warn!(plugin = %name, status = %plugin.status, "install failed"),
                }
            }
            Err(e) => {
                error!(plugin = %name, error = %e, "background install aborted");
                let plugin = match self.repository.modify(&name, Plugin::mark_pending) {
                    Ok((plugin, ())) => plugin,
                    Err(e) => {
                        error!(plugin = %name, error = %e, "could not reset plugin to PENDING");
                        match self.repository.find(&name) {
                            Ok(plugin) => plugin,
                            Err(_) => return,
                        }
                    }
                };
                // Followers see the slot released even if the record could not be fixed.
                drop(guard);
                self.publish(&plugin);
            }
        }
    }

    /// Background sequence. `None` outcome means sync failed and the failure
    /// policy was applied.
    fn install_with_checkpoints(
        &self,
        name: &str,
        on_failure: FailurePolicy,
    ) -> Result<(Plugin, Option<InstallOutcome>)> {
        let (plugin, started) = self.repository.modify(name, |p| {
            if p.stopped {
                p.mark_pending();
                false
            } else {
                p.status = PluginStatus::Installing;
                true
            }
        })?;

        if !started {
            return Ok((plugin, Some(InstallOutcome::Cancelled)));
        }
        self.publish(&plugin);
        info!(plugin = %name, details = %plugin.details, "installing in background");

        // Another process may raise the token through the shared snapshot.
        let stop_requested = || -> Result<bool> {
            self.repository.refresh()?;
            Ok(self.repository.find(name)?.stopped)
        };

        match self.engine.sync_until(&plugin, stop_requested) {
            Ok(SyncOutcome::Synced(tag)) => {
                // Last checkpoint and final write happen under one repository lock.
                let (plugin, outcome) = self.repository.modify(name, |p| {
                    if p.stopped {
                        p.mark_pending();
                        InstallOutcome::Cancelled
                    } else {
                        p.mark_installed(tag.clone());
                        InstallOutcome::Installed { tag }
                    }
                })?;
                Ok((plugin, Some(outcome)))
            }
            Ok(SyncOutcome::Cancelled) => {
                let (plugin, ()) = self.repository.modify(name, Plugin::mark_pending)?;
                Ok((plugin, Some(InstallOutcome::Cancelled)))
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "background sync failed");
                let (plugin, ()) = self.repository.modify(name, |p| apply_failure(p, on_failure))?;
                Ok((plugin, None))
            }
        }
    }
}

/// Failure state; a stop request raised meanwhile wins and yields `PENDING`
fn apply_failure(plugin: &mut Plugin, on_failure: FailurePolicy) {
    plugin.status = if plugin.stopped {
        PluginStatus::Pending
    } else {
        on_failure.status()
    };
    plugin.stopped = false;
}
