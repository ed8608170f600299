// SPDX-License-Identifier: MIT
//! Host startup/shutdown orchestration and per-invocation threads.
//!
//! The launcher binds module invocation to thread lifecycle: each
//! "own thread" run spawns one dedicated OS thread that invokes a single
//! entry point and exits. [`Launcher::join_all`] is the only blocking point
//! the runtime exposes; invocation itself has no timeout or cancellation.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::HostConfig;
use crate::manager::ModuleManager;

/// Failure inside a dedicated invocation thread.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The invoked entry point panicked, terminating its thread abnormally.
    #[error("entry point `{entry_point}` of module `{module}` panicked")]
    Panicked { module: String, entry_point: String },
}

/// Handle to one dedicated invocation thread.
///
/// The thread runs exactly one entry-point call and terminates. [`join`](Self::join)
/// surfaces an abnormal termination as an error instead of absorbing it.
pub struct InvocationHandle {
    module: String,
    entry_point: String,
    thread: thread::JoinHandle<()>,
}

impl InvocationHandle {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Wait for the invocation to finish.
    pub fn join(self) -> Result<(), InvocationError> {
        self.thread.join().map_err(|_| InvocationError::Panicked {
            module: self.module,
            entry_point: self.entry_point,
        })
    }

    /// Let the invocation finish on its own; nothing will observe its outcome.
    pub fn detach(self) {}
}

/// Composes a [`ModuleManager`] with a tracked pool of invocation threads and
/// ordered startup/shutdown.
pub struct Launcher {
    manager: Arc<ModuleManager>,
    threads: Mutex<Vec<InvocationHandle>>,
}

impl Launcher {
    pub fn new(manager: Arc<ModuleManager>) -> Self {
        Self {
            manager,
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn manager(&self) -> &Arc<ModuleManager> {
        &self.manager
    }

    /// Default configuration file candidates, nearest directory first.
    pub fn config_candidates() -> Vec<PathBuf> {
        [
            "modhost.toml",
            "../modhost.toml",
            "../../modhost.toml",
            "../../../modhost.toml",
        ]
        .iter()
        .map(PathBuf::from)
        .collect()
    }

    /// Prepare the runtime: enable hot reloading, seed the default search
    /// directories (working directory, then executable directory), and apply
    /// the settings of the first configuration file found among `candidates`.
    ///
    /// Autorun entries are not run here; the caller applies its own overrides
    /// (extra directories, the hot-reload toggle) and then passes the returned
    /// configuration to [`run_autorun`](Self::run_autorun), so no module loads
    /// before the search paths and toggles are final.
    pub fn init(&self, candidates: &[PathBuf]) -> Option<HostConfig> {
        self.manager.set_hot_reload(true);
        self.manager.add_search_directory(".");
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                self.manager.add_search_directory(dir);
            }
        }

        match HostConfig::load_first_found(candidates) {
            Ok(Some((path, config))) => {
                info!(config = %path.display(), "configuration loaded");
                self.apply_settings(&config);
                Some(config)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "configuration file could not be loaded");
                None
            }
        }
    }

    /// Apply a configuration's search directories and hot-reload toggle.
    pub fn apply_settings(&self, config: &HostConfig) {
        for dir in &config.search_dirs {
            self.manager.add_search_directory(dir);
        }
        self.manager.set_hot_reload(config.hot_reload);
    }

    /// Run a configuration's autorun entries.
    pub fn run_autorun(&self, config: &HostConfig) {
        for entry in &config.autorun {
            self.run(&entry.module, &entry.entry, entry.own_thread);
        }
    }

    /// Load a module without invoking anything.
    pub fn load(&self, name: &str) {
        self.manager.load_module(name);
    }

    /// Load (or reuse) a module and invoke `entry_point`, either on a
    /// dedicated tracked thread or synchronously on the caller's thread.
    ///
    /// An empty `entry_point` just loads. A module that cannot be resolved or
    /// loaded yields no thread and no error.
    pub fn run(&self, name: &str, entry_point: &str, own_thread: bool) {
        let Some(module) = self.manager.load_module(name) else {
            return;
        };
        if entry_point.is_empty() {
            return;
        }

        if own_thread {
            let entry = entry_point.to_string();
            let invoked = module.clone();
            let spawned = thread::Builder::new()
                .name(format!("module-{name}"))
                .spawn(move || invoked.invoke(&entry));
            match spawned {
                Ok(handle) => self.threads.lock().push(InvocationHandle {
                    module: name.to_string(),
                    entry_point: entry_point.to_string(),
                    thread: handle,
                }),
                Err(err) => {
                    error!(module = %name, error = %err, "failed to spawn invocation thread");
                }
            }
        } else {
            module.invoke(entry_point);
        }
    }

    /// Join every tracked invocation thread in spawn order, then clear the
    /// tracking list. Failures are logged per thread; the first one is
    /// returned after all threads have been joined.
    pub fn join_all(&self) -> Result<(), InvocationError> {
        let handles: Vec<InvocationHandle> = std::mem::take(&mut *self.threads.lock());
        let mut first_failure = None;
        for handle in handles {
            if let Err(err) = handle.join() {
                error!(error = %err, "invocation thread failed");
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Unload every loaded module in strict reverse load order, so a module
    /// can assume anything loaded before it is still present until its own
    /// unload begins.
    pub fn shutdown(&self) {
        let modules = self.manager.loaded_modules();
        for module in modules.iter().rev() {
            self.manager.unload(module);
        }
    }
}
