// SPDX-License-Identifier: MIT
//! Module discovery, load/unload lifecycle, and hot-reload orchestration.
//!
//! The manager owns the registry of live [`Module`]s. Registry mutation —
//! load, unload, reload, lookup — is serialized by one internal lock; the
//! native invocation itself never runs under it (entry points may block for
//! an arbitrary time). An unload concurrent with an in-flight invoke is safe:
//! the handle is reference-counted and the close defers to the last holder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::loader::NativeLoader;
use crate::module::Module;
use crate::watch::FileWatcher;

/// Number of generation slots under `runtime_files/`. Slots wrap once
/// exhausted, so at most this many reload generations are distinguishable.
const RUNTIME_SLOTS: usize = 10;

/// Directory (under a search directory) holding hot-reload shadow copies.
const RUNTIME_DIR: &str = "runtime_files";

/// Entry point invoked right after a successful open.
const LOAD_ENTRY: &str = "load";
/// Entry point invoked right before the handle is dropped.
const UNLOAD_ENTRY: &str = "unload";

struct ManagerState {
    /// Search precedence is insertion order; first match wins.
    search_dirs: Vec<PathBuf>,
    /// Live modules in load order (shutdown unloads in reverse).
    registry: Vec<Arc<Module>>,
    /// Per-source-file staging generation; selects the next runtime slot so a
    /// reload always lands on a fresh path.
    generations: HashMap<PathBuf, usize>,
    hot_reload: bool,
}

/// Directory-based module discovery plus load/unload/hot-reload lifecycle.
///
/// Constructed explicitly with its collaborators and shared as an `Arc`; the
/// `Arc` is what file-change subscriptions hold (weakly) to drive reloads.
pub struct ModuleManager {
    loader: Arc<dyn NativeLoader>,
    watcher: Arc<dyn FileWatcher>,
    state: Mutex<ManagerState>,
}

impl ModuleManager {
    pub fn new(loader: Arc<dyn NativeLoader>, watcher: Arc<dyn FileWatcher>) -> Arc<Self> {
        Arc::new(Self {
            loader,
            watcher,
            state: Mutex::new(ManagerState {
                search_dirs: Vec::new(),
                registry: Vec::new(),
                generations: HashMap::new(),
                hot_reload: false,
            }),
        })
    }

    /// Toggle hot reloading for subsequent loads. Modules already loaded keep
    /// whatever subscription they were loaded with.
    pub fn set_hot_reload(&self, enabled: bool) {
        self.state.lock().hot_reload = enabled;
    }

    pub fn hot_reload_enabled(&self) -> bool {
        self.state.lock().hot_reload
    }

    /// Register a search directory. Relative paths are made absolute against
    /// the working directory; duplicates are ignored.
    pub fn add_search_directory(&self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        let absolute = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
        let mut state = self.state.lock();
        if !state.search_dirs.contains(&absolute) {
            state.search_dirs.push(absolute);
        }
    }

    /// Load a module by logical name.
    ///
    /// `name` may be a bare logical name (the platform library suffix is
    /// appended) or an explicit filename (used verbatim). Search directories
    /// are scanned in insertion order; the first existing file wins.
    ///
    /// Never fails loudly: an unresolvable name is logged and reported as
    /// `None`, a name whose resolved file is already registered returns the
    /// existing instance unchanged, and a file the platform loader rejects is
    /// still registered (with no handle) so the failed state is observable.
    pub fn load_module(self: &Arc<Self>, name: &str) -> Option<Arc<Module>> {
        let candidate = candidate_filename(name);

        let mut state = self.state.lock();

        let file = state
            .search_dirs
            .iter()
            .map(|dir| dir.join(&candidate))
            .find(|path| path.is_file());
        let Some(file) = file else {
            warn!(module = %name, "module file not found in any search directory");
            return None;
        };

        if let Some(existing) = state.registry.iter().find(|m| m.file() == file) {
            warn!(module = %name, file = %file.display(), "module already loaded");
            return Some(existing.clone());
        }

        let hot_reload = state.hot_reload;
        let runtime_file = if hot_reload {
            let slot = {
                let generation = state.generations.entry(file.clone()).or_insert(0);
                let slot = *generation % RUNTIME_SLOTS;
                *generation += 1;
                slot
            };
            stage_runtime_copy(&file, slot).unwrap_or_else(|| {
                warn!(
                    module = %name,
                    "hot-reload staging failed, loading the original file; reloads of this module may be unreliable"
                );
                file.clone()
            })
        } else {
            file.clone()
        };

        let handle = self.loader.open(&runtime_file);
        if handle.is_none() {
            error!(module = %name, file = %runtime_file.display(), "module could not be loaded");
        }

        let module = Arc::new(Module::new(
            name.to_string(),
            file.clone(),
            runtime_file,
            handle,
            self.loader.clone(),
        ));
        state.registry.push(module.clone());
        drop(state);

        if hot_reload {
            self.subscribe(&module);
        }

        if module.is_loaded() {
            info!(module = %name, file = %file.display(), "module loaded");
        }
        module.invoke(LOAD_ENTRY);
        Some(module)
    }

    /// Arm the file-change subscription on the ORIGINAL file path (the staged
    /// runtime copy is never watched — it is ours).
    fn subscribe(self: &Arc<Self>, module: &Arc<Module>) {
        let name = module.name().to_string();
        let weak: Weak<Self> = Arc::downgrade(self);
        let result = self.watcher.add_file(
            module.file(),
            Arc::new(move || {
                if let Some(manager) = weak.upgrade() {
                    manager.reload_module(&name);
                }
            }),
        );
        if let Err(err) = result {
            warn!(
                module = %module.name(),
                error = %err,
                "file-change subscription failed; hot reload disabled for this module"
            );
        }
    }

    /// Unload and reload a logical name as one unit.
    ///
    /// This is the file-change handler's path. The unload half removes the
    /// old subscription, the load half stages a fresh runtime copy and re-arms
    /// it; the only observable intermediate is a brief absence from the
    /// registry.
    pub fn reload_module(self: &Arc<Self>, name: &str) {
        info!(module = %name, "reloading module");
        self.unload_module(name);
        self.load_module(name);
    }

    /// Unload by name. No-op when the name is not registered.
    pub fn unload_module(&self, name: &str) {
        let module = self
            .state
            .lock()
            .registry
            .iter()
            .find(|m| m.name() == name)
            .cloned();
        if let Some(module) = module {
            self.unload(&module);
        }
    }

    /// Unload a registered module: invoke its "unload" entry point while the
    /// library is still mapped, drop the handle, cancel the file-change
    /// subscription, and erase the registry entry.
    ///
    /// A module that is not in the registry (already unloaded, or never
    /// loaded by this manager) is logged and skipped.
    pub fn unload(&self, module: &Arc<Module>) {
        {
            let mut state = self.state.lock();
            let Some(index) = state
                .registry
                .iter()
                .position(|m| Arc::ptr_eq(m, module))
            else {
                warn!(module = %module.name(), "unload requested for a module not in the registry");
                return;
            };
            state.registry.remove(index);
        }

        module.invoke(UNLOAD_ENTRY);
        // The close itself happens when the last in-flight invoke releases
        // its handle clone.
        drop(module.take_handle());
        self.watcher.remove_file(module.file());
        info!(module = %module.name(), "module unloaded");
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<Module>> {
        self.state
            .lock()
            .registry
            .iter()
            .find(|m| m.name() == name)
            .cloned()
    }

    /// Live modules, in load order.
    pub fn loaded_modules(&self) -> Vec<Arc<Module>> {
        self.state.lock().registry.clone()
    }

    /// Logical names of every module file installed in the search directories
    /// (non-recursive scan, platform library extension only). Each name
    /// appears once; directory precedence matches [`load_module`](Self::load_module).
    pub fn installed_modules(&self) -> Vec<String> {
        let dirs = self.state.lock().search_dirs.clone();
        let mut names: Vec<String> = Vec::new();
        for dir in &dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if path.extension().and_then(|ext| ext.to_str())
                    != Some(std::env::consts::DLL_EXTENSION)
                {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    if !names.iter().any(|known| known == stem) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names
    }
}

/// Append the platform library suffix only when `name` carries no extension,
/// so a bare logical name and an explicit filename both work.
fn candidate_filename(name: &str) -> String {
    if Path::new(name).extension().is_some() {
        name.to_string()
    } else {
        format!("{name}{}", std::env::consts::DLL_SUFFIX)
    }
}

/// Copy `file` into a generation slot under its search directory:
/// `<dir>/runtime_files/<slot>/<filename>`, created on demand, overwriting
/// any prior occupant. Some platforms keep a loaded library's backing file
/// locked; the shadow copy gives every load a path the previous generation
/// does not hold open. Probing starts at `slot` and falls through on copy
/// failure; `None` when every slot fails.
fn stage_runtime_copy(file: &Path, slot: usize) -> Option<PathBuf> {
    let dir = file.parent()?;
    let filename = file.file_name()?;
    for probe in 0..RUNTIME_SLOTS {
        let slot = (slot + probe) % RUNTIME_SLOTS;
        let slot_dir = dir.join(RUNTIME_DIR).join(slot.to_string());
        if let Err(err) = std::fs::create_dir_all(&slot_dir) {
            debug!(slot, error = %err, "could not create runtime slot directory");
            continue;
        }
        let target = slot_dir.join(filename);
        match std::fs::copy(file, &target) {
            Ok(_) => return Some(target),
            // Expected on platforms that keep the previous occupant locked.
            Err(err) => debug!(slot, error = %err, "runtime copy into slot failed"),
        }
    }
    None
}
