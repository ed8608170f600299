// SPDX-License-Identifier: MIT
//! A loaded module: identity plus cached invocation of named entry points.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::loader::{EntryFn, LibraryHandle, NativeLoader};

/// Mutable per-module state. A cached `None` in `entry_points` marks a symbol
/// already looked up and absent, so repeated invokes of a missing entry point
/// resolve exactly once.
struct ModuleState {
    handle: Option<Arc<LibraryHandle>>,
    entry_points: HashMap<String, Option<EntryFn>>,
}

/// One loaded (or load-attempted) native code unit.
///
/// Entry points are optional conventions, not a checked contract: invoking a
/// name the module does not export is a silent no-op, never an error. A
/// module whose library failed to open stays registered with no handle, so
/// callers can observe the failed state; every invoke on it is a no-op.
pub struct Module {
    name: String,
    file: PathBuf,
    runtime_file: PathBuf,
    loader: Arc<dyn NativeLoader>,
    state: Mutex<ModuleState>,
}

impl Module {
    pub(crate) fn new(
        name: String,
        file: PathBuf,
        runtime_file: PathBuf,
        handle: Option<LibraryHandle>,
        loader: Arc<dyn NativeLoader>,
    ) -> Self {
        Self {
            name,
            file,
            runtime_file,
            loader,
            state: Mutex::new(ModuleState {
                handle: handle.map(Arc::new),
                entry_points: HashMap::new(),
            }),
        }
    }

    /// Logical name the module was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved source path in the search directories.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Path actually handed to the native loader — a generation-slot shadow
    /// copy of [`file`](Self::file) when hot reload staged one.
    pub fn runtime_file(&self) -> &Path {
        &self.runtime_file
    }

    /// Whether the native library is currently open.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    /// Invoke a named entry point.
    ///
    /// The symbol is resolved against the library at most once; the result,
    /// present or absent, is cached. An absent handle or a missing entry
    /// point is a no-op.
    ///
    /// The native call runs synchronously on the calling thread with no
    /// runtime lock held. The handle clone taken here keeps the library
    /// mapped for the duration of the call even if the module is unloaded
    /// concurrently.
    pub fn invoke(&self, entry_point: &str) {
        let (entry, _handle) = {
            let mut state = self.state.lock();
            let Some(handle) = state.handle.clone() else {
                return;
            };
            let entry = match state.entry_points.get(entry_point) {
                Some(cached) => *cached,
                None => {
                    let resolved = self.loader.resolve(&handle, entry_point);
                    state.entry_points.insert(entry_point.to_string(), resolved);
                    resolved
                }
            };
            (entry, handle)
        };

        if let Some(entry) = entry {
            trace!(module = %self.name, entry_point, "invoking entry point");
            // SAFETY: `entry` was resolved from the library behind `_handle`,
            // which stays alive across the call, so the code stays mapped.
            // The entry ABI is the no-argument convention; what the module
            // does inside is arbitrary native code.
            unsafe { entry() };
        }
    }

    /// Drop the native handle and the symbol cache. The actual close happens
    /// when the last in-flight invoke releases its clone; cached pointers die
    /// with the mapping they point into.
    pub(crate) fn take_handle(&self) -> Option<Arc<LibraryHandle>> {
        let mut state = self.state.lock();
        state.entry_points.clear();
        state.handle.take()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("runtime_file", &self.runtime_file)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::fake::FakeLoader;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_module(loader: &FakeLoader, path: &str) -> Module {
        let handle = loader.open(Path::new(path));
        Module::new(
            "test".into(),
            path.into(),
            path.into(),
            handle,
            Arc::new(loader.clone()),
        )
    }

    #[test]
    fn invoke_resolves_at_most_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        extern "C" fn entry() {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let loader = FakeLoader::new();
        loader.export("/mods/a.so", "main", entry);
        let module = test_module(&loader, "/mods/a.so");

        module.invoke("main");
        module.invoke("main");
        module.invoke("main");

        assert_eq!(CALLS.load(Ordering::SeqCst), 3);
        assert_eq!(loader.resolve_count("main"), 1);
    }

    #[test]
    fn missing_entry_point_is_a_silent_noop() {
        let loader = FakeLoader::new();
        let module = test_module(&loader, "/mods/b.so");

        module.invoke("does_not_exist");
        module.invoke("does_not_exist");

        // The miss is cached just like a hit.
        assert_eq!(loader.resolve_count("does_not_exist"), 1);
    }

    #[test]
    fn invoke_without_handle_is_a_noop() {
        let loader = FakeLoader::new();
        loader.break_library("/mods/broken.so");
        let module = test_module(&loader, "/mods/broken.so");

        assert!(!module.is_loaded());
        module.invoke("main");
        assert_eq!(loader.resolve_count("main"), 0);
    }

    #[test]
    fn take_handle_closes_once_invokes_drain() {
        let loader = FakeLoader::new();
        let module = test_module(&loader, "/mods/c.so");

        assert!(module.is_loaded());
        let held = module.take_handle().unwrap();
        assert!(!module.is_loaded());
        // Simulates an in-flight invoke still holding its clone.
        assert!(loader.closed().is_empty());
        drop(held);
        assert_eq!(loader.closed(), vec![PathBuf::from("/mods/c.so")]);
    }
}
