// SPDX-License-Identifier: MIT
//! `libloading`-backed loader — the production implementation.

use std::path::Path;

use libloading::Library;
use tracing::debug;

use super::{EntryFn, LibraryHandle, NativeLoader};

/// Loads native libraries through `libloading` (`dlopen` on POSIX,
/// `LoadLibraryExW` on Windows).
#[derive(Debug, Default)]
pub struct SystemLoader;

impl SystemLoader {
    pub fn new() -> Self {
        Self
    }
}

impl NativeLoader for SystemLoader {
    fn open(&self, path: &Path) -> Option<LibraryHandle> {
        // SAFETY: opening a library runs its initializers. Modules are
        // trusted host extensions; the runtime offers no sandbox.
        match unsafe { Library::new(path) } {
            Ok(lib) => {
                debug!(path = %path.display(), "library opened");
                Some(LibraryHandle::new(lib))
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "library open failed");
                None
            }
        }
    }

    fn resolve(&self, handle: &LibraryHandle, name: &str) -> Option<EntryFn> {
        let lib = handle.downcast_ref::<Library>()?;
        // SAFETY: entry points are `extern "C" fn()` by convention. The raw
        // pointer copied out of the Symbol is only called while the handle is
        // alive; the module holds its Arc'd handle across every call.
        let symbol = unsafe { lib.get::<EntryFn>(name.as_bytes()).ok()? };
        Some(*symbol)
    }
}
