// SPDX-License-Identifier: MIT
//! Platform dynamic-loading primitive.
//!
//! Everything OS-specific sits behind [`NativeLoader`], so the load/unload/
//! invoke logic above is platform-agnostic and can be unit-tested against a
//! [`fake::FakeLoader`] that injects load and resolution failures
//! deterministically.

pub mod fake;
mod system;

pub use system::SystemLoader;

use std::any::Any;
use std::path::Path;

/// A module entry point: a no-argument, no-return, unmangled native function.
pub type EntryFn = unsafe extern "C" fn();

/// Opaque handle to an open native library.
///
/// Dropping the handle closes the library. The runtime stores handles behind
/// `Arc`, so the actual close is deferred until the last in-flight invoke
/// releases its clone — an unload concurrent with a running entry point never
/// unmaps code under the call.
pub struct LibraryHandle(Box<dyn Any + Send + Sync>);

impl LibraryHandle {
    pub fn new(inner: impl Any + Send + Sync) -> Self {
        Self(Box::new(inner))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

/// Per-OS dynamic-loading facility.
///
/// `open` maps to `LoadLibrary` on Windows-family systems and `dlopen` on
/// POSIX; `resolve` to `GetProcAddress` / `dlsym`. Failures are communicated
/// as `None`: a missing library and a missing symbol are states the runtime
/// logs and degrades around, never errors it propagates.
pub trait NativeLoader: Send + Sync {
    /// Open the library at `path`. `None` on failure.
    fn open(&self, path: &Path) -> Option<LibraryHandle>;

    /// Resolve an exported entry point by name. `None` when the symbol is
    /// absent or the handle did not come from this loader.
    fn resolve(&self, handle: &LibraryHandle, name: &str) -> Option<EntryFn>;
}
