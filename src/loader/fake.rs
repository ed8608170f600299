// SPDX-License-Identifier: MIT
//! Deterministic in-memory loader for tests.
//!
//! Injects the failure modes the runtime has to survive — file present but
//! unloadable, symbol absent — without touching the OS loader. Every open,
//! resolve, and close is recorded so tests can assert counts and ordering.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{EntryFn, LibraryHandle, NativeLoader};

/// One recorded loader event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    Opened(PathBuf),
    Resolved { path: PathBuf, symbol: String },
    Closed(PathBuf),
}

#[derive(Default)]
struct FakeState {
    /// Exported entry points per library path.
    symbols: HashMap<PathBuf, HashMap<String, EntryFn>>,
    /// Paths whose `open` is forced to fail.
    broken: HashSet<PathBuf>,
    log: Vec<LoaderEvent>,
}

/// Handle payload: remembers its path and records its own close.
struct FakeHandle {
    path: PathBuf,
    state: Arc<Mutex<FakeState>>,
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.state
            .lock()
            .log
            .push(LoaderEvent::Closed(self.path.clone()));
    }
}

/// In-memory [`NativeLoader`] with programmable faults.
///
/// Clones share state, so a test can keep one copy for assertions while the
/// runtime owns another.
#[derive(Clone, Default)]
pub struct FakeLoader {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an exported entry point for a library path.
    pub fn export(&self, path: impl Into<PathBuf>, symbol: &str, entry: EntryFn) {
        self.state
            .lock()
            .symbols
            .entry(path.into())
            .or_default()
            .insert(symbol.to_string(), entry);
    }

    /// Force `open` to fail for this path.
    pub fn break_library(&self, path: impl Into<PathBuf>) {
        self.state.lock().broken.insert(path.into());
    }

    /// Everything the runtime did, in order.
    pub fn events(&self) -> Vec<LoaderEvent> {
        self.state.lock().log.clone()
    }

    /// Successfully opened paths, in open order.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|event| match event {
                LoaderEvent::Opened(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Closed paths, in close order.
    pub fn closed(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|event| match event {
                LoaderEvent::Closed(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// How many times `symbol` was looked up, across all libraries.
    pub fn resolve_count(&self, symbol: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|event| matches!(event, LoaderEvent::Resolved { symbol: s, .. } if s == symbol))
            .count()
    }
}

impl NativeLoader for FakeLoader {
    fn open(&self, path: &Path) -> Option<LibraryHandle> {
        let mut state = self.state.lock();
        if state.broken.contains(path) {
            return None;
        }
        state.log.push(LoaderEvent::Opened(path.to_path_buf()));
        drop(state);
        Some(LibraryHandle::new(FakeHandle {
            path: path.to_path_buf(),
            state: self.state.clone(),
        }))
    }

    fn resolve(&self, handle: &LibraryHandle, name: &str) -> Option<EntryFn> {
        let fake = handle.downcast_ref::<FakeHandle>()?;
        let mut state = self.state.lock();
        state.log.push(LoaderEvent::Resolved {
            path: fake.path.clone(),
            symbol: name.to_string(),
        });
        state
            .symbols
            .get(&fake.path)
            .and_then(|exports| exports.get(name))
            .copied()
    }
}
