//! File-change subscriptions driving hot reload.
//!
//! The module manager only sees the [`FileWatcher`] contract: register a
//! debounced, at-least-once change notification per file, cancel it on
//! unload. [`DebouncedWatcher`] is the OS-backed implementation;
//! [`ManualWatcher`] lets a host (or a test) fire the notifications itself.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use parking_lot::Mutex;
use tracing::warn;

/// Callback fired after a subscribed file changed on disk.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to start file watcher: {0}")]
    Init(#[source] notify::Error),

    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Contract between the module manager and whatever watches the filesystem.
///
/// Notifications are at-least-once and debounced: the callback must never
/// observe a file mid-write. Callbacks may re-enter the watcher (a reload
/// removes its own subscription and re-arms a fresh one).
pub trait FileWatcher: Send + Sync {
    /// Register a change notification for `path`. Replaces any previous
    /// subscription for the same path.
    fn add_file(&self, path: &Path, on_change: ChangeCallback) -> Result<(), WatchError>;

    /// Cancel the subscription for `path`. No-op when none exists.
    fn remove_file(&self, path: &Path);
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Debounced file watcher backed by `notify`.
///
/// One OS watcher serves every subscription; events inside the debounce
/// window collapse into a single callback per subscribed path.
pub struct DebouncedWatcher {
    debouncer: Mutex<Debouncer<RecommendedWatcher, FileIdMap>>,
    subscriptions: Arc<Mutex<HashMap<PathBuf, ChangeCallback>>>,
}

impl DebouncedWatcher {
    /// Default debounce window.
    pub const DEBOUNCE: Duration = Duration::from_millis(300);

    pub fn new() -> Result<Self, WatchError> {
        let subscriptions: Arc<Mutex<HashMap<PathBuf, ChangeCallback>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let subs = subscriptions.clone();
        let debouncer = new_debouncer(
            Self::DEBOUNCE,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    // Collect matching callbacks first, call with no lock
                    // held — a callback may remove or re-add subscriptions.
                    let mut fired: HashSet<PathBuf> = HashSet::new();
                    let mut callbacks: Vec<ChangeCallback> = Vec::new();
                    {
                        let subs = subs.lock();
                        for event in &events {
                            for path in &event.paths {
                                let path = canonical(path);
                                if let Some(callback) = subs.get(&path) {
                                    if fired.insert(path) {
                                        callbacks.push(callback.clone());
                                    }
                                }
                            }
                        }
                    }
                    for callback in callbacks {
                        callback();
                    }
                }
                Err(errors) => {
                    for err in errors {
                        warn!(error = %err, "file watcher error");
                    }
                }
            },
        )
        .map_err(WatchError::Init)?;

        Ok(Self {
            debouncer: Mutex::new(debouncer),
            subscriptions,
        })
    }
}

impl FileWatcher for DebouncedWatcher {
    fn add_file(&self, path: &Path, on_change: ChangeCallback) -> Result<(), WatchError> {
        let key = canonical(path);
        self.debouncer
            .lock()
            .watcher()
            .watch(&key, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Watch {
                path: path.to_path_buf(),
                source,
            })?;
        self.subscriptions.lock().insert(key, on_change);
        Ok(())
    }

    fn remove_file(&self, path: &Path) {
        let key = canonical(path);
        if self.subscriptions.lock().remove(&key).is_some() {
            if let Err(err) = self.debouncer.lock().watcher().unwatch(&key) {
                warn!(path = %key.display(), error = %err, "failed to unwatch file");
            }
        }
    }
}

/// Watcher driven by explicit [`fire`](Self::fire) calls.
///
/// For hosts that already know when a module file changed (a build hook, a
/// deploy script) and for deterministic tests.
#[derive(Default)]
pub struct ManualWatcher {
    subscriptions: Mutex<HashMap<PathBuf, ChangeCallback>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the callback registered for `path`. Returns whether one fired.
    pub fn fire(&self, path: &Path) -> bool {
        let callback = self.subscriptions.lock().get(path).cloned();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Currently subscribed paths, in no particular order.
    pub fn watched(&self) -> Vec<PathBuf> {
        self.subscriptions.lock().keys().cloned().collect()
    }
}

impl FileWatcher for ManualWatcher {
    fn add_file(&self, path: &Path, on_change: ChangeCallback) -> Result<(), WatchError> {
        self.subscriptions
            .lock()
            .insert(path.to_path_buf(), on_change);
        Ok(())
    }

    fn remove_file(&self, path: &Path) {
        self.subscriptions.lock().remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn manual_watcher_fires_registered_callback() {
        let watcher = ManualWatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        watcher
            .add_file(
                Path::new("/mods/a.so"),
                Arc::new(move || {
                    counted.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(watcher.fire(Path::new("/mods/a.so")));
        assert!(!watcher.fire(Path::new("/mods/other.so")));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        watcher.remove_file(Path::new("/mods/a.so"));
        assert!(!watcher.fire(Path::new("/mods/a.so")));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_remove_and_rearm_its_own_subscription() {
        // The hot-reload path does exactly this: unload removes the watch,
        // the subsequent load re-arms it.
        let watcher = Arc::new(ManualWatcher::new());
        let inner = watcher.clone();
        let path = PathBuf::from("/mods/self.so");
        let rearm_path = path.clone();
        watcher
            .add_file(
                &path,
                Arc::new(move || {
                    inner.remove_file(&rearm_path);
                    let _ = inner.add_file(&rearm_path, Arc::new(|| {}));
                }),
            )
            .unwrap();

        assert!(watcher.fire(&path));
        assert_eq!(watcher.watched(), vec![path]);
    }

    #[test]
    fn debounced_watcher_watches_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("module.so");
        std::fs::write(&file, b"x").unwrap();

        let watcher = DebouncedWatcher::new().unwrap();
        watcher.add_file(&file, Arc::new(|| {})).unwrap();
        watcher.remove_file(&file);
    }
}
