//! modhost — a host application's dynamic module runtime.
//!
//! Loads independently compiled native code units ("modules") by logical
//! name, invokes named entry points inside them, and optionally hot-swaps a
//! module in place when its backing file changes on disk, without restarting
//! the host process.
//!
//! A module is a bag of optionally-present, no-argument native entry points.
//! There is no interface contract to verify, no dependency graph between
//! modules, and no sandbox: loaded code runs with full host privileges and a
//! crash inside a module is fatal to the host.
//!
//! The pieces compose explicitly — nothing is reachable through global state:
//!
//! ```no_run
//! use std::sync::Arc;
//! use modhost::{Launcher, ModuleManager, SystemLoader, DebouncedWatcher};
//!
//! let watcher = Arc::new(DebouncedWatcher::new().unwrap());
//! let manager = ModuleManager::new(Arc::new(SystemLoader::new()), watcher);
//! let launcher = Launcher::new(manager);
//! if let Some(config) = launcher.init(&Launcher::config_candidates()) {
//!     launcher.run_autorun(&config);
//! }
//! launcher.run("game", "main", true);
//! let _ = launcher.join_all();
//! launcher.shutdown();
//! ```

pub mod config;
pub mod launcher;
pub mod loader;
pub mod manager;
pub mod module;
pub mod watch;

pub use config::HostConfig;
pub use launcher::{InvocationError, InvocationHandle, Launcher};
pub use loader::{EntryFn, LibraryHandle, NativeLoader, SystemLoader};
pub use manager::ModuleManager;
pub use module::Module;
pub use watch::{DebouncedWatcher, FileWatcher, ManualWatcher};
