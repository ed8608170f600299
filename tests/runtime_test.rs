//! End-to-end runtime tests against the deterministic loader and watcher
//! doubles: discovery, idempotent loading, invocation caching, hot reload,
//! and ordered shutdown, all through the public API.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use modhost::loader::fake::FakeLoader;
use modhost::{Launcher, ManualWatcher, ModuleManager};

fn module_filename(name: &str) -> String {
    format!("{name}{}", std::env::consts::DLL_SUFFIX)
}

fn install_module(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(module_filename(name));
    std::fs::write(&path, name).unwrap();
    path
}

struct Harness {
    manager: Arc<ModuleManager>,
    loader: FakeLoader,
    watcher: Arc<ManualWatcher>,
    _dir: tempfile::TempDir,
    dir: PathBuf,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let loader = FakeLoader::new();
    let watcher = Arc::new(ManualWatcher::new());
    let manager = ModuleManager::new(Arc::new(loader.clone()), watcher.clone());
    manager.add_search_directory(dir.path());
    let path = dir.path().to_path_buf();
    Harness {
        manager,
        loader,
        watcher,
        dir: path,
        _dir: dir,
    }
}

#[test]
fn load_resolves_unload_forgets() {
    let h = harness();
    let file = install_module(&h.dir, "engine");

    let module = h.manager.load_module("engine").unwrap();
    assert_eq!(module.file(), file);
    assert!(h.manager.get_module("engine").is_some());
    assert_eq!(h.manager.loaded_modules().len(), 1);

    h.manager.unload_module("engine");
    assert!(h.manager.get_module("engine").is_none());
    assert!(h.manager.loaded_modules().is_empty());
}

#[test]
fn double_load_is_idempotent() {
    let h = harness();
    install_module(&h.dir, "engine");

    let first = h.manager.load_module("engine").unwrap();
    let second = h.manager.load_module("engine").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.manager.loaded_modules().len(), 1);
    assert_eq!(h.loader.opened().len(), 1);
}

#[test]
fn invoke_caches_the_symbol_resolution() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    extern "C" fn entry() {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    let h = harness();
    let file = install_module(&h.dir, "engine");
    h.loader.export(&file, "main", entry);

    let module = h.manager.load_module("engine").unwrap();
    module.invoke("main");
    module.invoke("main");
    module.invoke("main");

    assert_eq!(CALLS.load(Ordering::SeqCst), 3);
    assert_eq!(h.loader.resolve_count("main"), 1);
}

#[test]
fn missing_entry_point_never_errors() {
    let h = harness();
    install_module(&h.dir, "engine");

    let module = h.manager.load_module("engine").unwrap();
    module.invoke("nonexistent");
    module.invoke("nonexistent");
    module.invoke("nonexistent");
    assert_eq!(h.loader.resolve_count("nonexistent"), 1);
}

#[test]
fn hot_reload_cycles_once_per_change() {
    let h = harness();
    h.manager.set_hot_reload(true);
    let file = install_module(&h.dir, "engine");

    let before = h.manager.load_module("engine").unwrap();
    let old_runtime = before.runtime_file().to_path_buf();
    assert_ne!(old_runtime, file);

    std::fs::write(&file, b"new code").unwrap();
    assert!(h.watcher.fire(&file));

    let after = h.manager.get_module("engine").unwrap();
    assert_eq!(after.name(), "engine");
    assert_eq!(after.file(), file);
    assert_ne!(after.runtime_file(), old_runtime);

    // Exactly one unload, then one reload.
    assert_eq!(h.loader.closed(), vec![old_runtime]);
    assert_eq!(h.loader.opened().len(), 2);
    assert_eq!(h.manager.loaded_modules().len(), 1);
}

#[test]
fn shutdown_unloads_in_reverse_load_order() {
    let h = harness();
    let file_a = install_module(&h.dir, "a");
    let file_b = install_module(&h.dir, "b");
    let file_c = install_module(&h.dir, "c");

    let launcher = Launcher::new(h.manager.clone());
    launcher.load("a");
    launcher.load("b");
    launcher.load("c");
    launcher.shutdown();

    assert_eq!(h.loader.closed(), vec![file_c, file_b, file_a]);
}

#[test]
fn installed_modules_honors_precedence_and_dedupes() {
    let h = harness();
    install_module(&h.dir, "engine");
    let other = tempfile::tempdir().unwrap();
    install_module(other.path(), "engine");
    install_module(other.path(), "audio");
    h.manager.add_search_directory(other.path());

    let mut names = h.manager.installed_modules();
    assert_eq!(names.iter().filter(|n| n.as_str() == "engine").count(), 1);
    names.sort();
    assert_eq!(names, vec!["audio", "engine"]);

    // Precedence matches load_module: the first directory's file wins.
    let module = h.manager.load_module("engine").unwrap();
    assert_eq!(module.file(), h.dir.join(module_filename("engine")));
}

#[test]
fn launcher_runs_entry_points_on_tracked_threads() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    extern "C" fn entry() {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    let h = harness();
    let file = install_module(&h.dir, "worker");
    h.loader.export(&file, "main", entry);

    let launcher = Launcher::new(h.manager.clone());
    launcher.run("worker", "main", true);
    assert!(launcher.join_all().is_ok());
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);

    launcher.shutdown();
    assert!(h.manager.loaded_modules().is_empty());
}
