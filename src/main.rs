//! `modhost` — host executable.
//!
//! Loads the modules named on the command line (plus any autorun entries in
//! `modhost.toml`), waits for their invocation threads, then unloads
//! everything in reverse load order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{ensure, Context as _, Result};
use clap::Parser;
use tracing::info;

use modhost::{DebouncedWatcher, Launcher, ModuleManager, SystemLoader};

#[derive(Parser)]
#[command(name = "modhost", about = "Dynamic module runtime host", version)]
struct Args {
    /// Modules to run, as NAME or NAME:ENTRY (default entry: main)
    modules: Vec<String>,

    /// Configuration file (default: first modhost.toml found up to three directories up)
    #[arg(long, env = "MODHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Additional module search directory (repeatable)
    #[arg(long = "dir")]
    dirs: Vec<PathBuf>,

    /// Run each module's entry point on a dedicated thread
    #[arg(long)]
    threaded: bool,

    /// Disable hot reloading
    #[arg(long)]
    no_hot_reload: bool,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, env = "MODHOST_LOG", default_value = "info")]
    log: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log))
        .init();

    let watcher = Arc::new(DebouncedWatcher::new().context("failed to start file watcher")?);
    let manager = ModuleManager::new(Arc::new(SystemLoader::new()), watcher);
    let launcher = Launcher::new(manager.clone());

    let candidates = config_candidates(args.config.as_deref())?;
    let config = launcher.init(&candidates);

    // CLI overrides apply before anything loads, so autorun entries resolve
    // against --dir directories and honor --no-hot-reload.
    for dir in &args.dirs {
        manager.add_search_directory(dir);
    }
    if args.no_hot_reload {
        manager.set_hot_reload(false);
    }

    info!(
        directory = %std::env::current_dir()?.display(),
        "module host starting"
    );

    if let Some(config) = &config {
        launcher.run_autorun(config);
    }

    for module_arg in &args.modules {
        let (name, entry) = match module_arg.split_once(':') {
            Some((name, entry)) => (name, entry),
            None => (module_arg.as_str(), "main"),
        };
        launcher.run(name, entry, args.threaded);
    }

    let result = launcher.join_all();
    launcher.shutdown();
    result.map_err(Into::into)
}

/// Configuration files to try. An explicitly named file must exist; without
/// one, fall back to the default `modhost.toml` search.
fn config_candidates(explicit: Option<&Path>) -> Result<Vec<PathBuf>> {
    match explicit {
        Some(path) => {
            ensure!(
                path.is_file(),
                "configuration file {} does not exist",
                path.display()
            );
            Ok(vec![path.to_path_buf()])
        }
        None => Ok(Launcher::config_candidates()),
    }
}
