//! indexd entrypoint.
//!
//! Indexes installed desktop applications and answers filter, language and
//! launch requests from local clients over a Unix socket. Each connection has
//! its own filters and language; all connections read the same immutable
//! index generation.

use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod desktop_entry;
mod dispatch;
mod filter;
mod launcher;
mod repository;
mod server;
mod session;
mod shutdown;
mod watcher;

use config::DaemonConfig;
use dispatch::Dispatcher;
use launcher::{Launcher, ProcessSpawner};
use repository::Indexer;
use server::Server;

const DEBUG_LOG_ENV: &str = "ADE_INDEXD_DEBUG_LOG";

fn main() {
    init_logging();

    let config = DaemonConfig::load();
    info!(
        socket = %config.socket_path.display(),
        workers = config.workers,
        terminal = %config.terminal,
        dirs = ?config.application_dirs,
        watch_ms = config.watch_debounce.map(|debounce| debounce.as_millis() as u64),
        executable_dirs = ?config.executable_dirs,
        "indexd config loaded"
    );

    let listener = match server::bind(&config.socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "Failed to bind indexd socket");
            std::process::exit(1);
        }
    };

    if let Err(err) = shutdown::spawn_signal_handler(config.socket_path.clone()) {
        error!(error = %err, "Failed to start signal handler");
        server::remove_socket(&config.socket_path);
        std::process::exit(1);
    }

    let indexer = Arc::new(Indexer::new(
        config.application_dirs.clone(),
        config.executable_dirs.clone(),
    ));
    if let Some(debounce) = config.watch_debounce {
        if let Err(err) = watcher::spawn_directory_watcher(Arc::clone(&indexer), debounce) {
            warn!(error = %err, "Directory watching disabled");
        }
    }
    match indexer.rebuild("startup") {
        Ok(index) if index.entries().is_empty() => {
            warn!("No applications found; serving an empty index")
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "Initial index build failed; serving an empty index"),
    }

    let launcher = Launcher::new(&config.terminal, Arc::new(ProcessSpawner));
    let dispatcher = Arc::new(Dispatcher::new(indexer, launcher));
    let server = Server::new(listener, config.socket_path.clone(), config.workers, dispatcher);

    info!(path = %config.socket_path.display(), "indexd started");
    server.serve();
}

fn init_logging() {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
