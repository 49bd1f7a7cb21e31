//! Rebuilds the index when a descriptor directory changes.
//!
//! Events from `notify` are batched by `notify-debouncer-mini`, so a package
//! manager writing many files at once costs one rebuild.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::repository::Indexer;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to start directory watcher: {0}")]
    Notify(#[from] notify::Error),

    #[error("Failed to start watcher thread: {0}")]
    Thread(#[from] io::Error),
}

/// Watches every existing descriptor directory recursively and calls
/// [`Indexer::rebuild`] after each debounced batch of events. Directories
/// that do not exist yet are not watched.
pub fn spawn_directory_watcher(
    indexer: Arc<Indexer>,
    debounce: Duration,
) -> Result<(), WatchError> {
    let (tx, rx) = mpsc::channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(debounce, tx)?;

    let mut watched = 0usize;
    for dir in indexer.dirs() {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Descriptor directory missing; not watching");
            continue;
        }
        match debouncer.watcher().watch(dir, RecursiveMode::Recursive) {
            Ok(()) => watched += 1,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "Failed to watch descriptor directory")
            }
        }
    }
    info!(watched, debounce_ms = debounce.as_millis() as u64, "Directory watcher started");

    thread::Builder::new()
        .name("indexd-watch".to_string())
        .spawn(move || {
            let _debouncer = debouncer;
            for result in rx {
                match result {
                    Ok(events) => {
                        debug!(events = events.len(), "Descriptor directories changed");
                        if let Err(err) = indexer.rebuild("rescan") {
                            warn!(error = %err, "Index rebuild after change failed");
                        }
                    }
                    Err(err) => warn!(error = %err, "Directory watcher error"),
                }
            }
        })?;
    Ok(())
}
