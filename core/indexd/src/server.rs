//! Unix socket listener and per-connection handlers.

use fs_err as fs;
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use indexd_protocol::{read_line, ErrorCode, Response, MAGIC, MAGIC_STR};

use crate::dispatch::Dispatcher;
use crate::session::Session;

/// Reported in `error-cmd` when the connection preamble is wrong.
const PARSER_COMMAND: &str = "parser";

/// Pause after a failed `accept` so a persistent error such as EMFILE does
/// not spin the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Socket path {0} has no parent directory")]
    NoParent(PathBuf),

    #[error("Failed to create socket directory {path}: {source}")]
    PrepareDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} exists and is not a socket")]
    NotASocket(PathBuf),

    #[error("Another daemon is already listening on {0}")]
    InUse(PathBuf),

    #[error("Failed to remove stale socket {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Creates the parent directory, clears a stale socket and binds.
pub fn bind(socket_path: &Path) -> Result<UnixListener, ServerError> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| ServerError::NoParent(socket_path.to_path_buf()))?;
    fs::create_dir_all(parent).map_err(|source| ServerError::PrepareDir {
        path: parent.to_path_buf(),
        source,
    })?;

    remove_stale_socket(socket_path)?;

    UnixListener::bind(socket_path).map_err(|source| ServerError::Bind {
        path: socket_path.to_path_buf(),
        source,
    })
}

fn remove_stale_socket(socket_path: &Path) -> Result<(), ServerError> {
    let metadata = match std::fs::symlink_metadata(socket_path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(ServerError::RemoveStale {
                path: socket_path.to_path_buf(),
                source,
            })
        }
    };
    if !metadata.file_type().is_socket() {
        return Err(ServerError::NotASocket(socket_path.to_path_buf()));
    }
    if UnixStream::connect(socket_path).is_ok() {
        return Err(ServerError::InUse(socket_path.to_path_buf()));
    }

    debug!(path = %socket_path.display(), "Removing stale socket");
    fs::remove_file(socket_path).map_err(|source| ServerError::RemoveStale {
        path: socket_path.to_path_buf(),
        source,
    })
}

/// Best-effort removal used on shutdown.
pub fn remove_socket(socket_path: &Path) {
    match std::fs::remove_file(socket_path) {
        Ok(()) => debug!(path = %socket_path.display(), "Socket removed"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %socket_path.display(), error = %err, "Failed to remove socket"),
    }
}

/// Counting semaphore bounding concurrent connection handlers.
#[derive(Debug)]
pub struct WorkerSlots {
    available: Mutex<usize>,
    freed: Condvar,
}

impl WorkerSlots {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            available: Mutex::new(count),
            freed: Condvar::new(),
        })
    }

    /// Blocks until a slot is free.
    pub fn acquire(self: &Arc<Self>) -> SlotGuard {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            available = self
                .freed
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        SlotGuard {
            slots: Arc::clone(self),
        }
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        self.freed.notify_one();
    }
}

/// Returns its slot when dropped.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<WorkerSlots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.release();
    }
}

pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    slots: Arc<WorkerSlots>,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub fn new(
        listener: UnixListener,
        socket_path: PathBuf,
        workers: usize,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            listener,
            socket_path,
            slots: WorkerSlots::new(workers.max(1)),
            dispatcher,
        }
    }

    /// Accepts connections until the process exits. A slot is taken before
    /// `accept`, so excess clients wait in the listen backlog.
    pub fn serve(&self) {
        let mut next_connection: u64 = 0;
        loop {
            let slot = self.slots.acquire();
            let stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(err) => {
                    warn!(error = %err, "Failed to accept connection");
                    drop(slot);
                    thread::sleep(ACCEPT_RETRY_DELAY);
                    continue;
                }
            };

            next_connection += 1;
            let connection = next_connection;
            let dispatcher = Arc::clone(&self.dispatcher);
            let spawned = thread::Builder::new()
                .name(format!("indexd-conn-{connection}"))
                .spawn(move || {
                    let _slot = slot;
                    handle_connection(stream, connection, &dispatcher);
                });
            if let Err(err) = spawned {
                warn!(connection, error = %err, "Failed to start connection handler");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        remove_socket(&self.socket_path);
    }
}

/// Runs one session: checks the magic token, then answers requests until the
/// peer disconnects or the transport fails.
pub fn handle_connection(stream: UnixStream, connection: u64, dispatcher: &Dispatcher) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(connection, error = %err, "Failed to clone connection stream");
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    let mut magic = [0u8; MAGIC.len()];
    if let Err(err) = reader.read_exact(&mut magic) {
        debug!(connection, error = %err, "Connection closed before magic token");
        return;
    }
    if magic != MAGIC {
        warn!(
            connection,
            got = %String::from_utf8_lossy(&magic),
            "Rejecting connection with bad magic token"
        );
        let response = Response::error(
            PARSER_COMMAND,
            ErrorCode::MalformedRequest,
            format!("expected {MAGIC_STR} token"),
        );
        let _ = writer.write_all(&response.encode());
        return;
    }

    let mut session = Session::new(connection);
    info!(connection, "Client connected");

    loop {
        let line = match read_line(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(connection, error = %err, "Dropping connection after read failure");
                break;
            }
        };
        let Some(request) = session.feed(&line) else {
            continue;
        };

        let response = dispatcher.dispatch(&mut session, request);
        if let Err(err) = writer
            .write_all(&response.encode())
            .and_then(|()| writer.flush())
        {
            debug!(connection, error = %err, "Failed to write response");
            break;
        }
    }

    info!(connection, requests = session.requests(), "Client disconnected");
}
