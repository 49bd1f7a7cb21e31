//! Executes requests against a session and the shared index.
//!
//! Every failure becomes an error response. A failed command leaves the
//! session untouched.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use indexd_protocol::{Command, ErrorCode, Request, Response};

use crate::filter;
use crate::launcher::{LaunchError, Launcher};
use crate::repository::{IndexError, Indexer};
use crate::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{command} requires an argument")]
    MissingArgument { command: String },

    #[error("{command} requires a non-empty argument")]
    EmptyArgument { command: String },

    #[error("{value:?} is not a valid entry id")]
    InvalidId { value: String },

    #[error("{value:?} is not an absolute directory")]
    InvalidPath { value: String },

    #[error("no entry with id {id}")]
    NotFound { id: String },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CommandError::MissingArgument { .. } => ErrorCode::MissingArgument,
            CommandError::EmptyArgument { .. }
            | CommandError::InvalidId { .. }
            | CommandError::InvalidPath { .. } => ErrorCode::InvalidArgument,
            CommandError::NotFound { .. } => ErrorCode::NotFound,
            CommandError::Launch(_) => ErrorCode::LaunchFailed,
            CommandError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            CommandError::Index(_) => ErrorCode::IndexUnavailable,
        }
    }
}

pub struct Dispatcher {
    indexer: Arc<Indexer>,
    launcher: Launcher,
}

impl Dispatcher {
    pub fn new(indexer: Arc<Indexer>, launcher: Launcher) -> Self {
        Self { indexer, launcher }
    }

    pub fn dispatch(&self, session: &mut Session, request: Request) -> Response {
        let wire = request.command.to_string();
        debug!(
            connection = session.id(),
            command = %wire,
            argument = ?request.argument,
            "Request received"
        );
        match self.execute(session, request) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    connection = session.id(),
                    command = %wire,
                    error = %err,
                    "Request failed"
                );
                Response::error(&wire, err.code(), &err)
            }
        }
    }

    fn execute(&self, session: &mut Session, request: Request) -> Result<Response, CommandError> {
        let Request { command, argument } = request;
        match &command {
            Command::List => {
                let snapshot = self.indexer.snapshot();
                let names = filter::evaluate(&snapshot, &session.filters, &session.language)
                    .into_iter()
                    .map(|(_, name)| name.to_string())
                    .collect();
                Ok(Response::ok(&command).with_body(names))
            }
            Command::Filter { kind, mode } => {
                let value = require(&command, argument)?;
                if value.is_empty() {
                    return Err(CommandError::EmptyArgument {
                        command: command.to_string(),
                    });
                }
                session.filters.apply(*kind, *mode, value);
                Ok(Response::ok(&command))
            }
            Command::ResetFilters => {
                session.filters.clear();
                Ok(Response::ok(&command))
            }
            Command::Lang => {
                session.language = require(&command, argument)?;
                Ok(Response::ok(&command).with_header("lang", &session.language))
            }
            Command::Run => {
                let id = parse_id(&require(&command, argument)?)?;
                let snapshot = self.indexer.snapshot();
                let entry = snapshot.get(id).ok_or_else(|| CommandError::NotFound {
                    id: id.to_string(),
                })?;
                let pid = self.launcher.launch(entry)?;
                info!(
                    connection = session.id(),
                    id,
                    desktop_id = %entry.desktop_id,
                    pid,
                    "Application launched"
                );
                Ok(Response::ok(&command)
                    .with_header("idx", id)
                    .with_header("pid", pid))
            }
            Command::Reindex => {
                let override_dirs = argument.as_deref().and_then(parse_search_dirs).transpose()?;
                let repository = match override_dirs {
                    Some(dirs) => {
                        info!(connection = session.id(), ?dirs, "Reindexing executables from request");
                        self.indexer.rebuild_with_executables("reindex", &dirs)?
                    }
                    None => self.indexer.rebuild("reindex")?,
                };
                Ok(Response::ok(&command)
                    .with_header("entries", repository.len())
                    .with_header("generation", repository.generation()))
            }
            Command::Unknown(name) => Err(CommandError::UnknownCommand(name.clone())),
        }
    }
}

fn require(command: &Command, argument: Option<String>) -> Result<String, CommandError> {
    argument.ok_or_else(|| CommandError::MissingArgument {
        command: command.to_string(),
    })
}

/// Digits that overflow `u64` name an entry that cannot exist.
fn parse_id(value: &str) -> Result<u64, CommandError> {
    let digits = value.trim();
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(CommandError::InvalidId {
            value: value.to_string(),
        });
    }
    digits.parse::<u64>().map_err(|_| CommandError::NotFound {
        id: digits.to_string(),
    })
}

/// Colon-separated absolute directories. `None` when the argument names no
/// directory at all.
fn parse_search_dirs(value: &str) -> Option<Result<Vec<PathBuf>, CommandError>> {
    let parts: Vec<&str> = value
        .split(':')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(
        parts
            .into_iter()
            .map(|part| {
                let dir = PathBuf::from(part);
                if dir.is_absolute() {
                    Ok(dir)
                } else {
                    Err(CommandError::InvalidPath {
                        value: part.to_string(),
                    })
                }
            })
            .collect(),
    )
}
