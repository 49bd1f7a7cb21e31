//! Wire protocol for the indexd application-index daemon.
//!
//! This crate is shared by the daemon and its clients to prevent format drift.
//! The protocol is line oriented text: every message opens with the 5-byte
//! [`MAGIC`] token, requests are an optional argument line followed by one
//! command line, and responses are `key: value` headers, a blank line and an
//! optional body closed by a second blank line.

use std::fmt;
use std::io::{BufRead, Read};

mod client;
mod request;
mod response;

pub use client::Client;
pub use request::{classify_line, Line, Request, RequestReader};
pub use response::Response;

/// Opens every message in both directions.
pub const MAGIC_STR: &str = "TXT01";
pub const MAGIC: &[u8] = MAGIC_STR.as_bytes();
/// Longest request line the daemon accepts, newline included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

pub const HEADER_CMD: &str = "cmd";
pub const HEADER_STATUS: &str = "status";
pub const HEADER_LEN: &str = "len";
pub const HEADER_ERROR_CMD: &str = "error-cmd";
pub const HEADER_ERROR: &str = "error";
pub const HEADER_DESC: &str = "desc";

/// Errors raised while encoding, decoding or exchanging messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid magic token: expected {expected:?}, got {got:?}")]
    BadMagic { expected: String, got: String },

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("connection closed in the middle of a message")]
    UnexpectedEof,

    #[error("message line exceeded {MAX_LINE_BYTES} bytes")]
    LineTooLong,

    #[error("response body was not followed by a blank line")]
    MissingTerminator,
}

/// Reads one `\n`-terminated line of at most [`MAX_LINE_BYTES`].
///
/// Returns `Ok(None)` on a clean end of stream. A final line without a
/// newline is returned as is. Invalid UTF-8 is replaced, not rejected.
pub fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, ProtocolError> {
    let mut buffer = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', &mut buffer)?;
    if read == 0 {
        return Ok(None);
    }
    if read == MAX_LINE_BYTES && buffer.last() != Some(&b'\n') {
        return Err(ProtocolError::LineTooLong);
    }
    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}

/// Which attribute of an entry a predicate looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Name,
    Category,
    Path,
}

impl FilterKind {
    pub const ALL: [FilterKind; 3] = [FilterKind::Name, FilterKind::Category, FilterKind::Path];

    fn wire_suffix(self) -> &'static str {
        match self {
            FilterKind::Name => "name",
            FilterKind::Category => "cat",
            FilterKind::Path => "path",
        }
    }
}

/// `filter-x` replaces every predicate of its kind, `+filter-x` adds one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Replace,
    Accumulate,
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Filter { kind: FilterKind, mode: FilterMode },
    ResetFilters,
    Lang,
    Run,
    Reindex,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "list" => return Command::List,
            "0filters" => return Command::ResetFilters,
            "lang" => return Command::Lang,
            "run" => return Command::Run,
            "reindex" => return Command::Reindex,
            _ => {}
        }

        let (mode, rest) = match line.strip_prefix('+') {
            Some(rest) => (FilterMode::Accumulate, rest),
            None => (FilterMode::Replace, line),
        };
        if let Some(suffix) = rest.strip_prefix("filter-") {
            if let Some(kind) = FilterKind::ALL
                .into_iter()
                .find(|kind| kind.wire_suffix() == suffix)
            {
                return Command::Filter { kind, mode };
            }
        }

        Command::Unknown(line.to_string())
    }

    /// Whether the command reads the pending argument. `reindex` treats it
    /// as optional.
    pub fn takes_argument(&self) -> bool {
        matches!(
            self,
            Command::Filter { .. } | Command::Lang | Command::Run | Command::Reindex
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::List => f.write_str("list"),
            Command::Filter { kind, mode } => {
                if *mode == FilterMode::Accumulate {
                    f.write_str("+")?;
                }
                write!(f, "filter-{}", kind.wire_suffix())
            }
            Command::ResetFilters => f.write_str("0filters"),
            Command::Lang => f.write_str("lang"),
            Command::Run => f.write_str("run"),
            Command::Reindex => f.write_str("reindex"),
            Command::Unknown(name) => f.write_str(name),
        }
    }
}

/// Non-zero `status` values carried by error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MissingArgument,
    InvalidArgument,
    NotFound,
    LaunchFailed,
    UnknownCommand,
    MalformedRequest,
    IndexUnavailable,
}

impl ErrorCode {
    pub fn status(self) -> u8 {
        match self {
            ErrorCode::MissingArgument => 1,
            ErrorCode::InvalidArgument => 2,
            ErrorCode::NotFound => 3,
            ErrorCode::LaunchFailed => 4,
            ErrorCode::UnknownCommand => 5,
            ErrorCode::MalformedRequest => 6,
            ErrorCode::IndexUnavailable => 7,
        }
    }

    /// Short kind written to the `error` header.
    pub fn label(self) -> &'static str {
        match self {
            ErrorCode::MissingArgument => "missing argument",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::NotFound => "index not found",
            ErrorCode::LaunchFailed => "execution failed",
            ErrorCode::UnknownCommand => "unknown command",
            ErrorCode::MalformedRequest => "invalid header",
            ErrorCode::IndexUnavailable => "index unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(Command::parse("list"), Command::List);
        assert_eq!(Command::parse("0filters"), Command::ResetFilters);
        assert_eq!(Command::parse(" lang "), Command::Lang);
        assert_eq!(Command::parse("run"), Command::Run);
        assert_eq!(Command::parse("reindex"), Command::Reindex);
    }

    #[test]
    fn parses_filter_modes_and_kinds() {
        assert_eq!(
            Command::parse("filter-name"),
            Command::Filter {
                kind: FilterKind::Name,
                mode: FilterMode::Replace
            }
        );
        assert_eq!(
            Command::parse("+filter-cat"),
            Command::Filter {
                kind: FilterKind::Category,
                mode: FilterMode::Accumulate
            }
        );
        assert_eq!(
            Command::parse("+filter-path"),
            Command::Filter {
                kind: FilterKind::Path,
                mode: FilterMode::Accumulate
            }
        );
    }

    #[test]
    fn unknown_commands_keep_their_name() {
        assert_eq!(
            Command::parse("+filter-icon"),
            Command::Unknown("+filter-icon".to_string())
        );
        assert_eq!(
            Command::parse("saveconf"),
            Command::Unknown("saveconf".to_string())
        );
    }

    #[test]
    fn display_matches_wire_form() {
        let wires = [
            "list",
            "filter-name",
            "+filter-name",
            "filter-cat",
            "+filter-path",
            "0filters",
            "lang",
            "run",
            "reindex",
        ];
        for wire in wires {
            assert_eq!(Command::parse(wire).to_string(), wire);
        }
    }

    #[test]
    fn read_line_splits_on_newline_and_keeps_partial_tail() {
        let mut cursor = std::io::Cursor::new(b"list\n\"ru".to_vec());
        assert_eq!(read_line(&mut cursor).expect("line").as_deref(), Some("list\n"));
        assert_eq!(read_line(&mut cursor).expect("tail").as_deref(), Some("\"ru"));
        assert_eq!(read_line(&mut cursor).expect("eof"), None);
    }

    #[test]
    fn read_line_rejects_oversized_lines() {
        let mut cursor = std::io::Cursor::new(vec![b'a'; MAX_LINE_BYTES + 10]);
        assert!(matches!(
            read_line(&mut cursor),
            Err(ProtocolError::LineTooLong)
        ));
    }

    #[test]
    fn only_argument_commands_take_arguments() {
        assert!(Command::parse("+filter-cat").takes_argument());
        assert!(Command::Run.takes_argument());
        assert!(Command::Lang.takes_argument());
        assert!(!Command::List.takes_argument());
        assert!(!Command::ResetFilters.takes_argument());
        assert!(Command::Reindex.takes_argument());
    }

    #[test]
    fn error_statuses_are_non_zero_and_distinct() {
        let codes = [
            ErrorCode::MissingArgument,
            ErrorCode::InvalidArgument,
            ErrorCode::NotFound,
            ErrorCode::LaunchFailed,
            ErrorCode::UnknownCommand,
            ErrorCode::MalformedRequest,
            ErrorCode::IndexUnavailable,
        ];
        let mut statuses: Vec<u8> = codes.iter().map(|code| code.status()).collect();
        assert!(statuses.iter().all(|status| *status != 0));
        statuses.sort_unstable();
        statuses.dedup();
        assert_eq!(statuses.len(), codes.len());
    }
}
