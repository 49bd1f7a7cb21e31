//! Request side of the protocol: line classification and the argument/command
//! state machine.

use std::fmt::Write as _;

use crate::{Command, MAGIC_STR};

/// One classified request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Empty lines and `#` comments.
    Blank,
    Argument(String),
    Command(Command),
}

/// Classifies a single request line (trailing newline optional).
///
/// A leading magic token is stripped so clients that prefix every request
/// with it are accepted alongside clients that send it once per connection.
pub fn classify_line(raw: &str) -> Line {
    let mut line = raw.trim();
    if let Some(rest) = line.strip_prefix(MAGIC_STR) {
        line = rest.trim_start();
    }

    if line.is_empty() || line.starts_with('#') {
        return Line::Blank;
    }
    if let Some(value) = line.strip_prefix('"') {
        return Line::Argument(value.to_string());
    }
    if is_numeric(line) {
        return Line::Argument(line.to_string());
    }
    Line::Command(Command::parse(line))
}

/// ASCII digits with an optional leading `-`, of any length.
fn is_numeric(line: &str) -> bool {
    let digits = line.strip_prefix('-').unwrap_or(line);
    !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit())
}

/// A complete request: one command plus the argument line that preceded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub argument: Option<String>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            argument: None,
        }
    }

    pub fn with_argument(command: Command, argument: impl Into<String>) -> Self {
        Self {
            command,
            argument: Some(argument.into()),
        }
    }

    /// Wire form without the magic token.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(argument) = &self.argument {
            let _ = writeln!(out, "\"{}", argument.replace('\n', " "));
        }
        let _ = writeln!(out, "{}", self.command);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum ReaderState {
    #[default]
    AwaitingArgument,
    AwaitingCommand {
        argument: String,
    },
}

/// Two-state reader turning request lines into [`Request`]s.
///
/// It is fed one line at a time and is independent of how the transport
/// buffers bytes. An argument line moves it to `AwaitingCommand`; the next
/// command line completes the request and resets it.
#[derive(Debug, Default)]
pub struct RequestReader {
    state: ReaderState,
}

impl RequestReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, raw_line: &str) -> Option<Request> {
        match classify_line(raw_line) {
            Line::Blank => None,
            Line::Argument(value) => {
                if let ReaderState::AwaitingCommand { argument } = &self.state {
                    tracing::debug!(dropped = %argument, "Pending argument replaced");
                }
                self.state = ReaderState::AwaitingCommand { argument: value };
                None
            }
            Line::Command(command) => {
                let argument = match std::mem::take(&mut self.state) {
                    ReaderState::AwaitingArgument => None,
                    ReaderState::AwaitingCommand { argument } => Some(argument),
                };
                Some(Request { command, argument })
            }
        }
    }

    pub fn pending_argument(&self) -> Option<&str> {
        match &self.state {
            ReaderState::AwaitingArgument => None,
            ReaderState::AwaitingCommand { argument } => Some(argument),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FilterKind, FilterMode};

    #[test]
    fn classifies_line_types() {
        assert_eq!(classify_line("\n"), Line::Blank);
        assert_eq!(classify_line("# comment\n"), Line::Blank);
        assert_eq!(
            classify_line("\"Dummy\n"),
            Line::Argument("Dummy".to_string())
        );
        assert_eq!(classify_line("999999\n"), Line::Argument("999999".to_string()));
        assert_eq!(classify_line("list\n"), Line::Command(Command::List));
    }

    #[test]
    fn numeric_lines_of_any_length_are_arguments() {
        assert_eq!(
            classify_line("18446744073709551616\n"),
            Line::Argument("18446744073709551616".to_string())
        );
        assert_eq!(
            classify_line("-99999999999999999999\n"),
            Line::Argument("-99999999999999999999".to_string())
        );
        assert_eq!(
            classify_line("-\n"),
            Line::Command(Command::Unknown("-".to_string()))
        );
        assert_eq!(
            classify_line("12ab\n"),
            Line::Command(Command::Unknown("12ab".to_string()))
        );

        let mut reader = RequestReader::new();
        assert_eq!(reader.feed("TXT0118446744073709551616\n"), None);
        let request = reader.feed("run\n").expect("request");
        assert_eq!(request.command, Command::Run);
        assert_eq!(request.argument.as_deref(), Some("18446744073709551616"));
    }

    #[test]
    fn quoted_argument_keeps_inner_spaces() {
        assert_eq!(
            classify_line("\"Dummy App\r\n"),
            Line::Argument("Dummy App".to_string())
        );
        assert_eq!(classify_line("\"\n"), Line::Argument(String::new()));
    }

    #[test]
    fn strips_magic_prefix() {
        assert_eq!(classify_line("TXT01list\n"), Line::Command(Command::List));
        assert_eq!(
            classify_line("TXT01\"ru\n"),
            Line::Argument("ru".to_string())
        );
    }

    #[test]
    fn command_without_argument() {
        let mut reader = RequestReader::new();
        assert_eq!(reader.feed("list\n"), Some(Request::new(Command::List)));
        assert_eq!(reader.pending_argument(), None);
    }

    #[test]
    fn argument_is_buffered_until_command() {
        let mut reader = RequestReader::new();
        assert_eq!(reader.feed("\"Dummy\n"), None);
        assert_eq!(reader.pending_argument(), Some("Dummy"));
        assert_eq!(reader.feed("\n"), None);

        let request = reader.feed("+filter-name\n").expect("request");
        assert_eq!(
            request.command,
            Command::Filter {
                kind: FilterKind::Name,
                mode: FilterMode::Accumulate
            }
        );
        assert_eq!(request.argument.as_deref(), Some("Dummy"));
        assert_eq!(reader.pending_argument(), None);

        assert_eq!(reader.feed("list\n"), Some(Request::new(Command::List)));
    }

    #[test]
    fn later_argument_replaces_pending_one() {
        let mut reader = RequestReader::new();
        reader.feed("\"en\n");
        reader.feed("\"ru\n");
        let request = reader.feed("lang\n").expect("request");
        assert_eq!(request.argument.as_deref(), Some("ru"));
    }

    #[test]
    fn encode_produces_argument_then_command() {
        let request = Request::with_argument(Command::Lang, "ru");
        assert_eq!(request.encode(), "\"ru\nlang\n");
        assert_eq!(Request::new(Command::ResetFilters).encode(), "0filters\n");
    }

    #[test]
    fn encoded_request_reads_back() {
        let request = Request::with_argument(Command::parse("+filter-cat"), "Utility");
        let mut reader = RequestReader::new();
        let mut parsed = None;
        for line in request.encode().split_inclusive('\n') {
            parsed = reader.feed(line).or(parsed);
        }
        assert_eq!(parsed, Some(request));
    }
}
