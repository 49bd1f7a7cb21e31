//! Detached launching of application entries.
//!
//! Process creation sits behind [`Spawner`] so dispatch can be exercised
//! without starting real programs.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

use crate::repository::{ApplicationEntry, EntryKind};

/// Field codes that stand for a whole argument and are dropped.
const ARGUMENT_FIELD_CODES: [char; 11] = ['f', 'F', 'u', 'U', 'd', 'D', 'n', 'N', 'i', 'v', 'm'];

/// Reaper threads only block in `wait`.
const REAPER_STACK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Exec line of {desktop_id} has unbalanced quoting: {exec:?}")]
    Tokenize { desktop_id: String, exec: String },

    #[error("{desktop_id} has an empty command line")]
    EmptyCommand { desktop_id: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Starts a process without waiting for it. Returns the child pid.
pub trait Spawner: Send + Sync {
    fn spawn(&self, argv: &[String]) -> io::Result<u32>;
}

/// Spawns real processes in their own process group with null stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn spawn(&self, argv: &[String]) -> io::Result<u32> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()?;
        let pid = child.id();

        let reaper = thread::Builder::new()
            .name(format!("indexd-reap-{pid}"))
            .stack_size(REAPER_STACK_SIZE)
            .spawn(move || match child.wait() {
                Ok(status) => debug!(pid, %status, "Launched process exited"),
                Err(err) => debug!(pid, error = %err, "Failed to wait for launched process"),
            });
        if let Err(err) = reaper {
            warn!(pid, error = %err, "Failed to start reaper thread");
        }
        Ok(pid)
    }
}

pub struct Launcher {
    terminal: Vec<String>,
    spawner: Arc<dyn Spawner>,
}

impl Launcher {
    /// `terminal` is split with shell quoting rules, so values such as
    /// `"foot --app-id=ade"` work.
    pub fn new(terminal: &str, spawner: Arc<dyn Spawner>) -> Self {
        let terminal = shlex::split(terminal)
            .filter(|words| !words.is_empty())
            .unwrap_or_else(|| vec![terminal.to_string()]);
        Self { terminal, spawner }
    }

    pub fn command_line(&self, entry: &ApplicationEntry) -> Result<Vec<String>, LaunchError> {
        let argv = exec_argv(entry)?;
        if !entry.terminal {
            return Ok(argv);
        }
        let mut wrapped = self.terminal.clone();
        wrapped.push("-e".to_string());
        wrapped.extend(argv);
        Ok(wrapped)
    }

    pub fn launch(&self, entry: &ApplicationEntry) -> Result<u32, LaunchError> {
        let argv = self.command_line(entry)?;
        debug!(desktop_id = %entry.desktop_id, ?argv, "Launching entry");
        self.spawner.spawn(&argv).map_err(|source| LaunchError::Spawn {
            program: argv.first().cloned().unwrap_or_default(),
            source,
        })
    }
}

/// Tokenises the entry's Exec template and expands its field codes.
/// Executable entries run their path with no arguments.
pub fn exec_argv(entry: &ApplicationEntry) -> Result<Vec<String>, LaunchError> {
    if entry.kind == EntryKind::Executable {
        return Ok(vec![entry.source_path.to_string_lossy().into_owned()]);
    }

    let tokens = shlex::split(&entry.exec_template).ok_or_else(|| LaunchError::Tokenize {
        desktop_id: entry.desktop_id.clone(),
        exec: entry.exec_template.clone(),
    })?;

    let argv: Vec<String> = tokens
        .iter()
        .filter(|token| !is_argument_field_code(token))
        .map(|token| expand_field_codes(token, entry))
        .filter(|token| !token.is_empty())
        .collect();
    if argv.is_empty() {
        return Err(LaunchError::EmptyCommand {
            desktop_id: entry.desktop_id.clone(),
        });
    }
    Ok(argv)
}

fn is_argument_field_code(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some('%'), Some(code), None) if ARGUMENT_FIELD_CODES.contains(&code)
    )
}

fn expand_field_codes(token: &str, entry: &ApplicationEntry) -> String {
    if !token.contains('%') {
        return token.to_string();
    }

    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('c') => out.push_str(&entry.default_name),
            Some('k') => out.push_str(&entry.source_path.to_string_lossy()),
            _ => {}
        }
    }
    out
}
