//! Daemon configuration.
//!
//! Settings come from an optional TOML file and are overridden by environment
//! variables. Missing files yield defaults; a malformed file is reported and
//! ignored so the daemon still starts.

use fs_err as fs;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const CONFIG_ENV: &str = "ADE_INDEXD_CONFIG";
pub const SOCKET_ENV: &str = "ADE_INDEXD_SOCK";
pub const WORKERS_ENV: &str = "ADE_INDEXD_WORKERS";
pub const TERMINAL_ENV: &str = "ADE_DEFAULT_TERM";
pub const WATCH_ENV: &str = "ADE_INDEXD_WATCH";
pub const EXECUTABLES_ENV: &str = "ADE_INDEXD_EXECUTABLES";

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_TERMINAL: &str = "xterm";
const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 500;
const DEFAULT_DATA_DIRS: [&str; 2] = ["/usr/local/share", "/usr/share"];
const APPLICATIONS_SUBDIR: &str = "applications";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk shape of `indexd.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub socket: Option<String>,
    pub workers: Option<usize>,
    pub terminal: Option<String>,
    pub application_dirs: Vec<String>,
    pub watch: Option<bool>,
    pub watch_debounce_ms: Option<u64>,
    pub index_executables: Option<bool>,
    /// Searched instead of `$PATH` when `index_executables` is on.
    pub executable_dirs: Vec<String>,
}

/// XDG data directories as reported by the `xdg` crate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataDirs {
    pub home: Option<PathBuf>,
    /// Most important first, as in `XDG_DATA_DIRS`.
    pub dirs: Vec<PathBuf>,
}

impl DataDirs {
    pub fn from_environment() -> Self {
        match xdg::BaseDirectories::new() {
            Ok(base) => Self {
                home: Some(base.get_data_home()),
                dirs: base.get_data_dirs(),
            },
            Err(err) => {
                warn!(error = %err, "Failed to resolve XDG base directories; using defaults");
                Self {
                    home: dirs::data_dir(),
                    dirs: DEFAULT_DATA_DIRS.iter().map(PathBuf::from).collect(),
                }
            }
        }
    }
}

/// Effective configuration after defaults and overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub workers: usize,
    pub terminal: String,
    /// Descriptor directories, lowest priority first.
    pub application_dirs: Vec<PathBuf>,
    /// Debounce window of the directory watcher; `None` disables it.
    pub watch_debounce: Option<Duration>,
    /// Searched for bare executables in order. Empty when the executable
    /// source is off.
    pub executable_dirs: Vec<PathBuf>,
}

impl DaemonConfig {
    /// Loads the config file (if any) and applies the process environment.
    pub fn load() -> Self {
        let file = match config_path() {
            Some(path) => load_file_config(&path).unwrap_or_else(|err| {
                warn!(error = %err, "Failed to load indexd config; using defaults");
                FileConfig::default()
            }),
            None => FileConfig::default(),
        };
        Self::resolve(file, DataDirs::from_environment(), |key| env::var(key).ok())
    }

    pub fn resolve(
        file: FileConfig,
        data: DataDirs,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let socket_path = lookup(SOCKET_ENV)
            .filter(|value| !value.trim().is_empty())
            .or(file.socket)
            .map(|value| expand_tilde(&value))
            .unwrap_or_else(default_socket_path);

        let workers = match lookup(WORKERS_ENV) {
            Some(value) => value.trim().parse::<usize>().unwrap_or_else(|_| {
                warn!(value = %value, "Invalid {WORKERS_ENV}; using default");
                0
            }),
            None => file.workers.unwrap_or(DEFAULT_WORKERS),
        };
        let workers = if workers == 0 { DEFAULT_WORKERS } else { workers };

        let non_empty = |value: &String| !value.trim().is_empty();
        let terminal = lookup(TERMINAL_ENV)
            .filter(non_empty)
            .or(file.terminal.filter(non_empty))
            .unwrap_or_else(|| DEFAULT_TERMINAL.to_string());

        let watch = env_flag(&lookup, WATCH_ENV)
            .or(file.watch)
            .unwrap_or(true);
        let debounce_ms = file
            .watch_debounce_ms
            .unwrap_or(DEFAULT_WATCH_DEBOUNCE_MS);
        let watch_debounce = watch.then(|| Duration::from_millis(debounce_ms));

        let extra: Vec<PathBuf> = file
            .application_dirs
            .iter()
            .map(|dir| expand_tilde(dir))
            .collect();
        let application_dirs = descriptor_dirs(&data, &extra);

        let index_executables = env_flag(&lookup, EXECUTABLES_ENV)
            .or(file.index_executables)
            .unwrap_or(false);
        let executable_dirs = if !index_executables {
            Vec::new()
        } else if file.executable_dirs.is_empty() {
            search_path(lookup("PATH").as_deref())
        } else {
            file.executable_dirs
                .iter()
                .map(|dir| expand_tilde(dir))
                .collect()
        };

        Self {
            socket_path,
            workers,
            terminal,
            application_dirs,
            watch_debounce,
            executable_dirs,
        }
    }
}

/// `1/true/yes/on` and `0/false/no/off`, case-insensitive. Anything else is
/// reported and treated as unset.
fn env_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let value = lookup(key)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %value, "Invalid boolean in environment; ignoring");
            None
        }
    }
}

/// Absolute `$PATH` entries in order, without duplicates.
fn search_path(path: Option<&str>) -> Vec<PathBuf> {
    let mut ordered: Vec<PathBuf> = Vec::new();
    for dir in path.unwrap_or_default().split(':').map(PathBuf::from) {
        if dir.is_absolute() && !ordered.contains(&dir) {
            ordered.push(dir);
        }
    }
    ordered
}

pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Some(expand_tilde(&path));
    }
    dirs::config_dir().map(|dir| dir.join("ade").join("indexd.toml"))
}

pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Orders descriptor directories from lowest to highest priority.
///
/// The XDG data directories list the most important one first, so they are
/// walked in reverse; the user data home and the configured extras come
/// last. A directory listed twice keeps its highest-priority position.
pub fn descriptor_dirs(data: &DataDirs, extra: &[PathBuf]) -> Vec<PathBuf> {
    let candidates = data
        .dirs
        .iter()
        .rev()
        .filter(|dir| dir.is_absolute())
        .chain(data.home.iter())
        .map(|dir| dir.join(APPLICATIONS_SUBDIR))
        .chain(extra.iter().cloned());

    let mut ordered: Vec<PathBuf> = Vec::new();
    for dir in candidates {
        ordered.retain(|existing| existing != &dir);
        ordered.push(dir);
    }
    ordered
}

fn default_socket_path() -> PathBuf {
    // SAFETY: getuid has no preconditions and always succeeds.
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/ade-{uid}/indexd"))
}

fn expand_tilde(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(value)
}
