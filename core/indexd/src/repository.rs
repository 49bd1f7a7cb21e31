//! Application index: merged entries from every descriptor directory.
//!
//! A [`Repository`] is one immutable generation. [`SharedIndex`] publishes
//! generations to readers, and [`Indexer`] serialises rebuilds.
//!
//! Desktop descriptors come first in the merged order. Executables found in
//! the configured search directories follow, one entry per file name.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::desktop_entry::{self, DesktopEntry};

const DESCRIPTOR_EXTENSION: &str = "desktop";
const EXECUTABLE_BITS: u32 = 0o111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Parsed from a `.desktop` descriptor; launched through its Exec line.
    Desktop,
    /// A bare executable file; launched by path with no arguments.
    Executable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationEntry {
    /// 1-based, sequential over the merged order.
    pub id: u64,
    pub kind: EntryKind,
    /// Basename identifier used for overrides, e.g. `kde-konsole.desktop`.
    /// Executables use their file name.
    pub desktop_id: String,
    pub default_name: String,
    pub localized_names: BTreeMap<String, String>,
    pub exec_template: String,
    pub terminal: bool,
    pub categories: BTreeSet<String>,
    pub source_path: PathBuf,
    pub visible: bool,
}

impl ApplicationEntry {
    /// Name under `language`, falling back to the untranslated name. Tags
    /// match exactly.
    pub fn resolve_name(&self, language: &str) -> &str {
        self.localized_names
            .get(language)
            .map(String::as_str)
            .unwrap_or(&self.default_name)
    }

    fn from_descriptor(desktop_id: String, path: &Path, parsed: DesktopEntry) -> Self {
        let visible = parsed.is_visible();
        let default_name = parsed.name.unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| desktop_id.clone())
        });
        Self {
            id: 0,
            kind: EntryKind::Desktop,
            desktop_id,
            default_name,
            localized_names: parsed.localized_names,
            exec_template: parsed.exec.unwrap_or_default(),
            terminal: parsed.terminal,
            categories: parsed.categories,
            source_path: path.to_path_buf(),
            visible,
        }
    }

    fn from_executable(name: String, path: PathBuf) -> Self {
        Self {
            id: 0,
            kind: EntryKind::Executable,
            desktop_id: name.clone(),
            default_name: name,
            localized_names: BTreeMap::new(),
            exec_template: path.to_string_lossy().into_owned(),
            terminal: false,
            categories: BTreeSet::new(),
            source_path: path,
            visible: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repository {
    generation: u64,
    entries: Vec<ApplicationEntry>,
}

impl Repository {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entries(&self) -> &[ApplicationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: u64) -> Option<&ApplicationEntry> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.entries.get(index)
    }
}

/// Counters from one build, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub parsed: usize,
    pub overridden: usize,
    pub ignored: usize,
    pub failed: usize,
    pub executables: usize,
}

/// Scans `dirs` (lowest priority first) and merges entries by desktop id,
/// then appends the executables under `executable_dirs`.
///
/// An entry keeps the position where its id was first discovered; a later
/// directory replaces its contents in place.
pub fn build(
    dirs: &[PathBuf],
    executable_dirs: &[PathBuf],
    generation: u64,
) -> (Repository, BuildReport) {
    let mut report = BuildReport::default();
    let mut entries: Vec<ApplicationEntry> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for dir in dirs {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Descriptor directory missing; skipping");
            continue;
        }

        for path in descriptor_files(dir) {
            let Some(desktop_id) = desktop_id(dir, &path) else {
                continue;
            };
            let parsed = match desktop_entry::load(&path) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable descriptor");
                    report.failed += 1;
                    continue;
                }
            };
            if !parsed.is_application() {
                debug!(
                    path = %path.display(),
                    entry_type = ?parsed.entry_type,
                    "Skipping non-application descriptor"
                );
                report.ignored += 1;
                continue;
            }

            report.parsed += 1;
            let entry = ApplicationEntry::from_descriptor(desktop_id.clone(), &path, parsed);
            match slots.get(&desktop_id) {
                Some(&slot) => {
                    debug!(
                        desktop_id = %desktop_id,
                        replaced = %entries[slot].source_path.display(),
                        by = %path.display(),
                        "Descriptor overridden"
                    );
                    entries[slot] = entry;
                    report.overridden += 1;
                }
                None => {
                    slots.insert(desktop_id, entries.len());
                    entries.push(entry);
                }
            }
        }
    }

    let executables = scan_executables(executable_dirs);
    report.executables = executables.len();
    entries.extend(executables);

    for (index, entry) in entries.iter_mut().enumerate() {
        entry.id = index as u64 + 1;
    }

    (
        Repository {
            generation,
            entries,
        },
        report,
    )
}

fn descriptor_files(dir: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |item| match item {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "Failed to walk descriptor directory");
                None
            }
        })
        .filter(|item| item.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| path.extension().is_some_and(|ext| ext == DESCRIPTOR_EXTENSION))
}

/// Executable, non-hidden files below each directory. A name already taken
/// by an earlier directory is skipped, the way a shell resolves `PATH`.
fn scan_executables(dirs: &[PathBuf]) -> Vec<ApplicationEntry> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut found = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Executable directory missing; skipping");
            continue;
        }
        for item in WalkDir::new(dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !is_executable_file(&item) {
                continue;
            }
            if seen.insert(name.clone()) {
                found.push(ApplicationEntry::from_executable(name, item.into_path()));
            }
        }
    }
    found
}

fn is_executable_file(item: &walkdir::DirEntry) -> bool {
    item.file_type().is_file()
        && item
            .metadata()
            .is_ok_and(|metadata| metadata.permissions().mode() & EXECUTABLE_BITS != 0)
}

/// Path relative to `dir` with separators replaced by `-`.
fn desktop_id(dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(dir).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("-"))
}

/// Currently published generation. Readers clone the `Arc` and work on the
/// snapshot without holding the lock.
#[derive(Debug)]
pub struct SharedIndex {
    current: RwLock<Arc<Repository>>,
}

impl SharedIndex {
    pub fn new(repository: Repository) -> Self {
        Self {
            current: RwLock::new(Arc::new(repository)),
        }
    }

    pub fn snapshot(&self) -> Arc<Repository> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn publish(&self, repository: Repository) -> Arc<Repository> {
        let next = Arc::new(repository);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::clone(&next);
        next
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("A previous rebuild panicked; index rebuilds are disabled")]
    RebuildPoisoned,
}

/// Owns the source directory lists and the shared index.
#[derive(Debug)]
pub struct Indexer {
    dirs: Vec<PathBuf>,
    executable_dirs: Vec<PathBuf>,
    index: SharedIndex,
    rebuild_lock: Mutex<()>,
}

impl Indexer {
    /// Starts at generation 0 with no entries; call [`Indexer::rebuild`]
    /// before serving. An empty `executable_dirs` disables the executable
    /// source.
    pub fn new(dirs: Vec<PathBuf>, executable_dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            executable_dirs,
            index: SharedIndex::new(Repository::empty()),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Descriptor directories, lowest priority first.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn snapshot(&self) -> Arc<Repository> {
        self.index.snapshot()
    }

    /// Builds and publishes the next generation. Concurrent callers run one
    /// after another.
    pub fn rebuild(&self, reason: &str) -> Result<Arc<Repository>, IndexError> {
        self.rebuild_from(reason, &self.executable_dirs)
    }

    /// Like [`Indexer::rebuild`], but scans `executable_dirs` instead of the
    /// configured executable directories for this one generation.
    pub fn rebuild_with_executables(
        &self,
        reason: &str,
        executable_dirs: &[PathBuf],
    ) -> Result<Arc<Repository>, IndexError> {
        self.rebuild_from(reason, executable_dirs)
    }

    fn rebuild_from(
        &self,
        reason: &str,
        executable_dirs: &[PathBuf],
    ) -> Result<Arc<Repository>, IndexError> {
        let _guard = self
            .rebuild_lock
            .lock()
            .map_err(|_| IndexError::RebuildPoisoned)?;
        let generation = self.index.snapshot().generation() + 1;
        let (repository, report) = build(&self.dirs, executable_dirs, generation);
        let published = self.index.publish(repository);
        info!(
            reason,
            generation,
            entries = published.len(),
            parsed = report.parsed,
            overridden = report.overridden,
            ignored = report.ignored,
            failed = report.failed,
            executables = report.executables,
            "Application index published"
        );
        Ok(published)
    }
}
