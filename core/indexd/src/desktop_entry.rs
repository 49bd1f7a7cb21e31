//! Reader for `.desktop` application descriptors.
//!
//! Syntax is handled by `freedesktop_entry_parser`; this module picks the
//! keys the index needs out of the `[Desktop Entry]` group. Anything the
//! parser rejects, or a file without that group, is a [`DescriptorError`];
//! the caller logs it and skips the file.

use freedesktop_entry_parser::Entry;
use fs_err as fs;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const DESKTOP_ENTRY_GROUP: &str = "Desktop Entry";
const APPLICATION_TYPE: &str = "Application";
const NAME_KEY: &str = "Name";

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("Failed to read descriptor {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Descriptor is not valid UTF-8")]
    NotUtf8,

    #[error("Malformed descriptor: {message}")]
    Parse { message: String },

    #[error("Descriptor has no [Desktop Entry] group")]
    MissingGroup,

    #[error("Descriptor has neither Name nor Exec")]
    MissingNameAndExec,
}

/// Raw fields of one `[Desktop Entry]` group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopEntry {
    pub entry_type: Option<String>,
    pub name: Option<String>,
    pub localized_names: BTreeMap<String, String>,
    pub exec: Option<String>,
    pub terminal: bool,
    pub categories: BTreeSet<String>,
    pub no_display: bool,
    pub hidden: bool,
}

impl DesktopEntry {
    pub fn is_application(&self) -> bool {
        self.entry_type.as_deref() == Some(APPLICATION_TYPE)
    }

    pub fn is_visible(&self) -> bool {
        !self.no_display && !self.hidden
    }
}

pub fn load(path: &Path) -> Result<DesktopEntry, DescriptorError> {
    let bytes = fs::read(path).map_err(|source| DescriptorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let content = String::from_utf8(bytes).map_err(|_| DescriptorError::NotUtf8)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<DesktopEntry, DescriptorError> {
    let parsed = Entry::parse(content).map_err(|err| DescriptorError::Parse {
        message: err.to_string(),
    })?;
    if !parsed.has_section(DESKTOP_ENTRY_GROUP) {
        return Err(DescriptorError::MissingGroup);
    }
    let section = parsed.section(DESKTOP_ENTRY_GROUP);
    let value = |key: &str| section.attr(key).map(|raw| unescape(raw.trim()));
    let flag = |key: &str| section.attr(key).is_some_and(parse_bool);

    let mut entry = DesktopEntry {
        entry_type: value("Type"),
        name: value(NAME_KEY),
        exec: value("Exec"),
        terminal: flag("Terminal"),
        no_display: flag("NoDisplay"),
        hidden: flag("Hidden"),
        categories: value("Categories")
            .map(|raw| split_list(&raw))
            .unwrap_or_default(),
        localized_names: BTreeMap::new(),
    };
    for lang in localized_name_tags(content) {
        if let Some(localized) = section.attr_with_param(NAME_KEY, &lang) {
            let localized = unescape(localized.trim());
            if !localized.is_empty() {
                entry.localized_names.insert(lang, localized);
            }
        }
    }

    if entry.is_application() && entry.name.is_none() && entry.exec.is_none() {
        return Err(DescriptorError::MissingNameAndExec);
    }
    Ok(entry)
}

/// Locale tags of `Name[tag]` keys inside the `[Desktop Entry]` group. The
/// parser resolves values per tag but does not enumerate them.
fn localized_name_tags(content: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let mut in_group = false;
    for line in content.lines().map(str::trim) {
        if let Some(header) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            in_group = header.trim() == DESKTOP_ENTRY_GROUP;
            continue;
        }
        if !in_group {
            continue;
        }
        let Some((key, _)) = line.split_once('=') else {
            continue;
        };
        if let Some(tag) = key
            .trim()
            .strip_prefix("Name[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            if !tag.is_empty() {
                tags.insert(tag.to_string());
            }
        }
    }
    tags
}

fn split_list(value: &str) -> BTreeSet<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Decodes `\s \n \t \r \\`; unknown escapes are kept verbatim.
fn unescape(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('s') => out.push(' '),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
