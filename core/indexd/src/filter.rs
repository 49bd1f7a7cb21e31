//! Session filters and their evaluation against a repository snapshot.
//!
//! Predicates of the same kind are OR-ed; kinds are AND-ed. A kind with no
//! predicates does not restrict the result.

use indexd_protocol::{FilterKind, FilterMode};

use crate::repository::{ApplicationEntry, Repository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub kind: FilterKind,
    pub value: String,
}

impl Predicate {
    pub fn matches(&self, entry: &ApplicationEntry, language: &str) -> bool {
        match self.kind {
            FilterKind::Name => entry
                .resolve_name(language)
                .to_lowercase()
                .contains(&self.value.to_lowercase()),
            FilterKind::Category => entry.categories.contains(&self.value),
            FilterKind::Path => entry
                .source_path
                .to_string_lossy()
                .contains(self.value.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    predicates: Vec<Predicate>,
}

impl FilterSet {
    pub fn apply(&mut self, kind: FilterKind, mode: FilterMode, value: impl Into<String>) {
        if mode == FilterMode::Replace {
            self.predicates.retain(|predicate| predicate.kind != kind);
        }
        self.predicates.push(Predicate {
            kind,
            value: value.into(),
        });
    }

    pub fn clear(&mut self) {
        self.predicates.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    #[cfg(test)]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn passes(&self, entry: &ApplicationEntry, language: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        FilterKind::ALL.into_iter().all(|kind| {
            let mut of_kind = self
                .predicates
                .iter()
                .filter(|predicate| predicate.kind == kind)
                .peekable();
            of_kind.peek().is_none() || of_kind.any(|predicate| predicate.matches(entry, language))
        })
    }
}

/// Visible entries passing `filters`, in id order, with their resolved names.
pub fn evaluate<'a>(
    repository: &'a Repository,
    filters: &FilterSet,
    language: &str,
) -> Vec<(u64, &'a str)> {
    repository
        .entries()
        .iter()
        .filter(|entry| entry.visible && filters.passes(entry, language))
        .map(|entry| (entry.id, entry.resolve_name(language)))
        .collect()
}
