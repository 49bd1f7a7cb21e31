//! Per-connection query state.

use indexd_protocol::{Request, RequestReader};

use crate::filter::FilterSet;

/// Owned by exactly one connection handler and dropped with it.
#[derive(Debug, Default)]
pub struct Session {
    id: u64,
    pub filters: FilterSet,
    /// Empty means untranslated names.
    pub language: String,
    reader: RequestReader,
    requests: u64,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Feeds one request line; returns a request once its command line
    /// arrives.
    pub fn feed(&mut self, line: &str) -> Option<Request> {
        let request = self.reader.feed(line)?;
        self.requests += 1;
        Some(request)
    }
}
