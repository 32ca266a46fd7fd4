//! Cache entry state tracking.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use syncache_core::{CacheKey, TransportError};
use tokio::time::Instant;

/// Lifecycle state of a cache entry.
///
/// ```text
/// Idle -> Fetching -> Fresh | Failed -> Stale -> Fetching -> ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Never fetched.
    Idle,
    /// A request for the key is outstanding.
    Fetching,
    /// The last request succeeded and nothing invalidated it since.
    Fresh,
    /// The value is known to be outdated; it is still served.
    Stale,
    /// The last request failed.
    Failed,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryState::Idle => "idle",
            EntryState::Fetching => "fetching",
            EntryState::Fresh => "fresh",
            EntryState::Stale => "stale",
            EntryState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a settled fetch, shared by every caller that joined it.
pub type FetchOutcome<V> = Result<Arc<V>, TransportError>;

/// Last-known state of one key.
///
/// Cloning is cheap (the value is behind an `Arc`); clones handed to
/// subscribers are snapshots and never change.
#[derive(Debug)]
pub struct CacheEntry<V> {
    key: CacheKey,
    value: Option<Arc<V>>,
    error: Option<TransportError>,
    last_fetched_at: Option<Instant>,
    state: EntryState,
    revision: u64,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
            state: self.state,
            revision: self.revision,
        }
    }
}

impl<V> CacheEntry<V> {
    /// Creates an Idle entry.
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            value: None,
            error: None,
            last_fetched_at: None,
            state: EntryState::Idle,
            revision: 0,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the last successfully fetched value, even while Stale,
    /// Fetching or Failed.
    pub fn value(&self) -> Option<&Arc<V>> {
        self.value.as_ref()
    }

    /// Returns the error of the last request, if it failed.
    pub fn error(&self) -> Option<&TransportError> {
        self.error.as_ref()
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Returns when the last request settled.
    pub fn last_fetched_at(&self) -> Option<Instant> {
        self.last_fetched_at
    }

    /// Returns the number of committed changes to this entry.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns true if the entry is Fresh and settled less than `window` ago.
    pub fn is_fresh_within(&self, window: Duration) -> bool {
        self.state == EntryState::Fresh
            && self
                .last_fetched_at
                .is_some_and(|at| at.elapsed() < window)
    }

    /// Moves the entry to Fetching. Returns false if it already was.
    pub(crate) fn begin_fetch(&mut self) -> bool {
        if self.state == EntryState::Fetching {
            return false;
        }
        self.state = EntryState::Fetching;
        self.revision += 1;
        true
    }

    /// Records a settled request: Fresh on success, Failed on error.
    /// A failure keeps the previous value so it can still be displayed.
    pub(crate) fn resolve(&mut self, outcome: FetchOutcome<V>) {
        match outcome {
            Ok(value) => {
                self.value = Some(value);
                self.error = None;
                self.state = EntryState::Fresh;
            },
            Err(error) => {
                self.error = Some(error);
                self.state = EntryState::Failed;
            },
        }
        self.last_fetched_at = Some(Instant::now());
        self.revision += 1;
    }

    /// Fresh -> Stale. Returns false (and changes nothing) from any other
    /// state.
    pub(crate) fn mark_stale(&mut self) -> bool {
        if self.state != EntryState::Fresh {
            return false;
        }
        self.state = EntryState::Stale;
        self.revision += 1;
        true
    }
}
