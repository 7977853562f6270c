// Load records
//
// *Le Registre* (The Register) - Run-scoped record of every component's
// lifecycle, and the statistics derived from it.

use crate::component::ComponentHandle;
use crate::path::CanonicalKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Lifecycle state of one component within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Registered but not yet requested.
    NotStarted,
    /// Attempt series in progress.
    Loading,
    /// Transport delivered an instance.
    Loaded,
    /// Attempts exhausted; a fallback stand-in is installed.
    FallbackActive,
    /// Attempts exhausted with no fallback.
    Failed,
}

impl LoadState {
    /// Terminal states never transition again within a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoadState::Loaded | LoadState::FallbackActive | LoadState::Failed
        )
    }
}

/// Per-component load record.
#[derive(Debug, Clone, Serialize)]
pub struct LoadRecord {
    /// Logical component name.
    pub name: String,
    /// Key the transport was asked for, once resolved.
    pub canonical_key: Option<CanonicalKey>,
    /// Current state.
    pub state: LoadState,
    /// Live instance for `Loaded` and `FallbackActive`.
    #[serde(skip)]
    pub instance: Option<ComponentHandle>,
    /// Attempts started so far.
    pub attempts: u32,
    /// Most recent attempt failure.
    pub last_error: Option<String>,
    /// Whether total failure aborts the batch.
    pub required: bool,
    /// When the record entered `Loading`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the record reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl LoadRecord {
    fn new(name: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            canonical_key: None,
            state: LoadState::NotStarted,
            instance: None,
            attempts: 0,
            last_error: None,
            required,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock duration between `Loading` and the terminal state.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Run-scoped mapping from logical name to load record.
///
/// Records iterate in creation order. Mutation is crate-private: only the
/// acquisition engine moves records through their lifecycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Registry {
    records: Vec<LoadRecord>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Registry {
    /// Look up a record.
    pub fn get(&self, name: &str) -> Option<&LoadRecord> {
        self.index.get(name).map(|&i| &self.records[i])
    }

    /// State of a record, if registered.
    pub fn state(&self, name: &str) -> Option<LoadState> {
        self.get(name).map(|r| r.state)
    }

    /// Live instance of a record, if any.
    pub fn instance(&self, name: &str) -> Option<ComponentHandle> {
        self.get(name).and_then(|r| r.instance.clone())
    }

    /// Records in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &LoadRecord> {
        self.records.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Derive statistics from the current states.
    pub fn statistics(&self) -> Statistics {
        Statistics::from_registry(self)
    }

    /// Get or create the record for `name`.
    pub(crate) fn ensure(&mut self, name: &str, required: bool) -> &mut LoadRecord {
        let idx = match self.index.get(name) {
            Some(&idx) => idx,
            None => {
                self.records.push(LoadRecord::new(name, required));
                let idx = self.records.len() - 1;
                self.index.insert(name.to_string(), idx);
                idx
            }
        };
        &mut self.records[idx]
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut LoadRecord> {
        match self.index.get(name) {
            Some(&idx) => self.records.get_mut(idx),
            None => None,
        }
    }

    /// `NotStarted -> Loading`. Returns false when the record is in any other state.
    pub(crate) fn begin(&mut self, name: &str, key: CanonicalKey) -> bool {
        let Some(record) = self.get_mut(name) else {
            return false;
        };
        if record.state != LoadState::NotStarted {
            return false;
        }
        record.state = LoadState::Loading;
        record.canonical_key = Some(key);
        record.started_at = Some(Utc::now());
        true
    }

    /// Count a started attempt on a loading record.
    pub(crate) fn note_attempt(&mut self, name: &str, attempt: u32) {
        if let Some(record) = self.get_mut(name) {
            if record.state == LoadState::Loading {
                record.attempts = record.attempts.max(attempt);
            }
        }
    }

    /// Remember the latest attempt failure on a loading record.
    pub(crate) fn note_failure(&mut self, name: &str, error: String) {
        if let Some(record) = self.get_mut(name) {
            if record.state == LoadState::Loading {
                record.last_error = Some(error);
            }
        }
    }

    /// `Loading -> terminal`. Any other transition is refused and the
    /// caller's result is discarded.
    pub(crate) fn finish(
        &mut self,
        name: &str,
        state: LoadState,
        instance: Option<ComponentHandle>,
        error: Option<String>,
    ) -> bool {
        let Some(record) = self.get_mut(name) else {
            return false;
        };
        if record.state != LoadState::Loading || !state.is_terminal() {
            debug!(
                component = name,
                from = ?record.state,
                to = ?state,
                "transition refused"
            );
            return false;
        }
        record.state = state;
        record.instance = instance;
        if error.is_some() {
            record.last_error = error;
        }
        record.finished_at = Some(Utc::now());
        true
    }
}

/// Aggregate counters derived from terminal states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Registered components.
    pub total: usize,
    /// Components in `Loaded`.
    pub loaded: usize,
    /// Components in `Failed`.
    pub failed: usize,
    /// Components in `FallbackActive`.
    pub fallback_count: usize,
}

impl Statistics {
    /// Recompute from a registry.
    pub fn from_registry(registry: &Registry) -> Self {
        let mut stats = Statistics {
            total: registry.len(),
            ..Statistics::default()
        };
        for record in registry.iter() {
            match record.state {
                LoadState::Loaded => stats.loaded += 1,
                LoadState::Failed => stats.failed += 1,
                LoadState::FallbackActive => stats.fallback_count += 1,
                LoadState::NotStarted | LoadState::Loading => {}
            }
        }
        stats
    }

    /// Components that never reached a terminal state.
    pub fn unfinished(&self) -> usize {
        self.total - self.loaded - self.failed - self.fallback_count
    }
}
