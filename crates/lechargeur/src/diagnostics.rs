// Diagnostics recording
//
// *Le Journal* (The Log) - Append-only, timestamped record of everything the
// loader did during one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Kind of a diagnostics event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// A loader phase began
    PhaseStart,
    /// A loader phase ended
    PhaseEnd,
    /// A transport attempt began
    AttemptStart,
    /// A transport attempt failed or timed out
    AttemptFail,
    /// A component reached `Loaded`
    Loaded,
    /// A fallback stand-in was installed
    FallbackUsed,
    /// A component reached `Failed`, or the batch aborted
    Error,
    /// Non-fatal configuration or late-arrival notice
    Warning,
}

/// One recorded event; never mutated after append
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsEvent {
    /// Wall-clock time of the event
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the recorder was created
    pub elapsed_ms: u64,
    /// Event kind
    pub kind: EventKind,
    /// Component the event concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human readable detail
    pub detail: String,
    /// Attempt number for attempt-scoped events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Deadline applied to the attempt, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

/// Serializable snapshot of a recorder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Events in append order
    pub events: Vec<DiagnosticsEvent>,
    /// Number of events per kind
    pub counts: BTreeMap<EventKind, usize>,
    /// Time between the first and the last event
    pub elapsed_ms: u64,
}

impl DiagnosticsReport {
    /// Number of events of one kind
    pub fn count(&self, kind: EventKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Events concerning one component
    pub fn events_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DiagnosticsEvent> + 'a {
        self.events
            .iter()
            .filter(move |e| e.name.as_deref() == Some(name))
    }

    /// Render as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Passive, append-only observer shared by every loader component.
///
/// Recording never affects loader control flow. Each event is mirrored to
/// `tracing`.
#[derive(Debug)]
pub struct DiagnosticsRecorder {
    started: Instant,
    events: Mutex<Vec<DiagnosticsEvent>>,
}

impl Default for DiagnosticsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DiagnosticsEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event
    pub fn record(&self, kind: EventKind, name: Option<&str>, detail: impl Into<String>) {
        self.push(kind, name, detail.into(), None, None);
    }

    /// Append an attempt-scoped event
    pub fn record_attempt(
        &self,
        kind: EventKind,
        name: &str,
        attempt: u32,
        deadline_ms: Option<u64>,
        detail: impl Into<String>,
    ) {
        self.push(kind, Some(name), detail.into(), Some(attempt), deadline_ms);
    }

    /// Mark the start of a phase
    pub fn phase_start(&self, phase: &str) {
        self.record(EventKind::PhaseStart, None, phase);
    }

    /// Mark the end of a phase
    pub fn phase_end(&self, phase: &str) {
        self.record(EventKind::PhaseEnd, None, phase);
    }

    /// Record a warning
    pub fn warning(&self, name: Option<&str>, detail: impl Into<String>) {
        self.record(EventKind::Warning, name, detail);
    }

    /// Record an error
    pub fn error(&self, name: Option<&str>, detail: impl Into<String>) {
        self.record(EventKind::Error, name, detail);
    }

    fn push(
        &self,
        kind: EventKind,
        name: Option<&str>,
        detail: String,
        attempt: Option<u32>,
        deadline_ms: Option<u64>,
    ) {
        let component = name.unwrap_or("-");
        match kind {
            EventKind::Warning | EventKind::AttemptFail | EventKind::FallbackUsed => {
                warn!(component, ?attempt, ?deadline_ms, "{}", detail)
            }
            EventKind::Error => error!(component, "{}", detail),
            EventKind::Loaded => info!(component, ?attempt, "{}", detail),
            EventKind::PhaseStart | EventKind::PhaseEnd => info!(?kind, "{}", detail),
            EventKind::AttemptStart => debug!(component, ?attempt, ?deadline_ms, "{}", detail),
        }

        let event = DiagnosticsEvent {
            timestamp: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            kind,
            name: name.map(str::to_string),
            detail,
            attempt,
            deadline_ms,
        };
        self.lock().push(event);
    }

    /// Copy of all events in append order
    pub fn events(&self) -> Vec<DiagnosticsEvent> {
        self.lock().clone()
    }

    /// Number of events of one kind
    pub fn count(&self, kind: EventKind) -> usize {
        self.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Events concerning one component
    pub fn events_for(&self, name: &str) -> Vec<DiagnosticsEvent> {
        self.lock()
            .iter()
            .filter(|e| e.name.as_deref() == Some(name))
            .cloned()
            .collect()
    }

    /// Snapshot with per-kind counts and total elapsed time
    pub fn report(&self) -> DiagnosticsReport {
        let events = self.events();
        let mut counts = BTreeMap::new();
        for event in &events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        let elapsed_ms = match (events.first(), events.last()) {
            (Some(first), Some(last)) => last.elapsed_ms.saturating_sub(first.elapsed_ms),
            _ => 0,
        };

        DiagnosticsReport {
            events,
            counts,
            elapsed_ms,
        }
    }
}
