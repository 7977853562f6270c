// Error types
//
// *Les Erreurs* (The Errors) - Hard failures of the loader. Everything
// non-fatal (cycles, missing dependencies, fallbacks) goes to diagnostics.

use crate::orchestrator::BatchReport;
use crate::transport::TransportError;
use serde::Serialize;
use thiserror::Error;

/// Hard acquisition failure.
///
/// `Clone` because every single-flight waiter receives its own copy.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
pub enum LoadError {
    /// A required component exhausted its attempts with no fallback
    #[error("required component '{name}' unavailable after {attempts} attempt(s): {last_error}")]
    RequiredUnavailable {
        /// Logical component name
        name: String,
        /// Attempts made
        attempts: u32,
        /// Last attempt failure
        last_error: String,
    },

    /// The acquisition task panicked or was cancelled
    #[error("acquisition of '{name}' aborted: {reason}")]
    Aborted {
        /// Logical component name
        name: String,
        /// Join error rendered as text
        reason: String,
    },
}

impl LoadError {
    /// Component the error concerns
    pub fn component(&self) -> &str {
        match self {
            LoadError::RequiredUnavailable { name, .. } | LoadError::Aborted { name, .. } => name,
        }
    }
}

/// Why a single attempt did not produce an instance
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The transport reported an error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The deadline won the race
    #[error("attempt timed out after {0} ms")]
    TimedOut(u64),

    /// The spawned transport task panicked
    #[error("transport task aborted: {0}")]
    TaskAborted(String),
}

/// A batch stopped on a required component's failure.
///
/// Carries the partial report so the caller can still inspect what loaded.
#[derive(Debug, Error)]
#[error("batch aborted: {error}")]
pub struct BatchAborted {
    /// The failure that stopped the batch
    #[source]
    pub error: LoadError,
    /// Registry, statistics and diagnostics at the time of the abort
    pub report: Box<BatchReport>,
}
