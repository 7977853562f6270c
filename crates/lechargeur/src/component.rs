// Component instances
//
// *Le Composant* (The Component) - Opaque loaded instances and the optional
// initialization capability the embedding application drives.

use crate::registry::Registry;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared handle to a loaded or substituted component instance
pub type ComponentHandle = Arc<dyn Component>;

/// A component instance produced by a transport or a fallback factory.
///
/// The loader never calls into an instance; it only stores the handle and
/// reports which state produced it.
pub trait Component: Any + Send + Sync + fmt::Debug {
    /// Logical name this instance answers to
    fn name(&self) -> &str;

    /// Downcast hook for the embedding application
    fn as_any(&self) -> &dyn Any;

    /// Initialization capability, when the instance exposes one
    fn as_initializable(&self) -> Option<&dyn Initializable> {
        None
    }
}

/// Post-acquisition initialization hook.
///
/// Invoking it is the embedding application's job, see [`initialize_all`].
pub trait Initializable: Send + Sync {
    /// Bring the instance into a usable state
    fn initialize(&self) -> anyhow::Result<()>;
}

/// Outcome of [`initialize_all`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitializationReport {
    /// Components whose `initialize()` succeeded, in load order
    pub initialized: Vec<String>,
    /// Components holding an instance without the capability
    pub skipped: Vec<String>,
    /// Components whose `initialize()` returned an error
    pub failures: Vec<InitializationFailure>,
}

/// A single failed initialization
#[derive(Debug, Clone, Serialize)]
pub struct InitializationFailure {
    /// Logical component name
    pub name: String,
    /// Rendered error chain
    pub error: String,
}

impl InitializationReport {
    /// True when no initializer failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Initialize every live instance in the registry, in load order.
///
/// Failures are collected rather than propagated so one broken component
/// does not prevent the rest from starting.
pub fn initialize_all(registry: &Registry) -> InitializationReport {
    let mut report = InitializationReport::default();

    for record in registry.iter() {
        let Some(instance) = record.instance.as_ref() else {
            continue;
        };

        match instance.as_initializable() {
            Some(init) => match init.initialize() {
                Ok(()) => {
                    debug!(component = %record.name, "initialized");
                    report.initialized.push(record.name.clone());
                }
                Err(e) => {
                    warn!(component = %record.name, error = %e, "initialization failed");
                    report.failures.push(InitializationFailure {
                        name: record.name.clone(),
                        error: format!("{:#}", e),
                    });
                }
            },
            None => report.skipped.push(record.name.clone()),
        }
    }

    report
}
