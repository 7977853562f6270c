// lechargeur - Component Loader
//
// *Le Chargeur* (The Loader) - Dependency-ordered, single-flight, retrying
// acquisition of interdependent components, with fallbacks and diagnostics.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Single-flight retrying acquisition engine.
pub mod acquire;
/// Component instances and initialization.
pub mod component;
/// Loader configuration and TOML manifests.
pub mod config;
/// Component descriptors and validation.
pub mod descriptor;
/// Append-only diagnostics recording.
pub mod diagnostics;
/// Hard error types.
pub mod error;
/// Fallback factory table and stock stand-in.
pub mod fallback;
/// Dependency ordering with cycle breaking.
pub mod graph;
/// Batch orchestration over descriptor lists.
pub mod orchestrator;
/// Canonical key resolution.
pub mod path;
/// Progressive timeouts and backoff.
pub mod policy;
/// Run-scoped load records and statistics.
pub mod registry;
/// Transport abstraction and in-memory transport.
pub mod transport;

pub use acquire::{AcquireResult, AcquisitionEngine};
pub use component::{initialize_all, Component, ComponentHandle, Initializable, InitializationReport};
pub use config::{LoaderConfig, LoaderManifest};
pub use descriptor::{validate_all, ComponentDescriptor, DescriptorIssue};
pub use diagnostics::{DiagnosticsEvent, DiagnosticsRecorder, DiagnosticsReport, EventKind};
pub use error::{AttemptFailure, BatchAborted, LoadError};
pub use fallback::{FallbackTable, NoopComponent};
pub use graph::{resolve_load_order, LoadPlan, MissingDependency};
pub use orchestrator::{BatchOrchestrator, BatchReport, PlanReport, PlannedComponent};
pub use path::{CanonicalKey, PathResolver};
pub use policy::RetryPolicy;
pub use registry::{LoadRecord, LoadState, Registry, Statistics};
pub use transport::{transport_fn, AttemptContext, FetchFuture, StaticTransport, Transport, TransportError};
