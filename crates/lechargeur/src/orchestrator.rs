// Batch orchestration
//
// *L'Orchestre* (The Orchestra) - Drives ordering and acquisition over a
// descriptor list and aggregates the outcome of the run.

use crate::acquire::AcquisitionEngine;
use crate::config::LoaderConfig;
use crate::descriptor::{validate_all, ComponentDescriptor, DescriptorIssue};
use crate::diagnostics::{DiagnosticsRecorder, DiagnosticsReport};
use crate::error::BatchAborted;
use crate::fallback::FallbackTable;
use crate::graph::{resolve_load_order, LoadPlan};
use crate::path::{CanonicalKey, PathResolver};
use crate::registry::{Registry, Statistics};
use crate::transport::Transport;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one batch run
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Final (or, on abort, partial) registry
    pub registry: Registry,
    /// Counters over the registry's terminal states
    pub statistics: Statistics,
    /// Load order and the graph warnings behind it
    pub plan: LoadPlan,
    /// Every event recorded during the run
    pub diagnostics: DiagnosticsReport,
}

/// Dry-run result of [`BatchOrchestrator::plan`]
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    /// Load order and graph warnings
    pub plan: LoadPlan,
    /// Canonical key of each component, in load order
    pub keys: Vec<PlannedComponent>,
    /// Descriptor configuration issues
    pub issues: Vec<DescriptorIssue>,
    /// Events recorded while planning
    pub diagnostics: DiagnosticsReport,
}

/// One entry of a [`PlanReport`]
#[derive(Debug, Clone, Serialize)]
pub struct PlannedComponent {
    /// Logical name
    pub name: String,
    /// Key the transport would be asked for
    pub key: CanonicalKey,
    /// Whether failure would abort the batch
    pub required: bool,
}

/// Drives the dependency resolver and the acquisition engine over a
/// descriptor list.
///
/// Holds only configuration; every run gets a fresh engine, registry and
/// diagnostics recorder, and nothing is published process-wide.
pub struct BatchOrchestrator {
    transport: Arc<dyn Transport>,
    fallbacks: FallbackTable,
    config: LoaderConfig,
}

impl BatchOrchestrator {
    /// Create an orchestrator with default configuration and no fallbacks
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            fallbacks: FallbackTable::new(),
            config: LoaderConfig::default(),
        }
    }

    /// Replace the loader configuration
    #[must_use]
    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the fallback table
    #[must_use]
    pub fn with_fallbacks(mut self, fallbacks: FallbackTable) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Loader configuration in use
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Fresh run-scoped engine.
    ///
    /// Hand clones of it to other tasks to let them `acquire` components
    /// concurrently with [`Self::load_with`].
    pub fn engine(&self) -> AcquisitionEngine {
        AcquisitionEngine::new(
            Arc::clone(&self.transport),
            self.fallbacks.clone(),
            &self.config,
        )
    }

    /// Load every descriptor in dependency order with a fresh engine
    pub async fn load_all(
        &self,
        descriptors: &[ComponentDescriptor],
    ) -> Result<BatchReport, BatchAborted> {
        self.load_with(&self.engine(), descriptors).await
    }

    /// Load every descriptor in dependency order through `engine`.
    ///
    /// Components are acquired one at a time in resolved order, so a
    /// dependent only starts once its dependencies are terminal. A required
    /// component's failure stops the batch; the partial report travels with
    /// the error.
    pub async fn load_with(
        &self,
        engine: &AcquisitionEngine,
        descriptors: &[ComponentDescriptor],
    ) -> Result<BatchReport, BatchAborted> {
        let diagnostics = engine.diagnostics();

        diagnostics.phase_start("validate");
        let unique = dedupe(descriptors, &diagnostics);
        diagnostics.phase_end("validate");

        diagnostics.phase_start("resolve");
        let plan = order(&unique, &diagnostics);
        diagnostics.phase_end("resolve");

        for descriptor in &unique {
            engine.register(descriptor);
        }

        info!(components = unique.len(), "loading batch");
        diagnostics.phase_start("acquire");

        let by_name: HashMap<&str, &ComponentDescriptor> =
            unique.iter().map(|d| (d.name.as_str(), *d)).collect();

        for name in &plan.order {
            let Some(descriptor) = by_name.get(name.as_str()) else {
                continue;
            };

            let key = engine.resolver().resolve(descriptor);
            debug!(component = %name, key = %key, "resolved");

            if let Err(error) = engine.acquire_resolved(descriptor, key).await {
                diagnostics.error(Some(name.as_str()), format!("batch aborted: {}", error));
                diagnostics.phase_end("acquire");
                warn!(component = %name, "required component unavailable, aborting batch");

                let report = build_report(engine, plan.clone(), &diagnostics);
                return Err(BatchAborted {
                    error,
                    report: Box::new(report),
                });
            }
        }

        diagnostics.phase_end("acquire");

        let report = build_report(engine, plan, &diagnostics);
        info!(
            total = report.statistics.total,
            loaded = report.statistics.loaded,
            failed = report.statistics.failed,
            fallbacks = report.statistics.fallback_count,
            "batch complete"
        );
        Ok(report)
    }

    /// Resolve order and canonical keys without calling the transport
    pub fn plan(&self, descriptors: &[ComponentDescriptor]) -> PlanReport {
        let diagnostics = DiagnosticsRecorder::new();
        let resolver = PathResolver::from_config(&self.config);
        let issues = validate_all(descriptors);

        diagnostics.phase_start("resolve");
        let unique = dedupe(descriptors, &diagnostics);
        let plan = order(&unique, &diagnostics);
        diagnostics.phase_end("resolve");

        let by_name: HashMap<&str, &ComponentDescriptor> =
            unique.iter().map(|d| (d.name.as_str(), *d)).collect();
        let keys = plan
            .order
            .iter()
            .filter_map(|name| by_name.get(name.as_str()))
            .map(|d| PlannedComponent {
                name: d.name.clone(),
                key: resolver.resolve(d),
                required: d.required,
            })
            .collect();

        PlanReport {
            plan,
            keys,
            issues,
            diagnostics: diagnostics.report(),
        }
    }
}

/// Drop repeated names (first declaration wins) and report descriptor issues
fn dedupe<'a>(
    descriptors: &'a [ComponentDescriptor],
    diagnostics: &DiagnosticsRecorder,
) -> Vec<&'a ComponentDescriptor> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        if !seen.insert(descriptor.name.as_str()) {
            diagnostics.warning(
                Some(descriptor.name.as_str()),
                format!("'{}' declared more than once; later declaration ignored", descriptor.name),
            );
            continue;
        }
        for issue in descriptor.validate() {
            // Self edges are reported by the graph resolver
            if !matches!(issue, DescriptorIssue::SelfDependency { .. }) {
                diagnostics.warning(Some(descriptor.name.as_str()), issue.to_string());
            }
        }
        unique.push(descriptor);
    }

    unique
}

fn order(unique: &[&ComponentDescriptor], diagnostics: &DiagnosticsRecorder) -> LoadPlan {
    let requested: Vec<String> = unique.iter().map(|d| d.name.clone()).collect();
    let edges: HashMap<String, Vec<String>> = unique
        .iter()
        .map(|d| (d.name.clone(), d.dependencies.clone()))
        .collect();
    resolve_load_order(&requested, &edges, diagnostics)
}

fn build_report(
    engine: &AcquisitionEngine,
    plan: LoadPlan,
    diagnostics: &DiagnosticsRecorder,
) -> BatchReport {
    let registry = engine.registry();
    let statistics = registry.statistics();
    BatchReport {
        registry,
        statistics,
        plan,
        diagnostics: diagnostics.report(),
    }
}
