// Integration Tests for LeChargeur
//
// End-to-end batch runs against scripted transports:
// - dependency ordering and cycle breaking
// - retry exhaustion with and without fallbacks
// - required-component abort
// - concurrent acquisition alongside a batch

use futures::FutureExt;
use lechargeur::{
    initialize_all, transport_fn, BatchOrchestrator, Component, ComponentDescriptor,
    ComponentHandle, EventKind, FallbackTable, FetchFuture, LoadError, LoadState, LoaderConfig,
    NoopComponent, StaticTransport, Transport, TransportError,
};
use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug)]
struct Service {
    key: String,
}

impl Component for Service {
    fn name(&self) -> &str {
        &self.key
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Serves every key and remembers the order keys were asked for
fn recording_transport(log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Transport> {
    Arc::new(transport_fn(move |key, _ctx| -> FetchFuture {
        log.lock().expect("log").push(key.to_string());
        let instance: ComponentHandle = Arc::new(Service {
            key: key.to_string(),
        });
        futures::future::ready(Ok(instance)).boxed()
    }))
}

/// Fails every call
fn broken_transport(calls: Arc<AtomicU32>) -> Arc<dyn Transport> {
    Arc::new(transport_fn(move |key, _ctx| -> FetchFuture {
        calls.fetch_add(1, Ordering::SeqCst);
        let key = key.clone();
        async move { Err(TransportError::failed(format!("{key} unreachable"))) }.boxed()
    }))
}

// ============================================================================
// ORDERING
// ============================================================================

mod ordering_tests {
    use super::*;

    #[tokio::test]
    async fn chain_loads_dependencies_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = BatchOrchestrator::new(recording_transport(log.clone()));

        let descriptors = vec![
            ComponentDescriptor::new("C").with_dependencies(["B"]),
            ComponentDescriptor::new("B").with_dependencies(["A"]),
            ComponentDescriptor::new("A"),
        ];

        let report = assert_ok!(orchestrator.load_all(&descriptors).await);

        assert_eq!(report.plan.order, vec!["A", "B", "C"]);
        assert_eq!(
            *log.lock().expect("log"),
            vec!["components/A", "components/B", "components/C"]
        );
        assert_eq!(report.statistics.loaded, 3);
        assert_eq!(report.statistics.unfinished(), 0);
    }

    #[tokio::test]
    async fn two_cycle_warns_once_and_both_members_finish() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = BatchOrchestrator::new(recording_transport(log));

        let descriptors = vec![
            ComponentDescriptor::new("X").with_dependencies(["Y"]),
            ComponentDescriptor::new("Y").with_dependencies(["X"]),
        ];

        let report = assert_ok!(orchestrator.load_all(&descriptors).await);

        assert_eq!(report.plan.cycles.len(), 1);
        let cycle_warnings = report
            .diagnostics
            .events
            .iter()
            .filter(|e| e.kind == EventKind::Warning && e.detail.contains("cycle"))
            .count();
        assert_eq!(cycle_warnings, 1);

        for name in ["X", "Y"] {
            let state = report.registry.state(name).expect("record");
            assert!(state.is_terminal(), "{name} ended in {state:?}");
        }
    }

    #[tokio::test]
    async fn missing_dependency_is_dropped_and_batch_completes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = BatchOrchestrator::new(recording_transport(log));

        let report = assert_ok!(
            orchestrator
                .load_all(&[ComponentDescriptor::new("player").with_dependencies(["codec"])])
                .await
        );

        assert_eq!(report.plan.missing.len(), 1);
        assert_eq!(report.registry.state("player"), Some(LoadState::Loaded));
        assert!(report.registry.get("codec").is_none());
    }
}

// ============================================================================
// RETRY AND FALLBACK
// ============================================================================

mod retry_tests {
    use super::*;

    fn cache() -> ComponentDescriptor {
        ComponentDescriptor::new("cache")
            .with_timeout_ms(1000)
            .with_max_attempts(3)
    }

    fn config() -> LoaderConfig {
        LoaderConfig {
            timeout_step_ms: 500,
            ..LoaderConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_optional_component_fails_without_aborting() {
        let calls = Arc::new(AtomicU32::new(0));
        let orchestrator =
            BatchOrchestrator::new(broken_transport(calls.clone())).with_config(config());

        let report = assert_ok!(orchestrator.load_all(&[cache()]).await);

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let deadlines: Vec<Option<u64>> = report
            .diagnostics
            .events_for("cache")
            .filter(|e| e.kind == EventKind::AttemptFail)
            .map(|e| e.deadline_ms)
            .collect();
        assert_eq!(deadlines, vec![Some(1000), Some(1500), Some(2000)]);

        assert_eq!(report.registry.state("cache"), Some(LoadState::Failed));
        assert_eq!(report.statistics.failed, 1);
        assert_eq!(report.statistics.fallback_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_component_with_fallback_stays_usable() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut fallbacks = FallbackTable::new();
        fallbacks.register_noop("cache");
        let orchestrator = BatchOrchestrator::new(broken_transport(calls))
            .with_config(config())
            .with_fallbacks(fallbacks);

        let report = assert_ok!(orchestrator.load_all(&[cache()]).await);

        assert_eq!(report.registry.state("cache"), Some(LoadState::FallbackActive));
        assert_eq!(report.statistics.fallback_count, 1);
        assert_eq!(report.statistics.failed, 0);
        assert_eq!(report.diagnostics.count(EventKind::FallbackUsed), 1);

        let instance = report.registry.instance("cache").expect("stand-in");
        let noop = instance
            .as_any()
            .downcast_ref::<NoopComponent>()
            .expect("noop stand-in");
        noop.invoke("get");
        assert_eq!(noop.calls(), 1);

        let init = initialize_all(&report.registry);
        assert!(init.is_success());
        assert_eq!(init.initialized, vec!["cache"]);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_transport_falls_back_without_aborting() {
        let transport: Arc<dyn Transport> = Arc::new(transport_fn(|key, _ctx| -> FetchFuture {
            if key.as_str() == "components/ui" {
                panic!("transport blew up");
            }
            let instance: ComponentHandle = Arc::new(Service {
                key: key.to_string(),
            });
            futures::future::ready(Ok(instance)).boxed()
        }));
        let mut fallbacks = FallbackTable::new();
        fallbacks.register_noop("ui");
        let orchestrator = BatchOrchestrator::new(transport).with_fallbacks(fallbacks);

        let descriptors = vec![
            ComponentDescriptor::new("ui").with_max_attempts(2),
            ComponentDescriptor::new("after").with_dependencies(["ui"]),
        ];

        let report = assert_ok!(orchestrator.load_all(&descriptors).await);

        assert_eq!(report.registry.state("ui"), Some(LoadState::FallbackActive));
        assert_eq!(report.registry.state("after"), Some(LoadState::Loaded));
        assert_eq!(report.statistics.fallback_count, 1);
        let failures = report
            .diagnostics
            .events_for("ui")
            .filter(|e| e.kind == EventKind::AttemptFail)
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn required_failure_aborts_before_dependents_start() {
        let calls = Arc::new(AtomicU32::new(0));
        let orchestrator = BatchOrchestrator::new(broken_transport(calls.clone()));

        let descriptors = vec![
            ComponentDescriptor::new("auth").required(true),
            ComponentDescriptor::new("session").with_dependencies(["auth"]),
        ];

        let aborted = assert_err!(orchestrator.load_all(&descriptors).await);

        assert!(matches!(
            &aborted.error,
            LoadError::RequiredUnavailable { name, attempts: 3, .. } if name == "auth"
        ));
        assert_eq!(aborted.error.component(), "auth");

        let registry = &aborted.report.registry;
        assert_eq!(registry.state("auth"), Some(LoadState::Failed));
        assert_eq!(registry.state("session"), Some(LoadState::NotStarted));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "session never fetched");
        assert!(aborted.report.diagnostics.count(EventKind::Error) >= 2);
    }
}

// ============================================================================
// CONCURRENCY
// ============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn caller_acquiring_mid_batch_joins_the_batch_series() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let transport: Arc<dyn Transport> = Arc::new(transport_fn(move |key, _ctx| -> FetchFuture {
            counter.fetch_add(1, Ordering::SeqCst);
            let key = key.to_string();
            async move {
                time::sleep(Duration::from_millis(200)).await;
                Ok(Arc::new(Service { key }) as ComponentHandle)
            }
            .boxed()
        }));
        let orchestrator = BatchOrchestrator::new(transport);
        let engine = orchestrator.engine();
        let renderer = ComponentDescriptor::new("renderer");

        let side = {
            let engine = engine.clone();
            let renderer = renderer.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_millis(50)).await;
                engine.acquire(&renderer).await
            })
        };

        let report = assert_ok!(orchestrator.load_with(&engine, &[renderer]).await);
        let from_side = side.await.expect("join").expect("ok").expect("instance");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let from_batch = report.registry.instance("renderer").expect("instance");
        assert!(Arc::ptr_eq(&from_batch, &from_side));
    }

    #[tokio::test(start_paused = true)]
    async fn late_transport_result_never_replaces_fallback() {
        let transport: Arc<dyn Transport> = Arc::new(transport_fn(|key, _ctx| -> FetchFuture {
            let key = key.to_string();
            async move {
                time::sleep(Duration::from_millis(3000)).await;
                Ok(Arc::new(Service { key }) as ComponentHandle)
            }
            .boxed()
        }));
        let fallbacks = FallbackTable::new().with("feed", || {
            Arc::new(NoopComponent::new("feed")) as ComponentHandle
        });
        let orchestrator = BatchOrchestrator::new(transport).with_fallbacks(fallbacks);
        let engine = orchestrator.engine();

        let feed = ComponentDescriptor::new("feed")
            .with_timeout_ms(500)
            .with_max_attempts(1);
        let report = assert_ok!(orchestrator.load_with(&engine, &[feed]).await);
        assert_eq!(report.registry.state("feed"), Some(LoadState::FallbackActive));

        time::sleep(Duration::from_millis(5000)).await;

        assert_eq!(engine.state_of("feed"), Some(LoadState::FallbackActive));
        let instance = engine.registry().instance("feed").expect("instance");
        assert!(instance.as_any().is::<NoopComponent>());
    }

    #[tokio::test]
    async fn static_transport_batch_reports_json_diagnostics() {
        let transport = StaticTransport::new()
            .with("components/a", || Arc::new(NoopComponent::new("a")) as ComponentHandle)
            .with("components/b", || Arc::new(NoopComponent::new("b")) as ComponentHandle);
        let orchestrator = BatchOrchestrator::new(Arc::new(transport));

        let descriptors = vec![
            ComponentDescriptor::new("b").with_dependencies(["a"]),
            ComponentDescriptor::new("a"),
        ];
        let report = assert_ok!(orchestrator.load_all(&descriptors).await);

        let json = report.diagnostics.to_json().expect("json");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert!(parsed["events"].as_array().is_some_and(|e| !e.is_empty()));
        assert_eq!(report.statistics.loaded, 2);
    }
}
