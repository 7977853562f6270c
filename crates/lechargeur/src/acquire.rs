// Retry acquisition
//
// *L'Acquisition* (The Acquisition) - Single-flight, deadline-bounded,
// multi-attempt acquisition of one component.

use crate::component::ComponentHandle;
use crate::config::LoaderConfig;
use crate::descriptor::ComponentDescriptor;
use crate::diagnostics::{DiagnosticsRecorder, EventKind};
use crate::error::{AttemptFailure, LoadError};
use crate::fallback::FallbackTable;
use crate::path::{CanonicalKey, PathResolver};
use crate::policy::RetryPolicy;
use crate::registry::{LoadRecord, LoadState, Registry, Statistics};
use crate::transport::{AttemptContext, Transport, TransportError};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// Outcome of one acquisition: an instance, nothing (optional component
/// failed), or a hard error (required component failed).
pub type AcquireResult = Result<Option<ComponentHandle>, LoadError>;

type SharedAcquisition = Shared<BoxFuture<'static, AcquireResult>>;

/// Everything guarded by the coordinating lock.
///
/// The lock is never held across an `.await`.
#[derive(Default)]
struct LoaderState {
    registry: Registry,
    inflight: HashMap<String, SharedAcquisition>,
    cache: HashMap<CanonicalKey, ComponentHandle>,
}

struct EngineInner {
    transport: Arc<dyn Transport>,
    fallbacks: FallbackTable,
    resolver: PathResolver,
    policy: RetryPolicy,
    diagnostics: Arc<DiagnosticsRecorder>,
    state: Mutex<LoaderState>,
}

/// Run-scoped acquisition engine.
///
/// Cheap to clone; clones share one registry, one in-flight map and one
/// instance cache, so concurrent `acquire` calls for the same name from any
/// clone join a single attempt series.
#[derive(Clone)]
pub struct AcquisitionEngine {
    inner: Arc<EngineInner>,
}

impl AcquisitionEngine {
    /// Create an engine with a fresh registry and diagnostics recorder
    pub fn new(
        transport: Arc<dyn Transport>,
        fallbacks: FallbackTable,
        config: &LoaderConfig,
    ) -> Self {
        Self::with_diagnostics(
            transport,
            fallbacks,
            config,
            Arc::new(DiagnosticsRecorder::new()),
        )
    }

    /// Create an engine that records into an existing recorder
    pub fn with_diagnostics(
        transport: Arc<dyn Transport>,
        fallbacks: FallbackTable,
        config: &LoaderConfig,
        diagnostics: Arc<DiagnosticsRecorder>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                transport,
                fallbacks,
                resolver: PathResolver::from_config(config),
                policy: RetryPolicy::from_config(config),
                diagnostics,
                state: Mutex::new(LoaderState::default()),
            }),
        }
    }

    /// Diagnostics recorder shared by this run
    pub fn diagnostics(&self) -> Arc<DiagnosticsRecorder> {
        Arc::clone(&self.inner.diagnostics)
    }

    /// Path resolver used by [`Self::acquire`]
    pub fn resolver(&self) -> &PathResolver {
        &self.inner.resolver
    }

    /// Retry timing used for every attempt series
    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// Create the `NotStarted` record for a descriptor if it does not exist
    pub fn register(&self, descriptor: &ComponentDescriptor) {
        self.inner
            .lock_state()
            .registry
            .ensure(&descriptor.name, descriptor.required);
    }

    /// Snapshot of the registry
    pub fn registry(&self) -> Registry {
        self.inner.lock_state().registry.clone()
    }

    /// Statistics over the current registry
    pub fn statistics(&self) -> Statistics {
        self.inner.lock_state().registry.statistics()
    }

    /// State of one component
    pub fn state_of(&self, name: &str) -> Option<LoadState> {
        self.inner.lock_state().registry.state(name)
    }

    /// Number of attempt series currently outstanding
    pub fn in_flight(&self) -> usize {
        self.inner.lock_state().inflight.len()
    }

    /// Resolve the descriptor's canonical key, then acquire it
    pub async fn acquire(&self, descriptor: &ComponentDescriptor) -> AcquireResult {
        let key = self.inner.resolver.resolve(descriptor);
        self.acquire_resolved(descriptor, key).await
    }

    /// Acquire a component under an already-resolved key.
    ///
    /// Joins an outstanding attempt series for the same name if there is
    /// one; replays the recorded outcome if the record is already terminal.
    pub async fn acquire_resolved(
        &self,
        descriptor: &ComponentDescriptor,
        key: CanonicalKey,
    ) -> AcquireResult {
        let pending = {
            let mut state = self.inner.lock_state();
            let record = state.registry.ensure(&descriptor.name, descriptor.required);
            if record.state.is_terminal() {
                debug!(component = %descriptor.name, state = ?record.state, "replaying terminal outcome");
                return replay(record);
            }

            match state.inflight.get(&descriptor.name) {
                Some(pending) => {
                    debug!(component = %descriptor.name, "joining in-flight acquisition");
                    pending.clone()
                }
                None => {
                    state.registry.begin(&descriptor.name, key.clone());
                    let pending = self.inner.start_series(descriptor.clone(), key);
                    state
                        .inflight
                        .insert(descriptor.name.clone(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }
}

/// Rebuild the outcome of a terminal record
fn replay(record: &LoadRecord) -> AcquireResult {
    match record.state {
        LoadState::Failed if record.required => Err(LoadError::RequiredUnavailable {
            name: record.name.clone(),
            attempts: record.attempts,
            last_error: record.last_error.clone().unwrap_or_default(),
        }),
        _ => Ok(record.instance.clone()),
    }
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the attempt series and wrap it in a shareable future.
    ///
    /// The series runs on its own task, so it completes even if every
    /// caller stops waiting.
    fn start_series(
        self: &Arc<Self>,
        descriptor: ComponentDescriptor,
        key: CanonicalKey,
    ) -> SharedAcquisition {
        let name = descriptor.name.clone();
        let required = descriptor.required;
        let series = tokio::spawn(Arc::clone(self).run_series(descriptor, key));
        let inner = Arc::clone(self);

        async move {
            match series.await {
                Ok(result) => result,
                Err(join_error) => {
                    let reason = join_error.to_string();
                    inner.diagnostics.error(
                        Some(name.as_str()),
                        format!("acquisition task aborted: {}", reason),
                    );
                    let mut state = inner.lock_state();
                    state
                        .registry
                        .finish(&name, LoadState::Failed, None, Some(reason.clone()));
                    state.inflight.remove(&name);
                    // Optional components get what replay() gives later callers
                    if required {
                        Err(LoadError::Aborted { name, reason })
                    } else {
                        Ok(None)
                    }
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_series(
        self: Arc<Self>,
        descriptor: ComponentDescriptor,
        key: CanonicalKey,
    ) -> AcquireResult {
        let name = descriptor.name.as_str();

        let cached = self.lock_state().cache.get(&key).cloned();
        if let Some(instance) = cached {
            self.diagnostics.record(
                EventKind::Loaded,
                Some(name),
                format!("reused instance already loaded from {}", key),
            );
            return self.settle(&descriptor, &key, LoadState::Loaded, Some(instance), None);
        }

        let max_attempts = descriptor.effective_max_attempts();
        let mut last_failure: Option<AttemptFailure> = None;

        for attempt in 1..=max_attempts {
            let timeout_ms = self
                .policy
                .attempt_timeout_ms(descriptor.effective_timeout_ms(), attempt);
            let timeout = self.policy.attempt_timeout(descriptor.effective_timeout_ms(), attempt);
            let deadline = Instant::now() + timeout;

            self.lock_state().registry.note_attempt(name, attempt);
            self.diagnostics.record_attempt(
                EventKind::AttemptStart,
                name,
                attempt,
                Some(timeout_ms),
                format!("attempt {}/{} fetching {}", attempt, max_attempts, key),
            );

            let ctx = AttemptContext {
                name: name.to_string(),
                attempt,
                max_attempts,
                timeout,
                deadline,
            };
            // fetch() itself runs on the attempt task so a panicking
            // transport costs one attempt, not the series
            let transport = Arc::clone(&self.transport);
            let fetch_key = key.clone();
            let mut fetch = tokio::spawn(async move { transport.fetch(&fetch_key, ctx).await });
            let raced = time::timeout_at(deadline, &mut fetch).await;

            let failure = match raced {
                Ok(Ok(Ok(instance))) => {
                    self.diagnostics.record_attempt(
                        EventKind::Loaded,
                        name,
                        attempt,
                        Some(timeout_ms),
                        format!("loaded from {}", key),
                    );
                    return self.settle(&descriptor, &key, LoadState::Loaded, Some(instance), None);
                }
                Ok(Ok(Err(err))) => AttemptFailure::Transport(err),
                Ok(Err(join_error)) => AttemptFailure::TaskAborted(join_error.to_string()),
                Err(_elapsed) => {
                    self.watch_late_arrival(name.to_string(), key.clone(), attempt, fetch);
                    AttemptFailure::TimedOut(timeout_ms)
                }
            };

            self.diagnostics.record_attempt(
                EventKind::AttemptFail,
                name,
                attempt,
                Some(timeout_ms),
                failure.to_string(),
            );
            self.lock_state()
                .registry
                .note_failure(name, failure.to_string());
            last_failure = Some(failure);

            if attempt < max_attempts {
                let pause = self.policy.backoff(attempt);
                debug!(component = name, attempt, pause_ms = pause.as_millis() as u64, "backing off");
                time::sleep(pause).await;
            }
        }

        self.exhausted(&descriptor, &key, max_attempts, last_failure)
    }

    /// Attempts are spent: install a fallback, or fail.
    fn exhausted(
        &self,
        descriptor: &ComponentDescriptor,
        key: &CanonicalKey,
        attempts: u32,
        last_failure: Option<AttemptFailure>,
    ) -> AcquireResult {
        let name = descriptor.name.as_str();
        let last_error = last_failure
            .map(|f| f.to_string())
            .unwrap_or_else(|| "no attempt completed".to_string());

        if let Some(stand_in) = self.fallbacks.synthesize(name) {
            self.diagnostics.record(
                EventKind::FallbackUsed,
                Some(name),
                format!(
                    "fallback installed after {} failed attempt(s): {}",
                    attempts, last_error
                ),
            );
            return self.settle(
                descriptor,
                key,
                LoadState::FallbackActive,
                Some(stand_in),
                Some(last_error),
            );
        }

        self.diagnostics.error(
            Some(name),
            format!(
                "{} component failed after {} attempt(s): {}",
                if descriptor.required { "required" } else { "optional" },
                attempts,
                last_error
            ),
        );
        self.settle(descriptor, key, LoadState::Failed, None, Some(last_error.clone()))?;

        if descriptor.required {
            Err(LoadError::RequiredUnavailable {
                name: name.to_string(),
                attempts,
                last_error,
            })
        } else {
            Ok(None)
        }
    }

    /// Record the terminal state, release the in-flight slot, and cache a
    /// real instance under its canonical key.
    fn settle(
        &self,
        descriptor: &ComponentDescriptor,
        key: &CanonicalKey,
        terminal: LoadState,
        instance: Option<ComponentHandle>,
        error: Option<String>,
    ) -> AcquireResult {
        let name = descriptor.name.as_str();
        let mut state = self.lock_state();
        state.inflight.remove(name);

        if !state
            .registry
            .finish(name, terminal, instance.clone(), error)
        {
            // Someone else already settled this record; theirs stands
            return state
                .registry
                .get(name)
                .map(replay)
                .unwrap_or(Ok(None));
        }

        if terminal == LoadState::Loaded {
            if let Some(instance) = &instance {
                state.cache.insert(key.clone(), Arc::clone(instance));
            }
            info!(component = name, key = %key, "component loaded");
        }

        Ok(instance)
    }

    /// Keep observing a transport task that lost its deadline race.
    ///
    /// Whatever it eventually produces is discarded: it never reaches the
    /// registry or the instance cache.
    fn watch_late_arrival(
        self: &Arc<Self>,
        name: String,
        key: CanonicalKey,
        attempt: u32,
        fetch: JoinHandle<Result<ComponentHandle, TransportError>>,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match fetch.await {
                Ok(Ok(_late)) => {
                    let current = inner.lock_state().registry.state(&name);
                    inner.diagnostics.record_attempt(
                        EventKind::Warning,
                        &name,
                        attempt,
                        None,
                        format!(
                            "late result from {} discarded (record is {:?})",
                            key, current
                        ),
                    );
                }
                Ok(Err(err)) => {
                    debug!(component = %name, attempt, error = %err, "late failure ignored");
                }
                Err(join_error) => {
                    debug!(component = %name, attempt, error = %join_error, "abandoned fetch task ended");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::transport::{transport_fn, FetchFuture};
    use std::any::Any;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct Widget(String);

    impl Component for Widget {
        fn name(&self) -> &str {
            &self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn widget(name: &str) -> ComponentHandle {
        Arc::new(Widget(name.to_string()))
    }

    /// Fails `failures` times, then succeeds after `delay`
    fn flaky(calls: Arc<AtomicU32>, failures: u32, delay: Duration) -> Arc<dyn Transport> {
        Arc::new(transport_fn(move |key, _ctx| -> FetchFuture {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let key = key.clone();
            async move {
                time::sleep(delay).await;
                if n <= failures {
                    Err(TransportError::failed(format!("transient #{n}")))
                } else {
                    Ok(widget(key.as_str()))
                }
            }
            .boxed()
        }))
    }

    fn engine(transport: Arc<dyn Transport>, fallbacks: FallbackTable) -> AcquisitionEngine {
        AcquisitionEngine::new(transport, fallbacks, &LoaderConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(flaky(calls.clone(), 2, Duration::from_millis(10)), FallbackTable::new());
        let d = ComponentDescriptor::new("cache").with_max_attempts(3);

        let instance = engine.acquire(&d).await.expect("ok").expect("instance");

        assert_eq!(instance.name(), "components/cache");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let registry = engine.registry();
        let record = registry.get("cache").expect("record");
        assert_eq!(record.state, LoadState::Loaded);
        assert_eq!(record.attempts, 3);
        assert_eq!(engine.diagnostics().count(EventKind::AttemptFail), 2);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_series() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(flaky(calls.clone(), 0, Duration::from_millis(100)), FallbackTable::new());
        let d = ComponentDescriptor::new("auth");

        let waiters = (0..8).map(|_| {
            let engine = engine.clone();
            let d = d.clone();
            tokio::spawn(async move { engine.acquire(&d).await })
        });
        let results = futures::future::join_all(waiters).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0]
            .as_ref()
            .expect("join")
            .as_ref()
            .expect("ok")
            .clone()
            .expect("instance");
        for result in &results {
            let instance = result
                .as_ref()
                .expect("join")
                .as_ref()
                .expect("ok")
                .clone()
                .expect("instance");
            assert!(Arc::ptr_eq(&first, &instance));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(flaky(calls.clone(), u32::MAX, Duration::from_millis(5)), FallbackTable::new());
        let d = ComponentDescriptor::new("auth").required(true).with_max_attempts(2);

        let (a, b, c) = tokio::join!(engine.acquire(&d), engine.acquire(&d), engine.acquire(&d));

        assert_eq!(calls.load(Ordering::SeqCst), 2, "one series of two attempts");
        let expected = a.clone().expect_err("required failure");
        assert_eq!(b.expect_err("same error"), expected);
        assert_eq!(c.expect_err("same error"), expected);
        assert!(matches!(expected, LoadError::RequiredUnavailable { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_outcome_is_replayed_without_transport() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(flaky(calls.clone(), 0, Duration::ZERO), FallbackTable::new());
        let d = ComponentDescriptor::new("ui");

        let first = engine.acquire(&d).await.expect("ok").expect("instance");
        let again = engine.acquire(&d).await.expect("ok").expect("instance");

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_canonical_key_reuses_cached_instance() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine(flaky(calls.clone(), 0, Duration::ZERO), FallbackTable::new());
        let modern = ComponentDescriptor::new("player").with_paths(["media/player"]);
        let legacy = ComponentDescriptor::new("legacy-player").with_paths(["media/player"]);

        let a = engine.acquire(&modern).await.expect("ok").expect("instance");
        let b = engine.acquire(&legacy).await.expect("ok").expect("instance");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state_of("legacy-player"), Some(LoadState::Loaded));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_deadlines_are_progressive() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&seen);
        let transport: Arc<dyn Transport> = Arc::new(transport_fn(move |_key, ctx| -> FetchFuture {
            observed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ctx.timeout);
            futures::future::pending().boxed()
        }));
        let engine = engine(transport, FallbackTable::new());
        let d = ComponentDescriptor::new("cache")
            .with_timeout_ms(1000)
            .with_max_attempts(4);

        let started = Instant::now();
        let outcome = engine.acquire(&d).await.expect("optional");
        assert!(outcome.is_none());

        let timeouts = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let millis: Vec<u128> = timeouts.iter().map(Duration::as_millis).collect();
        assert_eq!(millis, vec![1000, 1500, 2000, 2500]);
        // 7000 ms of deadlines plus 100 + 200 + 300 ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(7600));
    }

    #[tokio::test(start_paused = true)]
    async fn late_result_is_discarded_after_fallback() {
        let transport: Arc<dyn Transport> = Arc::new(transport_fn(|key, _ctx| -> FetchFuture {
            let key = key.clone();
            async move {
                time::sleep(Duration::from_millis(5000)).await;
                Ok(widget(key.as_str()))
            }
            .boxed()
        }));
        let mut fallbacks = FallbackTable::new();
        fallbacks.register_noop("cache");
        let engine = engine(transport, fallbacks);
        let d = ComponentDescriptor::new("cache")
            .with_timeout_ms(1000)
            .with_max_attempts(1);

        let stand_in = engine.acquire(&d).await.expect("ok").expect("fallback");
        assert_eq!(engine.state_of("cache"), Some(LoadState::FallbackActive));

        time::sleep(Duration::from_millis(10_000)).await;

        assert_eq!(engine.state_of("cache"), Some(LoadState::FallbackActive));
        let current = engine.registry().instance("cache").expect("instance");
        assert!(Arc::ptr_eq(&stand_in, &current));
        let late: Vec<_> = engine
            .diagnostics()
            .events_for("cache")
            .into_iter()
            .filter(|e| e.kind == EventKind::Warning && e.detail.contains("late result"))
            .collect();
        assert_eq!(late.len(), 1);

        // The late instance must not have been cached either
        let other = ComponentDescriptor::new("cache-alias").with_paths(["cache"]).with_max_attempts(1);
        assert!(engine.acquire(&other).await.expect("optional").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn late_result_during_next_attempt_is_not_adopted() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let transport: Arc<dyn Transport> = Arc::new(transport_fn(move |key, _ctx| -> FetchFuture {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let key = key.clone();
            if n == 1 {
                // Misses the 1000 ms deadline, lands while attempt 2 runs
                async move {
                    time::sleep(Duration::from_millis(1500)).await;
                    Ok(widget(key.as_str()))
                }
                .boxed()
            } else {
                futures::future::pending().boxed()
            }
        }));
        let engine = engine(transport, FallbackTable::new());
        let d = ComponentDescriptor::new("cache")
            .with_timeout_ms(1000)
            .with_max_attempts(2);

        let outcome = engine.acquire(&d).await.expect("optional");

        assert!(outcome.is_none());
        assert_eq!(engine.state_of("cache"), Some(LoadState::Failed));
        let late: Vec<_> = engine
            .diagnostics()
            .events_for("cache")
            .into_iter()
            .filter(|e| e.kind == EventKind::Warning && e.detail.contains("late result"))
            .collect();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].attempt, Some(1));
        assert!(late[0].detail.contains("Loading"));

        // Same canonical key under another name goes back to the transport
        let alias = ComponentDescriptor::new("cache-alias")
            .with_paths(["cache"])
            .with_max_attempts(1);
        assert!(engine.acquire(&alias).await.expect("optional").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_transport_costs_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let transport: Arc<dyn Transport> = Arc::new(transport_fn(move |key, _ctx| -> FetchFuture {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("transport blew up");
            }
            futures::future::ready(Ok(widget(key.as_str()))).boxed()
        }));
        let engine = engine(transport, FallbackTable::new());
        let d = ComponentDescriptor::new("ui").with_max_attempts(2);

        let instance = engine.acquire(&d).await.expect("ok").expect("instance");

        assert_eq!(instance.name(), "components/ui");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.state_of("ui"), Some(LoadState::Loaded));
        assert_eq!(engine.diagnostics().count(EventKind::AttemptFail), 1);
    }
}
