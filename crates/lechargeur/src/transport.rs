// Transport abstraction
//
// *Le Transport* (The Transport) - The caller-supplied capability that
// actually obtains a component for a canonical key.

use crate::component::ComponentHandle;
use crate::path::CanonicalKey;
use futures::future::{self, BoxFuture};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Failure reported by a transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing is available under the key
    #[error("no component available at '{0}'")]
    NotFound(String),

    /// Acquisition started but failed
    #[error("transport failure: {0}")]
    Failed(String),
}

impl TransportError {
    /// Shorthand for [`TransportError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        TransportError::Failed(message.into())
    }
}

/// Per-attempt context passed into every fetch.
///
/// The loader races the fetch against `deadline` regardless; a transport
/// that honours it can stop work early instead of running on unobserved.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Logical component name
    pub name: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Attempt budget for this component
    pub max_attempts: u32,
    /// Timeout applied to this attempt
    pub timeout: Duration,
    /// Instant after which the attempt is abandoned
    pub deadline: Instant,
}

impl AttemptContext {
    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// True once the deadline has passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// True on the final attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Future returned by [`Transport::fetch`]
pub type FetchFuture = BoxFuture<'static, Result<ComponentHandle, TransportError>>;

/// Obtains a component instance for a canonical key.
///
/// Implementations may fail or hang; the loader bounds every call with a
/// deadline and does not rely on the future being cancellable.
pub trait Transport: Send + Sync + 'static {
    /// Start acquiring the component stored under `key`
    fn fetch(&self, key: &CanonicalKey, ctx: AttemptContext) -> FetchFuture;
}

/// Adapter turning a closure into a [`Transport`]
pub struct FnTransport<F> {
    f: F,
}

/// Build a transport from a closure
pub fn transport_fn<F>(f: F) -> FnTransport<F>
where
    F: Fn(&CanonicalKey, AttemptContext) -> FetchFuture + Send + Sync + 'static,
{
    FnTransport { f }
}

impl<F> Transport for FnTransport<F>
where
    F: Fn(&CanonicalKey, AttemptContext) -> FetchFuture + Send + Sync + 'static,
{
    fn fetch(&self, key: &CanonicalKey, ctx: AttemptContext) -> FetchFuture {
        (self.f)(key, ctx)
    }
}

type Factory = Arc<dyn Fn() -> ComponentHandle + Send + Sync>;

/// In-memory transport backed by a key -> factory table.
///
/// Useful for embedding applications that link their components statically.
#[derive(Clone, Default)]
pub struct StaticTransport {
    factories: HashMap<CanonicalKey, Factory>,
}

impl StaticTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a canonical key, builder style
    #[must_use]
    pub fn with<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> ComponentHandle + Send + Sync + 'static,
    {
        self.register(key, factory);
        self
    }

    /// Register a factory under a canonical key
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> ComponentHandle + Send + Sync + 'static,
    {
        self.factories
            .insert(CanonicalKey::new(key), Arc::new(factory));
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for StaticTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.factories.keys().map(CanonicalKey::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("StaticTransport").field("keys", &keys).finish()
    }
}

impl Transport for StaticTransport {
    fn fetch(&self, key: &CanonicalKey, _ctx: AttemptContext) -> FetchFuture {
        let result = match self.factories.get(key) {
            Some(factory) => Ok(factory()),
            None => Err(TransportError::NotFound(key.to_string())),
        };
        Box::pin(future::ready(result))
    }
}
