// Fallback synthesis
//
// *Le Secours* (The Rescue) - Data-driven table of stand-in factories used
// when a component exhausts its attempts.

use crate::component::{Component, ComponentHandle, Initializable};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Zero-argument factory producing a stand-in instance
pub type FallbackFactory = Arc<dyn Fn() -> ComponentHandle + Send + Sync>;

/// Mapping from logical name to fallback factory.
///
/// Supplied by the caller; the loader only looks names up.
#[derive(Clone, Default)]
pub struct FallbackTable {
    factories: HashMap<String, FallbackFactory>,
}

impl FallbackTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, builder style
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> ComponentHandle + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Register a factory, replacing any previous one for `name`
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> ComponentHandle + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register the stock [`NoopComponent`] stand-in for `name`
    pub fn register_noop(&mut self, name: impl Into<String>) {
        let name = name.into();
        let stand_in = name.clone();
        self.register(name, move || Arc::new(NoopComponent::new(stand_in.clone())) as ComponentHandle);
    }

    /// True when a factory exists for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a fresh stand-in for `name`, if one is registered.
    ///
    /// Every call invokes the factory again, so two calls yield two
    /// independent instances.
    pub fn synthesize(&self, name: &str) -> Option<ComponentHandle> {
        let factory = self.factories.get(name)?;
        debug!(component = name, "synthesizing fallback");
        Some(factory())
    }
}

impl fmt::Debug for FallbackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackTable")
            .field("names", &self.names())
            .finish()
    }
}

/// Minimal stand-in whose operations log instead of failing
#[derive(Debug)]
pub struct NoopComponent {
    name: String,
    calls: AtomicUsize,
}

impl NoopComponent {
    /// Create a stand-in for `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Accept any operation, log it, and succeed
    pub fn invoke(&self, operation: &str) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        warn!(
            component = %self.name,
            operation,
            "fallback stand-in ignored call"
        );
    }

    /// Number of operations received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Component for NoopComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_initializable(&self) -> Option<&dyn Initializable> {
        Some(self)
    }
}

impl Initializable for NoopComponent {
    fn initialize(&self) -> anyhow::Result<()> {
        self.invoke("initialize");
        Ok(())
    }
}
