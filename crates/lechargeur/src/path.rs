// Path resolution
//
// *Le Chemin* (The Path) - Maps a descriptor's candidate paths onto the
// canonical key handed to the transport.

use crate::config::LoaderConfig;
use crate::descriptor::ComponentDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default location prefixed to bare component names
pub const DEFAULT_LOCATION: &str = "components";

/// Canonical acquisition key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Wrap an already-canonical string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolves descriptors to canonical keys.
///
/// Exact-match overrides (legacy aliases) take precedence over structural
/// normalization. Resolution never fails.
#[derive(Debug, Clone)]
pub struct PathResolver {
    overrides: HashMap<String, String>,
    default_location: String,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(DEFAULT_LOCATION)
    }
}

impl PathResolver {
    /// Create a resolver with no overrides
    pub fn new(default_location: impl Into<String>) -> Self {
        let location = default_location.into();
        Self {
            overrides: HashMap::new(),
            default_location: location.trim().trim_end_matches('/').to_string(),
        }
    }

    /// Build a resolver from loader configuration
    pub fn from_config(config: &LoaderConfig) -> Self {
        let mut resolver = Self::new(config.default_location.clone());
        for (alias, target) in &config.overrides {
            resolver.add_override(alias.clone(), target.clone());
        }
        resolver
    }

    /// Register an alias, builder style
    #[must_use]
    pub fn with_override(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.add_override(alias, target);
        self
    }

    /// Register an alias
    pub fn add_override(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.overrides
            .insert(alias.into().trim().to_string(), target.into());
    }

    /// Location bare names are placed under
    pub fn default_location(&self) -> &str {
        &self.default_location
    }

    /// Resolve a descriptor to its canonical key
    pub fn resolve(&self, descriptor: &ComponentDescriptor) -> CanonicalKey {
        for candidate in &descriptor.paths {
            if let Some(target) = self.overrides.get(candidate.trim()) {
                let key = self
                    .normalize(target)
                    .unwrap_or_else(|| target.trim().to_string());
                return CanonicalKey(key);
            }
            if let Some(key) = self.normalize(candidate) {
                return CanonicalKey(key);
            }
        }

        // No usable candidate: fall back to the logical name itself
        let key = self
            .normalize(&descriptor.name)
            .unwrap_or_else(|| self.default_location.clone());
        CanonicalKey(key)
    }

    /// Structural normalization of a single path.
    ///
    /// Returns `None` only when nothing usable remains.
    pub fn normalize(&self, path: &str) -> Option<String> {
        let unified = path.trim().replace('\\', "/");
        if unified.is_empty() {
            return None;
        }

        let (scheme, rest) = match unified.find("://") {
            Some(idx) => unified.split_at(idx + 3),
            None => ("", unified.as_str()),
        };

        let absolute = scheme.is_empty() && rest.starts_with('/');
        let bare = scheme.is_empty() && !rest.contains('/');

        let segments: Vec<&str> = rest
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        if segments.is_empty() {
            return None;
        }
        let joined = segments.join("/");

        let key = if !scheme.is_empty() {
            format!("{}{}", scheme, joined)
        } else if absolute {
            format!("/{}", joined)
        } else if bare && joined != ".." && !self.default_location.is_empty() {
            format!("{}/{}", self.default_location, joined)
        } else {
            joined
        };

        Some(key)
    }
}
