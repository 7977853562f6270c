// Loader Configuration
//
// *La Configuration* (The Configuration) - Retry timing, path rules and the
// component manifest.

use crate::descriptor::ComponentDescriptor;
use crate::path::DEFAULT_LOCATION;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Default per-attempt timeout growth in milliseconds
pub const DEFAULT_TIMEOUT_STEP_MS: u64 = 500;

/// Default pause after the first failed attempt
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 100;

/// Default growth of the pause per attempt
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 100;

/// Default cap on the pause between attempts
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 2000;

/// Loader-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Added to a descriptor's timeout for every attempt after the first
    pub timeout_step_ms: u64,

    /// Pause after the first failed attempt
    pub backoff_base_ms: u64,

    /// Growth of the pause per further attempt
    pub backoff_step_ms: u64,

    /// Upper bound on the pause
    pub backoff_max_ms: u64,

    /// Location bare component names are placed under
    pub default_location: String,

    /// Exact-match path aliases (legacy name -> canonical path)
    pub overrides: BTreeMap<String, String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            timeout_step_ms: DEFAULT_TIMEOUT_STEP_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            default_location: DEFAULT_LOCATION.to_string(),
            overrides: BTreeMap::new(),
        }
    }
}

impl LoaderConfig {
    /// Defaults with environment overrides applied
    ///
    /// Environment variables:
    /// - `LECHARGEUR_TIMEOUT_STEP_MS`
    /// - `LECHARGEUR_BACKOFF_BASE_MS`
    /// - `LECHARGEUR_BACKOFF_STEP_MS`
    /// - `LECHARGEUR_BACKOFF_MAX_MS`
    /// - `LECHARGEUR_DEFAULT_LOCATION`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Unparseable numbers are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let numeric = |key: &str, target: &mut u64| {
            if let Some(value) = lookup(key) {
                if let Ok(parsed) = value.trim().parse::<u64>() {
                    *target = parsed;
                }
            }
        };

        numeric("LECHARGEUR_TIMEOUT_STEP_MS", &mut self.timeout_step_ms);
        numeric("LECHARGEUR_BACKOFF_BASE_MS", &mut self.backoff_base_ms);
        numeric("LECHARGEUR_BACKOFF_STEP_MS", &mut self.backoff_step_ms);
        numeric("LECHARGEUR_BACKOFF_MAX_MS", &mut self.backoff_max_ms);

        if let Some(location) = lookup("LECHARGEUR_DEFAULT_LOCATION") {
            self.default_location = location;
        }
    }
}

/// Loader settings plus the component list, as read from a TOML manifest
///
/// ```toml
/// [loader]
/// timeout_step_ms = 500
///
/// [loader.overrides]
/// "legacy-cache" = "stores/cache"
///
/// [[component]]
/// name = "cache"
/// paths = ["legacy-cache"]
/// max_attempts = 3
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderManifest {
    /// Loader-wide settings
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Components to load
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentDescriptor>,
}

impl LoaderManifest {
    /// Load a manifest from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse manifest: {:?}", path))
    }

    /// Parse a manifest from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let manifest: LoaderManifest = toml::from_str(content).context("Invalid manifest TOML")?;
        Ok(manifest)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize manifest")
    }

    /// Write the manifest to a file, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write manifest: {:?}", path))?;
        Ok(())
    }
}
