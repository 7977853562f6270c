// Component descriptors
//
// *Le Descripteur* (The Descriptor) - Static description of one loadable
// component, its dependencies and its retry budget.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Default per-attempt timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Default number of acquisition attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Static configuration for one loadable component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Unique logical name
    pub name: String,

    /// Candidate paths, tried in order; the first that resolves wins
    #[serde(default)]
    pub paths: Vec<String>,

    /// Logical names this component depends on
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Whether a total failure aborts the batch
    #[serde(default)]
    pub required: bool,

    /// Base timeout for the first attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl ComponentDescriptor {
    /// Create a descriptor with default retry settings and no dependencies
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: Vec::new(),
            dependencies: Vec::new(),
            required: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the candidate paths
    #[must_use]
    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Set the dependencies
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the component as required or optional
    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Set the first-attempt timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the attempt budget
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Timeout clamped to at least one millisecond
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.max(1)
    }

    /// Attempt budget clamped to at least one attempt
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Check the descriptor on its own.
    ///
    /// Issues are reported, never fatal: the loader clamps numeric fields
    /// and drops self edges.
    pub fn validate(&self) -> Vec<DescriptorIssue> {
        let mut issues = Vec::new();

        if self.name.trim().is_empty() {
            issues.push(DescriptorIssue::EmptyName);
        }
        if self.timeout_ms == 0 {
            issues.push(DescriptorIssue::ZeroTimeout {
                name: self.name.clone(),
            });
        }
        if self.max_attempts == 0 {
            issues.push(DescriptorIssue::ZeroAttempts {
                name: self.name.clone(),
            });
        }
        if self.dependencies.iter().any(|d| d == &self.name) {
            issues.push(DescriptorIssue::SelfDependency {
                name: self.name.clone(),
            });
        }

        issues
    }
}

/// A configuration problem in a descriptor list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DescriptorIssue {
    /// Name is empty or whitespace
    EmptyName,
    /// `timeout_ms` is zero; clamped to 1 ms
    ZeroTimeout {
        /// Offending component
        name: String,
    },
    /// `max_attempts` is zero; clamped to one attempt
    ZeroAttempts {
        /// Offending component
        name: String,
    },
    /// Component lists itself as a dependency
    SelfDependency {
        /// Offending component
        name: String,
    },
    /// Name declared more than once; the first declaration wins
    DuplicateName {
        /// Offending component
        name: String,
    },
}

impl fmt::Display for DescriptorIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorIssue::EmptyName => write!(f, "descriptor has an empty name"),
            DescriptorIssue::ZeroTimeout { name } => {
                write!(f, "'{}' has timeout_ms = 0 (clamped to 1)", name)
            }
            DescriptorIssue::ZeroAttempts { name } => {
                write!(f, "'{}' has max_attempts = 0 (clamped to 1)", name)
            }
            DescriptorIssue::SelfDependency { name } => {
                write!(f, "'{}' depends on itself", name)
            }
            DescriptorIssue::DuplicateName { name } => {
                write!(f, "'{}' is declared more than once", name)
            }
        }
    }
}

/// Validate a whole descriptor list, including duplicate names
pub fn validate_all(descriptors: &[ComponentDescriptor]) -> Vec<DescriptorIssue> {
    let mut seen = HashSet::new();
    let mut issues = Vec::new();

    for descriptor in descriptors {
        issues.extend(descriptor.validate());
        if !seen.insert(descriptor.name.as_str()) {
            issues.push(DescriptorIssue::DuplicateName {
                name: descriptor.name.clone(),
            });
        }
    }

    issues
}
