// CLI Interface
//
// Command-line interface for inspecting LeChargeur manifests without
// loading anything.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lechargeur::{
    validate_all, BatchOrchestrator, DescriptorIssue, EventKind, LoaderManifest, PlanReport,
    StaticTransport,
};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// LeChargeur - Component Loader
#[derive(Parser, Debug)]
#[command(name = "lechargeur")]
#[command(author = "LeChargeur Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Plan and validate dependency-ordered component manifests", long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(global = true, long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show load order, canonical keys and warnings for a manifest
    Plan {
        /// Path to the TOML manifest
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Print the plan as JSON
        #[arg(long = "json")]
        json: bool,
    },

    /// Check a manifest for descriptor issues
    Validate {
        /// Path to the TOML manifest
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },
}

impl Cli {
    /// Run the CLI
    pub fn run(self) -> Result<()> {
        init_logging(self.verbose);

        match self.command {
            Commands::Plan { manifest, json } => cmd_plan(&manifest, json),
            Commands::Validate { manifest } => cmd_validate(&manifest),
        }
    }
}

/// Install the stderr subscriber; `RUST_LOG` wins over `--verbose`
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Read a manifest, with `LECHARGEUR_*` environment variables applied on top
/// of its `[loader]` table
pub fn load_manifest(path: &Path) -> Result<LoaderManifest> {
    let mut manifest = LoaderManifest::load(path)?;
    manifest.loader.apply_env(|key| std::env::var(key).ok());
    debug!(
        path = %path.display(),
        components = manifest.components.len(),
        "manifest loaded"
    );
    Ok(manifest)
}

/// Dry-run plan for a loaded manifest
pub fn plan_manifest(manifest: &LoaderManifest) -> PlanReport {
    // Planning never fetches, so an empty transport is enough
    BatchOrchestrator::new(Arc::new(StaticTransport::new()))
        .with_config(manifest.loader.clone())
        .plan(&manifest.components)
}

/// Human readable rendering of a plan
pub fn render_plan(report: &PlanReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Load order ({} components):", report.keys.len());
    for (i, entry) in report.keys.iter().enumerate() {
        let marker = if entry.required { " [required]" } else { "" };
        let _ = writeln!(out, "  {:>3}. {} -> {}{}", i + 1, entry.name, entry.key, marker);
    }

    if !report.plan.cycles.is_empty() {
        let _ = writeln!(out, "\nCycles:");
        for cycle in &report.plan.cycles {
            let _ = writeln!(out, "  {}", cycle.join(" -> "));
        }
    }

    let warnings: Vec<&str> = report
        .diagnostics
        .events
        .iter()
        .filter(|e| e.kind == EventKind::Warning)
        .map(|e| e.detail.as_str())
        .collect();
    if !warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings:");
        for warning in warnings {
            let _ = writeln!(out, "  - {}", warning);
        }
    }

    out
}

/// Human readable rendering of descriptor issues
pub fn render_issues(issues: &[DescriptorIssue]) -> String {
    let mut out = String::new();
    for issue in issues {
        let _ = writeln!(out, "  - {}", issue);
    }
    out
}

fn cmd_plan(path: &Path, json: bool) -> Result<()> {
    let manifest = load_manifest(path)?;
    let report = plan_manifest(&manifest);

    if json {
        let rendered =
            serde_json::to_string_pretty(&report).context("Failed to serialize plan")?;
        println!("{}", rendered);
    } else {
        print!("{}", render_plan(&report));
    }

    info!(components = report.keys.len(), "plan complete");
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let manifest = load_manifest(path)?;
    let issues = validate_all(&manifest.components);

    if issues.is_empty() {
        println!(
            "{}: {} component(s), no issues",
            path.display(),
            manifest.components.len()
        );
        return Ok(());
    }

    println!("{}: {} issue(s)", path.display(), issues.len());
    print!("{}", render_issues(&issues));
    bail!("manifest {} has {} issue(s)", path.display(), issues.len())
}
