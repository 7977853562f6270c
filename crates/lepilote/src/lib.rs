// lepilote - Command Line
//
// *Le Pilote* (The Pilot) - Manifest planning and validation from the shell

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Command-line interface
pub mod cli;

pub use cli::{load_manifest, plan_manifest, render_issues, render_plan, Cli, Commands};
