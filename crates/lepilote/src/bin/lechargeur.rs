//! lechargeur binary entry point

use clap::Parser;
use lepilote::Cli;

fn main() -> anyhow::Result<()> {
    Cli::parse().run()
}
