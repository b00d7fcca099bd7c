//! # Pegleg CLI
//!
//! Binary entry point for the `pegleg` command-line tool. It parses
//! arguments with `clap` and dispatches to the command modules, which are
//! thin wrappers over the `pegleg` library.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
