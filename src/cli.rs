//! CLI argument parsing and command dispatch

use std::io::{self, Write};

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::commands;

/// Pegleg - aggregate, lint, render and secure layered site manifests
#[derive(Parser, Debug)]
#[command(name = "pegleg")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Work with sites: list, show, render, collect, lint and secrets
    Site(commands::site::SiteArgs),

    /// Generate a passphrase or salt for the secrets environment
    Generate(commands::generate::GenerateArgs),

    /// Print a shell completion script, e.g. `pegleg completions bash > /etc/bash_completion.d/pegleg`
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);

        match self.command {
            Commands::Site(args) => commands::site::execute(args, &self.color),
            Commands::Generate(args) => commands::generate::execute(args),
            Commands::Completions { shell } => write_completions(shell, &mut io::stdout()),
        }
    }
}

fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(level).format_timestamp(None);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    // A logger may already be installed when running inside tests.
    let _ = builder.try_init();
}

/// Writes the completion script for every `pegleg` command to `out`.
fn write_completions(shell: Shell, out: &mut dyn Write) -> Result<()> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, out);
    Ok(())
}
