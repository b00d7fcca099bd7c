//! # Generate Command Implementation
//!
//! `pegleg generate passphrase|salt` prints a random string suitable for
//! `PEGLEG_PASSPHRASE` or `PEGLEG_SALT`.

use anyhow::Result;
use clap::{Args, Subcommand};

use pegleg::secrets::crypto_string::{CryptoString, MIN_LENGTH};

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(subcommand)]
    pub command: GenerateCommand,
}

#[derive(Subcommand, Debug)]
pub enum GenerateCommand {
    /// Print a random passphrase
    Passphrase {
        /// Length of the passphrase (minimum 24)
        #[arg(short = 'l', long, default_value_t = MIN_LENGTH)]
        length: usize,
    },
    /// Print a random salt
    Salt {
        /// Length of the salt (minimum 24)
        #[arg(short = 'l', long, default_value_t = MIN_LENGTH)]
        length: usize,
    },
}

/// Execute the `generate` command.
pub fn execute(args: GenerateArgs) -> Result<()> {
    let length = match args.command {
        GenerateCommand::Passphrase { length } | GenerateCommand::Salt { length } => length,
    };
    println!("{}", CryptoString::default().generate(length));
    Ok(())
}
