//! # Secrets Commands
//!
//! `pegleg site secrets` generates PKI material and passphrases, encrypts
//! and decrypts secrets files, wraps arbitrary files as managed secrets and
//! checks certificate expiry.
//!
//! Commands that encrypt or decrypt read `PEGLEG_PASSPHRASE` and
//! `PEGLEG_SALT` before touching any repository or file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use pegleg::config::Credentials;
use pegleg::document::{self, LAYER_SITE};
use pegleg::files::{self, SiteCatalog};
use pegleg::output::{OutputConfig, Status};
use pegleg::secrets::management::{encrypt_site, wrap_secret, WrapOptions};
use pegleg::secrets::passphrase::PassphraseGenerator;
use pegleg::secrets::pki::{check_certificates, PkiGenerator};
use pegleg::secrets::pki_utility::{PkiUtility, DEFAULT_DURATION_DAYS};
use pegleg::secrets::{SecretSource, SecretsManagement};

use super::{default_save_location, resolve, RepoArgs};

#[derive(Args, Debug)]
pub struct SecretsArgs {
    #[command(subcommand)]
    pub command: SecretsCommand,
}

#[derive(Args, Debug, Clone)]
pub struct AuthorArgs {
    /// Recorded as the author of generated and encrypted documents
    #[arg(short = 'a', long, env = "USER")]
    pub author: String,
}

#[derive(Subcommand, Debug)]
pub enum SecretsCommand {
    /// Generate certificates and keys declared by the site's PKI catalogs
    GeneratePki {
        site: String,

        #[command(flatten)]
        author: AuthorArgs,

        /// Certificate validity in days
        #[arg(short = 'd', long, default_value_t = DEFAULT_DURATION_DAYS)]
        days: i64,

        /// Regenerate everything, ignoring existing certificates and keys
        #[arg(long)]
        regenerate_all: bool,

        /// Directory receiving site/<site>/secrets (default: the site repository)
        #[arg(short = 's', long, value_name = "DIR")]
        save_location: Option<PathBuf>,
    },

    /// Generate secrets from catalogs
    #[command(subcommand)]
    Generate(GenerateSecret),

    /// Encrypt every secrets file of a site
    Encrypt {
        site: String,

        #[command(flatten)]
        author: AuthorArgs,

        /// Write encrypted files under this directory (default: the site repository)
        #[arg(short = 's', long, value_name = "DIR")]
        save_location: Option<PathBuf>,
    },

    /// Decrypt a secrets file, or every secrets file under a directory
    Decrypt {
        /// File or directory to decrypt
        #[arg(long, value_name = "PATH")]
        path: PathBuf,

        /// Write decrypted files under this directory
        #[arg(short = 's', long, value_name = "DIR", conflicts_with = "overwrite")]
        save_location: Option<PathBuf>,

        /// Replace the files with their decrypted content
        #[arg(long)]
        overwrite: bool,
    },

    /// Wrap a file's content as a managed secret document
    Wrap {
        #[command(flatten)]
        author: AuthorArgs,

        /// File whose content becomes the document data
        #[arg(long, value_name = "FILE")]
        filename: PathBuf,

        /// Where to write the managed document
        #[arg(long, value_name = "FILE")]
        output_path: PathBuf,

        /// Schema of the wrapped document, e.g. deckhand/Certificate/v1
        #[arg(short = 's', long)]
        schema: String,

        /// Name of the wrapped document
        #[arg(short = 'n', long)]
        name: String,

        /// Layer of the wrapped document
        #[arg(short = 'l', long, default_value = LAYER_SITE)]
        layer: String,

        /// Store the wrapped document encrypted
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        encrypt: bool,
    },

    /// Report certificates that expire within the given number of days
    CheckPkiCerts {
        site: String,

        #[arg(short = 'd', long, default_value_t = 60)]
        days: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum GenerateSecret {
    /// Generate the passphrases declared by the site's passphrase catalogs
    Passphrases {
        site: String,

        #[command(flatten)]
        author: AuthorArgs,

        /// Directory receiving site/<site>/secrets (default: the site repository)
        #[arg(short = 's', long, value_name = "DIR")]
        save_location: Option<PathBuf>,

        /// Ask for every passphrase
        #[arg(short = 'i', long)]
        interactive: bool,

        /// Store every passphrase in clear text
        #[arg(long)]
        force_cleartext: bool,
    },
}

/// Execute the `site secrets` command group.
pub fn execute(repo: &RepoArgs, args: SecretsArgs, out: &OutputConfig) -> Result<()> {
    match args.command {
        SecretsCommand::GeneratePki {
            site,
            author,
            days,
            regenerate_all,
            save_location,
        } => {
            let credentials = Credentials::from_env()?;
            let tool = PkiUtility::new(days)?;
            let config = repo.config()?;
            let save_location = default_save_location(&config, save_location)?;
            let workspace = resolve(&config, &site)?;
            let documents = SiteCatalog::new(&workspace, &site)?.documents()?;

            let mut generator =
                PkiGenerator::new(&site, documents, Box::new(tool), credentials, &author.author, regenerate_all)?;
            for path in generator.generate(&save_location)? {
                println!("{} {}", out.marker(Status::Ok), path.display());
            }
            Ok(())
        }
        SecretsCommand::Generate(GenerateSecret::Passphrases {
            site,
            author,
            save_location,
            interactive,
            force_cleartext,
        }) => {
            let credentials = if force_cleartext {
                Credentials::from_env().ok()
            } else {
                Some(Credentials::from_env()?)
            };
            let config = repo.config()?;
            let save_location = default_save_location(&config, save_location)?;
            let workspace = resolve(&config, &site)?;
            let documents = SiteCatalog::new(&workspace, &site)?.documents()?;

            let generator =
                PassphraseGenerator::new(&site, &documents, &save_location, &author.author, credentials)?;
            for path in generator.generate(interactive, force_cleartext)? {
                println!("{} {}", out.marker(Status::Ok), path.display());
            }
            Ok(())
        }
        SecretsCommand::Encrypt {
            site,
            author,
            save_location,
        } => {
            let credentials = Credentials::from_env()?;
            let config = repo.config()?;
            let save_location = default_save_location(&config, save_location)?;
            let workspace = resolve(&config, &site)?;
            let catalog = SiteCatalog::new(&workspace, &site)?;

            let written = encrypt_site(&catalog, Some(&save_location), &credentials, &author.author)?;
            for path in &written {
                println!("{} {}", out.marker(Status::Ok), path.display());
            }
            if written.is_empty() {
                println!("{} Nothing to encrypt for site {}", out.marker(Status::Info), site);
            }
            Ok(())
        }
        SecretsCommand::Decrypt {
            path,
            save_location,
            overwrite,
        } => decrypt(&path, save_location.as_deref(), overwrite),
        SecretsCommand::Wrap {
            author,
            filename,
            output_path,
            schema,
            name,
            layer,
            encrypt,
        } => {
            let credentials = if encrypt {
                Some(Credentials::from_env()?)
            } else {
                None
            };
            let options = WrapOptions {
                schema,
                name,
                layer,
                encrypt,
            };
            wrap_secret(&filename, &output_path, &options, credentials.as_ref(), &author.author)?;
            println!("{} {}", out.marker(Status::Ok), output_path.display());
            Ok(())
        }
        SecretsCommand::CheckPkiCerts { site, days } => {
            let config = repo.config()?;
            let workspace = resolve(&config, &site)?;
            let documents = SiteCatalog::new(&workspace, &site)?.documents()?;

            let statuses = check_certificates(documents, &PkiUtility::default(), days)?;
            let expiring: Vec<_> = statuses.iter().filter(|s| s.expired).collect();
            for status in &expiring {
                println!(
                    "{} {} expires {}",
                    out.marker(Status::Warn),
                    status.name,
                    status.not_after.to_rfc3339()
                );
            }
            if !expiring.is_empty() {
                bail!("{} certificate(s) expire within {} days", expiring.len(), days);
            }
            println!(
                "{} All {} certificate(s) are valid for at least {} days",
                out.marker(Status::Ok),
                statuses.len(),
                days
            );
            Ok(())
        }
    }
}

fn decrypt(path: &Path, save_location: Option<&Path>, overwrite: bool) -> Result<()> {
    let credentials = Credentials::from_env()?;
    let targets: Vec<PathBuf> = if path.is_dir() {
        files::search(path).collect()
    } else {
        vec![path.to_path_buf()]
    };
    if targets.is_empty() {
        bail!("No YAML files found at {}", path.display());
    }

    for file in targets {
        let engine = SecretsManagement::new(SecretSource::File(file.clone()), &credentials)?;
        let documents = engine.get_decrypted_secrets()?;
        if overwrite {
            files::write_documents(&file, &documents)?;
        } else if let Some(save) = save_location {
            let relative = file
                .strip_prefix(path)
                .ok()
                .filter(|r| !r.as_os_str().is_empty())
                .or_else(|| file.file_name().map(Path::new))
                .unwrap_or(file.as_path());
            files::write_documents(&save.join(relative), &documents)?;
        } else {
            print!("{}", document::dump_stream(&documents)?);
        }
    }
    Ok(())
}
