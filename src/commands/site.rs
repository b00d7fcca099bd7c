//! # Site Commands
//!
//! `pegleg site` lists, shows, renders, collects and lints sites, and hosts
//! the `secrets` command group.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use pegleg::definition;
use pegleg::document;
use pegleg::error::Error;
use pegleg::lint::{self, LintPolicy};
use pegleg::output::{OutputConfig, Status};
use pegleg::render::{self, CommandRenderer, Renderer, DEFAULT_RENDERER};
use pegleg::repository::RepositoryResolver;

use super::{secrets, with_catalog, RepoArgs};

/// Work with sites in a site repository
#[derive(Args, Debug)]
pub struct SiteArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    #[command(subcommand)]
    pub command: SiteCommand,
}

#[derive(Subcommand, Debug)]
pub enum SiteCommand {
    /// List the sites of the site repository
    List,

    /// Show a site's definition and files
    Show {
        site: String,
    },

    /// Render a site and print the rendered documents
    Render {
        site: String,

        /// Write the rendered documents here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Validate documents while rendering
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        validate: bool,

        #[command(flatten)]
        renderer: RendererArgs,
    },

    /// Collect a site's documents, one stream per repository
    Collect {
        site: String,

        /// Write <repo>.yaml files here instead of printing
        #[arg(short = 's', long, value_name = "DIR")]
        save_location: Option<PathBuf>,

        /// Render the site first and fail on any problem
        #[arg(long)]
        validate: bool,

        #[command(flatten)]
        renderer: RendererArgs,
    },

    /// Lint a site
    Lint {
        site: String,

        /// Lint code to ignore (repeatable)
        #[arg(short = 'x', long = "exclude", value_name = "CODE")]
        exclude: Vec<String>,

        /// Lint code to report as a warning only (repeatable)
        #[arg(short = 'w', long = "warn", value_name = "CODE")]
        warn: Vec<String>,

        /// Skip the render checks
        #[arg(long)]
        no_render: bool,

        #[command(flatten)]
        renderer: RendererArgs,
    },

    /// Manage site secrets
    Secrets(secrets::SecretsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RendererArgs {
    /// Program that renders a document stream read from stdin
    #[arg(long = "renderer", value_name = "PROGRAM", env = "PEGLEG_RENDERER", default_value = DEFAULT_RENDERER)]
    pub program: String,
}

impl RendererArgs {
    fn renderer(&self) -> CommandRenderer {
        CommandRenderer::new(self.program.clone())
    }
}

/// Execute the `site` command group.
pub fn execute(args: SiteArgs, color_flag: &str) -> Result<()> {
    let out = OutputConfig::from_env_and_flag(color_flag);
    let repo = args.repo;

    match args.command {
        SiteCommand::List => list(&repo),
        SiteCommand::Show { site } => show(&repo, &site),
        SiteCommand::Render {
            site,
            output,
            validate,
            renderer,
        } => with_catalog(&repo, &site, |catalog| {
            let rendered = match render::render_site(catalog, &renderer.renderer(), validate) {
                Ok(rendered) => rendered,
                Err(Error::Lint { errors }) => {
                    for line in out.findings(Status::Error, &errors) {
                        eprintln!("{}", line);
                    }
                    bail!("Rendering site {} failed with {} error(s)", site, errors.len());
                }
                Err(e) => return Err(e.into()),
            };
            let stream = document::dump_stream(&rendered)?;
            match output {
                Some(path) => pegleg::files::write_atomic(&path, &stream)?,
                None => print!("{}", stream),
            }
            Ok(())
        }),
        SiteCommand::Collect {
            site,
            save_location,
            validate,
            renderer,
        } => with_catalog(&repo, &site, |catalog| {
            let renderer = renderer.renderer();
            let renderer: Option<&dyn Renderer> = if validate { Some(&renderer) } else { None };
            let collected = render::collect(catalog, repo.decrypt_repos, renderer)?;
            match save_location {
                Some(dir) => {
                    for path in render::write_collected(&collected, &dir)? {
                        println!("{} {}", out.marker(Status::Ok), path.display());
                    }
                }
                None => {
                    for documents in collected.values() {
                        print!("{}", document::dump_stream(documents)?);
                    }
                }
            }
            Ok(())
        }),
        SiteCommand::Lint {
            site,
            exclude,
            warn,
            no_render,
            renderer,
        } => with_catalog(&repo, &site, |catalog| {
            let renderer = renderer.renderer();
            let renderer: Option<&dyn Renderer> = if no_render { None } else { Some(&renderer) };
            let policy = LintPolicy { exclude, warn };
            match lint::lint(catalog, renderer, &policy) {
                Ok(warnings) => {
                    for line in out.findings(Status::Warn, &warnings) {
                        println!("{}", line);
                    }
                    println!("{} Site {} passed linting", out.marker(Status::Ok), site);
                    Ok(())
                }
                Err(Error::Lint { errors }) => {
                    for line in out.findings(Status::Error, &errors) {
                        println!("{}", line);
                    }
                    bail!("Linting site {} found {} error(s)", site, errors.len());
                }
                Err(e) => Err(e.into()),
            }
        }),
        SiteCommand::Secrets(secrets_args) => secrets::execute(&repo, secrets_args, &out),
    }
}

fn list(repo: &RepoArgs) -> Result<()> {
    let config = repo.config()?;
    let site_repo = RepositoryResolver::new(&config).resolve_site_repository()?;
    for site in definition::list_sites(site_repo.root())? {
        let site_definition = definition::load(site_repo.root(), &site)?;
        println!("{}\t{}", site, site_definition.site_type);
    }
    Ok(())
}

fn show(repo: &RepoArgs, site: &str) -> Result<()> {
    with_catalog(repo, site, |catalog| {
        let site_definition = catalog.definition();
        println!("site_name: {}", site_definition.name);
        println!("site_type: {}", site_definition.site_type);
        println!("repositories:");
        for materialized in catalog.workspace().repositories() {
            println!(
                "  {}: {}{}",
                materialized.alias,
                materialized.location,
                materialized
                    .revision
                    .as_deref()
                    .map(|r| format!("@{}", r))
                    .unwrap_or_default()
            );
        }
        println!("files:");
        for path in catalog.site_files() {
            let shown = catalog
                .workspace()
                .repositories()
                .find_map(|r| path.strip_prefix(r.root()).ok())
                .unwrap_or(path.as_path());
            println!("  {}", shown.display());
        }
        Ok(())
    })
}
