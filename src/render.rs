//! # Collection and Rendering
//!
//! Rendering hands a site's documents to an external layering engine after
//! two preparation steps: managed secrets are decrypted and unwrapped, and
//! duplicate `deckhand/DataSchema/v1` declarations are reported up front.
//!
//! The engine sits behind the [`Renderer`] trait. [`CommandRenderer`] pipes
//! the document stream to a program on `PATH` and reads the rendered stream
//! back from its stdout.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info};
use serde_yaml::Value;

use crate::document::{self, Document, DATA_SCHEMA_SCHEMA};
use crate::error::{Error, Result};
use crate::files::{self, SiteCatalog};
use crate::lint::{LintFinding, DUPLICATE_SCHEMA, RENDER_EXCEPTION, RENDER_INCOMPLETE};
use crate::secrets::decrypt_and_unwrap;

/// Program used when neither `--renderer` nor `PEGLEG_RENDERER` is given.
pub const DEFAULT_RENDERER: &str = "deckhand-render";

/// Environment variable naming the render program.
pub const ENV_RENDERER: &str = "PEGLEG_RENDERER";

/// Set to `true`/`false` for the render program.
pub const ENV_RENDER_VALIDATE: &str = "PEGLEG_RENDER_VALIDATE";
pub const ENV_FAIL_ON_MISSING_SOURCE: &str = "PEGLEG_FAIL_ON_MISSING_SUBSTITUTION_SOURCE";

/// A document layering and substitution engine.
pub trait Renderer {
    /// Returns the rendered documents and the problems found while
    /// rendering. `Err` means the engine itself failed.
    fn render(
        &self,
        documents: &[Document],
        fail_on_missing_substitution_source: bool,
        validate: bool,
    ) -> Result<(Vec<Value>, Vec<LintFinding>)>;
}

/// Runs an external render program.
///
/// The document stream is written to its stdin. A successful run prints the
/// rendered stream on stdout; each stderr line is reported as an incomplete
/// render. A failing run is an engine failure.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::Renderer {
            program: self.program.clone(),
            message: message.into(),
        }
    }
}

impl Default for CommandRenderer {
    fn default() -> Self {
        Self::new(std::env::var(ENV_RENDERER).unwrap_or_else(|_| DEFAULT_RENDERER.to_string()))
    }
}

impl Renderer for CommandRenderer {
    fn render(
        &self,
        documents: &[Document],
        fail_on_missing_substitution_source: bool,
        validate: bool,
    ) -> Result<(Vec<Value>, Vec<LintFinding>)> {
        let binary = which::which(&self.program)
            .map_err(|_| self.error(format!("{} not found in PATH", self.program)))?;
        let input = document::dump_stream(documents)?;

        debug!("Rendering {} documents with {}", documents.len(), self.program);
        let mut child = Command::new(binary)
            .env(ENV_RENDER_VALIDATE, validate.to_string())
            .env(ENV_FAIL_ON_MISSING_SOURCE, fail_on_missing_substitution_source.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.error(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.error("stdin unavailable"))?;
        let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));
        let output = child
            .wait_with_output()
            .map_err(|e| self.error(e.to_string()))?;
        writer
            .join()
            .map_err(|_| self.error("failed writing documents"))?
            .map_err(|e| self.error(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(self.error(stderr.trim().to_string()));
        }

        let rendered = document::load_stream(&String::from_utf8_lossy(&output.stdout))?;
        let findings = stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| LintFinding::new(RENDER_INCOMPLETE, line))
            .collect();
        Ok((rendered, findings))
    }
}

/// Names declared by more than one `deckhand/DataSchema/v1` document, in
/// first-seen order.
pub fn duplicate_data_schemas(documents: &[Document]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for doc in documents.iter().filter(|d| d.schema == DATA_SCHEMA_SCHEMA) {
        let name = doc.name().to_string();
        if !seen.insert(name.clone()) && !duplicates.contains(&name) {
            duplicates.push(name);
        }
    }
    duplicates
}

/// Decrypts and unwraps managed documents, checks for duplicate schemas and
/// renders.
///
/// Engine failures become a single render-exception finding; only secrets
/// errors are returned as `Err`.
pub fn render(
    documents: Vec<Document>,
    renderer: &dyn Renderer,
    validate: bool,
) -> Result<(Vec<Value>, Vec<LintFinding>)> {
    let documents = decrypt_and_unwrap(documents)?;

    let mut findings: Vec<LintFinding> = duplicate_data_schemas(&documents)
        .into_iter()
        .map(|name| LintFinding::new(DUPLICATE_SCHEMA, Error::DuplicateSchema { name }.to_string()))
        .collect();

    match renderer.render(&documents, false, validate) {
        Ok((rendered, errors)) => {
            findings.extend(errors);
            Ok((rendered, findings))
        }
        Err(e) => {
            findings.push(LintFinding::new(
                RENDER_EXCEPTION,
                format!(
                    "An unknown Deckhand exception occurred while trying to render documents: {}",
                    e
                ),
            ));
            Ok((Vec::new(), findings))
        }
    }
}

/// Renders a site, failing on any finding.
pub fn render_site(catalog: &SiteCatalog, renderer: &dyn Renderer, validate: bool) -> Result<Vec<Value>> {
    let (rendered, findings) = render(catalog.documents()?, renderer, validate)?;
    if !findings.is_empty() {
        return Err(Error::Lint { errors: findings });
    }
    Ok(rendered)
}

/// Site documents grouped by repository name.
///
/// With `decrypt`, managed secrets are replaced by their decrypted
/// documents. With a `renderer`, the whole site is rendered first and any
/// finding fails the collection.
pub fn collect(
    catalog: &SiteCatalog,
    decrypt: bool,
    renderer: Option<&dyn Renderer>,
) -> Result<BTreeMap<String, Vec<Document>>> {
    if let Some(renderer) = renderer {
        render_site(catalog, renderer, true)?;
    }

    let mut grouped = catalog.documents_by_repo()?;
    if decrypt {
        for documents in grouped.values_mut() {
            *documents = decrypt_and_unwrap(std::mem::take(documents))?;
        }
    }
    Ok(grouped)
}

/// Writes each repository's documents to `<save_location>/<repo>.yaml`.
pub fn write_collected(collected: &BTreeMap<String, Vec<Document>>, save_location: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (repo, documents) in collected {
        let path = save_location.join(format!("{}.yaml", repo));
        files::write_documents(&path, documents)?;
        info!("Collected {} documents from {} into {}", documents.len(), repo, path.display());
        written.push(path);
    }
    Ok(written)
}
