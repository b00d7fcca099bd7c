//! # Document Catalog
//!
//! Finds and loads the YAML files that make up a site. A site's search space
//! is the union, over every repository of the [`Workspace`], of
//! `<repo>/global`, `<repo>/type/<site_type>` and `<repo>/site/<site>`.
//!
//! Also holds the small file helpers shared by the secrets code: atomic
//! writes, appends and the `directory_for` owning-directory lookup.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Serialize;
use serde_yaml::Value;
use walkdir::{DirEntry, WalkDir};

use crate::definition::{self, SiteDefinition};
use crate::document::{self, Document, LAYER_GLOBAL, LAYER_SITE, LAYER_TYPE};
use crate::error::{Error, Result};
use crate::repository::{MaterializedRepo, Workspace};

/// Depth below the repository root of the owning directory of a file in each
/// top-level category: `global/<component>`, `type/<type>/<component>` and
/// `site/<site>`.
pub const DIR_DEPTHS: [(&str, usize); 3] = [(LAYER_GLOBAL, 1), (LAYER_TYPE, 2), (LAYER_SITE, 1)];

/// Subtrees never searched for documents.
const IGNORED_DIRS: [&str; 1] = ["tools"];

/// The documents of one site across all of its repositories.
pub struct SiteCatalog<'a> {
    workspace: &'a Workspace,
    definition: SiteDefinition,
}

impl<'a> SiteCatalog<'a> {
    pub fn new(workspace: &'a Workspace, site: &str) -> Result<Self> {
        let definition = definition::load(workspace.site_root(), site)?;
        Ok(Self {
            workspace,
            definition,
        })
    }

    pub fn site(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &SiteDefinition {
        &self.definition
    }

    pub fn workspace(&self) -> &'a Workspace {
        self.workspace
    }

    /// The three layer directories of `repo` for this site.
    pub fn directories_for(&self, root: &Path) -> [PathBuf; 3] {
        [
            root.join(LAYER_GLOBAL),
            root.join(LAYER_TYPE).join(&self.definition.site_type),
            root.join(LAYER_SITE).join(&self.definition.name),
        ]
    }

    /// Every site file, grouped with the repository it came from.
    pub fn site_files_by_repo(&self) -> impl Iterator<Item = (&'a MaterializedRepo, PathBuf)> + '_ {
        self.workspace.repositories().flat_map(move |repo| {
            self.directories_for(repo.root())
                .into_iter()
                .flat_map(|dir| search(&dir))
                .map(move |path| (repo, path))
        })
    }

    pub fn site_files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.site_files_by_repo().map(|(_, path)| path)
    }

    /// All manifest documents of the site, in search order.
    pub fn documents(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for path in self.site_files() {
            documents.extend(read_documents(&path)?);
        }
        Ok(documents)
    }

    /// Manifest documents keyed by repository name.
    pub fn documents_by_repo(&self) -> Result<BTreeMap<String, Vec<Document>>> {
        let mut grouped: BTreeMap<String, Vec<Document>> = BTreeMap::new();
        for (repo, path) in self.site_files_by_repo() {
            grouped
                .entry(repo.name())
                .or_default()
                .extend(read_documents(&path)?);
        }
        Ok(grouped)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && (is_hidden(entry) || IGNORED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
}

fn is_not_found(e: &walkdir::Error) -> bool {
    e.io_error()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}

/// Recursively yields the `*.yaml` files under `dir`, skipping hidden
/// directories, `tools/` subtrees and dot-files. Symlinks are followed;
/// entries that cannot be read (including symlink loops) are logged and
/// skipped. Yields nothing when `dir` does not exist.
pub fn search(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) if e.depth() == 0 && is_not_found(&e) => None,
            Err(e) => {
                warn!("Skipping unreadable entry while searching for documents: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && !is_hidden(e))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "yaml"))
        .map(DirEntry::into_path)
}

/// Loads a file, keeping only Deckhand documents and managed envelopes.
pub fn read(path: &Path) -> Result<Vec<Value>> {
    let text = fs::read_to_string(path)?;
    let values = document::load_stream(&text).map_err(|e| Error::MalformedDocument {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(values
        .into_iter()
        .filter(document::is_manifest_document)
        .collect())
}

/// Like [`read`], parsing each kept document.
pub fn read_documents(path: &Path) -> Result<Vec<Document>> {
    read(path)?
        .into_iter()
        .map(|value| {
            Document::from_value(value).map_err(|e| Error::MalformedDocument {
                path: path.display().to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// Maps a file back to the directory that owns it, e.g.
/// `<repo>/site/<site>` for `<repo>/site/<site>/secrets/x.yaml` and
/// `<repo>/global/common` for `<repo>/global/common/secrets/x.yaml`.
/// Files sitting directly in the owning level have no owner.
pub fn directory_for(roots: &[&Path], path: &Path) -> Option<PathBuf> {
    for root in roots {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let parts: Vec<_> = relative.components().collect();
        let category = parts.first()?.as_os_str().to_string_lossy();
        let depth = DIR_DEPTHS
            .iter()
            .find(|(name, _)| *name == category)
            .map(|(_, depth)| *depth)?;
        if parts.len() <= depth + 1 {
            return None;
        }
        let mut owner = root.to_path_buf();
        owner.extend(&parts[..=depth]);
        return Some(owner);
    }
    None
}

/// Whether `path` sits under `<owning directory>/<section>/`.
pub fn in_section(roots: &[&Path], path: &Path, section: &str) -> bool {
    directory_for(roots, path)
        .and_then(|owner| path.strip_prefix(owner).ok().map(Path::to_path_buf))
        .and_then(|rest| rest.components().next().map(|c| c.as_os_str() == section))
        .unwrap_or(false)
}

/// The layer implied by a file's top-level directory.
pub fn expected_layer(roots: &[&Path], path: &Path) -> Option<String> {
    roots.iter().find_map(|root| {
        path.strip_prefix(root)
            .ok()
            .and_then(|rel| rel.components().next())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
    })
}

/// Writes `text` to `path` through a temporary file in the same directory.
pub fn write_atomic(path: &Path, text: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(text.as_bytes())?;
    file.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Replaces `path` with a YAML stream of `documents`.
pub fn write_documents<T: Serialize>(path: &Path, documents: &[T]) -> Result<()> {
    write_atomic(path, &document::dump_stream(documents)?)
}

/// Appends `documents` to `path`, creating it when missing.
pub fn append_documents<T: Serialize>(path: &Path, documents: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(document::dump_stream(documents)?.as_bytes())?;
    Ok(())
}
