//! Site definition documents
//!
//! Every site lives at `<site_repo>/site/<site>/site-definition.yaml` and
//! declares its `site_type` plus the auxiliary repositories it draws
//! documents from.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::document::{self, SITE_DEFINITION_SCHEMA};
use crate::error::{Error, Result};

pub const SITE_DEFINITION_FILE: &str = "site-definition.yaml";

/// Default location of an auxiliary repository declared by a site.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryEntry {
    pub url: String,
    pub revision: String,
}

#[derive(Debug, Deserialize)]
struct SiteDefinitionData {
    site_type: String,
    #[serde(default)]
    repositories: Option<BTreeMap<String, RepositoryEntry>>,
}

/// A parsed `pegleg/SiteDefinition/v1` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteDefinition {
    pub name: String,
    pub site_type: String,
    pub repositories: BTreeMap<String, RepositoryEntry>,
}

/// `<site_root>/site/<site>/site-definition.yaml`
pub fn path(site_root: &Path, site: &str) -> PathBuf {
    site_root.join("site").join(site).join(SITE_DEFINITION_FILE)
}

/// Loads the site definition of `site` from the primary repository.
pub fn load(site_root: &Path, site: &str) -> Result<SiteDefinition> {
    let path = path(site_root, site);
    let text = fs::read_to_string(&path).map_err(|_| Error::SiteDefinitionNotFound {
        path: path.display().to_string(),
    })?;

    let malformed = |message: String| Error::MalformedDocument {
        path: path.display().to_string(),
        message,
    };

    let value = document::load_stream(&text)?
        .into_iter()
        .find(|v| v.get("schema").and_then(|s| s.as_str()) == Some(SITE_DEFINITION_SCHEMA))
        .ok_or_else(|| malformed(format!("no {} document", SITE_DEFINITION_SCHEMA)))?;

    let doc = document::Document::from_value(value).map_err(|e| malformed(e.to_string()))?;
    let data: SiteDefinitionData =
        serde_yaml::from_value(doc.data).map_err(|e| malformed(e.to_string()))?;

    Ok(SiteDefinition {
        name: site.to_string(),
        site_type: data.site_type,
        repositories: data.repositories.unwrap_or_default(),
    })
}

/// Names of every site that has a site definition, sorted.
pub fn list_sites(site_root: &Path) -> Result<Vec<String>> {
    let site_dir = site_root.join("site");
    if !site_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut sites = Vec::new();
    for entry in fs::read_dir(&site_dir)? {
        let entry = entry?;
        if entry.path().join(SITE_DEFINITION_FILE).is_file() {
            sites.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    sites.sort();
    Ok(sites)
}
