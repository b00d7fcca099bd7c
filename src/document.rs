//! # Manifest Documents
//!
//! Site manifests are YAML streams of Deckhand-style documents. Each document
//! has a `schema` (`<namespace>/<Kind>/<version>`), a `metadata` mapping and an
//! arbitrary `data` payload.
//!
//! Documents are modeled as a typed [`Document`] with an untyped `data`
//! payload, plus a [`Kind`] classification over the few schemas pegleg
//! actually inspects (site definitions, catalogs, managed secrets). Everything
//! else is carried through untouched.
//!
//! ## Loading untrusted YAML
//!
//! Repository content is not trusted. [`load_stream`] parses each document
//! into a plain `serde_yaml::Value` and then neutralizes tags: a `!!binary`
//! string keeps its string, any other tagged node becomes `null`. Nothing is
//! ever constructed from a tag.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::Result;

/// Schema of the envelope that wraps managed secrets.
pub const MANAGED_DOCUMENT_SCHEMA: &str = "pegleg/PeglegManagedDocument/v1";

/// Schema of a site definition.
pub const SITE_DEFINITION_SCHEMA: &str = "pegleg/SiteDefinition/v1";

/// Metadata schema of ordinary Deckhand documents.
pub const METADATA_DOCUMENT_SCHEMA: &str = "metadata/Document/v1";

/// Schema of Deckhand data schema documents.
pub const DATA_SCHEMA_SCHEMA: &str = "deckhand/DataSchema/v1";

pub const LAYER_GLOBAL: &str = "global";
pub const LAYER_TYPE: &str = "type";
pub const LAYER_SITE: &str = "site";

const DECKHAND_METADATA_PREFIXES: [&str; 2] = ["metadata/Control", "metadata/Document"];

/// Whether a document may be stored in cleartext or must be encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePolicy {
    Cleartext,
    Encrypted,
}

impl StoragePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoragePolicy::Cleartext => "cleartext",
            StoragePolicy::Encrypted => "encrypted",
        }
    }
}

/// `metadata.layeringDefinition`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayeringDefinition {
    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,
    pub layer: String,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl LayeringDefinition {
    pub fn concrete(layer: &str) -> Self {
        Self {
            is_abstract: false,
            layer: layer.to_string(),
            extra: Mapping::new(),
        }
    }
}

/// Document metadata. Keys pegleg does not interpret are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub schema: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Mapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layering_definition: Option<LayeringDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_policy: Option<StoragePolicy>,
    #[serde(flatten)]
    pub extra: Mapping,
}

/// A single manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub schema: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub data: Value,
}

/// The kinds of document pegleg looks inside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    SiteDefinition,
    PkiCatalog,
    PassphraseCatalog,
    Managed,
    /// Any other Deckhand control or application document.
    Deckhand,
    Opaque,
}

impl Document {
    /// Builds a concrete document in `layer` with `metadata/Document/v1`
    /// metadata.
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        layer: &str,
        storage_policy: StoragePolicy,
        data: Value,
    ) -> Self {
        Self {
            schema: schema.into(),
            metadata: Metadata {
                schema: METADATA_DOCUMENT_SCHEMA.to_string(),
                name: name.into(),
                labels: None,
                layering_definition: Some(LayeringDefinition::concrete(layer)),
                storage_policy: Some(storage_policy),
                extra: Mapping::new(),
            },
            data,
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_yaml::to_value(self)?)
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn layer(&self) -> Option<&str> {
        self.metadata
            .layering_definition
            .as_ref()
            .map(|ld| ld.layer.as_str())
    }

    pub fn storage_policy(&self) -> Option<StoragePolicy> {
        self.metadata.storage_policy
    }

    /// The `<Kind>` segment of the schema, e.g. `Certificate` for
    /// `deckhand/Certificate/v1`.
    pub fn schema_kind(&self) -> Option<&str> {
        schema_kind(&self.schema)
    }

    pub fn kind(&self) -> Kind {
        match (schema_namespace(&self.schema), schema_kind(&self.schema)) {
            _ if self.schema == MANAGED_DOCUMENT_SCHEMA => Kind::Managed,
            (Some("pegleg"), Some("SiteDefinition")) => Kind::SiteDefinition,
            (Some("pegleg"), Some("PKICatalog")) => Kind::PkiCatalog,
            (Some("pegleg"), Some("PassphraseCatalog")) => Kind::PassphraseCatalog,
            _ if is_deckhand_metadata(&self.metadata.schema) => Kind::Deckhand,
            _ => Kind::Opaque,
        }
    }
}

/// Returns the middle segment of a `<namespace>/<Kind>/<version>` schema.
pub fn schema_kind(schema: &str) -> Option<&str> {
    let mut parts = schema.split('/');
    parts.next()?;
    parts.next().filter(|kind| !kind.is_empty())
}

fn schema_namespace(schema: &str) -> Option<&str> {
    schema.split('/').next().filter(|ns| !ns.is_empty())
}

/// `deckhand/<kind>/v1`
pub fn deckhand_schema(kind: &str) -> String {
    format!("deckhand/{}/v1", kind)
}

fn is_deckhand_metadata(metadata_schema: &str) -> bool {
    DECKHAND_METADATA_PREFIXES
        .iter()
        .any(|prefix| metadata_schema.starts_with(prefix))
}

/// Decides whether a raw YAML document should be kept when reading a site.
///
/// Only Deckhand control/application documents (other than the site
/// definition) and managed-secret envelopes survive; everything else is
/// dropped.
pub fn is_manifest_document(value: &Value) -> bool {
    let Some(mapping) = value.as_mapping() else {
        return false;
    };
    let schema = mapping.get("schema").and_then(Value::as_str).unwrap_or("");
    if schema == MANAGED_DOCUMENT_SCHEMA {
        return true;
    }
    if schema.contains("SiteDefinition") {
        return false;
    }
    let metadata_schema = mapping
        .get("metadata")
        .and_then(|m| m.get("schema"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if is_deckhand_metadata(metadata_schema) {
        true
    } else {
        log::debug!(
            "Document with schema={} is not a valid Deckhand schema. Ignoring it.",
            metadata_schema
        );
        false
    }
}

/// Parses a YAML stream into neutralized values, skipping empty documents.
pub fn load_stream(text: &str) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = neutralize_tags(Value::deserialize(document)?);
        if !value.is_null() {
            values.push(value);
        }
    }
    Ok(values)
}

/// Replaces tagged nodes: `!!binary` strings keep their text, every other
/// tag becomes `null`.
pub fn neutralize_tags(value: Value) -> Value {
    match value {
        Value::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            match tagged.value {
                Value::String(s) if tag.ends_with("binary") => Value::String(s),
                _ => Value::Null,
            }
        }
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(neutralize_tags).collect()),
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .into_iter()
                .map(|(k, v)| (neutralize_tags(k), neutralize_tags(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Serializes documents as a YAML stream, each starting with `---`.
pub fn dump_stream<T: Serialize>(documents: &[T]) -> Result<String> {
    let mut out = String::new();
    for document in documents {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(document)?);
    }
    Ok(out)
}
