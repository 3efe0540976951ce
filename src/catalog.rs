//! Catalog loading.
//!
//! The descriptor table is filled once per session by a [`CatalogLoader`].
//! [`TomlCatalog`] reads the language-agnostic TOML schema:
//!
//! ```toml
//! [[attribute]]
//! id = 1150001
//! name = "REF_LEVEL"
//! kind = "real"              # integer | real | text | flag | handle
//! class = "window"           # omitted = global
//! default = -20.0
//! coercible = true
//! sync = "cached"            # cached | always_write | volatile
//! range = { min = -130.0, max = 30.0 }
//!
//! [[attribute]]
//! id = 1150020
//! name = "DETECTOR"
//! kind = "integer"
//! class = "trace"
//! choices = [1, 2, 3, 4]
//! ```
//!
//! At most one of `range`, `choices` and `pattern` may be given; none means
//! any value of the kind is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::capability::CapabilityClass;
use crate::descriptor::{AttributeId, Descriptor, DescriptorTable, SyncMode, Validity};
use crate::value::{AttributeValue, Handle, ValueKind};

/// Catalog error types
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("Failed to read catalog {}: {source}", path.display())]
    Io {
        /// Catalog file path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The catalog is not valid TOML or does not match the schema.
    #[error("Catalog parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two entries share an attribute id.
    #[error("Duplicate attribute id {0}")]
    DuplicateAttribute(AttributeId),

    /// An entry's kind, default and validity do not agree.
    #[error("Invalid descriptor for attribute {id}: {reason}")]
    InvalidDescriptor {
        /// Attribute id of the offending entry.
        id: AttributeId,
        /// What the descriptor builder refused.
        reason: String,
    },
}

/// Supplies the descriptors of one session's catalog.
pub trait CatalogLoader {
    /// Produce every descriptor of the catalog.
    fn load(&self) -> Result<Vec<Descriptor>, CatalogError>;
}

impl CatalogLoader for Vec<Descriptor> {
    fn load(&self) -> Result<Vec<Descriptor>, CatalogError> {
        Ok(self.clone())
    }
}

impl DescriptorTable {
    /// Build a table from a loader.
    pub fn from_loader(loader: &dyn CatalogLoader) -> Result<Self, CatalogError> {
        DescriptorTable::new(loader.load()?)
    }
}

/// TOML catalog source.
#[derive(Debug, Clone)]
pub struct TomlCatalog {
    source: String,
}

impl TomlCatalog {
    /// Catalog from TOML text.
    pub fn from_toml_str(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Catalog from a TOML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { source })
    }
}

impl CatalogLoader for TomlCatalog {
    fn load(&self) -> Result<Vec<Descriptor>, CatalogError> {
        let file: CatalogFile = toml::from_str(&self.source)?;
        file.attributes.into_iter().map(AttributeEntry::into_descriptor).collect()
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(rename = "attribute", default)]
    attributes: Vec<AttributeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttributeEntry {
    id: u32,
    name: String,
    kind: ValueKind,
    #[serde(default = "default_class")]
    class: CapabilityClass,
    #[serde(default)]
    default: Option<toml::Value>,
    #[serde(default)]
    read_only: bool,
    #[serde(default)]
    coercible: bool,
    #[serde(default)]
    sync: SyncMode,
    #[serde(default)]
    range: Option<RangeEntry>,
    #[serde(default)]
    choices: Option<Vec<toml::Value>>,
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeEntry {
    min: toml::Value,
    max: toml::Value,
}

fn default_class() -> CapabilityClass {
    CapabilityClass::Global
}

impl AttributeEntry {
    fn into_descriptor(self) -> Result<Descriptor, CatalogError> {
        let id = AttributeId(self.id);
        let kind = self.kind;
        let invalid = |reason: String| CatalogError::InvalidDescriptor { id, reason };

        let given = [self.range.is_some(), self.choices.is_some(), self.pattern.is_some()]
            .iter()
            .filter(|set| **set)
            .count();
        if given > 1 {
            return Err(invalid(
                "only one of range, choices, pattern may be given".to_string(),
            ));
        }

        let mut builder = Descriptor::builder(id, self.name, kind, self.class).sync(self.sync);

        if let Some(range) = self.range {
            builder = match kind {
                ValueKind::Integer => {
                    let min = toml_integer(&range.min).ok_or_else(|| invalid("range.min must be an integer".into()))?;
                    let max = toml_integer(&range.max).ok_or_else(|| invalid("range.max must be an integer".into()))?;
                    builder.integer_range(min, max)
                }
                ValueKind::Real => {
                    let min = toml_number(&range.min).ok_or_else(|| invalid("range.min must be a number".into()))?;
                    let max = toml_number(&range.max).ok_or_else(|| invalid("range.max must be a number".into()))?;
                    builder.real_range(min, max)
                }
                other => return Err(invalid(format!("range is not allowed on {} attributes", other))),
            };
        }

        if let Some(choices) = self.choices {
            let members = choices
                .iter()
                .map(|raw| {
                    to_value(kind, raw)
                        .ok_or_else(|| invalid(format!("choice {} is not a {} value", raw, kind)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.validity(Validity::Enumerated(members));
        }

        if let Some(pattern) = self.pattern {
            builder = builder.pattern(pattern);
        }

        if let Some(raw) = self.default {
            let value = to_value(kind, &raw)
                .ok_or_else(|| invalid(format!("default {} is not a {} value", raw, kind)))?;
            builder = builder.default_value(value);
        }

        if self.read_only {
            builder = builder.read_only();
        }
        if self.coercible {
            builder = builder.coercible();
        }

        builder.build()
    }
}

fn toml_integer(raw: &toml::Value) -> Option<i64> {
    raw.as_integer()
}

fn toml_number(raw: &toml::Value) -> Option<f64> {
    match raw {
        toml::Value::Float(f) => Some(*f),
        toml::Value::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

fn to_value(kind: ValueKind, raw: &toml::Value) -> Option<AttributeValue> {
    match kind {
        ValueKind::Integer => toml_integer(raw).map(AttributeValue::Integer),
        ValueKind::Real => toml_number(raw).map(AttributeValue::Real),
        ValueKind::Text => raw.as_str().map(|s| AttributeValue::Text(s.to_string())),
        ValueKind::Flag => raw.as_bool().map(AttributeValue::Flag),
        ValueKind::Handle => toml_integer(raw)
            .and_then(|i| u64::try_from(i).ok())
            .map(|h| AttributeValue::Handle(Handle(h))),
    }
}
