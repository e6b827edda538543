//! Pipeline configuration: thresholds, mode and per-source field mappings.
//!
//! # Responsibility
//! - Parse configuration from JSON.
//! - Validate it once so the pipeline can rely on its invariants.
//!
//! # Invariants
//! - `threshold` is finite and within `[0, 1]`.
//! - Source tags are unique and valid record-id prefixes.
//! - Within one source, source fields and key names are unique.

use crate::canonical::{FieldRole, NormalizationMode};
use crate::model::record::is_valid_source_tag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Default match-probability threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// One source field mapped to a canonicalization role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Column name in the source data.
    pub source: String,
    pub role: FieldRole,
    /// Comparison key name; defaults to `<role>_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, role: FieldRole) -> Self {
        Self {
            source: source.into(),
            role,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Effective comparison key name.
    pub fn key_name(&self) -> String {
        match &self.key {
            Some(key) => key.trim().to_string(),
            None => self.role.default_key(),
        }
    }
}

/// Schema of one input source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSchema {
    pub source_tag: String,
    /// Column holding the source-local unique id.
    pub id_field: String,
    /// Column holding the source update timestamp, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_field: Option<String>,
    pub fields: Vec<FieldMapping>,
}

impl SourceSchema {
    pub fn new(source_tag: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            id_field: id_field.into(),
            updated_at_field: None,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, mapping: FieldMapping) -> Self {
        self.fields.push(mapping);
        self
    }

    pub fn with_updated_at_field(mut self, field: impl Into<String>) -> Self {
        self.updated_at_field = Some(field.into());
        self
    }

    /// Validates one source schema.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_source_tag(self.source_tag.trim()) {
            return Err(ConfigError::InvalidSourceTag(self.source_tag.clone()));
        }
        if self.id_field.trim().is_empty() {
            return Err(ConfigError::EmptyIdField(self.source_tag.clone()));
        }
        if self.fields.is_empty() {
            return Err(ConfigError::MissingFieldMappings(self.source_tag.clone()));
        }

        let mut sources = BTreeSet::new();
        let mut keys = BTreeSet::new();
        for mapping in &self.fields {
            let source = mapping.source.trim();
            if source.is_empty() {
                return Err(ConfigError::EmptySourceField(self.source_tag.clone()));
            }
            if !sources.insert(source.to_string()) {
                return Err(ConfigError::DuplicateSourceField {
                    source_tag: self.source_tag.clone(),
                    field: source.to_string(),
                });
            }
            let key = mapping.key_name();
            if key.is_empty() {
                return Err(ConfigError::EmptyKeyName {
                    source_tag: self.source_tag.clone(),
                    field: source.to_string(),
                });
            }
            if !keys.insert(key.clone()) {
                return Err(ConfigError::DuplicateKeyName {
                    source_tag: self.source_tag.clone(),
                    key,
                });
            }
        }
        Ok(())
    }
}

fn default_phonetics() -> bool {
    true
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum match probability (inclusive) for an accepted pair.
    pub threshold: f64,
    #[serde(default)]
    pub mode: NormalizationMode,
    /// Use the compiled-in phonetic provider when available.
    #[serde(default = "default_phonetics")]
    pub phonetics: bool,
    /// Overrides the built-in place list used by enhanced city snapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_places: Option<Vec<String>>,
    pub sources: Vec<SourceSchema>,
}

impl PipelineConfig {
    pub fn new(sources: Vec<SourceSchema>) -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            mode: NormalizationMode::Standard,
            phonetics: true,
            reference_places: None,
            sources,
        }
    }

    /// Parses and validates JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    /// Validates thresholds and all source schemas.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::MissingSources);
        }

        let mut tags = BTreeSet::new();
        for source in &self.sources {
            source.validate()?;
            if !tags.insert(source.source_tag.trim().to_string()) {
                return Err(ConfigError::DuplicateSourceTag(source.source_tag.clone()));
            }
        }
        Ok(())
    }

    /// Returns the schema for one source tag.
    pub fn source(&self, source_tag: &str) -> Option<&SourceSchema> {
        self.sources
            .iter()
            .find(|source| source.source_tag.trim() == source_tag.trim())
    }

    /// Stable digest over everything that shapes normalized output.
    ///
    /// Threshold is excluded: it only affects resolution.
    pub fn schema_digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.mode.as_str().as_bytes());
        hasher.update(&[u8::from(self.phonetics)]);
        if let Some(places) = &self.reference_places {
            for place in places {
                hasher.update(place.as_bytes());
                hasher.update(&[0]);
            }
        }
        // Serialization of these plain structs cannot fail.
        let schemas = serde_json::to_string(&self.sources).unwrap_or_default();
        hasher.update(schemas.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Configuration load/validation errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io { path: String, message: String },
    Parse(String),
    InvalidThreshold(f64),
    MissingSources,
    InvalidSourceTag(String),
    DuplicateSourceTag(String),
    EmptyIdField(String),
    MissingFieldMappings(String),
    EmptySourceField(String),
    DuplicateSourceField { source_tag: String, field: String },
    EmptyKeyName { source_tag: String, field: String },
    DuplicateKeyName { source_tag: String, key: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "cannot read config `{path}`: {message}"),
            Self::Parse(message) => write!(f, "invalid config: {message}"),
            Self::InvalidThreshold(value) => {
                write!(f, "threshold must be within [0, 1], got {value}")
            }
            Self::MissingSources => write!(f, "config must declare at least one source"),
            Self::InvalidSourceTag(value) => {
                write!(f, "source tag is invalid: `{value}` (expected [a-z0-9_-])")
            }
            Self::DuplicateSourceTag(value) => write!(f, "source tag is duplicated: {value}"),
            Self::EmptyIdField(source_tag) => {
                write!(f, "source `{source_tag}` must declare an id field")
            }
            Self::MissingFieldMappings(source_tag) => {
                write!(f, "source `{source_tag}` must map at least one field")
            }
            Self::EmptySourceField(source_tag) => {
                write!(f, "source `{source_tag}` maps an empty field name")
            }
            Self::DuplicateSourceField { source_tag, field } => {
                write!(f, "source `{source_tag}` maps field `{field}` twice")
            }
            Self::EmptyKeyName { source_tag, field } => {
                write!(f, "source `{source_tag}` field `{field}` has an empty key name")
            }
            Self::DuplicateKeyName { source_tag, key } => {
                write!(f, "source `{source_tag}` produces key `{key}` twice")
            }
        }
    }
}

impl Error for ConfigError {}
