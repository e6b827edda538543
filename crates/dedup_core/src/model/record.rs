//! Raw and normalized record model.
//!
//! # Responsibility
//! - Carry source rows into the normalizer unchanged.
//! - Carry canonical comparison keys plus display values out of it.
//!
//! # Invariants
//! - `source_tag` is non-empty and restricted to `[a-z0-9_-]`, so the `:`
//!   separator inside `RecordId` is unambiguous.
//! - `local_id` is non-empty after trimming.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Separator between source tag and source-local id.
pub const RECORD_ID_SEPARATOR: char = ':';

/// Globally unique record identifier (`<source_tag>:<local_id>`).
///
/// Ordering is plain lexicographic string ordering; survivorship tie-breaks
/// and cluster ids rely on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Builds an id from its two parts without validation.
    pub fn new(source_tag: &str, local_id: &str) -> Self {
        Self(format!("{source_tag}{RECORD_ID_SEPARATOR}{}", local_id.trim()))
    }

    /// Parses a stored or externally supplied id.
    ///
    /// Returns `None` unless both the source tag and the local id are present.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let (source_tag, local_id) = trimmed.split_once(RECORD_ID_SEPARATOR)?;
        if !is_valid_source_tag(source_tag) || local_id.trim().is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One ingested source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Tag of the source system the row came from, e.g. `crm`.
    pub source_tag: String,
    /// Identifier unique within the source.
    pub local_id: String,
    /// Source field name -> raw value.
    pub fields: BTreeMap<String, String>,
    /// Source update timestamp in epoch milliseconds, when the source has one.
    pub updated_at: Option<i64>,
    /// Store-assigned ingestion time in epoch milliseconds.
    ///
    /// `None` until the record has been persisted.
    pub ingested_at: Option<i64>,
}

impl RawRecord {
    /// Creates an empty record for the given source and local id.
    pub fn new(source_tag: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            local_id: local_id.into(),
            fields: BTreeMap::new(),
            updated_at: None,
            ingested_at: None,
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder-style update timestamp setter.
    pub fn with_updated_at(mut self, epoch_ms: i64) -> Self {
        self.updated_at = Some(epoch_ms);
        self
    }

    pub fn record_id(&self) -> RecordId {
        RecordId::new(self.source_tag.trim(), self.local_id.as_str())
    }

    /// Timestamp used for survivorship: source update time, else ingestion time.
    pub fn effective_updated_at(&self) -> i64 {
        self.updated_at.or(self.ingested_at).unwrap_or(0)
    }

    /// Validates identity invariants before persistence.
    pub fn validate(&self) -> Result<(), RecordValidationError> {
        let source_tag = self.source_tag.trim();
        if source_tag.is_empty() {
            return Err(RecordValidationError::EmptySourceTag);
        }
        if !is_valid_source_tag(source_tag) {
            return Err(RecordValidationError::InvalidSourceTag(
                self.source_tag.clone(),
            ));
        }
        if self.local_id.trim().is_empty() {
            return Err(RecordValidationError::EmptyLocalId {
                source_tag: source_tag.to_string(),
            });
        }
        Ok(())
    }
}

/// Normalized projection of one raw record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub record_id: RecordId,
    /// Comparison key name (e.g. `name_key`) -> canonical string.
    pub comparison_keys: BTreeMap<String, String>,
    /// Raw values kept verbatim for survivorship review and reporting.
    pub display_fields: BTreeMap<String, String>,
    /// Epoch milliseconds; survivorship prefers the most recent value.
    pub last_updated: i64,
}

impl NormalizedRecord {
    /// Returns one comparison key, if the schema produced it.
    pub fn key(&self, name: &str) -> Option<&str> {
        self.comparison_keys.get(name).map(String::as_str)
    }
}

/// Raw record identity validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValidationError {
    EmptySourceTag,
    InvalidSourceTag(String),
    EmptyLocalId { source_tag: String },
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySourceTag => write!(f, "source tag must not be empty"),
            Self::InvalidSourceTag(value) => write!(
                f,
                "source tag is invalid: `{value}` (expected [a-z0-9_-])"
            ),
            Self::EmptyLocalId { source_tag } => {
                write!(f, "record from source `{source_tag}` has an empty id")
            }
        }
    }
}

impl Error for RecordValidationError {}

/// Returns whether `value` is usable as a source tag.
pub fn is_valid_source_tag(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
