//! Record-level normalization.
//!
//! # Responsibility
//! - Apply the canonicalizer to every mapped field of a raw record.
//! - Keep raw values for display and pick the survivorship timestamp.
//! - Count recoverable field issues for run reporting.
//!
//! # Invariants
//! - Pure: no persistence, no clock reads.
//! - A field issue never aborts the record; a record never aborts a dataset.

use crate::canonical::{Canonicalizer, FieldRole, IssueKind, NormalizationMode};
use crate::config::SourceSchema;
use crate::logging::sanitize_for_log;
use crate::model::record::{NormalizedRecord, RawRecord};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAX_LOGGED_VALUE_CHARS: usize = 64;

/// One recoverable problem found while normalizing a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub role: FieldRole,
    pub kind: IssueKind,
    pub value: String,
}

/// Normalized record plus the issues found on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationOutput {
    pub record: NormalizedRecord,
    pub issues: Vec<FieldIssue>,
}

/// Normalizer bound to one source schema.
pub struct RecordNormalizer<'a> {
    schema: &'a SourceSchema,
    canonicalizer: &'a Canonicalizer,
}

impl<'a> RecordNormalizer<'a> {
    pub fn new(schema: &'a SourceSchema, canonicalizer: &'a Canonicalizer) -> Self {
        Self {
            schema,
            canonicalizer,
        }
    }

    /// Normalizes one raw record.
    ///
    /// Mapped fields missing from the record produce empty keys.
    pub fn normalize(&self, raw: &RawRecord, mode: NormalizationMode) -> NormalizationOutput {
        let record_id = raw.record_id();
        let mut comparison_keys = BTreeMap::new();
        let mut issues = Vec::new();

        for mapping in &self.schema.fields {
            let raw_value = raw
                .fields
                .get(mapping.source.trim())
                .map(String::as_str)
                .unwrap_or("");
            let canonical = self
                .canonicalizer
                .canonicalize_field(mapping.role, raw_value, mode);

            if let Some(kind) = canonical.issue {
                if kind == IssueKind::Malformed {
                    warn!(
                        "event=field_malformed module=normalize status=fallback record_id={} field={} role={} value={}",
                        record_id,
                        mapping.source,
                        mapping.role.as_str(),
                        sanitize_for_log(raw_value, MAX_LOGGED_VALUE_CHARS)
                    );
                }
                issues.push(FieldIssue {
                    field: mapping.source.clone(),
                    role: mapping.role,
                    kind,
                    value: raw_value.to_string(),
                });
            }

            comparison_keys.insert(mapping.key_name(), canonical.value);
        }

        NormalizationOutput {
            record: NormalizedRecord {
                record_id,
                comparison_keys,
                display_fields: raw.fields.clone(),
                last_updated: raw.effective_updated_at(),
            },
            issues,
        }
    }
}

/// Aggregate counters over one normalization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub total_records: usize,
    pub malformed_fields: usize,
    pub degraded_fields: usize,
    /// Per key name: records whose key differs from the raw value.
    pub changed_by_key: BTreeMap<String, usize>,
}

impl NormalizationStats {
    /// Folds one record's output into the counters.
    pub fn record(&mut self, schema: &SourceSchema, raw: &RawRecord, output: &NormalizationOutput) {
        self.total_records += 1;
        for issue in &output.issues {
            match issue.kind {
                IssueKind::Malformed => self.malformed_fields += 1,
                IssueKind::Degraded => self.degraded_fields += 1,
            }
        }
        for mapping in &schema.fields {
            let key_name = mapping.key_name();
            let raw_value = raw.fields.get(mapping.source.trim()).map(String::as_str);
            let key_value = output.record.key(&key_name);
            let changed = self.changed_by_key.entry(key_name).or_insert(0);
            if raw_value.unwrap_or("") != key_value.unwrap_or("") {
                *changed += 1;
            }
        }
    }

    /// Issue count across both kinds.
    pub fn issue_count(&self) -> usize {
        self.malformed_fields + self.degraded_fields
    }
}
