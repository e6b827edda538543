//! Freshness tracking for derived tables.
//!
//! # Responsibility
//! - Decide whether a derived table must be rebuilt for a source fingerprint.
//! - Record the fingerprint a table was last built from.
//!
//! # Invariants
//! - Rebuild when no stamp exists, the fingerprint differs, or the caller forces it.
//! - `mark_built` is the last write of a rebuild; callers commit table data first.
//! - A fingerprint covers every input its table depends on; a spurious
//!   rebuild is acceptable, a missed one is not.

use crate::canonical::NormalizationMode;
use crate::model::record::RawRecord;
use crate::repo::{ensure_store_ready, RepoResult};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Opaque fingerprint of the input a derived table is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFingerprint(String);

impl SourceFingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Binds read options that change what the same input yields, such as
    /// the CSV delimiter.
    pub fn with_context(&self, context: &str) -> Self {
        Self(format!("{}|{context}", self.0))
    }
}

impl Display for SourceFingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored stamp for one derived table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessStamp {
    pub dataset_name: String,
    pub source_fingerprint: SourceFingerprint,
    /// Epoch milliseconds, store clock.
    pub generated_at: i64,
}

/// Stamp name of a dataset's normalized table.
pub fn normalized_table_name(dataset: &str) -> String {
    format!("normalized/{dataset}")
}

/// Stamp name of one source's raw rows within a dataset.
pub fn raw_table_name(dataset: &str, source_tag: &str) -> String {
    format!("raw/{dataset}/{source_tag}")
}

/// Fingerprint of a source file from its modification time and length.
pub fn fingerprint_file(path: impl AsRef<Path>) -> std::io::Result<SourceFingerprint> {
    let metadata = std::fs::metadata(path.as_ref())?;
    let modified_nanos = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0);
    Ok(SourceFingerprint(format!(
        "file:{modified_nanos}:{}",
        metadata.len()
    )))
}

/// Fingerprint of raw rows under a given schema digest and mode.
///
/// Covers every value normalization reads: identity, fields, and the
/// effective update time.
pub fn fingerprint_rows(
    schema_digest: &str,
    mode: NormalizationMode,
    rows: &[RawRecord],
) -> SourceFingerprint {
    let mut hasher = blake3::Hasher::new();
    hash_part(&mut hasher, schema_digest.as_bytes());
    hash_part(&mut hasher, mode.as_str().as_bytes());
    for row in rows {
        hash_part(&mut hasher, row.record_id().as_str().as_bytes());
        hasher.update(&row.effective_updated_at().to_le_bytes());
        hasher.update(&(row.fields.len() as u64).to_le_bytes());
        for (name, value) in &row.fields {
            hash_part(&mut hasher, name.as_bytes());
            hash_part(&mut hasher, value.as_bytes());
        }
    }
    SourceFingerprint(format!(
        "rows:{}:{}",
        rows.len(),
        hasher.finalize().to_hex()
    ))
}

fn hash_part(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

pub trait FreshnessTracker {
    fn stamp(&self, dataset_name: &str) -> RepoResult<Option<FreshnessStamp>>;
    fn needs_rebuild(
        &self,
        dataset_name: &str,
        fingerprint: &SourceFingerprint,
        force: bool,
    ) -> RepoResult<bool>;
    fn mark_built(&self, dataset_name: &str, fingerprint: &SourceFingerprint) -> RepoResult<()>;
    /// Drops the stamp so the next check rebuilds.
    fn invalidate(&self, dataset_name: &str) -> RepoResult<()>;
}

pub struct SqliteFreshnessTracker<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteFreshnessTracker<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_ready(conn, &["freshness_stamps"])?;
        Ok(Self { conn })
    }
}

impl FreshnessTracker for SqliteFreshnessTracker<'_> {
    fn stamp(&self, dataset_name: &str) -> RepoResult<Option<FreshnessStamp>> {
        let stamp = self
            .conn
            .query_row(
                "SELECT dataset_name, source_fingerprint, generated_at
                 FROM freshness_stamps
                 WHERE dataset_name = ?1;",
                [dataset_name],
                |row| {
                    Ok(FreshnessStamp {
                        dataset_name: row.get(0)?,
                        source_fingerprint: SourceFingerprint(row.get(1)?),
                        generated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(stamp)
    }

    fn needs_rebuild(
        &self,
        dataset_name: &str,
        fingerprint: &SourceFingerprint,
        force: bool,
    ) -> RepoResult<bool> {
        let reason = if force {
            Some("forced")
        } else {
            match self.stamp(dataset_name)? {
                None => Some("missing_stamp"),
                Some(stamp) if stamp.source_fingerprint != *fingerprint => {
                    Some("fingerprint_changed")
                }
                Some(_) => None,
            }
        };

        match reason {
            Some(reason) => {
                info!(
                    "event=freshness_check module=freshness status=stale table={dataset_name} reason={reason}"
                );
                Ok(true)
            }
            None => {
                debug!("event=freshness_check module=freshness status=fresh table={dataset_name}");
                Ok(false)
            }
        }
    }

    fn mark_built(&self, dataset_name: &str, fingerprint: &SourceFingerprint) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO freshness_stamps (dataset_name, source_fingerprint, generated_at)
             VALUES (?1, ?2, (strftime('%s', 'now') * 1000))
             ON CONFLICT (dataset_name) DO UPDATE SET
                source_fingerprint = excluded.source_fingerprint,
                generated_at = excluded.generated_at;",
            params![dataset_name, fingerprint.as_str()],
        )?;
        Ok(())
    }

    fn invalidate(&self, dataset_name: &str) -> RepoResult<()> {
        self.conn.execute(
            "DELETE FROM freshness_stamps WHERE dataset_name = ?1;",
            [dataset_name],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{fingerprint_file, fingerprint_rows, normalized_table_name, raw_table_name};
    use crate::canonical::NormalizationMode;
    use crate::model::record::RawRecord;

    fn rows() -> Vec<RawRecord> {
        vec![
            RawRecord::new("crm", "1").with_field("NAME", "Meier"),
            RawRecord::new("crm", "2").with_field("NAME", "Schulz"),
        ]
    }

    #[test]
    fn row_fingerprint_is_stable_and_content_sensitive() {
        let base = fingerprint_rows("digest", NormalizationMode::Standard, &rows());
        assert_eq!(base, fingerprint_rows("digest", NormalizationMode::Standard, &rows()));
        assert!(base.as_str().starts_with("rows:2:"));

        let mut edited = rows();
        edited[1] = edited[1].clone().with_field("NAME", "Schultz");
        assert_ne!(base, fingerprint_rows("digest", NormalizationMode::Standard, &edited));

        let mut touched = rows();
        touched[0].updated_at = Some(5);
        assert_ne!(base, fingerprint_rows("digest", NormalizationMode::Standard, &touched));

        assert_ne!(base, fingerprint_rows("other", NormalizationMode::Standard, &rows()));
        assert_ne!(base, fingerprint_rows("digest", NormalizationMode::Enhanced, &rows()));
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = vec![RawRecord::new("crm", "1").with_field("AB", "C")];
        let b = vec![RawRecord::new("crm", "1").with_field("A", "BC")];
        assert_ne!(
            fingerprint_rows("d", NormalizationMode::Standard, &a),
            fingerprint_rows("d", NormalizationMode::Standard, &b)
        );
    }

    #[test]
    fn file_fingerprint_tracks_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(&path, "SATZNR;NAME\n1;Meier\n").unwrap();
        let first = fingerprint_file(&path).unwrap();
        std::fs::write(&path, "SATZNR;NAME\n1;Meier\n2;Schulz\n").unwrap();
        let second = fingerprint_file(&path).unwrap();
        assert_ne!(first, second);
        assert!(fingerprint_file(dir.path().join("missing.csv")).is_err());
    }

    #[test]
    fn read_context_changes_file_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(&path, "SATZNR;NAME\n1;Meier\n").unwrap();
        let file = fingerprint_file(&path).unwrap();
        let semicolon = file.with_context("delimiter=;");
        assert_eq!(semicolon, file.with_context("delimiter=;"));
        assert_ne!(semicolon, file.with_context("delimiter=,"));
        assert_ne!(semicolon, file);
    }

    #[test]
    fn table_names_are_namespaced() {
        assert_eq!(normalized_table_name("customers"), "normalized/customers");
        assert_eq!(raw_table_name("customers", "crm"), "raw/customers/crm");
    }
}
