//! Raw record storage.
//!
//! # Responsibility
//! - Replace the rows of one source inside a dataset.
//! - Serve raw rows back in a stable order for normalization and fingerprinting.
//!
//! # Invariants
//! - A re-ingested row with identical content keeps its first `ingested_at`.
//! - Rows of other sources in the same dataset are never touched.

use crate::model::record::RawRecord;
use crate::repo::{ensure_store_ready, validate_dataset_name, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, HashSet};

/// Row counts produced by one source replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
}

impl IngestSummary {
    /// Rows of the source present after the replacement.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    pub fn changed(&self) -> bool {
        self.inserted + self.updated + self.removed > 0
    }
}

pub trait RawRecordRepository {
    /// Makes `records` the full content of `source_tag` within `dataset`.
    fn replace_source(
        &self,
        dataset: &str,
        source_tag: &str,
        records: &[RawRecord],
        ingested_at: i64,
    ) -> RepoResult<IngestSummary>;
    /// All rows of `dataset`, ordered by source tag then local id.
    fn list_records(&self, dataset: &str) -> RepoResult<Vec<RawRecord>>;
    fn count_records(&self, dataset: &str) -> RepoResult<usize>;
}

pub struct SqliteRawRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRawRecordRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_ready(conn, &["raw_records"])?;
        Ok(Self { conn })
    }
}

impl RawRecordRepository for SqliteRawRecordRepository<'_> {
    fn replace_source(
        &self,
        dataset: &str,
        source_tag: &str,
        records: &[RawRecord],
        ingested_at: i64,
    ) -> RepoResult<IngestSummary> {
        validate_dataset_name(dataset)?;
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            record.validate()?;
            if record.source_tag.trim() != source_tag {
                return Err(RepoError::InvalidData(format!(
                    "record `{}` does not belong to source `{source_tag}`",
                    record.record_id()
                )));
            }
            if !seen.insert(record.local_id.as_str()) {
                return Err(RepoError::InvalidData(format!(
                    "duplicate local id `{}` in source `{source_tag}`",
                    record.local_id
                )));
            }
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut summary = IngestSummary::default();

        let existing = load_local_ids(&tx, dataset, source_tag)?;
        for local_id in existing.iter().filter(|id| !seen.contains(id.as_str())) {
            tx.execute(
                "DELETE FROM raw_records
                 WHERE dataset = ?1 AND source_tag = ?2 AND local_id = ?3;",
                params![dataset, source_tag, local_id],
            )?;
            summary.removed += 1;
        }

        for record in records {
            let fields_json = serde_json::to_string(&record.fields)?;
            let stored = tx
                .query_row(
                    "SELECT fields_json, updated_at FROM raw_records
                     WHERE dataset = ?1 AND source_tag = ?2 AND local_id = ?3;",
                    params![dataset, source_tag, record.local_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
                )
                .optional()?;

            match stored {
                Some((json, updated_at)) if json == fields_json && updated_at == record.updated_at => {
                    summary.unchanged += 1;
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE raw_records
                         SET fields_json = ?4, updated_at = ?5, ingested_at = ?6
                         WHERE dataset = ?1 AND source_tag = ?2 AND local_id = ?3;",
                        params![
                            dataset,
                            source_tag,
                            record.local_id,
                            fields_json,
                            record.updated_at,
                            ingested_at
                        ],
                    )?;
                    summary.updated += 1;
                }
                None => {
                    tx.execute(
                        "INSERT INTO raw_records (
                            dataset, source_tag, local_id, fields_json, updated_at, ingested_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                        params![
                            dataset,
                            source_tag,
                            record.local_id,
                            fields_json,
                            record.updated_at,
                            ingested_at
                        ],
                    )?;
                    summary.inserted += 1;
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    fn list_records(&self, dataset: &str) -> RepoResult<Vec<RawRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_tag, local_id, fields_json, updated_at, ingested_at
             FROM raw_records
             WHERE dataset = ?1
             ORDER BY source_tag ASC, local_id ASC;",
        )?;
        let mut rows = stmt.query([dataset])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_raw_row(row)?);
        }
        Ok(records)
    }

    fn count_records(&self, dataset: &str) -> RepoResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM raw_records WHERE dataset = ?1;",
            [dataset],
            |row| row.get(0),
        )?;
        super::count_to_usize(count, "raw_records")
    }
}

fn load_local_ids(tx: &Transaction<'_>, dataset: &str, source_tag: &str) -> RepoResult<Vec<String>> {
    let mut stmt = tx.prepare(
        "SELECT local_id FROM raw_records WHERE dataset = ?1 AND source_tag = ?2;",
    )?;
    let ids = stmt
        .query_map(params![dataset, source_tag], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn parse_raw_row(row: &Row<'_>) -> RepoResult<RawRecord> {
    let fields_json: String = row.get("fields_json")?;
    let fields: BTreeMap<String, String> = serde_json::from_str(&fields_json)?;
    Ok(RawRecord {
        source_tag: row.get("source_tag")?,
        local_id: row.get("local_id")?,
        fields,
        updated_at: row.get("updated_at")?,
        ingested_at: Some(row.get("ingested_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::{RawRecordRepository, SqliteRawRecordRepository};
    use crate::db::open_db_in_memory;
    use crate::model::record::RawRecord;
    use crate::repo::RepoError;

    fn row(id: &str, name: &str) -> RawRecord {
        RawRecord::new("crm", id).with_field("NAME", name)
    }

    #[test]
    fn replace_source_tracks_inserts_updates_and_removals() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRawRecordRepository::try_new(&conn).unwrap();

        let first = repo
            .replace_source("customers", "crm", &[row("1", "Meier"), row("2", "Schulz")], 100)
            .unwrap();
        assert_eq!(first.inserted, 2);

        let second = repo
            .replace_source("customers", "crm", &[row("1", "Meier"), row("3", "Weber")], 200)
            .unwrap();
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.inserted, 1);
        assert_eq!(second.removed, 1);
        assert_eq!(second.total(), 2);

        let stored = repo.list_records("customers").unwrap();
        let ids = stored.iter().map(|r| r.local_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(stored[0].ingested_at, Some(100));
        assert_eq!(stored[1].ingested_at, Some(200));
    }

    #[test]
    fn changed_content_refreshes_ingestion_time() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRawRecordRepository::try_new(&conn).unwrap();
        repo.replace_source("customers", "crm", &[row("1", "Meier")], 100)
            .unwrap();
        let summary = repo
            .replace_source("customers", "crm", &[row("1", "Meyer")], 300)
            .unwrap();
        assert_eq!(summary.updated, 1);
        assert!(summary.changed());
        assert_eq!(repo.list_records("customers").unwrap()[0].ingested_at, Some(300));
    }

    #[test]
    fn other_sources_are_left_alone() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRawRecordRepository::try_new(&conn).unwrap();
        repo.replace_source("customers", "crm", &[row("1", "Meier")], 100)
            .unwrap();
        repo.replace_source(
            "customers",
            "erp",
            &[RawRecord::new("erp", "1").with_field("NAME", "Meier")],
            100,
        )
        .unwrap();
        repo.replace_source("customers", "erp", &[], 200).unwrap();

        assert_eq!(repo.count_records("customers").unwrap(), 1);
    }

    #[test]
    fn invalid_batches_are_rejected_before_writing() {
        let conn = open_db_in_memory().unwrap();
        let repo = SqliteRawRecordRepository::try_new(&conn).unwrap();

        let duplicate = repo.replace_source("customers", "crm", &[row("1", "a"), row("1", "b")], 1);
        assert!(matches!(duplicate, Err(RepoError::InvalidData(_))));

        let foreign = repo.replace_source(
            "customers",
            "crm",
            &[RawRecord::new("erp", "1")],
            1,
        );
        assert!(matches!(foreign, Err(RepoError::InvalidData(_))));

        let blank = repo.replace_source("customers", "crm", &[row(" ", "a")], 1);
        assert!(matches!(blank, Err(RepoError::Validation(_))));

        assert_eq!(repo.count_records("customers").unwrap(), 0);
    }
}
