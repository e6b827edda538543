//! Normalized record table.
//!
//! # Invariants
//! - `replace_dataset` swaps the whole dataset in one transaction; readers
//!   see either the old or the new table, never a mix.

use crate::model::record::{NormalizedRecord, RecordId};
use crate::repo::{ensure_store_ready, validate_dataset_name, RepoError, RepoResult};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};

pub trait NormalizedRecordRepository {
    fn replace_dataset(&self, dataset: &str, records: &[NormalizedRecord]) -> RepoResult<usize>;
    /// Ordered by `record_id`.
    fn list_records(&self, dataset: &str) -> RepoResult<Vec<NormalizedRecord>>;
}

pub struct SqliteNormalizedRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNormalizedRecordRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_ready(conn, &["normalized_records"])?;
        Ok(Self { conn })
    }
}

impl NormalizedRecordRepository for SqliteNormalizedRecordRepository<'_> {
    fn replace_dataset(&self, dataset: &str, records: &[NormalizedRecord]) -> RepoResult<usize> {
        validate_dataset_name(dataset)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM normalized_records WHERE dataset = ?1;", [dataset])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO normalized_records (
                    dataset, record_id, comparison_keys_json, display_fields_json, last_updated
                ) VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for record in records {
                insert.execute(params![
                    dataset,
                    record.record_id.as_str(),
                    serde_json::to_string(&record.comparison_keys)?,
                    serde_json::to_string(&record.display_fields)?,
                    record.last_updated,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn list_records(&self, dataset: &str) -> RepoResult<Vec<NormalizedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, comparison_keys_json, display_fields_json, last_updated
             FROM normalized_records
             WHERE dataset = ?1
             ORDER BY record_id ASC;",
        )?;
        let mut rows = stmt.query([dataset])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_normalized_row(row)?);
        }
        Ok(records)
    }
}

fn parse_normalized_row(row: &Row<'_>) -> RepoResult<NormalizedRecord> {
    let id_text: String = row.get("record_id")?;
    let record_id = RecordId::parse(&id_text)
        .ok_or_else(|| RepoError::InvalidData(format!("malformed record id `{id_text}`")))?;
    let keys_json: String = row.get("comparison_keys_json")?;
    let display_json: String = row.get("display_fields_json")?;
    Ok(NormalizedRecord {
        record_id,
        comparison_keys: serde_json::from_str(&keys_json)?,
        display_fields: serde_json::from_str(&display_json)?,
        last_updated: row.get("last_updated")?,
    })
}
