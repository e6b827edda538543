//! Target materializer: the golden-record table.
//!
//! # Responsibility
//! - Replace a dataset's golden-record rows with a fresh resolution.
//!
//! # Invariants
//! - Replacement is one IMMEDIATE transaction; a failure leaves the previous
//!   table intact.
//! - Rows are written and read in `record_id` order, so identical input
//!   yields an identical table.

use crate::model::cluster::GoldenRecordEntry;
use crate::model::record::RecordId;
use crate::repo::{ensure_store_ready, validate_dataset_name, RepoError, RepoResult};
use log::info;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::time::Instant;

pub trait GoldenRecordRepository {
    /// Replaces the dataset's rows and returns the number written.
    fn materialize(&self, dataset: &str, entries: &[GoldenRecordEntry]) -> RepoResult<usize>;
    fn list_golden_records(&self, dataset: &str) -> RepoResult<Vec<GoldenRecordEntry>>;
}

pub struct SqliteGoldenRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteGoldenRecordRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_ready(conn, &["golden_records"])?;
        Ok(Self { conn })
    }
}

impl GoldenRecordRepository for SqliteGoldenRecordRepository<'_> {
    fn materialize(&self, dataset: &str, entries: &[GoldenRecordEntry]) -> RepoResult<usize> {
        validate_dataset_name(dataset)?;
        let started_at = Instant::now();

        let mut ordered = entries.iter().collect::<Vec<_>>();
        ordered.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        if let Some(pair) = ordered.windows(2).find(|w| w[0].record_id == w[1].record_id) {
            return Err(RepoError::InvalidData(format!(
                "record `{}` appears in more than one golden-record row",
                pair[0].record_id
            )));
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM golden_records WHERE dataset = ?1;", [dataset])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO golden_records (
                    dataset, record_id, cluster_id, survivor_id, is_survivor
                ) VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for entry in &ordered {
                insert.execute(params![
                    dataset,
                    entry.record_id.as_str(),
                    entry.cluster_id.as_str(),
                    entry.survivor_id.as_str(),
                    i64::from(entry.is_survivor),
                ])?;
            }
        }
        tx.commit()?;

        info!(
            "event=materialize module=repo status=ok dataset={} rows={} duration_ms={}",
            dataset,
            ordered.len(),
            started_at.elapsed().as_millis()
        );
        Ok(ordered.len())
    }

    fn list_golden_records(&self, dataset: &str) -> RepoResult<Vec<GoldenRecordEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, cluster_id, survivor_id, is_survivor
             FROM golden_records
             WHERE dataset = ?1
             ORDER BY record_id ASC;",
        )?;
        let mut rows = stmt.query([dataset])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_golden_row(row)?);
        }
        Ok(entries)
    }
}

fn parse_golden_row(row: &Row<'_>) -> RepoResult<GoldenRecordEntry> {
    let column = |name: &str| -> RepoResult<RecordId> {
        let text: String = row.get(name)?;
        RecordId::parse(&text)
            .ok_or_else(|| RepoError::InvalidData(format!("malformed {name} `{text}`")))
    };
    let is_survivor = match row.get::<_, i64>("is_survivor")? {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "is_survivor must be 0 or 1, got {other}"
            )))
        }
    };
    Ok(GoldenRecordEntry {
        record_id: column("record_id")?,
        cluster_id: column("cluster_id")?,
        survivor_id: column("survivor_id")?,
        is_survivor,
    })
}
