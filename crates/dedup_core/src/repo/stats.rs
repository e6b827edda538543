//! Row counts per table for status reporting.

use crate::repo::{count_to_usize, ensure_store_ready, RepoResult};
use rusqlite::Connection;
use serde::Serialize;

const COUNTED_TABLES: &[&str] = &[
    "raw_records",
    "normalized_records",
    "candidate_pairs",
    "reference_pairs",
    "golden_records",
];

/// Row counts for one dataset, or for the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    pub raw_records: usize,
    pub normalized_records: usize,
    pub candidate_pairs: usize,
    pub reference_pairs: usize,
    pub golden_records: usize,
    pub clusters: usize,
    pub survivors: usize,
}

/// Collects counts, restricted to `dataset` when given.
pub fn store_statistics(conn: &Connection, dataset: Option<&str>) -> RepoResult<StoreStatistics> {
    ensure_store_ready(conn, COUNTED_TABLES)?;

    let count = |sql_tail: &str| -> RepoResult<usize> {
        let (sql, value): (String, i64) = match dataset {
            Some(name) => {
                let sql = format!("SELECT {sql_tail} WHERE dataset = ?1;");
                let value = conn.query_row(&sql, [name], |row| row.get(0))?;
                (sql, value)
            }
            None => {
                let sql = format!("SELECT {sql_tail};");
                let value = conn.query_row(&sql, [], |row| row.get(0))?;
                (sql, value)
            }
        };
        count_to_usize(value, &sql)
    };

    Ok(StoreStatistics {
        raw_records: count("COUNT(*) FROM raw_records")?,
        normalized_records: count("COUNT(*) FROM normalized_records")?,
        candidate_pairs: count("COUNT(*) FROM candidate_pairs")?,
        reference_pairs: count("COUNT(*) FROM reference_pairs")?,
        golden_records: count("COUNT(*) FROM golden_records")?,
        clusters: count("COUNT(DISTINCT dataset || char(31) || cluster_id) FROM golden_records")?,
        survivors: count("COALESCE(SUM(is_survivor), 0) FROM golden_records")?,
    })
}

#[cfg(test)]
mod tests {
    use super::store_statistics;
    use crate::db::open_db_in_memory;
    use crate::model::cluster::GoldenRecordEntry;
    use crate::model::record::{RawRecord, RecordId};
    use crate::repo::golden_repo::{GoldenRecordRepository, SqliteGoldenRecordRepository};
    use crate::repo::raw_repo::{RawRecordRepository, SqliteRawRecordRepository};

    #[test]
    fn empty_store_reports_zeroes() {
        let conn = open_db_in_memory().unwrap();
        let stats = store_statistics(&conn, None).unwrap();
        assert_eq!(stats, Default::default());
    }

    #[test]
    fn counts_can_be_scoped_to_a_dataset() {
        let conn = open_db_in_memory().unwrap();
        let raw = SqliteRawRecordRepository::try_new(&conn).unwrap();
        raw.replace_source("a", "crm", &[RawRecord::new("crm", "1"), RawRecord::new("crm", "2")], 1)
            .unwrap();
        raw.replace_source("b", "crm", &[RawRecord::new("crm", "1")], 1)
            .unwrap();

        let survivor = RecordId::new("crm", "1");
        let golden = SqliteGoldenRecordRepository::try_new(&conn).unwrap();
        golden
            .materialize(
                "a",
                &[
                    GoldenRecordEntry {
                        record_id: survivor.clone(),
                        cluster_id: survivor.clone(),
                        survivor_id: survivor.clone(),
                        is_survivor: true,
                    },
                    GoldenRecordEntry {
                        record_id: RecordId::new("crm", "2"),
                        cluster_id: survivor.clone(),
                        survivor_id: survivor.clone(),
                        is_survivor: false,
                    },
                ],
            )
            .unwrap();

        let scoped = store_statistics(&conn, Some("a")).unwrap();
        assert_eq!(scoped.raw_records, 2);
        assert_eq!(scoped.golden_records, 2);
        assert_eq!(scoped.clusters, 1);
        assert_eq!(scoped.survivors, 1);

        let all = store_statistics(&conn, None).unwrap();
        assert_eq!(all.raw_records, 3);
    }
}
