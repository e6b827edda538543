use dedup_core::db::open_db_in_memory;
use dedup_core::repo::golden_repo::{GoldenRecordRepository, SqliteGoldenRecordRepository};
use dedup_core::{resolve, CandidatePair, NormalizedRecord, RecordId};
use rusqlite::Connection;
use std::collections::BTreeMap;

fn record(value: &str, last_updated: i64) -> NormalizedRecord {
    NormalizedRecord {
        record_id: RecordId::parse(value).unwrap(),
        comparison_keys: BTreeMap::new(),
        display_fields: BTreeMap::new(),
        last_updated,
    }
}

fn table_dump(conn: &Connection) -> Vec<(String, String, String, String, i64)> {
    let mut stmt = conn
        .prepare("SELECT * FROM golden_records ORDER BY dataset, record_id;")
        .unwrap();
    stmt.query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    })
    .unwrap()
    .collect::<Result<Vec<_>, _>>()
    .unwrap()
}

#[test]
fn materializing_twice_yields_identical_table() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteGoldenRecordRepository::try_new(&conn).unwrap();
    let records = [record("crm:1", 10), record("crm:2", 20), record("erp:1", 5)];
    let pairs = [CandidatePair::new(
        RecordId::parse("crm:1").unwrap(),
        RecordId::parse("erp:1").unwrap(),
        0.92,
    )];
    let entries = resolve(&pairs, 0.8, &records).unwrap().entries();

    let first_count = repo.materialize("customers", &entries).unwrap();
    let first = table_dump(&conn);
    let second_count = repo.materialize("customers", &entries).unwrap();
    let second = table_dump(&conn);

    assert_eq!(first_count, 3);
    assert_eq!(first_count, second_count);
    assert_eq!(first, second);
}

#[test]
fn rematerializing_replaces_rather_than_appends() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteGoldenRecordRepository::try_new(&conn).unwrap();
    let records = [record("crm:1", 1), record("crm:2", 2)];

    let merged = resolve(
        &[CandidatePair::new(
            RecordId::parse("crm:1").unwrap(),
            RecordId::parse("crm:2").unwrap(),
            0.9,
        )],
        0.8,
        &records,
    )
    .unwrap();
    repo.materialize("customers", &merged.entries()).unwrap();

    let split = resolve(&[], 0.8, &records).unwrap();
    repo.materialize("customers", &split.entries()).unwrap();

    let rows = repo.list_golden_records("customers").unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.is_survivor));
}
