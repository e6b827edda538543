use dedup_core::db::migrations::latest_version;
use dedup_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

const TABLES: &[&str] = &[
    "raw_records",
    "normalized_records",
    "freshness_stamps",
    "candidate_pairs",
    "golden_records",
    "reference_pairs",
    "pipeline_runs",
];

#[test]
fn in_memory_store_has_every_table() {
    let conn = open_db_in_memory().unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    for table in TABLES {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn reopening_a_file_store_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dedup.sqlite");

    let first = open_db(&path).unwrap();
    first
        .execute(
            "INSERT INTO freshness_stamps VALUES ('normalized/customers', 'fp', 1);",
            [],
        )
        .unwrap();
    drop(first);

    let second = open_db(&path).unwrap();
    assert_eq!(schema_version(&second), latest_version());
    let stamps: i64 = second
        .query_row("SELECT COUNT(*) FROM freshness_stamps;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stamps, 1);
}

#[test]
fn newer_store_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion { found, supported } => {
            assert_eq!(found, 999);
            assert_eq!(supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn golden_rows_reject_invalid_survivor_flags() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO golden_records VALUES ('customers', 'crm:1', 'crm:1', 'crm:1', 2);",
        [],
    );
    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
