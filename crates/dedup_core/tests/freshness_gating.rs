use dedup_core::db::open_db_in_memory;
use dedup_core::freshness::{
    FreshnessTracker, SourceFingerprint, SqliteFreshnessTracker,
};

const TABLE: &str = "normalized/customers";

#[test]
fn missing_stamp_requires_rebuild() {
    let conn = open_db_in_memory().unwrap();
    let tracker = SqliteFreshnessTracker::try_new(&conn).unwrap();
    let fp = SourceFingerprint::new("rows:3:abc");

    assert!(tracker.stamp(TABLE).unwrap().is_none());
    assert!(tracker.needs_rebuild(TABLE, &fp, false).unwrap());
}

#[test]
fn same_fingerprint_is_fresh_after_mark_built() {
    let conn = open_db_in_memory().unwrap();
    let tracker = SqliteFreshnessTracker::try_new(&conn).unwrap();
    let fp = SourceFingerprint::new("rows:3:abc");

    assert!(tracker.needs_rebuild(TABLE, &fp, false).unwrap());
    tracker.mark_built(TABLE, &fp).unwrap();
    assert!(!tracker.needs_rebuild(TABLE, &fp, false).unwrap());
    assert!(!tracker.needs_rebuild(TABLE, &fp, false).unwrap());

    let changed = SourceFingerprint::new("rows:4:def");
    assert!(tracker.needs_rebuild(TABLE, &changed, false).unwrap());
}

#[test]
fn force_overrides_a_fresh_stamp() {
    let conn = open_db_in_memory().unwrap();
    let tracker = SqliteFreshnessTracker::try_new(&conn).unwrap();
    let fp = SourceFingerprint::new("file:1:10");
    tracker.mark_built(TABLE, &fp).unwrap();

    assert!(tracker.needs_rebuild(TABLE, &fp, true).unwrap());
    assert!(!tracker.needs_rebuild(TABLE, &fp, false).unwrap());
}

#[test]
fn mark_built_overwrites_and_invalidate_clears() {
    let conn = open_db_in_memory().unwrap();
    let tracker = SqliteFreshnessTracker::try_new(&conn).unwrap();
    tracker
        .mark_built(TABLE, &SourceFingerprint::new("old"))
        .unwrap();
    tracker
        .mark_built(TABLE, &SourceFingerprint::new("new"))
        .unwrap();

    let stamp = tracker.stamp(TABLE).unwrap().unwrap();
    assert_eq!(stamp.source_fingerprint.as_str(), "new");
    assert!(stamp.generated_at > 0);

    tracker.invalidate(TABLE).unwrap();
    assert!(tracker.stamp(TABLE).unwrap().is_none());
}

#[test]
fn stamps_are_per_table() {
    let conn = open_db_in_memory().unwrap();
    let tracker = SqliteFreshnessTracker::try_new(&conn).unwrap();
    let fp = SourceFingerprint::new("same");
    tracker.mark_built("normalized/a", &fp).unwrap();

    assert!(!tracker.needs_rebuild("normalized/a", &fp, false).unwrap());
    assert!(tracker.needs_rebuild("normalized/b", &fp, false).unwrap());
}
