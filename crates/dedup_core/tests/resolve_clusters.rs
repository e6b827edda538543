use dedup_core::{resolve, CandidatePair, NormalizedRecord, RecordId};
use std::collections::BTreeMap;

const JAN_2023: i64 = 1_672_531_200_000;
const JUN_2023: i64 = 1_685_577_600_000;

fn id(value: &str) -> RecordId {
    RecordId::parse(value).unwrap()
}

fn record(value: &str, last_updated: i64) -> NormalizedRecord {
    NormalizedRecord {
        record_id: id(value),
        comparison_keys: BTreeMap::new(),
        display_fields: BTreeMap::new(),
        last_updated,
    }
}

fn pair(a: &str, b: &str, p: f64) -> CandidatePair {
    CandidatePair::new(id(a), id(b), p)
}

#[test]
fn clusters_are_transitive() {
    let records = [
        record("crm:a", JAN_2023),
        record("crm:b", JAN_2023),
        record("crm:c", JAN_2023),
    ];
    let pairs = [pair("crm:a", "crm:b", 0.9), pair("crm:b", "crm:c", 0.85)];
    let resolution = resolve(&pairs, 0.8, &records).unwrap();

    assert_eq!(resolution.clusters.len(), 1);
    assert_eq!(
        resolution.clusters[0].members,
        vec![id("crm:a"), id("crm:b"), id("crm:c")]
    );
}

#[test]
fn probability_equal_to_threshold_is_accepted() {
    let records = [record("crm:a", 0), record("crm:b", 0)];
    let resolution = resolve(&[pair("crm:a", "crm:b", 0.8)], 0.8, &records).unwrap();
    assert_eq!(resolution.clusters.len(), 1);
    assert_eq!(resolution.accepted_pairs, 1);

    let below = resolve(&[pair("crm:a", "crm:b", 0.799_999)], 0.8, &records).unwrap();
    assert_eq!(below.clusters.len(), 2);
}

#[test]
fn survivor_tie_goes_to_smallest_record_id() {
    let records = [
        record("crm:3", JUN_2023),
        record("crm:1", JAN_2023),
        record("crm:2", JUN_2023),
    ];
    let pairs = [pair("crm:1", "crm:2", 0.95), pair("crm:3", "crm:1", 0.9)];
    let resolution = resolve(&pairs, 0.8, &records).unwrap();

    assert_eq!(resolution.clusters.len(), 1);
    assert_eq!(resolution.clusters[0].survivor_id, id("crm:2"));
    assert_eq!(resolution.clusters[0].cluster_id, id("crm:1"));
}

#[test]
fn unpaired_records_become_surviving_singletons() {
    let records = [record("crm:a", 1), record("crm:b", 2), record("erp:z", 3)];
    let resolution = resolve(&[pair("crm:a", "crm:b", 0.9)], 0.8, &records).unwrap();

    let entries = resolution.entries();
    let lonely = entries
        .iter()
        .find(|entry| entry.record_id == id("erp:z"))
        .unwrap();
    assert!(lonely.is_survivor);
    assert_eq!(lonely.cluster_id, id("erp:z"));
    assert_eq!(lonely.survivor_id, id("erp:z"));
    assert_eq!(entries.len(), 3);
}

#[test]
fn unknown_endpoint_fails_the_run() {
    let records = [record("crm:a", 1)];
    let err = resolve(&[pair("crm:a", "crm:ghost", 0.95)], 0.8, &records).unwrap_err();
    assert!(err.to_string().contains("crm:ghost"));
}

#[test]
fn input_order_does_not_change_the_result() {
    let records = [record("crm:1", 5), record("crm:2", 5), record("crm:3", 7)];
    let reversed = [record("crm:3", 7), record("crm:2", 5), record("crm:1", 5)];
    let pairs = [pair("crm:1", "crm:2", 0.9), pair("crm:3", "crm:2", 0.9)];
    let flipped = [pair("crm:2", "crm:3", 0.9), pair("crm:2", "crm:1", 0.9)];

    assert_eq!(
        resolve(&pairs, 0.8, &records).unwrap(),
        resolve(&flipped, 0.8, &reversed).unwrap()
    );
}
