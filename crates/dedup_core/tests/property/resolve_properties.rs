use dedup_core::{
    resolve, CandidatePair, Canonicalizer, FieldRole, NormalizationMode, NormalizedRecord,
    RecordId,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn records(timestamps: &[i64]) -> Vec<NormalizedRecord> {
    timestamps
        .iter()
        .enumerate()
        .map(|(index, last_updated)| NormalizedRecord {
            record_id: RecordId::new("src", &format!("{index:03}")),
            comparison_keys: BTreeMap::new(),
            display_fields: BTreeMap::new(),
            last_updated: *last_updated,
        })
        .collect()
}

fn pairs(records: &[NormalizedRecord], edges: &[(usize, usize, f64)]) -> Vec<CandidatePair> {
    edges
        .iter()
        .map(|(left, right, probability)| {
            CandidatePair::new(
                records[left % records.len()].record_id.clone(),
                records[right % records.len()].record_id.clone(),
                *probability,
            )
        })
        .collect()
}

fn arb_role() -> impl Strategy<Value = FieldRole> {
    prop_oneof![
        Just(FieldRole::Name),
        Just(FieldRole::Address),
        Just(FieldRole::City),
        Just(FieldRole::Date),
        Just(FieldRole::Other),
    ]
}

proptest! {
    #[test]
    fn canonicalization_is_deterministic(role in arb_role(), value in ".{0,40}", enhanced in any::<bool>()) {
        let mode = if enhanced { NormalizationMode::Enhanced } else { NormalizationMode::Standard };
        let canonicalizer = Canonicalizer::default();
        let first = canonicalizer.canonicalize_field(role, &value, mode);
        let second = canonicalizer.canonicalize_field(role, &value, mode);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn non_date_keys_have_no_whitespace(role in arb_role(), value in "[a-zA-Zäöüß .,-]{0,30}") {
        prop_assume!(role != FieldRole::Date);
        let key = Canonicalizer::default().canonicalize(role, &value, NormalizationMode::Standard);
        prop_assert!(!key.chars().any(char::is_whitespace));
    }

    #[test]
    fn clusters_partition_all_records(
        timestamps in prop::collection::vec(0i64..5, 1..25),
        edges in prop::collection::vec((0usize..25, 0usize..25, 0.0f64..=1.0), 0..40),
        threshold in 0.0f64..=1.0,
    ) {
        let records = records(&timestamps);
        let pairs = pairs(&records, &edges);
        let resolution = resolve(&pairs, threshold, &records).unwrap();

        let mut seen = BTreeSet::new();
        for cluster in &resolution.clusters {
            prop_assert!(!cluster.members.is_empty());
            for member in &cluster.members {
                prop_assert!(seen.insert(member.clone()), "{} in two clusters", member);
            }
        }
        prop_assert_eq!(seen.len(), records.len());
        prop_assert_eq!(resolution.accepted_pairs + resolution.rejected_pairs, pairs.len());
    }

    #[test]
    fn each_cluster_has_one_latest_survivor(
        timestamps in prop::collection::vec(0i64..5, 1..25),
        edges in prop::collection::vec((0usize..25, 0usize..25, 0.0f64..=1.0), 0..40),
    ) {
        let records = records(&timestamps);
        let updated: BTreeMap<_, _> = records
            .iter()
            .map(|record| (record.record_id.clone(), record.last_updated))
            .collect();
        let resolution = resolve(&pairs(&records, &edges), 0.5, &records).unwrap();

        for cluster in &resolution.clusters {
            let survivors = resolution
                .entries()
                .into_iter()
                .filter(|entry| entry.cluster_id == cluster.cluster_id && entry.is_survivor)
                .count();
            prop_assert_eq!(survivors, 1);
            prop_assert!(cluster.members.contains(&cluster.survivor_id));

            let latest = cluster.members.iter().map(|id| updated[id]).max().unwrap();
            prop_assert_eq!(updated[&cluster.survivor_id], latest);
            let first_latest = cluster
                .members
                .iter()
                .filter(|id| updated[*id] == latest)
                .min()
                .unwrap();
            prop_assert_eq!(&cluster.survivor_id, first_latest);
        }
    }

    #[test]
    fn accepted_edges_share_a_cluster(
        timestamps in prop::collection::vec(0i64..5, 2..20),
        edges in prop::collection::vec((0usize..20, 0usize..20, 0.0f64..=1.0), 0..30),
        threshold in 0.0f64..=1.0,
    ) {
        let records = records(&timestamps);
        let pairs = pairs(&records, &edges);
        let resolution = resolve(&pairs, threshold, &records).unwrap();
        let cluster_of: BTreeMap<_, _> = resolution
            .entries()
            .into_iter()
            .map(|entry| (entry.record_id, entry.cluster_id))
            .collect();

        for pair in pairs.iter().filter(|pair| pair.match_probability >= threshold) {
            prop_assert_eq!(
                &cluster_of[&pair.record_id_left],
                &cluster_of[&pair.record_id_right]
            );
        }
    }
}
