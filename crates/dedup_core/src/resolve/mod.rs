//! Match resolution: clusters and survivors from scored candidate pairs.
//!
//! # Responsibility
//! - Group records into connected components of the accepted-pair graph.
//! - Pick one survivor per component.
//!
//! # Invariants
//! - A pair is accepted when `match_probability >= threshold`.
//! - Clusters partition the record set; unpaired records are singletons.
//! - Survivor: latest `last_updated`, ties to the smallest `record_id`.
//! - `cluster_id` is the smallest member id; output order is by `cluster_id`.
//! - Any inconsistency fails the whole run before output is produced.

use crate::model::cluster::{Cluster, GoldenRecordEntry};
use crate::model::pair::CandidatePair;
use crate::model::record::{NormalizedRecord, RecordId};
use petgraph::unionfind::UnionFind;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Consistency failure. Fatal for the run; nothing is materialized.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    InvalidThreshold(f64),
    InvalidProbability {
        record_id_left: RecordId,
        record_id_right: RecordId,
        match_probability: f64,
    },
    UnknownRecord(RecordId),
    DuplicateRecord(RecordId),
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidThreshold(value) => {
                write!(f, "threshold must be a number in [0, 1], got {value}")
            }
            Self::InvalidProbability {
                record_id_left,
                record_id_right,
                match_probability,
            } => write!(
                f,
                "pair `{record_id_left}`/`{record_id_right}` has probability {match_probability} outside [0, 1]"
            ),
            Self::UnknownRecord(id) => {
                write!(f, "candidate pair references unknown record `{id}`")
            }
            Self::DuplicateRecord(id) => write!(f, "record `{id}` appears more than once"),
        }
    }
}

impl Error for ResolveError {}

/// Outcome of one resolution run.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub clusters: Vec<Cluster>,
    pub accepted_pairs: usize,
    pub rejected_pairs: usize,
}

impl Resolution {
    pub fn record_count(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }

    pub fn multi_member_clusters(&self) -> usize {
        self.clusters.iter().filter(|c| !c.is_singleton()).count()
    }

    /// One row per record, ordered by `record_id`.
    pub fn entries(&self) -> Vec<GoldenRecordEntry> {
        let mut entries = self
            .clusters
            .iter()
            .flat_map(Cluster::entries)
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        entries
    }
}

/// Resolves `pairs` over `records` at `threshold`.
///
/// # Errors
/// - Threshold or a pair probability outside `[0, 1]` or not a number.
/// - A pair endpoint missing from `records`.
/// - The same `record_id` twice in `records`.
pub fn resolve(
    pairs: &[CandidatePair],
    threshold: f64,
    records: &[NormalizedRecord],
) -> Result<Resolution, ResolveError> {
    if !is_probability(threshold) {
        return Err(ResolveError::InvalidThreshold(threshold));
    }

    let mut ordered = records.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| a.record_id.cmp(&b.record_id));
    if let Some(window) = ordered
        .windows(2)
        .find(|w| w[0].record_id == w[1].record_id)
    {
        return Err(ResolveError::DuplicateRecord(window[0].record_id.clone()));
    }

    let index: HashMap<&RecordId, usize> = ordered
        .iter()
        .enumerate()
        .map(|(position, record)| (&record.record_id, position))
        .collect();
    let lookup = |id: &RecordId| {
        index
            .get(id)
            .copied()
            .ok_or_else(|| ResolveError::UnknownRecord(id.clone()))
    };

    let mut sets = UnionFind::<usize>::new(ordered.len());
    let mut accepted_pairs = 0;
    for pair in pairs {
        if !is_probability(pair.match_probability) {
            return Err(ResolveError::InvalidProbability {
                record_id_left: pair.record_id_left.clone(),
                record_id_right: pair.record_id_right.clone(),
                match_probability: pair.match_probability,
            });
        }
        let left = lookup(&pair.record_id_left)?;
        let right = lookup(&pair.record_id_right)?;
        if pair.is_accepted(threshold) {
            sets.union(left, right);
            accepted_pairs += 1;
        }
    }

    // Members arrive in record_id order, so each group is already sorted and
    // its first member is the cluster id.
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for position in 0..ordered.len() {
        groups.entry(sets.find(position)).or_default().push(position);
    }

    let mut clusters = groups
        .into_values()
        .map(|members| build_cluster(&ordered, &members))
        .collect::<Vec<_>>();
    clusters.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));

    Ok(Resolution {
        clusters,
        accepted_pairs,
        rejected_pairs: pairs.len() - accepted_pairs,
    })
}

fn build_cluster(ordered: &[&NormalizedRecord], members: &[usize]) -> Cluster {
    let mut survivor = ordered[members[0]];
    for &position in &members[1..] {
        let candidate = ordered[position];
        // Later positions have larger ids, so only a strictly newer record wins.
        if candidate.last_updated > survivor.last_updated {
            survivor = candidate;
        }
    }

    Cluster {
        cluster_id: ordered[members[0]].record_id.clone(),
        members: members
            .iter()
            .map(|&position| ordered[position].record_id.clone())
            .collect(),
        survivor_id: survivor.record_id.clone(),
    }
}

fn is_probability(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}
