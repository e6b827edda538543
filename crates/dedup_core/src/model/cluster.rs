//! Resolution output: clusters, survivors and golden-record rows.

use crate::model::record::RecordId;
use serde::{Deserialize, Serialize};

/// Connected component of the accepted-pair graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Smallest member id; stable while membership is stable.
    pub cluster_id: RecordId,
    /// Members sorted by `RecordId`.
    pub members: Vec<RecordId>,
    pub survivor_id: RecordId,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    /// Golden-record rows for every member of this cluster.
    pub fn entries(&self) -> impl Iterator<Item = GoldenRecordEntry> + '_ {
        self.members.iter().map(move |member| GoldenRecordEntry {
            record_id: member.clone(),
            cluster_id: self.cluster_id.clone(),
            survivor_id: self.survivor_id.clone(),
            is_survivor: *member == self.survivor_id,
        })
    }
}

/// One row of the golden-record table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldenRecordEntry {
    pub record_id: RecordId,
    pub cluster_id: RecordId,
    pub survivor_id: RecordId,
    pub is_survivor: bool,
}
