//! Entity-resolution core: canonical keys, freshness-gated normalization,
//! transitive clustering with deterministic survivors, and golden-record
//! materialization over a SQLite store.

pub mod canonical;
pub mod config;
pub mod db;
pub mod evaluation;
pub mod freshness;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod repo;
pub mod resolve;
pub mod service;

pub use canonical::{Canonicalizer, FieldRole, IssueKind, NormalizationMode};
pub use config::{ConfigError, FieldMapping, PipelineConfig, SourceSchema};
pub use db::{open_db, open_db_in_memory, DbError};
pub use evaluation::{evaluate, evaluate_thresholds, ConfusionMatrix, EvaluationReport};
pub use freshness::{FreshnessTracker, SourceFingerprint, SqliteFreshnessTracker};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::cluster::{Cluster, GoldenRecordEntry};
pub use model::pair::{CandidatePair, ReferencePair};
pub use model::record::{NormalizedRecord, RawRecord, RecordId};
pub use normalize::{FieldIssue, NormalizationOutput, NormalizationStats, RecordNormalizer};
pub use repo::{RepoError, RepoResult};
pub use resolve::{resolve, Resolution, ResolveError};
pub use service::pipeline_service::{
    DedupPipeline, PipelineError, RefreshOutcome, RunReport, SourceRow,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
