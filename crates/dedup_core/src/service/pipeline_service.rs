//! Dedup pipeline: ingest, normalize, resolve, materialize, evaluate.
//!
//! # Responsibility
//! - Sequence the stages and own the freshness gate around normalization.
//! - Turn stage outcomes into run reports and ledger rows.
//!
//! # Invariants
//! - Normalized data is committed before its freshness stamp is written.
//! - A consistency failure aborts resolution before any golden-record write.
//! - A storage failure leaves the previous stamp untouched.
//! - Per-field and per-row problems are counted, never fatal.

use crate::canonical::date::parse_date;
use crate::canonical::phonetic::select_phonetic_provider;
use crate::canonical::Canonicalizer;
use crate::config::{ConfigError, PipelineConfig, SourceSchema};
use crate::evaluation::{evaluate_thresholds, EvaluationReport};
use crate::freshness::{
    fingerprint_rows, normalized_table_name, raw_table_name, FreshnessStamp, FreshnessTracker,
    SourceFingerprint, SqliteFreshnessTracker,
};
use crate::logging::sanitize_for_log;
use crate::model::pair::{CandidatePair, ReferencePair};
use crate::model::record::RawRecord;
use crate::normalize::{NormalizationStats, RecordNormalizer};
use crate::repo::golden_repo::{GoldenRecordRepository, SqliteGoldenRecordRepository};
use crate::repo::normalized_repo::{NormalizedRecordRepository, SqliteNormalizedRecordRepository};
use crate::repo::pair_repo::{
    CandidatePairRepository, ReferencePairRepository, SqlitePairRepository,
};
use crate::repo::raw_repo::{IngestSummary, RawRecordRepository, SqliteRawRecordRepository};
use crate::repo::run_repo::{
    PipelineRun, PipelineRunRepository, RunStage, RunStatus, SqlitePipelineRunRepository,
};
use crate::repo::stats::{store_statistics, StoreStatistics};
use crate::repo::{validate_dataset_name, RepoError};
use crate::resolve::{resolve, ResolveError};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{error, info, warn};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const RECENT_RUNS_LIMIT: u32 = 10;
const MAX_LOGGED_VALUE_CHARS: usize = 64;

/// One source row as read from a file: column name -> cell text.
pub type SourceRow = BTreeMap<String, String>;

/// Fatal pipeline failure.
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    Storage(RepoError),
    Consistency(ResolveError),
    UnknownSource(String),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Consistency(err) => write!(f, "consistency error: {err}"),
            Self::UnknownSource(tag) => write!(f, "source `{tag}` is not configured"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Consistency(err) => Some(err),
            Self::UnknownSource(_) => None,
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<RepoError> for PipelineError {
    fn from(value: RepoError) -> Self {
        Self::Storage(value)
    }
}

impl From<ResolveError> for PipelineError {
    fn from(value: ResolveError) -> Self {
        Self::Consistency(value)
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result of loading one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub summary: IngestSummary,
    /// Rows dropped because they had no id.
    pub rejected_rows: usize,
    /// Rows dropped because an earlier row of the file had the same id.
    pub duplicate_rows: usize,
    /// Rows whose update timestamp could not be read.
    pub unparsed_timestamps: usize,
}

/// Whether normalization ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Fresh {
        record_count: usize,
    },
    Rebuilt {
        run_id: Uuid,
        record_count: usize,
        stats: NormalizationStats,
    },
}

impl RefreshOutcome {
    pub fn was_rebuilt(&self) -> bool {
        matches!(self, Self::Rebuilt { .. })
    }
}

/// Summary of one resolve run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub dataset: String,
    pub normalization_rebuilt: bool,
    pub record_count: usize,
    pub cluster_count: usize,
    pub multi_member_clusters: usize,
    pub accepted_pairs: usize,
    pub rejected_pairs: usize,
    pub golden_rows: usize,
    pub malformed_fields: usize,
    pub degraded_fields: usize,
}

/// Store overview for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStatus {
    pub statistics: StoreStatistics,
    pub normalized_stamp: Option<FreshnessStamp>,
    pub recent_runs: Vec<PipelineRun>,
}

/// Pipeline bound to one store connection and one validated configuration.
pub struct DedupPipeline<'a> {
    conn: &'a Connection,
    config: &'a PipelineConfig,
    canonicalizer: Canonicalizer,
}

impl<'a> DedupPipeline<'a> {
    /// Validates `config` and selects the phonetic provider once.
    pub fn new(conn: &'a Connection, config: &'a PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let mut canonicalizer = Canonicalizer::new(select_phonetic_provider(config.phonetics));
        if let Some(places) = &config.reference_places {
            canonicalizer = canonicalizer.with_reference_places(places);
        }
        info!(
            "event=pipeline_init module=pipeline status=ok mode={} provider={} phonetics={} sources={}",
            config.mode.as_str(),
            canonicalizer.provider_id(),
            canonicalizer.phonetics_available(),
            config.sources.len()
        );
        Ok(Self {
            conn,
            config,
            canonicalizer,
        })
    }

    /// Whether `source_tag` was already ingested from input with `fingerprint`.
    pub fn source_is_current(
        &self,
        dataset: &str,
        source_tag: &str,
        fingerprint: &SourceFingerprint,
    ) -> PipelineResult<bool> {
        let tracker = SqliteFreshnessTracker::try_new(self.conn)?;
        let gated = self.with_schema(fingerprint);
        Ok(!tracker.needs_rebuild(&raw_table_name(dataset, source_tag), &gated, false)?)
    }

    /// Replaces the rows of `source_tag` in `dataset`.
    ///
    /// When `fingerprint` is given it is stamped after the rows commit, so
    /// [`Self::source_is_current`] can skip an unchanged file next time.
    /// Rows without an id and repeated ids are skipped and counted; the first
    /// row of a repeated id wins.
    pub fn ingest(
        &self,
        dataset: &str,
        source_tag: &str,
        rows: &[SourceRow],
        fingerprint: Option<&SourceFingerprint>,
    ) -> PipelineResult<IngestReport> {
        validate_dataset_name(dataset)?;
        let schema = self
            .config
            .source(source_tag)
            .ok_or_else(|| PipelineError::UnknownSource(source_tag.to_string()))?;
        let mut run = PipelineRun::start(dataset, RunStage::Ingest, now_ms());

        let mut records = Vec::with_capacity(rows.len());
        let mut seen = HashSet::with_capacity(rows.len());
        let mut rejected_rows = 0;
        let mut duplicate_rows = 0;
        let mut unparsed_timestamps = 0;
        for (line, row) in rows.iter().enumerate() {
            let Some((record, timestamp_ok)) = raw_record_from_row(schema, row) else {
                rejected_rows += 1;
                warn!(
                    "event=row_rejected module=pipeline status=skipped dataset={} source={} row={} reason=missing_id",
                    dataset, source_tag, line + 1
                );
                continue;
            };
            if !seen.insert(record.local_id.clone()) {
                duplicate_rows += 1;
                warn!(
                    "event=row_rejected module=pipeline status=skipped dataset={} source={} row={} reason=duplicate_id id={}",
                    dataset,
                    source_tag,
                    line + 1,
                    sanitize_for_log(&record.local_id, MAX_LOGGED_VALUE_CHARS)
                );
                continue;
            }
            if !timestamp_ok {
                unparsed_timestamps += 1;
            }
            records.push(record);
        }

        let outcome = SqliteRawRecordRepository::try_new(self.conn).and_then(|repo| {
            repo.replace_source(dataset, source_tag, &records, run.started_at)
        });
        let summary = match outcome {
            Ok(summary) => summary,
            Err(err) => return Err(self.fail_run(run, err.into())),
        };

        // A file with no usable row never marks the source current.
        let usable = !records.is_empty() || rows.is_empty();
        let stamped = SqliteFreshnessTracker::try_new(self.conn).and_then(|tracker| {
            let raw_table = raw_table_name(dataset, source_tag);
            match fingerprint {
                Some(fingerprint) if usable => {
                    tracker.mark_built(&raw_table, &self.with_schema(fingerprint))
                }
                _ => tracker.invalidate(&raw_table),
            }
        });
        if let Err(err) = stamped {
            return Err(self.fail_run(run, err.into()));
        }
        if !usable {
            warn!(
                "event=ingest module=pipeline status=empty dataset={} source={} rows={} rejected={}",
                dataset,
                source_tag,
                rows.len(),
                rejected_rows + duplicate_rows
            );
        }

        run.record_count = summary.total();
        run.finished_at = now_ms();
        self.record_run(&run);
        info!(
            "event=ingest module=pipeline status=ok dataset={} source={} inserted={} updated={} unchanged={} removed={} rejected={} duplicates={}",
            dataset,
            source_tag,
            summary.inserted,
            summary.updated,
            summary.unchanged,
            summary.removed,
            rejected_rows,
            duplicate_rows
        );

        Ok(IngestReport {
            run_id: run.run_id,
            summary,
            rejected_rows,
            duplicate_rows,
            unparsed_timestamps,
        })
    }

    /// Stores the external matcher's output for `dataset`.
    pub fn import_pairs(&self, dataset: &str, pairs: &[CandidatePair]) -> PipelineResult<usize> {
        Ok(SqlitePairRepository::try_new(self.conn)?.replace_pairs(dataset, pairs)?)
    }

    /// Stores curated reference duplicates for `dataset`.
    pub fn load_reference(&self, dataset: &str, pairs: &[ReferencePair]) -> PipelineResult<usize> {
        Ok(SqlitePairRepository::try_new(self.conn)?.replace_references(dataset, pairs)?)
    }

    /// Rebuilds the normalized table when its raw input or schema changed.
    pub fn refresh_normalized(&self, dataset: &str, force: bool) -> PipelineResult<RefreshOutcome> {
        validate_dataset_name(dataset)?;
        let raw = SqliteRawRecordRepository::try_new(self.conn)?.list_records(dataset)?;
        let tracker = SqliteFreshnessTracker::try_new(self.conn)?;
        let table = normalized_table_name(dataset);
        let fingerprint = fingerprint_rows(&self.normalization_digest(), self.config.mode, &raw);

        let mut run = PipelineRun::start(dataset, RunStage::Normalize, now_ms());
        if !tracker.needs_rebuild(&table, &fingerprint, force)? {
            run.status = RunStatus::Skipped;
            run.record_count = raw.len();
            run.finished_at = now_ms();
            self.record_run(&run);
            return Ok(RefreshOutcome::Fresh {
                record_count: raw.len(),
            });
        }

        let mut stats = NormalizationStats::default();
        let mut normalized = Vec::with_capacity(raw.len());
        for record in &raw {
            let Some(schema) = self.config.source(&record.source_tag) else {
                let err = PipelineError::UnknownSource(record.source_tag.clone());
                return Err(self.fail_run(run, err));
            };
            let output = RecordNormalizer::new(schema, &self.canonicalizer)
                .normalize(record, self.config.mode);
            stats.record(schema, record, &output);
            normalized.push(output.record);
        }

        let written = SqliteNormalizedRecordRepository::try_new(self.conn)
            .and_then(|repo| repo.replace_dataset(dataset, &normalized))
            .and_then(|written| tracker.mark_built(&table, &fingerprint).map(|()| written));
        let written = match written {
            Ok(written) => written,
            Err(err) => return Err(self.fail_run(run, err.into())),
        };

        run.record_count = written;
        run.malformed_field_count = stats.malformed_fields;
        run.degraded_field_count = stats.degraded_fields;
        run.finished_at = now_ms();
        self.record_run(&run);
        info!(
            "event=normalize module=pipeline status=ok dataset={} records={} malformed={} degraded={} duration_ms={}",
            dataset,
            written,
            stats.malformed_fields,
            stats.degraded_fields,
            run.finished_at - run.started_at
        );

        Ok(RefreshOutcome::Rebuilt {
            run_id: run.run_id,
            record_count: written,
            stats,
        })
    }

    /// Refreshes normalization, resolves stored pairs and materializes the
    /// golden-record table.
    pub fn resolve(&self, dataset: &str, force_normalize: bool) -> PipelineResult<RunReport> {
        let refresh = self.refresh_normalized(dataset, force_normalize)?;
        let mut run = PipelineRun::start(dataset, RunStage::Resolve, now_ms());

        let loaded = SqliteNormalizedRecordRepository::try_new(self.conn)
            .and_then(|repo| repo.list_records(dataset))
            .and_then(|records| {
                let pairs = SqlitePairRepository::try_new(self.conn)?.list_pairs(dataset)?;
                Ok((records, pairs))
            });
        let (records, pairs) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => return Err(self.fail_run(run, err.into())),
        };

        let resolution = match resolve(&pairs, self.config.threshold, &records) {
            Ok(resolution) => resolution,
            Err(err) => return Err(self.fail_run(run, err.into())),
        };

        let entries = resolution.entries();
        let golden_rows = match SqliteGoldenRecordRepository::try_new(self.conn)
            .and_then(|repo| repo.materialize(dataset, &entries))
        {
            Ok(rows) => rows,
            Err(err) => return Err(self.fail_run(run, err.into())),
        };

        let (malformed_fields, degraded_fields) = match &refresh {
            RefreshOutcome::Rebuilt { stats, .. } => (stats.malformed_fields, stats.degraded_fields),
            RefreshOutcome::Fresh { .. } => (0, 0),
        };
        run.record_count = records.len();
        run.cluster_count = resolution.clusters.len();
        run.accepted_pair_count = resolution.accepted_pairs;
        run.golden_row_count = golden_rows;
        run.malformed_field_count = malformed_fields;
        run.degraded_field_count = degraded_fields;
        run.finished_at = now_ms();
        self.record_run(&run);
        info!(
            "event=resolve module=pipeline status=ok dataset={} records={} clusters={} accepted_pairs={} golden_rows={} duration_ms={}",
            dataset,
            records.len(),
            resolution.clusters.len(),
            resolution.accepted_pairs,
            golden_rows,
            run.finished_at - run.started_at
        );

        Ok(RunReport {
            run_id: run.run_id,
            dataset: dataset.to_string(),
            normalization_rebuilt: refresh.was_rebuilt(),
            record_count: records.len(),
            cluster_count: resolution.clusters.len(),
            multi_member_clusters: resolution.multi_member_clusters(),
            accepted_pairs: resolution.accepted_pairs,
            rejected_pairs: resolution.rejected_pairs,
            golden_rows,
            malformed_fields,
            degraded_fields,
        })
    }

    /// Evaluates stored pairs against stored references.
    ///
    /// An empty `thresholds` slice evaluates at the configured threshold.
    pub fn evaluate(
        &self,
        dataset: &str,
        thresholds: &[f64],
    ) -> PipelineResult<Vec<EvaluationReport>> {
        let repo = SqlitePairRepository::try_new(self.conn)?;
        let pairs = repo.list_pairs(dataset)?;
        let references = repo.list_references(dataset)?;
        let thresholds = if thresholds.is_empty() {
            vec![self.config.threshold]
        } else {
            thresholds.to_vec()
        };
        for &threshold in &thresholds {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(PipelineError::Config(ConfigError::InvalidThreshold(threshold)));
            }
        }
        Ok(evaluate_thresholds(&pairs, &references, &thresholds))
    }

    pub fn status(&self, dataset: &str) -> PipelineResult<DatasetStatus> {
        let tracker = SqliteFreshnessTracker::try_new(self.conn)?;
        let runs = SqlitePipelineRunRepository::try_new(self.conn)?;
        Ok(DatasetStatus {
            statistics: store_statistics(self.conn, Some(dataset))?,
            normalized_stamp: tracker.stamp(&normalized_table_name(dataset))?,
            recent_runs: runs.list_runs(dataset, RECENT_RUNS_LIMIT)?,
        })
    }

    fn normalization_digest(&self) -> String {
        format!(
            "{}:{}",
            self.config.schema_digest(),
            self.canonicalizer.provider_id()
        )
    }

    fn with_schema(&self, fingerprint: &SourceFingerprint) -> SourceFingerprint {
        SourceFingerprint::new(format!("{}@{}", fingerprint, self.config.schema_digest()))
    }

    fn fail_run(&self, mut run: PipelineRun, err: PipelineError) -> PipelineError {
        run.status = RunStatus::Error;
        run.finished_at = now_ms();
        run.error_message = Some(sanitize_for_log(&err.to_string(), 512));
        error!(
            "event={} module=pipeline status=error dataset={} run_id={} error={}",
            run.stage.as_str(),
            run.dataset,
            run.run_id,
            sanitize_for_log(&err.to_string(), 512)
        );
        self.record_run(&run);
        err
    }

    fn record_run(&self, run: &PipelineRun) {
        let recorded = SqlitePipelineRunRepository::try_new(self.conn)
            .and_then(|repo| repo.record_run(run));
        if let Err(err) = recorded {
            warn!(
                "event=run_ledger module=pipeline status=error run_id={} error={}",
                run.run_id, err
            );
        }
    }
}

/// Builds a raw record from one source row.
///
/// Returns `None` when the id column is missing or blank; the flag is false
/// when an update timestamp was present but unreadable.
fn raw_record_from_row(schema: &SourceSchema, row: &SourceRow) -> Option<(RawRecord, bool)> {
    let local_id = row.get(schema.id_field.trim())?.trim();
    if local_id.is_empty() {
        return None;
    }

    let mut record = RawRecord::new(schema.source_tag.trim(), local_id);
    record.fields = row
        .iter()
        .map(|(name, value)| (name.trim().to_string(), value.clone()))
        .collect();

    let mut timestamp_ok = true;
    if let Some(field) = &schema.updated_at_field {
        if let Some(text) = row.get(field.trim()).filter(|text| !text.trim().is_empty()) {
            match parse_timestamp_ms(text) {
                Some(epoch_ms) => record.updated_at = Some(epoch_ms),
                None => {
                    timestamp_ok = false;
                    warn!(
                        "event=timestamp_unparsed module=pipeline status=fallback record_id={} value={}",
                        record.record_id(),
                        sanitize_for_log(text, MAX_LOGGED_VALUE_CHARS)
                    );
                }
            }
        }
    }
    Some((record, timestamp_ok))
}

/// Epoch milliseconds from an integer, an RFC 3339 timestamp, a
/// `YYYY-MM-DD HH:MM:SS` local time (read as UTC) or any accepted date layout.
pub fn parse_timestamp_ms(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if let Ok(epoch_ms) = trimmed.parse::<i64>() {
        if trimmed.len() != 8 {
            return Some(epoch_ms);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.timestamp_millis());
    }
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    parse_date(trimmed)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp_millis())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
