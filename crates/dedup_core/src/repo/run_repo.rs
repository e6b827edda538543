//! Pipeline run ledger.

use crate::repo::{count_to_usize, ensure_store_ready, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

/// Pipeline stage recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Ingest,
    Normalize,
    Resolve,
}

impl RunStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Normalize => "normalize",
            Self::Resolve => "resolve",
        }
    }

    fn from_db(value: &str) -> RepoResult<Self> {
        match value {
            "ingest" => Ok(Self::Ingest),
            "normalize" => Ok(Self::Normalize),
            "resolve" => Ok(Self::Resolve),
            other => Err(RepoError::InvalidData(format!("unknown run stage `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    Skipped,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }

    fn from_db(value: &str) -> RepoResult<Self> {
        match value {
            "ok" => Ok(Self::Ok),
            "skipped" => Ok(Self::Skipped),
            "error" => Ok(Self::Error),
            other => Err(RepoError::InvalidData(format!("unknown run status `{other}`"))),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub dataset: String,
    pub stage: RunStage,
    pub status: RunStatus,
    /// Epoch milliseconds.
    pub started_at: i64,
    pub finished_at: i64,
    pub record_count: usize,
    pub cluster_count: usize,
    pub accepted_pair_count: usize,
    pub golden_row_count: usize,
    pub malformed_field_count: usize,
    pub degraded_field_count: usize,
    pub error_message: Option<String>,
}

impl PipelineRun {
    /// Starts a ledger row with a fresh v4 id and zeroed counters.
    pub fn start(dataset: &str, stage: RunStage, started_at: i64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dataset: dataset.to_string(),
            stage,
            status: RunStatus::Ok,
            started_at,
            finished_at: started_at,
            record_count: 0,
            cluster_count: 0,
            accepted_pair_count: 0,
            golden_row_count: 0,
            malformed_field_count: 0,
            degraded_field_count: 0,
            error_message: None,
        }
    }
}

pub trait PipelineRunRepository {
    fn record_run(&self, run: &PipelineRun) -> RepoResult<()>;
    /// Newest first, at most `limit` rows.
    fn list_runs(&self, dataset: &str, limit: u32) -> RepoResult<Vec<PipelineRun>>;
}

pub struct SqlitePipelineRunRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePipelineRunRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_ready(conn, &["pipeline_runs"])?;
        Ok(Self { conn })
    }
}

impl PipelineRunRepository for SqlitePipelineRunRepository<'_> {
    fn record_run(&self, run: &PipelineRun) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO pipeline_runs (
                run_id, dataset, stage, status, started_at, finished_at,
                record_count, cluster_count, accepted_pair_count, golden_row_count,
                malformed_field_count, degraded_field_count, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
            params![
                run.run_id.to_string(),
                run.dataset,
                run.stage.as_str(),
                run.status.as_str(),
                run.started_at,
                run.finished_at,
                run.record_count as i64,
                run.cluster_count as i64,
                run.accepted_pair_count as i64,
                run.golden_row_count as i64,
                run.malformed_field_count as i64,
                run.degraded_field_count as i64,
                run.error_message,
            ],
        )?;
        Ok(())
    }

    fn list_runs(&self, dataset: &str, limit: u32) -> RepoResult<Vec<PipelineRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM pipeline_runs
             WHERE dataset = ?1
             ORDER BY started_at DESC, rowid DESC
             LIMIT ?2;",
        )?;
        let mut rows = stmt.query(params![dataset, i64::from(limit)])?;
        let mut runs = Vec::new();
        while let Some(row) = rows.next()? {
            runs.push(parse_run_row(row)?);
        }
        Ok(runs)
    }
}

fn parse_run_row(row: &Row<'_>) -> RepoResult<PipelineRun> {
    let run_id_text: String = row.get("run_id")?;
    let run_id = Uuid::parse_str(&run_id_text)
        .map_err(|err| RepoError::InvalidData(format!("invalid run id `{run_id_text}`: {err}")))?;
    let stage: String = row.get("stage")?;
    let status: String = row.get("status")?;
    let count = |column: &str| -> RepoResult<usize> { count_to_usize(row.get(column)?, column) };

    Ok(PipelineRun {
        run_id,
        dataset: row.get("dataset")?,
        stage: RunStage::from_db(&stage)?,
        status: RunStatus::from_db(&status)?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        record_count: count("record_count")?,
        cluster_count: count("cluster_count")?,
        accepted_pair_count: count("accepted_pair_count")?,
        golden_row_count: count("golden_row_count")?,
        malformed_field_count: count("malformed_field_count")?,
        degraded_field_count: count("degraded_field_count")?,
        error_message: row.get("error_message")?,
    })
}
