//! `dedup` command-line front end.
//!
//! # Responsibility
//! - Parse arguments, open the store and configuration, call the pipeline.
//! - Map failures to stable exit codes.

mod input;

use clap::{Parser, Subcommand};
use dedup_core::freshness::{fingerprint_file, SourceFingerprint};
use dedup_core::{
    default_log_level, init_logging, open_db, DedupPipeline, EvaluationReport, PipelineConfig,
    PipelineError, RefreshOutcome,
};
use log::error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const EXIT_ERROR: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_CONSISTENCY: u8 = 3;

#[derive(Parser)]
#[command(name = "dedup", version, about = "Record deduplication and golden-record builder")]
struct Cli {
    /// SQLite store path.
    #[arg(long, global = true, env = "DEDUP_DB", default_value = "dedup.sqlite")]
    db: PathBuf,

    /// Pipeline configuration (JSON).
    #[arg(long, global = true, env = "DEDUP_CONFIG", default_value = "dedup.json")]
    config: PathBuf,

    /// Directory for rolling log files; logging is off when omitted.
    #[arg(long, global = true, env = "DEDUP_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, global = true, env = "DEDUP_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load one source file, replacing that source's rows in the dataset.
    Ingest {
        #[arg(long)]
        dataset: String,
        /// Source tag as declared in the configuration.
        #[arg(long)]
        source: String,
        #[arg(long, short = 'f')]
        file: PathBuf,
        #[arg(long, default_value = ";")]
        delimiter: char,
        /// Re-read the file even when it looks unchanged.
        #[arg(long)]
        force: bool,
    },
    /// Store the external matcher's scored pairs.
    ImportPairs {
        #[arg(long)]
        dataset: String,
        #[arg(long, short = 'f')]
        file: PathBuf,
        #[arg(long, default_value = ";")]
        delimiter: char,
    },
    /// Store curated reference duplicates for evaluation.
    LoadReference {
        #[arg(long)]
        dataset: String,
        #[arg(long, short = 'f')]
        file: PathBuf,
        #[arg(long, default_value = ";")]
        delimiter: char,
    },
    /// Rebuild normalized records when raw data or configuration changed.
    Normalize {
        #[arg(long)]
        dataset: String,
        #[arg(long)]
        force: bool,
    },
    /// Cluster stored pairs and rewrite the golden-record table.
    Resolve {
        #[arg(long)]
        dataset: String,
        /// Force normalization before resolving.
        #[arg(long)]
        force: bool,
    },
    /// Compare stored pairs with reference duplicates.
    Evaluate {
        #[arg(long)]
        dataset: String,
        /// Threshold to evaluate at; repeat for a sweep.
        #[arg(long = "threshold")]
        thresholds: Vec<f64>,
    },
    /// Show table counts, freshness and recent runs.
    Status {
        #[arg(long)]
        dataset: String,
    },
}

enum CliError {
    Usage(String),
    Pipeline(PipelineError),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) | Self::Pipeline(PipelineError::Config(_)) => EXIT_USAGE,
            Self::Pipeline(PipelineError::UnknownSource(_)) => EXIT_USAGE,
            Self::Pipeline(PipelineError::Consistency(_)) => EXIT_CONSISTENCY,
            Self::Pipeline(PipelineError::Storage(_)) => EXIT_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Usage(message) => message.clone(),
            Self::Pipeline(err) => err.to_string(),
        }
    }
}

impl From<PipelineError> for CliError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_exit module=cli status=error error={}", err.message());
            eprintln!("error: {}", err.message());
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Some(dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        let dir = absolute(dir)?;
        init_logging(level, &dir.to_string_lossy()).map_err(CliError::Usage)?;
    }

    let config = PipelineConfig::load(&cli.config).map_err(PipelineError::from)?;
    let conn = open_db(&cli.db)
        .map_err(|err| PipelineError::Storage(err.into()))?;
    let pipeline = DedupPipeline::new(&conn, &config)?;

    match cli.command {
        Commands::Ingest {
            dataset,
            source,
            file,
            delimiter,
            force,
        } => {
            let fingerprint = ingest_fingerprint(&file, delimiter)?;
            if !force && pipeline.source_is_current(&dataset, &source, &fingerprint)? {
                println!("{dataset}/{source}: unchanged, skipped (use --force to reload)");
                return Ok(());
            }
            let rows = input::read_source_rows(&file, delimiter_byte(delimiter)?)
                .map_err(CliError::Usage)?;
            let report = pipeline.ingest(&dataset, &source, &rows, Some(&fingerprint))?;
            let summary = report.summary;
            println!(
                "{dataset}/{source}: {} rows (inserted {}, updated {}, unchanged {}, removed {}, rejected {})",
                summary.total(),
                summary.inserted,
                summary.updated,
                summary.unchanged,
                summary.removed,
                report.rejected_rows
            );
            if report.duplicate_rows > 0 {
                println!("warning: {} rows repeat an earlier id and were skipped", report.duplicate_rows);
            }
            if report.unparsed_timestamps > 0 {
                println!("warning: {} unreadable update timestamps", report.unparsed_timestamps);
            }
        }
        Commands::ImportPairs {
            dataset,
            file,
            delimiter,
        } => {
            let pairs = input::read_candidate_pairs(&file, delimiter_byte(delimiter)?)
                .map_err(CliError::Usage)?;
            let stored = pipeline.import_pairs(&dataset, &pairs)?;
            println!("{dataset}: stored {stored} candidate pairs");
        }
        Commands::LoadReference {
            dataset,
            file,
            delimiter,
        } => {
            let pairs = input::read_reference_pairs(&file, delimiter_byte(delimiter)?)
                .map_err(CliError::Usage)?;
            let stored = pipeline.load_reference(&dataset, &pairs)?;
            println!("{dataset}: stored {stored} reference pairs");
        }
        Commands::Normalize { dataset, force } => {
            match pipeline.refresh_normalized(&dataset, force)? {
                RefreshOutcome::Fresh { record_count } => {
                    println!("{dataset}: {record_count} normalized records are up to date");
                }
                RefreshOutcome::Rebuilt {
                    record_count,
                    stats,
                    ..
                } => {
                    println!(
                        "{dataset}: normalized {record_count} records ({} malformed, {} degraded fields)",
                        stats.malformed_fields, stats.degraded_fields
                    );
                    for (key, changed) in &stats.changed_by_key {
                        println!("  {key}: {changed} values changed");
                    }
                }
            }
        }
        Commands::Resolve { dataset, force } => {
            let report = pipeline.resolve(&dataset, force)?;
            println!(
                "{dataset}: {} records in {} clusters ({} with duplicates), {} of {} pairs accepted, {} golden rows",
                report.record_count,
                report.cluster_count,
                report.multi_member_clusters,
                report.accepted_pairs,
                report.accepted_pairs + report.rejected_pairs,
                report.golden_rows
            );
            if report.malformed_fields + report.degraded_fields > 0 {
                println!(
                    "fields: {} malformed, {} degraded",
                    report.malformed_fields, report.degraded_fields
                );
            }
            println!("run {}", report.run_id);
        }
        Commands::Evaluate {
            dataset,
            thresholds,
        } => {
            for report in pipeline.evaluate(&dataset, &thresholds)? {
                print_evaluation(&report);
            }
        }
        Commands::Status { dataset } => {
            let status = pipeline.status(&dataset)?;
            let stats = status.statistics;
            println!("dataset        {dataset}");
            println!("raw records    {}", stats.raw_records);
            println!("normalized     {}", stats.normalized_records);
            println!("pairs          {}", stats.candidate_pairs);
            println!("references     {}", stats.reference_pairs);
            println!(
                "golden rows    {} ({} clusters)",
                stats.golden_records, stats.clusters
            );
            match status.normalized_stamp {
                Some(stamp) => println!("normalized at  {}", format_epoch_ms(stamp.generated_at)),
                None => println!("normalized at  never"),
            }
            for run in status.recent_runs {
                println!(
                    "{} {:<9} {:<7} records={} {}",
                    format_epoch_ms(run.started_at),
                    run.stage.as_str(),
                    run.status.as_str(),
                    run.record_count,
                    run.error_message.unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn print_evaluation(report: &EvaluationReport) {
    let m = &report.matrix;
    println!("threshold {:.2}", report.threshold);
    println!(
        "  tp={} fp={} tn={} fn={} (unscored references: {})",
        m.true_positive,
        m.false_positive,
        m.true_negative,
        m.false_negative,
        report.unscored_reference_pairs
    );
    println!(
        "  precision {:.1}%  recall {:.1}%  f1 {:.1}%  accuracy {:.1}%",
        report.precision * 100.0,
        report.recall * 100.0,
        report.f1 * 100.0,
        report.accuracy * 100.0
    );
    println!(
        "  specificity {:.1}%  fpr {:.1}%  fnr {:.1}%",
        report.specificity * 100.0,
        report.false_positive_rate * 100.0,
        report.false_negative_rate * 100.0
    );
}

/// File fingerprint bound to the delimiter it is read with.
fn ingest_fingerprint(file: &Path, delimiter: char) -> Result<SourceFingerprint, CliError> {
    fingerprint_file(file)
        .map(|fingerprint| fingerprint.with_context(&format!("delimiter={delimiter}")))
        .map_err(|err| CliError::Usage(format!("{}: {err}", file.display())))
}

fn delimiter_byte(delimiter: char) -> Result<u8, CliError> {
    u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| CliError::Usage(format!("delimiter `{delimiter}` must be ASCII")))
}

fn absolute(path: &Path) -> Result<PathBuf, CliError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| CliError::Usage(format!("cannot resolve `{}`: {err}", path.display())))
}

fn format_epoch_ms(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::{delimiter_byte, format_epoch_ms, ingest_fingerprint, run, Cli};
    use clap::Parser;
    use dedup_core::open_db;
    use dedup_core::repo::raw_repo::{RawRecordRepository, SqliteRawRecordRepository};
    use std::path::Path;

    const CONFIG_JSON: &str = r#"{
        "threshold": 0.8,
        "sources": [
            {
                "source_tag": "crm",
                "id_field": "ID",
                "fields": [{ "source": "NAME", "role": "name" }]
            }
        ]
    }"#;

    fn ingest_cli(dir: &Path, delimiter: &str) -> Cli {
        let path = |name: &str| dir.join(name).to_string_lossy().into_owned();
        Cli::try_parse_from([
            "dedup".to_string(),
            "--db".to_string(),
            path("dedup.sqlite"),
            "--config".to_string(),
            path("dedup.json"),
            "ingest".to_string(),
            "--dataset".to_string(),
            "ds".to_string(),
            "--source".to_string(),
            "crm".to_string(),
            "-f".to_string(),
            path("crm.csv"),
            "--delimiter".to_string(),
            delimiter.to_string(),
        ])
        .unwrap()
    }

    #[test]
    fn reingest_with_other_delimiter_is_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dedup.json"), CONFIG_JSON).unwrap();
        std::fs::write(dir.path().join("crm.csv"), "ID;NAME\n1;Meier\n2;Schulz\n").unwrap();

        assert!(run(ingest_cli(dir.path(), ",")).is_ok());
        assert!(run(ingest_cli(dir.path(), ";")).is_ok());

        let conn = open_db(dir.path().join("dedup.sqlite")).unwrap();
        let raw = SqliteRawRecordRepository::try_new(&conn).unwrap();
        assert_eq!(raw.count_records("ds").unwrap(), 2);
    }

    #[test]
    fn ingest_fingerprint_depends_on_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("crm.csv");
        std::fs::write(&file, "ID;NAME\n1;Meier\n").unwrap();
        let semicolon = ingest_fingerprint(&file, ';').ok().unwrap();
        let comma = ingest_fingerprint(&file, ',').ok().unwrap();
        assert_ne!(semicolon, comma);
        assert!(ingest_fingerprint(&dir.path().join("missing.csv"), ';').is_err());
    }

    #[test]
    fn delimiters_must_be_ascii() {
        assert_eq!(delimiter_byte(';').ok(), Some(b';'));
        assert!(delimiter_byte('§').is_err());
    }

    #[test]
    fn epoch_formatting() {
        assert_eq!(format_epoch_ms(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn evaluate_accepts_repeated_thresholds() {
        let cli = Cli::try_parse_from([
            "dedup",
            "--db",
            "x.sqlite",
            "evaluate",
            "--dataset",
            "customers",
            "--threshold",
            "0.7",
            "--threshold",
            "0.9",
        ])
        .unwrap();
        match cli.command {
            super::Commands::Evaluate { thresholds, .. } => assert_eq!(thresholds, vec![0.7, 0.9]),
            _ => panic!("expected evaluate"),
        }
    }
}
