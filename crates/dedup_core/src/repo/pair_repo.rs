//! Candidate pairs from the external matcher and curated reference pairs.
//!
//! # Invariants
//! - Both tables are replaced wholesale per dataset.
//! - Candidate pairs keep their arrival order; reference pairs are stored
//!   unordered (`record_id_a < record_id_b`) and deduplicated.

use crate::model::pair::{CandidatePair, ReferencePair};
use crate::model::record::RecordId;
use crate::repo::{ensure_store_ready, validate_dataset_name, RepoError, RepoResult};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

pub trait CandidatePairRepository {
    fn replace_pairs(&self, dataset: &str, pairs: &[CandidatePair]) -> RepoResult<usize>;
    /// Pairs in the order they were written.
    fn list_pairs(&self, dataset: &str) -> RepoResult<Vec<CandidatePair>>;
}

pub trait ReferencePairRepository {
    /// Returns the number of distinct non-reflexive pairs stored.
    fn replace_references(&self, dataset: &str, pairs: &[ReferencePair]) -> RepoResult<usize>;
    fn list_references(&self, dataset: &str) -> RepoResult<Vec<ReferencePair>>;
}

pub struct SqlitePairRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePairRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_store_ready(conn, &["candidate_pairs", "reference_pairs"])?;
        Ok(Self { conn })
    }
}

impl CandidatePairRepository for SqlitePairRepository<'_> {
    fn replace_pairs(&self, dataset: &str, pairs: &[CandidatePair]) -> RepoResult<usize> {
        validate_dataset_name(dataset)?;
        if let Some(pair) = pairs
            .iter()
            .find(|pair| !(0.0..=1.0).contains(&pair.match_probability))
        {
            return Err(RepoError::InvalidData(format!(
                "match probability {} for `{}`/`{}` is outside [0, 1]",
                pair.match_probability, pair.record_id_left, pair.record_id_right
            )));
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM candidate_pairs WHERE dataset = ?1;", [dataset])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO candidate_pairs (
                    dataset, pair_index, record_id_left, record_id_right, match_probability
                ) VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for (index, pair) in pairs.iter().enumerate() {
                insert.execute(params![
                    dataset,
                    index as i64,
                    pair.record_id_left.as_str(),
                    pair.record_id_right.as_str(),
                    pair.match_probability,
                ])?;
            }
        }
        tx.commit()?;
        Ok(pairs.len())
    }

    fn list_pairs(&self, dataset: &str) -> RepoResult<Vec<CandidatePair>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id_left, record_id_right, match_probability
             FROM candidate_pairs
             WHERE dataset = ?1
             ORDER BY pair_index ASC;",
        )?;
        let mut rows = stmt.query([dataset])?;
        let mut pairs = Vec::new();
        while let Some(row) = rows.next()? {
            let left: String = row.get(0)?;
            let right: String = row.get(1)?;
            pairs.push(CandidatePair::new(
                parse_record_id(&left)?,
                parse_record_id(&right)?,
                row.get(2)?,
            ));
        }
        Ok(pairs)
    }
}

impl ReferencePairRepository for SqlitePairRepository<'_> {
    fn replace_references(&self, dataset: &str, pairs: &[ReferencePair]) -> RepoResult<usize> {
        validate_dataset_name(dataset)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM reference_pairs WHERE dataset = ?1;", [dataset])?;
        let mut written = 0;
        for pair in pairs {
            let (a, b) = pair.unordered_key();
            if a == b {
                continue;
            }
            written += tx.execute(
                "INSERT OR IGNORE INTO reference_pairs (dataset, record_id_a, record_id_b)
                 VALUES (?1, ?2, ?3);",
                params![dataset, a.as_str(), b.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(written)
    }

    fn list_references(&self, dataset: &str) -> RepoResult<Vec<ReferencePair>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id_a, record_id_b
             FROM reference_pairs
             WHERE dataset = ?1
             ORDER BY record_id_a ASC, record_id_b ASC;",
        )?;
        let mut rows = stmt.query([dataset])?;
        let mut pairs = Vec::new();
        while let Some(row) = rows.next()? {
            let a: String = row.get(0)?;
            let b: String = row.get(1)?;
            pairs.push(ReferencePair::new(parse_record_id(&a)?, parse_record_id(&b)?));
        }
        Ok(pairs)
    }
}

fn parse_record_id(value: &str) -> RepoResult<RecordId> {
    RecordId::parse(value)
        .ok_or_else(|| RepoError::InvalidData(format!("malformed record id `{value}`")))
}
