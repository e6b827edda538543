//! CSV readers for source rows, matcher output and reference pairs.

use dedup_core::{CandidatePair, RecordId, ReferencePair, SourceRow};
use std::fs::File;
use std::path::Path;

const LEFT_COLUMNS: &[&str] = &["record_id_left", "unique_id_l", "id_l"];
const RIGHT_COLUMNS: &[&str] = &["record_id_right", "unique_id_r", "id_r"];
const PROBABILITY_COLUMNS: &[&str] = &["match_probability", "probability"];
const REFERENCE_A_COLUMNS: &[&str] = &["record_id_a", "id_a", "record_id_left"];
const REFERENCE_B_COLUMNS: &[&str] = &["record_id_b", "id_b", "record_id_right"];

fn open_reader(path: &Path, delimiter: u8) -> Result<csv::Reader<File>, String> {
    let file = File::open(path).map_err(|err| format!("{}: {err}", path.display()))?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(file))
}

fn headers(reader: &mut csv::Reader<File>, path: &Path) -> Result<Vec<String>, String> {
    let headers = reader
        .headers()
        .map_err(|err| format!("{}: header row: {err}", path.display()))?;
    Ok(headers
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let name = if index == 0 {
                name.trim_start_matches('\u{feff}')
            } else {
                name
            };
            name.trim().to_string()
        })
        .collect())
}

fn column(headers: &[String], candidates: &[&str], path: &Path) -> Result<usize, String> {
    headers
        .iter()
        .position(|header| {
            candidates
                .iter()
                .any(|candidate| header.eq_ignore_ascii_case(candidate))
        })
        .ok_or_else(|| {
            format!(
                "{}: missing column, expected one of {}",
                path.display(),
                candidates.join("|")
            )
        })
}

/// Reads every row of a source file keyed by header name.
pub fn read_source_rows(path: &Path, delimiter: u8) -> Result<Vec<SourceRow>, String> {
    let mut reader = open_reader(path, delimiter)?;
    let headers = headers(&mut reader, path)?;
    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record =
            result.map_err(|err| format!("{}: row {}: {err}", path.display(), index + 1))?;
        rows.push(
            headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect(),
        );
    }
    Ok(rows)
}

fn record_id(value: &str, path: &Path, row: usize) -> Result<RecordId, String> {
    RecordId::parse(value).ok_or_else(|| {
        format!(
            "{}: row {row}: `{value}` is not a `<source>:<id>` record id",
            path.display()
        )
    })
}

/// Reads matcher output: left id, right id, probability.
pub fn read_candidate_pairs(path: &Path, delimiter: u8) -> Result<Vec<CandidatePair>, String> {
    let mut reader = open_reader(path, delimiter)?;
    let headers = headers(&mut reader, path)?;
    let left = column(&headers, LEFT_COLUMNS, path)?;
    let right = column(&headers, RIGHT_COLUMNS, path)?;
    let probability = column(&headers, PROBABILITY_COLUMNS, path)?;

    let mut pairs = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let row = index + 1;
        let record = result.map_err(|err| format!("{}: row {row}: {err}", path.display()))?;
        let cell = |position: usize| record.get(position).unwrap_or("").trim();
        let value = cell(probability).replace(',', ".");
        let match_probability = value.parse::<f64>().map_err(|err| {
            format!("{}: row {row}: probability `{value}`: {err}", path.display())
        })?;
        pairs.push(CandidatePair::new(
            record_id(cell(left), path, row)?,
            record_id(cell(right), path, row)?,
            match_probability,
        ));
    }
    Ok(pairs)
}

/// Reads curated duplicate pairs.
pub fn read_reference_pairs(path: &Path, delimiter: u8) -> Result<Vec<ReferencePair>, String> {
    let mut reader = open_reader(path, delimiter)?;
    let headers = headers(&mut reader, path)?;
    let a = column(&headers, REFERENCE_A_COLUMNS, path)?;
    let b = column(&headers, REFERENCE_B_COLUMNS, path)?;

    let mut pairs = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let row = index + 1;
        let record = result.map_err(|err| format!("{}: row {row}: {err}", path.display()))?;
        let cell = |position: usize| record.get(position).unwrap_or("").trim();
        pairs.push(ReferencePair::new(
            record_id(cell(a), path, row)?,
            record_id(cell(b), path, row)?,
        ));
    }
    Ok(pairs)
}
