//! JSON notice extraction.
//!
//! Each line of a notice file is one standalone JSON object. Nested fields
//! are read with JSON pointers so a missing path yields a missing value
//! instead of rejecting the notice.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value;

use super::{Extraction, MalformedPolicy};
use crate::error::{ExtractError, ExtractResult};
use crate::models::TenderRecord;
use crate::parser::table::parse_count;

/// Bid statistic measure holding the total number of (electronic) bids.
pub const TOTAL_BIDS_MEASURE: &str = "electronicBids";
/// Bid statistic measure holding the number of SME bids.
pub const SME_BIDS_MEASURE: &str = "smeBids";

/// Map one notice object to a flat record.
pub fn extract_notice(notice: &Value, year: i32) -> TenderRecord {
    TenderRecord {
        tender_id: text_at(notice, "/tender/id"),
        publication_date: text_at(notice, "/date"),
        end_date: text_at(notice, "/tender/tenderPeriod/endDate"),
        total_bids: bid_statistic(notice, TOTAL_BIDS_MEASURE),
        sme_bids: bid_statistic(notice, SME_BIDS_MEASURE),
        tender_value: notice.pointer("/tender/value/amount").and_then(number_value),
        procurement_method: text_at(notice, "/tender/procurementMethod"),
        procurement_category: text_at(notice, "/tender/mainProcurementCategory"),
        award_criteria: text_at(notice, "/tender/awardCriteria"),
        year,
    }
}

/// Value of the first `bids.statistics` entry with the given measure.
///
/// Later entries with the same measure are ignored, they are never summed.
fn bid_statistic(notice: &Value, measure: &str) -> Option<i64> {
    notice
        .pointer("/bids/statistics")?
        .as_array()?
        .iter()
        .find(|stat| stat.get("measure").and_then(Value::as_str) == Some(measure))?
        .get("value")
        .and_then(count_value)
}

fn text_at(notice: &Value, pointer: &str) -> Option<String> {
    match notice.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(|f| parse_count(&f.to_string()))),
        Value::String(s) => parse_count(s),
        _ => None,
    }
}

/// Extract notices from a line reader. Blank lines are ignored.
pub fn extract_notices<R: BufRead>(
    reader: R,
    file: &str,
    year: i32,
    policy: MalformedPolicy,
) -> ExtractResult<Extraction> {
    let mut extraction = Extraction::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ExtractError::Io {
            path: file.into(),
            source: e,
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed = match serde_json::from_str::<Value>(&line) {
            Ok(value) if value.is_object() => Ok(value),
            Ok(_) => Err("not a JSON object".to_string()),
            Err(e) => Err(e.to_string()),
        };

        match (parsed, policy) {
            (Ok(notice), _) => extraction.records.push(extract_notice(&notice, year)),
            (Err(_), MalformedPolicy::SkipAndCount) => extraction.skipped += 1,
            (Err(message), MalformedPolicy::FailFast) => {
                return Err(ExtractError::MalformedNotice {
                    file: file.to_string(),
                    line: idx + 1,
                    message,
                });
            }
        }
    }

    Ok(extraction)
}

/// Extract every notice of a `.jsonl` file.
pub fn extract_notice_file(path: &Path, year: i32, policy: MalformedPolicy) -> ExtractResult<Extraction> {
    let file = File::open(path).map_err(|e| ExtractError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    extract_notices(BufReader::new(file), &name, year, policy)
}
