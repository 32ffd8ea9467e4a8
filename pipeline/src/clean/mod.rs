//! Cleaning & derivation of the per-jurisdiction analysis table.
//!
//! Stages run in a fixed order, each assuming the invariants of the previous:
//!
//! ```text
//! raw rows ─▶ parse dates ─▶ drop missing dates ─▶ drop end < start
//!          ─▶ drop non-competitive methods ─▶ duration_days ─▶ bid counts
//! ```
//!
//! Every drop is counted so that `rows_loaded == dropped + rows_final` holds
//! for each run.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::logs::{log_info, log_info_indent, log_success, log_warning};
use crate::models::{AnalysisReadyRecord, TenderRecord};
use crate::parser::TableRow;

// =============================================================================
// Configuration
// =============================================================================

/// Settings of the cleaning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningConfig {
    /// Competitive procurement methods kept for analysis (exact match).
    #[serde(default = "default_accepted_methods")]
    pub accepted_methods: Vec<String>,
}

fn default_accepted_methods() -> Vec<String> {
    vec!["open".to_string(), "selective".to_string()]
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            accepted_methods: default_accepted_methods(),
        }
    }
}

impl CleaningConfig {
    pub fn accepts(&self, method: &str) -> bool {
        self.accepted_methods.iter().any(|m| m == method)
    }
}

// =============================================================================
// Timestamps
// =============================================================================

const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const OFFSET_LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Parse a published timestamp; `None` when it cannot be read.
///
/// Timestamps with an offset are normalised to UTC. A bare date is midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for layout in OFFSET_LAYOUTS {
        if let Ok(dt) = DateTime::parse_from_str(raw, layout) {
            return Some(dt.naive_utc());
        }
    }
    for layout in NAIVE_LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// =============================================================================
// Report
// =============================================================================

/// Row accounting of one cleaning run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub rows_loaded: usize,
    /// Non-empty date values that could not be parsed (part of the missing-date drop).
    pub unparseable_dates: usize,
    pub dropped_missing_dates: usize,
    pub dropped_non_chronological: usize,
    pub dropped_non_competitive: usize,
    pub rows_final: usize,
    pub columns: usize,
}

impl CleaningReport {
    pub fn dropped_total(&self) -> usize {
        self.dropped_missing_dates + self.dropped_non_chronological + self.dropped_non_competitive
    }

    /// `rows_loaded == dropped + rows_final`
    pub fn is_balanced(&self) -> bool {
        self.rows_loaded == self.dropped_total() + self.rows_final
    }

    /// Emit the stage-boundary diagnostics.
    pub fn log(&self, label: &str) {
        log_info(format!("🧹 Cleaning {}: {} rows loaded", label, self.rows_loaded));
        if self.unparseable_dates > 0 {
            log_warning(format!("{} date values could not be parsed", self.unparseable_dates));
        }
        log_info_indent(format!("-> {} rows removed: missing dates", self.dropped_missing_dates), 1);
        log_info_indent(
            format!("-> {} rows removed: end date before publication", self.dropped_non_chronological),
            1,
        );
        log_info_indent(
            format!("-> {} rows removed: non-competitive procedure", self.dropped_non_competitive),
            1,
        );
        log_success(format!(
            "Analysis-ready table: {} rows x {} columns",
            self.rows_final, self.columns
        ));
    }
}

/// Cleaned rows plus their accounting.
#[derive(Debug, Clone)]
pub struct CleaningOutcome {
    pub records: Vec<AnalysisReadyRecord>,
    pub report: CleaningReport,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Run all cleaning stages over an in-memory raw table.
pub fn clean_records(raw: &[TenderRecord], config: &CleaningConfig) -> CleaningOutcome {
    let mut report = CleaningReport {
        rows_loaded: raw.len(),
        columns: AnalysisReadyRecord::COLUMNS.len(),
        ..Default::default()
    };

    // 1. Parse dates, unparseable values become missing
    let mut parse = |value: &Option<String>| -> Option<NaiveDateTime> {
        let text = value.as_deref()?;
        let parsed = parse_timestamp(text);
        if parsed.is_none() && !text.trim().is_empty() {
            report.unparseable_dates += 1;
        }
        parsed
    };
    let parsed: Vec<_> = raw
        .iter()
        .map(|r| (r, parse(&r.publication_date), parse(&r.end_date)))
        .collect();

    // 2. Both dates required
    let dated: Vec<_> = parsed
        .into_iter()
        .filter_map(|(r, start, end)| Some((r, start?, end?)))
        .collect();
    report.dropped_missing_dates = raw.len() - dated.len();

    // 3. Chronological order
    let before = dated.len();
    let ordered: Vec<_> = dated.into_iter().filter(|(_, start, end)| end >= start).collect();
    report.dropped_non_chronological = before - ordered.len();

    // 4. Competitive procedures only
    let before = ordered.len();
    let competitive: Vec<_> = ordered
        .into_iter()
        .filter_map(|(r, start, end)| {
            let method = r.procurement_method.as_deref()?;
            config.accepts(method).then(|| (r, start, end, method.to_string()))
        })
        .collect();
    report.dropped_non_competitive = before - competitive.len();

    // 5 + 6. Duration and bid counts (no statistics block means zero bids)
    let records: Vec<AnalysisReadyRecord> = competitive
        .into_iter()
        .map(|(r, start, end, method)| AnalysisReadyRecord {
            tender_id: r.tender_id.clone(),
            publication_date: start,
            end_date: end,
            total_bids: r.total_bids.unwrap_or(0),
            sme_bids: r.sme_bids.unwrap_or(0),
            tender_value: r.tender_value,
            procurement_method: method,
            procurement_category: r.procurement_category.clone(),
            award_criteria: r.award_criteria.clone(),
            year: r.year,
            duration_days: (end - start).num_days(),
        })
        .collect();
    report.rows_final = records.len();

    CleaningOutcome { records, report }
}
