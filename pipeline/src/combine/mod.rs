//! Cross-country combination and the regression-variable stage.
//!
//! The three analysis-ready tables are tagged with their jurisdiction and
//! stacked, then one [`AnalysisVariant`] is applied:
//!
//! ```text
//! union ─▶ outlier policy ─▶ [duration > 0] ─▶ winsorize duration ─▶ z_duration
//!       ─▶ value transform (+ z_value) ─▶ sme_share
//! ```
//!
//! Duration statistics are taken before the value transform drops rows, and
//! every statistic is recomputed from the current sample on each run.

pub mod stats;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CombineError, CombineResult};
use crate::logs::{log_info, log_info_indent, log_success};
use crate::models::{AnalysisReadyRecord, Country, Field, RegressionReadyRecord};
use crate::parser::read_table_file;

// =============================================================================
// Variant configuration
// =============================================================================

/// Count column an outlier policy looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountColumn {
    TotalBids,
    SmeBids,
}

impl CountColumn {
    fn of(&self, record: &AnalysisReadyRecord) -> i64 {
        match self {
            Self::TotalBids => record.total_bids,
            Self::SmeBids => record.sme_bids,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TotalBids => "total_bids",
            Self::SmeBids => "sme_bids",
        }
    }
}

/// How implausible bid counts are removed. Exactly one per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OutlierPolicy {
    /// Drop rows whose count equals a placeholder value.
    Sentinel { column: CountColumn, value: i64 },
    /// Keep only rows whose count is strictly below the ceiling.
    Ceiling { column: CountColumn, limit: i64 },
}

impl OutlierPolicy {
    pub fn keeps(&self, record: &AnalysisReadyRecord) -> bool {
        match self {
            Self::Sentinel { column, value } => column.of(record) != *value,
            Self::Ceiling { column, limit } => column.of(record) < *limit,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Sentinel { column, value } => format!("{} == {}", column.name(), value),
            Self::Ceiling { column, limit } => format!("{} >= {}", column.name(), limit),
        }
    }
}

/// Transform of the monetary value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTransform {
    /// No value variables.
    #[default]
    Disabled,
    /// Drop rows without a strictly positive value, then `ln`.
    LogPositive,
    /// `ln(1 + x)` for `x >= 0`; no rows dropped.
    Log1p,
}

/// One analysis variant: outlier policy, duration handling and value transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisVariant {
    pub outlier: OutlierPolicy,
    #[serde(default)]
    pub require_positive_duration: bool,
    #[serde(default = "default_winsorize_percentile")]
    pub winsorize_percentile: f64,
    #[serde(default)]
    pub value_transform: ValueTransform,
}

fn default_winsorize_percentile() -> f64 {
    0.99
}

impl Default for AnalysisVariant {
    fn default() -> Self {
        Self {
            outlier: OutlierPolicy::Sentinel {
                column: CountColumn::TotalBids,
                value: 999,
            },
            require_positive_duration: false,
            winsorize_percentile: default_winsorize_percentile(),
            value_transform: ValueTransform::Disabled,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Rows of one jurisdiction before and after the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountryCounts {
    pub country: Country,
    pub before: usize,
    pub after: usize,
}

/// Rows removed by one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDrop {
    pub step: String,
    pub dropped: usize,
}

/// Accounting and sample statistics of one combination run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CombineReport {
    pub rows_combined: usize,
    pub steps: Vec<StepDrop>,
    pub countries: Vec<CountryCounts>,
    pub rows_final: usize,
    pub duration_cap: f64,
    pub duration_mean: Option<f64>,
    pub duration_std: Option<f64>,
    pub value_mean: Option<f64>,
    pub value_std: Option<f64>,
}

impl CombineReport {
    pub fn dropped(&self, step: &str) -> usize {
        self.steps.iter().filter(|s| s.step == step).map(|s| s.dropped).sum()
    }

    pub fn log(&self) {
        log_info(format!("🔗 Combined sample: {} rows", self.rows_combined));
        for step in &self.steps {
            log_info_indent(format!("-> {} rows removed: {}", step.dropped, step.step), 1);
        }
        log_info_indent(
            format!("-> duration capped at {:.0} days (winsorized)", self.duration_cap),
            1,
        );
        for c in &self.countries {
            log_info_indent(format!("{}: {} -> {} rows", c.country, c.before, c.after), 1);
        }
        log_success(format!("Regression-ready sample: {} rows", self.rows_final));
    }
}

/// Regression-ready rows plus their accounting.
#[derive(Debug, Clone)]
pub struct CombinedSample {
    pub records: Vec<RegressionReadyRecord>,
    pub report: CombineReport,
}

// =============================================================================
// Stage
// =============================================================================

/// Clip every value above `cap`.
pub fn clip_upper(values: &[f64], cap: f64) -> Vec<f64> {
    values.iter().map(|v| v.min(cap)).collect()
}

/// z-score of `value` against the sample statistics; `None` when undefined.
fn z_score(value: f64, mean: Option<f64>, std: Option<f64>) -> Option<f64> {
    match (mean, std) {
        (Some(m), Some(s)) if s > 0.0 => Some((value - m) / s),
        _ => None,
    }
}

/// `sme_bids / total_bids` clipped into [0, 1]; undefined without bids.
pub fn sme_share(sme_bids: i64, total_bids: i64) -> Option<f64> {
    (total_bids > 0).then(|| (sme_bids as f64 / total_bids as f64).clamp(0.0, 1.0))
}

fn retain_step(
    records: &mut Vec<RegressionReadyRecord>,
    report: &mut CombineReport,
    step: impl Into<String>,
    keep: impl Fn(&RegressionReadyRecord) -> bool,
) {
    let before = records.len();
    records.retain(|r| keep(r));
    report.steps.push(StepDrop {
        step: step.into(),
        dropped: before - records.len(),
    });
}

/// Stack the jurisdiction tables and derive the regression variables.
pub fn combine(
    tables: Vec<(Country, Vec<AnalysisReadyRecord>)>,
    variant: &AnalysisVariant,
) -> CombineResult<CombinedSample> {
    let mut report = CombineReport::default();

    let before: BTreeMap<Country, usize> = tables.iter().map(|(c, rows)| (*c, rows.len())).collect();
    let mut records: Vec<RegressionReadyRecord> = tables
        .into_iter()
        .flat_map(|(country, rows)| rows.into_iter().map(move |r| RegressionReadyRecord::tagged(country, r)))
        .collect();
    report.rows_combined = records.len();

    retain_step(&mut records, &mut report, format!("outlier {}", variant.outlier.describe()), |r| {
        variant.outlier.keeps(&r.tender)
    });
    if variant.require_positive_duration {
        retain_step(&mut records, &mut report, "duration_days <= 0", |r| r.tender.duration_days > 0);
    }

    // Winsorize and standardize duration
    let durations: Vec<f64> = records.iter().map(|r| r.tender.duration_days as f64).collect();
    let cap = stats::quantile(&durations, variant.winsorize_percentile).ok_or_else(|| CombineError::EmptySample {
        step: "outlier filtering".to_string(),
    })?;
    let capped = clip_upper(&durations, cap);
    let (d_mean, d_std) = (stats::mean(&capped), stats::sample_std(&capped));
    for (record, value) in records.iter_mut().zip(&capped) {
        record.duration_days_capped = *value;
        record.z_duration = z_score(*value, d_mean, d_std);
    }
    report.duration_cap = cap;
    report.duration_mean = d_mean;
    report.duration_std = d_std;

    // Value transform
    match variant.value_transform {
        ValueTransform::Disabled => {}
        ValueTransform::LogPositive => {
            retain_step(&mut records, &mut report, "tender_value not positive", |r| {
                r.tender.tender_value.map(|v| v > 0.0).unwrap_or(false)
            });
            for record in records.iter_mut() {
                record.log_tender_value = record.tender.tender_value.map(f64::ln);
            }
        }
        ValueTransform::Log1p => {
            for record in records.iter_mut() {
                record.log_tender_value = record.tender.tender_value.filter(|v| *v >= 0.0).map(f64::ln_1p);
            }
        }
    }
    if variant.value_transform != ValueTransform::Disabled {
        let logs: Vec<f64> = records.iter().filter_map(|r| r.log_tender_value).collect();
        let (v_mean, v_std) = (stats::mean(&logs), stats::sample_std(&logs));
        for record in records.iter_mut() {
            record.z_value = record.log_tender_value.and_then(|v| z_score(v, v_mean, v_std));
        }
        report.value_mean = v_mean;
        report.value_std = v_std;
    }

    for record in records.iter_mut() {
        record.sme_share = sme_share(record.tender.sme_bids, record.tender.total_bids);
    }

    let mut after: BTreeMap<Country, usize> = BTreeMap::new();
    for record in &records {
        *after.entry(record.country).or_default() += 1;
    }
    report.countries = before
        .iter()
        .map(|(country, n)| CountryCounts {
            country: *country,
            before: *n,
            after: after.get(country).copied().unwrap_or(0),
        })
        .collect();
    report.rows_final = records.len();

    Ok(CombinedSample { records, report })
}

/// Rows with a value in every `required` field.
pub fn listwise_delete(records: &[RegressionReadyRecord], required: &[Field]) -> Vec<RegressionReadyRecord> {
    records
        .iter()
        .filter(|r| required.iter().all(|f| r.value(*f).is_some()))
        .cloned()
        .collect()
}

/// Load the analysis-ready table of every jurisdiction; a missing file is fatal.
pub fn load_analysis_tables(
    paths: &[(Country, PathBuf)],
) -> CombineResult<Vec<(Country, Vec<AnalysisReadyRecord>)>> {
    paths
        .iter()
        .map(|(country, path)| {
            if !path.is_file() {
                return Err(CombineError::MissingInput(path.clone()));
            }
            let rows: Vec<AnalysisReadyRecord> = read_table_file(path)?;
            log_info_indent(format!("{}: {} analysis-ready rows", country, rows.len()), 1);
            Ok((*country, rows))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(duration: i64, total: i64, sme: i64, value: Option<f64>) -> AnalysisReadyRecord {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        AnalysisReadyRecord {
            tender_id: None,
            publication_date: start,
            end_date: start + chrono::Duration::days(duration),
            total_bids: total,
            sme_bids: sme,
            tender_value: value,
            procurement_method: "open".into(),
            procurement_category: Some("services".into()),
            award_criteria: None,
            year: 2021,
            duration_days: duration,
        }
    }

    fn rows(n: usize) -> Vec<AnalysisReadyRecord> {
        (0..n).map(|i| row(10 + (i % 40) as i64, 2, 1, Some(1000.0 + i as f64))).collect()
    }

    #[test]
    fn test_union_of_three_tables() {
        let tables = vec![
            (Country::Germany, rows(100)),
            (Country::France, rows(50)),
            (Country::Estonia, rows(25)),
        ];
        let sample = combine(tables, &AnalysisVariant::default()).unwrap();

        assert_eq!(sample.report.rows_combined, 175);
        assert_eq!(sample.report.rows_final, 175);
        let france = sample.report.countries.iter().find(|c| c.country == Country::France).unwrap();
        assert_eq!((france.before, france.after), (50, 50));
    }

    #[test]
    fn test_sentinel_drops_exact_placeholder_only() {
        let tables = vec![(Country::Estonia, vec![row(5, 999, 0, None), row(5, 1000, 0, None), row(6, 3, 1, None)])];
        let sample = combine(tables, &AnalysisVariant::default()).unwrap();

        assert_eq!(sample.records.len(), 2);
        assert!(sample.records.iter().all(|r| r.tender.total_bids != 999));
    }

    #[test]
    fn test_ceiling_keeps_strictly_below() {
        let variant = AnalysisVariant {
            outlier: OutlierPolicy::Ceiling {
                column: CountColumn::TotalBids,
                limit: 100,
            },
            ..Default::default()
        };
        let tables = vec![(Country::Estonia, vec![row(5, 99, 0, None), row(5, 100, 0, None), row(5, 250, 0, None)])];
        let sample = combine(tables, &variant).unwrap();

        assert_eq!(sample.records.len(), 1);
        assert_eq!(sample.report.steps[0].dropped, 2);
    }

    #[test]
    fn test_sme_sentinel_uses_sme_column() {
        let variant = AnalysisVariant {
            outlier: OutlierPolicy::Sentinel {
                column: CountColumn::SmeBids,
                value: 999,
            },
            ..Default::default()
        };
        let tables = vec![(Country::France, vec![row(5, 999, 2, None), row(5, 1000, 999, None)])];
        let sample = combine(tables, &variant).unwrap();

        assert_eq!(sample.records.len(), 1);
        assert_eq!(sample.records[0].tender.total_bids, 999);
    }

    #[test]
    fn test_winsorization_clips_but_keeps_rows() {
        let mut table: Vec<_> = (1..=99).map(|d| row(d, 1, 0, None)).collect();
        table.push(row(5000, 1, 0, None));
        let sample = combine(vec![(Country::Germany, table)], &AnalysisVariant::default()).unwrap();

        assert_eq!(sample.records.len(), 100);
        let cap = sample.report.duration_cap;
        assert!(cap < 5000.0);
        assert!(sample.records.iter().all(|r| r.duration_days_capped <= cap));
        assert_eq!(sample.records[99].tender.duration_days, 5000);
    }

    #[test]
    fn test_clip_is_idempotent() {
        let values = [1.0, 7.0, 3.0, 250.0, 12.0];
        let cap = stats::quantile(&values, 0.99).unwrap();
        let once = clip_upper(&values, cap);
        assert_eq!(clip_upper(&once, cap), once);
    }

    #[test]
    fn test_z_duration_is_standardized() {
        let table: Vec<_> = (1..=20).map(|d| row(d, 1, 0, None)).collect();
        let sample = combine(vec![(Country::Estonia, table)], &AnalysisVariant::default()).unwrap();

        let z: Vec<f64> = sample.records.iter().filter_map(|r| r.z_duration).collect();
        assert_eq!(z.len(), 20);
        assert!(stats::mean(&z).unwrap().abs() < 1e-9);
        assert!((stats::sample_std(&z).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sme_share_undefined_without_bids() {
        let tables = vec![(Country::Estonia, vec![row(5, 0, 0, None), row(5, 4, 1, None), row(5, 2, 3, None)])];
        let sample = combine(tables, &AnalysisVariant::default()).unwrap();

        assert_eq!(sample.records[0].sme_share, None);
        assert_eq!(sample.records[1].sme_share, Some(0.25));
        assert_eq!(sample.records[2].sme_share, Some(1.0));
        for r in &sample.records {
            assert_eq!(r.sme_share.is_none(), r.tender.total_bids == 0);
        }
    }

    #[test]
    fn test_log_positive_drops_non_positive_values() {
        let variant = AnalysisVariant {
            require_positive_duration: true,
            value_transform: ValueTransform::LogPositive,
            ..Default::default()
        };
        let table = vec![
            row(0, 1, 0, Some(500.0)),
            row(3, 1, 0, Some(0.0)),
            row(4, 1, 0, None),
            row(5, 1, 0, Some(100.0)),
            row(6, 1, 0, Some(10000.0)),
        ];
        let sample = combine(vec![(Country::France, table)], &variant).unwrap();

        assert_eq!(sample.records.len(), 2);
        assert_eq!(sample.report.dropped("duration_days <= 0"), 1);
        assert_eq!(sample.report.dropped("tender_value not positive"), 2);
        assert!((sample.records[0].log_tender_value.unwrap() - 100f64.ln()).abs() < 1e-12);
        assert!(sample.records.iter().all(|r| r.z_value.is_some()));
        // Duration statistics were taken before the value filter
        let durations = [3.0, 4.0, 5.0, 6.0];
        let cap = stats::quantile(&durations, variant.winsorize_percentile).unwrap();
        let expected = stats::mean(&clip_upper(&durations, cap)).unwrap();
        assert_eq!(sample.report.duration_cap, cap);
        assert!((sample.report.duration_mean.unwrap() - expected).abs() < 1e-12);
        assert!((expected - 4.4925).abs() < 1e-12);
    }

    #[test]
    fn test_log1p_keeps_zero_values() {
        let variant = AnalysisVariant {
            value_transform: ValueTransform::Log1p,
            ..Default::default()
        };
        let table = vec![row(3, 1, 0, Some(0.0)), row(4, 1, 0, None), row(5, 1, 0, Some(99.0))];
        let sample = combine(vec![(Country::Germany, table)], &variant).unwrap();

        assert_eq!(sample.records.len(), 3);
        assert_eq!(sample.records[0].log_tender_value, Some(0.0));
        assert_eq!(sample.records[1].log_tender_value, None);
        assert!((sample.records[2].log_tender_value.unwrap() - 100f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_sample_is_reported() {
        let err = combine(vec![(Country::Estonia, vec![row(5, 999, 0, None)])], &AnalysisVariant::default())
            .unwrap_err();
        assert!(matches!(err, CombineError::EmptySample { .. }));
    }

    #[test]
    fn test_listwise_deletion_per_model_fields() {
        let tables = vec![(Country::Estonia, vec![row(5, 0, 0, Some(10.0)), row(5, 2, 1, None)])];
        let sample = combine(tables, &AnalysisVariant::default()).unwrap();

        assert_eq!(listwise_delete(&sample.records, &[Field::TotalBids, Field::DurationDaysCapped]).len(), 2);
        assert_eq!(listwise_delete(&sample.records, &[Field::SmeShare]).len(), 1);
        assert_eq!(listwise_delete(&sample.records, &[Field::TenderValue, Field::SmeShare]).len(), 0);
    }

    #[test]
    fn test_missing_analysis_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_analysis_tables(&[(Country::Estonia, dir.path().join("estonia_analysis_ready.csv"))])
            .unwrap_err();
        assert!(matches!(err, CombineError::MissingInput(_)));
    }

    #[test]
    fn test_variant_json_shape() {
        let json = r#"{"outlier": {"policy": "ceiling", "column": "total_bids", "limit": 100},
                       "require_positive_duration": true, "value_transform": "log1p"}"#;
        let variant: AnalysisVariant = serde_json::from_str(json).unwrap();

        assert_eq!(variant.winsorize_percentile, 0.99);
        assert_eq!(variant.value_transform, ValueTransform::Log1p);
        assert!(matches!(variant.outlier, OutlierPolicy::Ceiling { limit: 100, .. }));
    }
}
