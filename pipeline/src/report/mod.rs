//! Reporting: row accounting, value thresholds, descriptives and LaTeX tables.

use std::fmt::Write as _;
use std::path::Path;

use serde::Serialize;

use crate::combine::stats;
use crate::error::PipelineResult;
use crate::models::{AnalysisReadyRecord, Country, Field, RegressionReadyRecord};
use crate::parser::parse_file_auto;

// =============================================================================
// Row counts
// =============================================================================

/// Raw and analysis-ready rows of one jurisdiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowCount {
    pub country: Country,
    pub raw: usize,
    pub ready: usize,
}

/// Sample reduction from raw to analysis-ready tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowCountReport {
    pub countries: Vec<RowCount>,
}

/// Data rows of a persisted table.
pub fn count_table_rows(path: &Path) -> PipelineResult<usize> {
    Ok(parse_file_auto(path)?.rows.len())
}

/// `12345` as `12,345`.
pub fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

impl RowCountReport {
    pub fn total_raw(&self) -> usize {
        self.countries.iter().map(|c| c.raw).sum()
    }

    pub fn total_ready(&self) -> usize {
        self.countries.iter().map(|c| c.ready).sum()
    }

    /// One-sentence summary of the reduction, per jurisdiction.
    pub fn summary_sentence(&self) -> String {
        let list = |pick: fn(&RowCount) -> usize| -> String {
            self.countries
                .iter()
                .map(|c| format!("{}: {}", c.country, group_thousands(pick(c))))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "These steps reduced the data from {} entries ({}) to {} entries ({}), \
             leaving a clean and relevant sample.",
            group_thousands(self.total_raw()),
            list(|c| c.raw),
            group_thousands(self.total_ready()),
            list(|c| c.ready),
        )
    }

    /// Aligned text table for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<10} {:>12} {:>12}", "Country", "Raw", "Ready");
        for c in &self.countries {
            let _ = writeln!(
                out,
                "{:<10} {:>12} {:>12}",
                c.country.label(),
                group_thousands(c.raw),
                group_thousands(c.ready)
            );
        }
        let _ = writeln!(
            out,
            "{:<10} {:>12} {:>12}",
            "Total",
            group_thousands(self.total_raw()),
            group_thousands(self.total_ready())
        );
        out
    }
}

// =============================================================================
// Tender value thresholds
// =============================================================================

/// Value limits the shares are reported for.
pub const VALUE_THRESHOLDS: [f64; 3] = [25_000.0, 100_000.0, 215_000.0];

/// Where the bulk of the tender values lies relative to EU thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdVerdict {
    /// Median above 200 000.
    AboveEuThresholds,
    /// Median below 50 000.
    MostlyBelowThresholds,
    Mixed,
}

impl ThresholdVerdict {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::AboveEuThresholds => "clearly above-threshold (EU) data",
            Self::MostlyBelowThresholds => "many below-threshold (national) tenders included",
            Self::Mixed => "mixed / grey zone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdShare {
    pub threshold: f64,
    pub count: usize,
    pub share: f64,
}

/// Distribution of strictly positive tender values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueThresholdReport {
    pub observations: usize,
    pub min: f64,
    pub median: f64,
    pub mean: f64,
    pub max: f64,
    pub below: Vec<ThresholdShare>,
    pub verdict: ThresholdVerdict,
}

/// `None` when no strictly positive value exists.
pub fn value_thresholds<'a, I>(records: I) -> Option<ValueThresholdReport>
where
    I: IntoIterator<Item = &'a AnalysisReadyRecord>,
{
    let values: Vec<f64> = records
        .into_iter()
        .filter_map(|r| r.tender_value)
        .filter(|v| *v > 0.0)
        .collect();

    let median = stats::median(&values)?;
    let below = VALUE_THRESHOLDS
        .iter()
        .map(|t| {
            let count = values.iter().filter(|v| *v < t).count();
            ThresholdShare {
                threshold: *t,
                count,
                share: count as f64 / values.len() as f64,
            }
        })
        .collect();
    let verdict = if median > 200_000.0 {
        ThresholdVerdict::AboveEuThresholds
    } else if median < 50_000.0 {
        ThresholdVerdict::MostlyBelowThresholds
    } else {
        ThresholdVerdict::Mixed
    };

    Some(ValueThresholdReport {
        observations: values.len(),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        median,
        mean: stats::mean(&values)?,
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        below,
        verdict,
    })
}

/// Per-jurisdiction threshold reports plus the pooled sample of all tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSummary {
    pub countries: Vec<(Country, Option<ValueThresholdReport>)>,
    pub pooled: Option<ValueThresholdReport>,
}

/// Threshold reports for each table and for all tables stacked together.
pub fn threshold_summary(tables: &[(Country, Vec<AnalysisReadyRecord>)]) -> ThresholdSummary {
    ThresholdSummary {
        countries: tables
            .iter()
            .map(|(country, rows)| (*country, value_thresholds(rows)))
            .collect(),
        pooled: value_thresholds(tables.iter().flat_map(|(_, rows)| rows)),
    }
}

// =============================================================================
// Descriptive statistics
// =============================================================================

/// count / mean / std / min / quartiles / max of one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptiveStats {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

impl DescriptiveStats {
    pub fn of(column: impl Into<String>, values: &[f64]) -> Self {
        Self {
            column: column.into(),
            count: values.len(),
            mean: stats::mean(values),
            std: stats::sample_std(values),
            min: stats::quantile(values, 0.0),
            q25: stats::quantile(values, 0.25),
            median: stats::quantile(values, 0.5),
            q75: stats::quantile(values, 0.75),
            max: stats::quantile(values, 1.0),
        }
    }

    fn cells(&self) -> [Option<f64>; 7] {
        [self.mean, self.std, self.min, self.q25, self.median, self.q75, self.max]
    }
}

/// Descriptives of the cleaned table (duration, bid counts, value).
pub fn describe_analysis(records: &[AnalysisReadyRecord]) -> Vec<DescriptiveStats> {
    vec![
        DescriptiveStats::of("duration_days", &records.iter().map(|r| r.duration_days as f64).collect::<Vec<_>>()),
        DescriptiveStats::of("total_bids", &records.iter().map(|r| r.total_bids as f64).collect::<Vec<_>>()),
        DescriptiveStats::of("sme_bids", &records.iter().map(|r| r.sme_bids as f64).collect::<Vec<_>>()),
        DescriptiveStats::of("tender_value", &records.iter().filter_map(|r| r.tender_value).collect::<Vec<_>>()),
    ]
}

fn numeric_column(records: &[RegressionReadyRecord], field: Field) -> Vec<f64> {
    records
        .iter()
        .filter_map(|r| r.value(field).and_then(|v| v.as_f64()))
        .collect()
}

/// Descriptives of numeric regression fields (missing values skipped).
pub fn describe_fields(records: &[RegressionReadyRecord], fields: &[Field]) -> Vec<DescriptiveStats> {
    fields
        .iter()
        .filter(|f| !f.is_categorical())
        .map(|f| DescriptiveStats::of(f.name(), &numeric_column(records, *f)))
        .collect()
}

fn fmt_cell(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

/// Aligned text table for the terminal.
pub fn render_describe(rows: &[DescriptiveStats]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<22} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "", "count", "mean", "std", "min", "25%", "50%", "75%", "max"
    );
    for row in rows {
        let cells: Vec<String> = row.cells().iter().map(|c| fmt_cell(*c)).collect();
        let _ = writeln!(
            out,
            "{:<22} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12}",
            row.column, row.count, cells[0], cells[1], cells[2], cells[3], cells[4], cells[5], cells[6]
        );
    }
    out
}

// =============================================================================
// Correlation & LaTeX
// =============================================================================

/// Pairwise Pearson correlations over complete pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub fields: Vec<Field>,
    pub values: Vec<Vec<Option<f64>>>,
}

pub fn correlation_matrix(records: &[RegressionReadyRecord], fields: &[Field]) -> CorrelationMatrix {
    let fields: Vec<Field> = fields.iter().copied().filter(|f| !f.is_categorical()).collect();
    let values = fields
        .iter()
        .map(|a| {
            fields
                .iter()
                .map(|b| {
                    let (x, y): (Vec<f64>, Vec<f64>) = records
                        .iter()
                        .filter_map(|r| {
                            let x = r.value(*a)?.as_f64()?;
                            let y = r.value(*b)?.as_f64()?;
                            Some((x, y))
                        })
                        .unzip();
                    stats::pearson(&x, &y)
                })
                .collect()
        })
        .collect();
    CorrelationMatrix { fields, values }
}

fn latex_escape(text: &str) -> String {
    text.replace('\\', "\\textbackslash{}")
        .replace('_', "\\_")
        .replace('%', "\\%")
        .replace('&', "\\&")
        .replace('#', "\\#")
}

fn latex_table(caption: &str, label: &str, spec: &str, header: &str, body: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\\begin{{table}}[htbp]");
    let _ = writeln!(out, "\\centering");
    let _ = writeln!(out, "\\caption{{{}}}", latex_escape(caption));
    let _ = writeln!(out, "\\label{{{}}}", label);
    let _ = writeln!(out, "\\begin{{tabular}}{{{}}}", spec);
    let _ = writeln!(out, "\\toprule");
    let _ = writeln!(out, "{} \\\\", header);
    let _ = writeln!(out, "\\midrule");
    for line in body {
        let _ = writeln!(out, "{} \\\\", line);
    }
    let _ = writeln!(out, "\\bottomrule");
    let _ = writeln!(out, "\\end{{tabular}}");
    let _ = writeln!(out, "\\end{{table}}");
    out
}

/// Booktabs table of descriptive statistics.
pub fn latex_descriptive_table(rows: &[DescriptiveStats], caption: &str, label: &str) -> String {
    let body: Vec<String> = rows
        .iter()
        .map(|row| {
            let mut cells = vec![latex_escape(&row.column), row.count.to_string()];
            cells.extend(row.cells().iter().map(|c| fmt_cell(*c)));
            cells.join(" & ")
        })
        .collect();
    latex_table(
        caption,
        label,
        "lrrrrrrrr",
        "Variable & N & Mean & SD & Min & P25 & Median & P75 & Max",
        &body,
    )
}

/// Booktabs table of the lower correlation triangle.
pub fn latex_correlation_table(matrix: &CorrelationMatrix, caption: &str, label: &str) -> String {
    let n = matrix.fields.len();
    let header = std::iter::once(String::new())
        .chain((1..=n).map(|i| format!("({})", i)))
        .collect::<Vec<_>>()
        .join(" & ");
    let body: Vec<String> = matrix
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let mut cells = vec![format!("({}) {}", i + 1, latex_escape(field.name()))];
            for j in 0..n {
                cells.push(if j <= i { fmt_cell(matrix.values[i][j]) } else { String::new() });
            }
            cells.join(" & ")
        })
        .collect();
    latex_table(caption, label, &format!("l{}", "r".repeat(n)), &header, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ready(value: Option<f64>, duration: i64) -> AnalysisReadyRecord {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        AnalysisReadyRecord {
            tender_id: None,
            publication_date: start,
            end_date: start + chrono::Duration::days(duration),
            total_bids: duration / 2,
            sme_bids: 0,
            tender_value: value,
            procurement_method: "open".into(),
            procurement_category: None,
            award_criteria: None,
            year: 2021,
            duration_days: duration,
        }
    }

    #[test]
    fn test_row_count_totals_and_sentence() {
        let report = RowCountReport {
            countries: vec![
                RowCount { country: Country::Germany, raw: 120_000, ready: 80_500 },
                RowCount { country: Country::France, raw: 9_000, ready: 4_000 },
                RowCount { country: Country::Estonia, raw: 1_500, ready: 900 },
            ],
        };

        assert_eq!(report.total_raw(), 130_500);
        assert_eq!(report.total_ready(), 85_400);
        let sentence = report.summary_sentence();
        assert!(sentence.contains("from 130,500 entries (Germany: 120,000, France: 9,000, Estonia: 1,500)"));
        assert!(sentence.contains("to 85,400 entries"));
        assert!(report.render().contains("Total"));
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_value_thresholds() {
        let records = vec![
            ready(Some(10_000.0), 1),
            ready(Some(30_000.0), 1),
            ready(Some(0.0), 1),
            ready(None, 1),
            ready(Some(150_000.0), 1),
            ready(Some(500_000.0), 1),
        ];
        let report = value_thresholds(&records).unwrap();

        assert_eq!(report.observations, 4);
        assert_eq!(report.min, 10_000.0);
        assert_eq!(report.median, 90_000.0);
        assert_eq!(report.below[0].count, 1);
        assert_eq!(report.below[1].count, 2);
        assert_eq!(report.below[2].count, 3);
        assert_eq!(report.below[2].share, 0.75);
        assert_eq!(report.verdict, ThresholdVerdict::Mixed);
    }

    #[test]
    fn test_threshold_verdicts() {
        let low = vec![ready(Some(1_000.0), 1), ready(Some(2_000.0), 1)];
        assert_eq!(value_thresholds(&low).unwrap().verdict, ThresholdVerdict::MostlyBelowThresholds);

        let high = vec![ready(Some(300_000.0), 1)];
        assert_eq!(value_thresholds(&high).unwrap().verdict, ThresholdVerdict::AboveEuThresholds);

        assert!(value_thresholds(&[ready(None, 1)]).is_none());
    }

    #[test]
    fn test_pooled_thresholds_stack_all_tables() {
        let tables = vec![
            (Country::Estonia, vec![ready(Some(10_000.0), 1), ready(Some(20_000.0), 1)]),
            (Country::France, vec![ready(Some(60_000.0), 1), ready(Some(80_000.0), 1), ready(None, 1)]),
            (Country::Germany, vec![ready(Some(400_000.0), 1)]),
        ];
        let summary = threshold_summary(&tables);

        let pooled = summary.pooled.unwrap();
        assert_eq!(pooled.observations, 5);
        assert_eq!(pooled.median, 60_000.0);
        assert_eq!(pooled.min, 10_000.0);
        assert_eq!(pooled.max, 400_000.0);
        assert_eq!(pooled.below[0].count, 2);
        assert_eq!(pooled.verdict, ThresholdVerdict::Mixed);

        let medians: Vec<f64> = summary
            .countries
            .iter()
            .map(|(_, r)| r.as_ref().unwrap().median)
            .collect();
        assert_eq!(medians, vec![15_000.0, 70_000.0, 400_000.0]);
        assert!(medians.iter().all(|m| *m != pooled.median));
    }

    #[test]
    fn test_pooled_thresholds_without_values() {
        let tables = vec![(Country::Estonia, vec![ready(None, 1)]), (Country::France, vec![])];
        let summary = threshold_summary(&tables);
        assert!(summary.pooled.is_none());
        assert!(summary.countries.iter().all(|(_, r)| r.is_none()));
    }

    #[test]
    fn test_describe_matches_frame_conventions() {
        let records: Vec<_> = (1..=4).map(|d| ready(None, d)).collect();
        let stats = describe_analysis(&records);
        let duration = &stats[0];

        assert_eq!(duration.count, 4);
        assert_eq!(duration.mean, Some(2.5));
        assert_eq!(duration.q25, Some(1.75));
        assert_eq!(duration.max, Some(4.0));
        assert_eq!(stats[3].count, 0);
        assert_eq!(stats[3].mean, None);
    }

    #[test]
    fn test_correlation_and_latex() {
        let records: Vec<_> = (1..=6)
            .map(|d| RegressionReadyRecord::tagged(Country::Estonia, ready(Some(d as f64 * 10.0), d)))
            .collect();
        let matrix = correlation_matrix(&records, &[Field::DurationDays, Field::TenderValue, Field::Country]);

        assert_eq!(matrix.fields.len(), 2);
        assert!((matrix.values[0][1].unwrap() - 1.0).abs() < 1e-12);

        let latex = latex_correlation_table(&matrix, "Correlations", "tab:corr");
        assert!(latex.contains("\\toprule"));
        assert!(latex.contains("(1) duration\\_days"));
        assert!(latex.contains("\\label{tab:corr}"));

        let table = latex_descriptive_table(&describe_fields(&records, &[Field::DurationDays]), "Descriptives", "tab:desc");
        assert!(table.contains("duration\\_days & 6 & 3.50"));
    }
}
