//! Domain models for the tender pipeline.
//!
//! One record type per stage of the pipeline:
//!
//! - [`TenderRecord`] - Raw extracted notice, one row of the raw table
//! - [`AnalysisReadyRecord`] - Cleaned row with parsed dates and `duration_days`
//! - [`RegressionReadyRecord`] - Country-tagged row with regression variables
//!
//! plus [`Country`] for the jurisdiction tag and [`Field`] for referring to
//! columns in configuration, model specifications and listwise deletion.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layout used in persisted tables.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Country
// =============================================================================

/// Jurisdiction a tender was published in.
///
/// Variant order is the stable category order used for dummy encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Country {
    Estonia,
    France,
    Germany,
}

impl Country {
    /// All jurisdictions, in category order.
    pub const ALL: [Country; 3] = [Country::Estonia, Country::France, Country::Germany];

    /// Label used in the `country` column and in formulas.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Estonia => "Estonia",
            Self::France => "France",
            Self::Germany => "Germany",
        }
    }

    /// Lower-case stem used in result file names.
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::Estonia => "estonia",
            Self::France => "france",
            Self::Germany => "germany",
        }
    }

    /// Parse an English or German country name.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "estonia" | "estland" | "ee" => Some(Self::Estonia),
            "france" | "frankreich" | "fr" => Some(Self::France),
            "germany" | "deutschland" | "de" => Some(Self::Germany),
            _ => None,
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Country {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("unknown country '{}'", s))
    }
}

// =============================================================================
// Tender Record (raw)
// =============================================================================

/// One tender notice as extracted from a source file.
///
/// Dates are kept as published; they are parsed by the cleaning stage so an
/// unparseable date becomes a counted drop rather than an extraction failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenderRecord {
    pub tender_id: Option<String>,
    pub publication_date: Option<String>,
    pub end_date: Option<String>,
    pub total_bids: Option<i64>,
    pub sme_bids: Option<i64>,
    pub tender_value: Option<f64>,
    pub procurement_method: Option<String>,
    pub procurement_category: Option<String>,
    pub award_criteria: Option<String>,
    /// Taken from the source file name, shared by every row of that file.
    pub year: i32,
}

// =============================================================================
// Analysis-Ready Record
// =============================================================================

/// A tender that survived cleaning.
///
/// Both dates are present, `end_date >= publication_date`, the procurement
/// method is competitive, and bid counts are finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReadyRecord {
    pub tender_id: Option<String>,
    pub publication_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    /// Zero when the notice carried no bid statistics.
    pub total_bids: i64,
    pub sme_bids: i64,
    pub tender_value: Option<f64>,
    pub procurement_method: String,
    pub procurement_category: Option<String>,
    pub award_criteria: Option<String>,
    pub year: i32,
    /// Whole days between publication and end of the tender period.
    pub duration_days: i64,
}

// =============================================================================
// Regression-Ready Record
// =============================================================================

/// A country-tagged record with the regression variables of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionReadyRecord {
    pub country: Country,
    pub tender: AnalysisReadyRecord,
    /// `duration_days` clipped at the configured percentile.
    pub duration_days_capped: f64,
    pub z_duration: Option<f64>,
    pub log_tender_value: Option<f64>,
    pub z_value: Option<f64>,
    /// `sme_bids / total_bids`; `None` when there were no bids.
    pub sme_share: Option<f64>,
}

impl RegressionReadyRecord {
    /// Tag an analysis-ready record with its jurisdiction.
    pub fn tagged(country: Country, tender: AnalysisReadyRecord) -> Self {
        let duration = tender.duration_days as f64;
        Self {
            country,
            tender,
            duration_days_capped: duration,
            z_duration: None,
            log_tender_value: None,
            z_value: None,
            sme_share: None,
        }
    }

    /// Value of a column, `None` when missing.
    pub fn value(&self, field: Field) -> Option<FieldValue> {
        let t = &self.tender;
        match field {
            Field::Country => Some(FieldValue::Text(self.country.label().to_string())),
            Field::Year => Some(FieldValue::Number(t.year as f64)),
            Field::ProcurementMethod => Some(FieldValue::Text(t.procurement_method.clone())),
            Field::ProcurementCategory => t.procurement_category.clone().map(FieldValue::Text),
            Field::AwardCriteria => t.award_criteria.clone().map(FieldValue::Text),
            Field::TotalBids => Some(FieldValue::Number(t.total_bids as f64)),
            Field::SmeBids => Some(FieldValue::Number(t.sme_bids as f64)),
            Field::DurationDays => Some(FieldValue::Number(t.duration_days as f64)),
            Field::DurationDaysCapped => Some(FieldValue::Number(self.duration_days_capped)),
            Field::ZDuration => self.z_duration.map(FieldValue::Number),
            Field::TenderValue => t.tender_value.map(FieldValue::Number),
            Field::LogTenderValue => self.log_tender_value.map(FieldValue::Number),
            Field::ZValue => self.z_value.map(FieldValue::Number),
            Field::SmeShare => self.sme_share.map(FieldValue::Number),
        }
        .filter(FieldValue::is_present)
    }
}

// =============================================================================
// Fields
// =============================================================================

/// A column of the regression-ready table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Country,
    Year,
    ProcurementMethod,
    ProcurementCategory,
    AwardCriteria,
    TotalBids,
    SmeBids,
    DurationDays,
    DurationDaysCapped,
    ZDuration,
    TenderValue,
    LogTenderValue,
    ZValue,
    SmeShare,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Country,
        Field::Year,
        Field::ProcurementMethod,
        Field::ProcurementCategory,
        Field::AwardCriteria,
        Field::TotalBids,
        Field::SmeBids,
        Field::DurationDays,
        Field::DurationDaysCapped,
        Field::ZDuration,
        Field::TenderValue,
        Field::LogTenderValue,
        Field::ZValue,
        Field::SmeShare,
    ];

    /// Column name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Year => "year",
            Self::ProcurementMethod => "procurement_method",
            Self::ProcurementCategory => "procurement_category",
            Self::AwardCriteria => "award_criteria",
            Self::TotalBids => "total_bids",
            Self::SmeBids => "sme_bids",
            Self::DurationDays => "duration_days",
            Self::DurationDaysCapped => "duration_days_capped",
            Self::ZDuration => "z_duration",
            Self::TenderValue => "tender_value",
            Self::LogTenderValue => "log_tender_value",
            Self::ZValue => "z_value",
            Self::SmeShare => "sme_share",
        }
    }

    /// Look a field up by column name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name.trim())
    }

    /// Whether the column holds text categories.
    pub fn is_categorical(&self) -> bool {
        matches!(
            self,
            Self::Country | Self::ProcurementMethod | Self::ProcurementCategory | Self::AwardCriteria
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown field '{}'", s))
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// `false` for NaN and empty text.
    pub fn is_present(&self) -> bool {
        match self {
            Self::Number(n) => !n.is_nan(),
            Self::Text(s) => !s.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Category label (years print without a fractional part).
    pub fn label(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ready() -> AnalysisReadyRecord {
        let day = |d| NaiveDate::from_ymd_opt(2021, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
        AnalysisReadyRecord {
            tender_id: Some("ocds-1".into()),
            publication_date: day(1),
            end_date: day(31),
            total_bids: 0,
            sme_bids: 0,
            tender_value: None,
            procurement_method: "open".into(),
            procurement_category: Some("services".into()),
            award_criteria: None,
            year: 2021,
            duration_days: 30,
        }
    }

    #[test]
    fn test_country_labels() {
        assert_eq!(Country::from_label("Deutschland"), Some(Country::Germany));
        assert_eq!(Country::from_label(" estonia "), Some(Country::Estonia));
        assert_eq!(Country::from_label("Spain"), None);
        assert_eq!("France".parse::<Country>().unwrap().file_stem(), "france");
    }

    #[test]
    fn test_country_order_is_alphabetical() {
        let mut sorted = vec![Country::Germany, Country::Estonia, Country::France];
        sorted.sort();
        assert_eq!(sorted, Country::ALL.to_vec());
    }

    #[test]
    fn test_field_names_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_name(field.name()), Some(field));
        }
        let json = serde_json::to_string(&Field::DurationDaysCapped).unwrap();
        assert_eq!(json, "\"duration_days_capped\"");
    }

    #[test]
    fn test_missing_values_are_none() {
        let record = RegressionReadyRecord::tagged(Country::Estonia, ready());
        assert_eq!(record.value(Field::TenderValue), None);
        assert_eq!(record.value(Field::SmeShare), None);
        assert_eq!(record.value(Field::AwardCriteria), None);
        assert_eq!(record.value(Field::DurationDaysCapped), Some(FieldValue::Number(30.0)));
        assert_eq!(record.value(Field::Country), Some(FieldValue::Text("Estonia".into())));
    }

    #[test]
    fn test_year_label_has_no_fraction() {
        assert_eq!(FieldValue::Number(2021.0).label(), "2021");
    }
}
