//! Typed rows for the persisted pipeline tables.
//!
//! Tables are comma-delimited, carry a header row of canonical column names
//! and are written UTF-8 with a BOM so spreadsheet tools keep non-ASCII
//! jurisdiction text intact. Files are always replaced whole.

use std::collections::HashMap;
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use csv::StringRecord;

use super::{parse_bytes_auto, CsvError};
use crate::clean::parse_timestamp;
use crate::models::{AnalysisReadyRecord, Country, RegressionReadyRecord, TenderRecord, TIMESTAMP_FORMAT};

/// A record type that maps to one row of a delimited table.
pub trait TableRow: Sized {
    /// Header row, in output order.
    const COLUMNS: &'static [&'static str];

    /// Cell values in [`Self::COLUMNS`] order; empty string for missing.
    fn to_fields(&self) -> Vec<String>;

    /// Rebuild a record from a parsed row.
    fn from_fields(row: &RowView<'_>) -> Result<Self, CsvError>;
}

/// Read access to one parsed row by column name.
pub struct RowView<'a> {
    line: usize,
    columns: &'a HashMap<String, usize>,
    record: &'a StringRecord,
}

impl<'a> RowView<'a> {
    pub fn new(line: usize, columns: &'a HashMap<String, usize>, record: &'a StringRecord) -> Self {
        Self { line, columns, record }
    }

    /// 1-based line number in the source table.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Trimmed cell text; `None` for a missing column or an empty cell.
    pub fn text(&self, column: &str) -> Option<&'a str> {
        let idx = *self.columns.get(column)?;
        let value = self.record.get(idx)?.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("nan") {
            None
        } else {
            Some(value)
        }
    }

    pub fn owned(&self, column: &str) -> Option<String> {
        self.text(column).map(str::to_string)
    }

    /// Cell text that must be present.
    pub fn required(&self, column: &str) -> Result<&'a str, CsvError> {
        self.text(column)
            .ok_or_else(|| CsvError::new(self.line, "missing required value").with_column(column))
    }

    /// Strictly parsed value; unparseable text is an error.
    pub fn parse<T: FromStr>(&self, column: &str) -> Result<Option<T>, CsvError> {
        match self.text(column) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| self.invalid(column, raw, "cannot parse value")),
        }
    }

    /// Numeric value, unparseable text becomes missing.
    pub fn coerce_f64(&self, column: &str) -> Option<f64> {
        self.text(column)
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|v| !v.is_nan())
    }

    /// Integer count; accepts integral floats such as `3.0`.
    pub fn count(&self, column: &str) -> Result<Option<i64>, CsvError> {
        match self.text(column) {
            None => Ok(None),
            Some(raw) => parse_count(raw)
                .map(Some)
                .ok_or_else(|| self.invalid(column, raw, "not an integer count")),
        }
    }

    /// Timestamp written by this crate (or any layout the cleaner accepts).
    pub fn timestamp(&self, column: &str) -> Result<chrono::NaiveDateTime, CsvError> {
        let raw = self.required(column)?;
        parse_timestamp(raw).ok_or_else(|| self.invalid(column, raw, "not a timestamp"))
    }

    pub fn invalid(&self, column: &str, value: &str, message: &str) -> CsvError {
        CsvError::new(self.line, message).with_column(column).with_value(value)
    }
}

/// Parse an integer count, accepting integral float notation.
pub fn parse_count(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn cell<T: Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

// =============================================================================
// Reading / writing
// =============================================================================

/// Write rows (header first, BOM-prefixed) to a writer.
pub fn write_rows<W: Write, T: TableRow>(mut writer: W, rows: &[T]) -> Result<(), CsvError> {
    writer
        .write_all(b"\xEF\xBB\xBF")
        .map_err(|e| CsvError::new(0, format!("Cannot write table: {}", e)))?;

    let mut csv_writer = csv::WriterBuilder::new().from_writer(writer);
    csv_writer.write_record(T::COLUMNS)?;
    for row in rows {
        csv_writer.write_record(row.to_fields())?;
    }
    csv_writer
        .flush()
        .map_err(|e| CsvError::new(0, format!("Cannot flush table: {}", e)))?;
    Ok(())
}

/// Parse rows from table bytes (encoding and delimiter auto-detected).
pub fn read_rows<T: TableRow>(bytes: &[u8]) -> Result<Vec<T>, CsvError> {
    let table = parse_bytes_auto(bytes)?;
    let columns: HashMap<String, usize> = table
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_lowercase(), i))
        .collect();

    table
        .rows
        .iter()
        .enumerate()
        .map(|(i, record)| T::from_fields(&RowView::new(i + 2, &columns, record)))
        .collect()
}

/// Replace `path` with a table of `rows`, creating parent directories.
pub fn write_table_file<T: TableRow>(path: &Path, rows: &[T]) -> Result<(), CsvError> {
    let mut buffer = Vec::new();
    write_rows(&mut buffer, rows)?;
    replace_file(path, buffer)
}

/// Replace `path` with an untyped table (model frames, prediction grids).
pub fn write_text_table(path: &Path, headers: &[String], rows: &[Vec<String>]) -> Result<(), CsvError> {
    let mut buffer = b"\xEF\xBB\xBF".to_vec();
    {
        let mut csv_writer = csv::WriterBuilder::new().from_writer(&mut buffer);
        csv_writer.write_record(headers)?;
        for row in rows {
            csv_writer.write_record(row)?;
        }
        csv_writer
            .flush()
            .map_err(|e| CsvError::new(0, format!("Cannot flush table: {}", e)))?;
    }
    replace_file(path, buffer)
}

fn replace_file(path: &Path, buffer: Vec<u8>) -> Result<(), CsvError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| CsvError::new(0, format!("Cannot create '{}': {}", parent.display(), e)))?;
    }
    std::fs::write(path, buffer)
        .map_err(|e| CsvError::new(0, format!("Cannot write '{}': {}", path.display(), e)))
}

/// Read a whole table file.
pub fn read_table_file<T: TableRow>(path: &Path) -> Result<Vec<T>, CsvError> {
    let bytes = std::fs::read(path)
        .map_err(|e| CsvError::new(0, format!("Cannot read file '{}': {}", path.display(), e)))?;
    read_rows(&bytes)
}

// =============================================================================
// Row mappings
// =============================================================================

impl TableRow for TenderRecord {
    const COLUMNS: &'static [&'static str] = &[
        "tender_id",
        "publication_date",
        "end_date",
        "total_bids",
        "sme_bids",
        "tender_value",
        "procurement_method",
        "procurement_category",
        "award_criteria",
        "year",
    ];

    fn to_fields(&self) -> Vec<String> {
        vec![
            cell(&self.tender_id),
            cell(&self.publication_date),
            cell(&self.end_date),
            cell(&self.total_bids),
            cell(&self.sme_bids),
            cell(&self.tender_value),
            cell(&self.procurement_method),
            cell(&self.procurement_category),
            cell(&self.award_criteria),
            self.year.to_string(),
        ]
    }

    fn from_fields(row: &RowView<'_>) -> Result<Self, CsvError> {
        let year_raw = row.required("year")?;
        let year = parse_count(year_raw)
            .and_then(|y| i32::try_from(y).ok())
            .ok_or_else(|| row.invalid("year", year_raw, "not a year"))?;

        Ok(Self {
            tender_id: row.owned("tender_id"),
            publication_date: row.owned("publication_date"),
            end_date: row.owned("end_date"),
            total_bids: row.count("total_bids")?,
            sme_bids: row.count("sme_bids")?,
            tender_value: row.coerce_f64("tender_value"),
            procurement_method: row.owned("procurement_method"),
            procurement_category: row.owned("procurement_category"),
            award_criteria: row.owned("award_criteria"),
            year,
        })
    }
}

impl TableRow for AnalysisReadyRecord {
    const COLUMNS: &'static [&'static str] = &[
        "tender_id",
        "publication_date",
        "end_date",
        "total_bids",
        "sme_bids",
        "tender_value",
        "procurement_method",
        "procurement_category",
        "award_criteria",
        "year",
        "duration_days",
    ];

    fn to_fields(&self) -> Vec<String> {
        vec![
            cell(&self.tender_id),
            self.publication_date.format(TIMESTAMP_FORMAT).to_string(),
            self.end_date.format(TIMESTAMP_FORMAT).to_string(),
            self.total_bids.to_string(),
            self.sme_bids.to_string(),
            cell(&self.tender_value),
            self.procurement_method.clone(),
            cell(&self.procurement_category),
            cell(&self.award_criteria),
            self.year.to_string(),
            self.duration_days.to_string(),
        ]
    }

    fn from_fields(row: &RowView<'_>) -> Result<Self, CsvError> {
        let count = |column: &str| -> Result<i64, CsvError> {
            row.count(column)?
                .ok_or_else(|| CsvError::new(row.line(), "missing required value").with_column(column))
        };
        let year = |value: i64| -> Result<i32, CsvError> {
            i32::try_from(value).map_err(|_| row.invalid("year", &value.to_string(), "not a year"))
        };

        Ok(Self {
            tender_id: row.owned("tender_id"),
            publication_date: row.timestamp("publication_date")?,
            end_date: row.timestamp("end_date")?,
            total_bids: count("total_bids")?,
            sme_bids: count("sme_bids")?,
            tender_value: row.coerce_f64("tender_value"),
            procurement_method: row.required("procurement_method")?.to_string(),
            procurement_category: row.owned("procurement_category"),
            award_criteria: row.owned("award_criteria"),
            year: year(count("year")?)?,
            duration_days: count("duration_days")?,
        })
    }
}

impl TableRow for RegressionReadyRecord {
    const COLUMNS: &'static [&'static str] = &[
        "country",
        "tender_id",
        "publication_date",
        "end_date",
        "total_bids",
        "sme_bids",
        "tender_value",
        "procurement_method",
        "procurement_category",
        "award_criteria",
        "year",
        "duration_days",
        "duration_days_capped",
        "z_duration",
        "log_tender_value",
        "z_value",
        "sme_share",
    ];

    fn to_fields(&self) -> Vec<String> {
        let mut fields = vec![self.country.label().to_string()];
        fields.extend(self.tender.to_fields());
        fields.extend([
            self.duration_days_capped.to_string(),
            cell(&self.z_duration),
            cell(&self.log_tender_value),
            cell(&self.z_value),
            cell(&self.sme_share),
        ]);
        fields
    }

    fn from_fields(row: &RowView<'_>) -> Result<Self, CsvError> {
        let raw_country = row.required("country")?;
        let country = Country::from_label(raw_country)
            .ok_or_else(|| row.invalid("country", raw_country, "unknown country"))?;
        let capped = row
            .parse::<f64>("duration_days_capped")?
            .ok_or_else(|| CsvError::new(row.line(), "missing required value").with_column("duration_days_capped"))?;

        Ok(Self {
            country,
            tender: AnalysisReadyRecord::from_fields(row)?,
            duration_days_capped: capped,
            z_duration: row.parse("z_duration")?,
            log_tender_value: row.parse("log_tender_value")?,
            z_value: row.parse("z_value")?,
            sme_share: row.parse("sme_share")?,
        })
    }
}
