//! Spreadsheet row extraction.
//!
//! Sheets already use the canonical column names (matched case-insensitively,
//! spaces read as underscores). The `year` always comes from the file name;
//! a year column inside the sheet is ignored.

use std::path::Path;

use calamine::{open_workbook_auto, Data, ExcelDateTime, Reader};

use super::{Extraction, MalformedPolicy};
use crate::error::{ExtractError, ExtractResult};
use crate::models::{TenderRecord, TIMESTAMP_FORMAT};
use crate::parser::parse_file_auto;
use crate::parser::table::parse_count;

/// Columns read from a sheet, in raw-table order.
pub const CANONICAL_COLUMNS: &[&str] = &[
    "tender_id",
    "publication_date",
    "end_date",
    "total_bids",
    "sme_bids",
    "tender_value",
    "procurement_method",
    "procurement_category",
    "award_criteria",
];

/// Cell text of a sheet, header row first.
struct SheetGrid {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

fn canonical_header(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

// =============================================================================
// Cell conversion
// =============================================================================

/// Excel date cell to a timestamp, honouring the workbook's 1900 or 1904 date system.
fn excel_datetime_to_timestamp(dt: &ExcelDateTime) -> Option<String> {
    dt.as_datetime().map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            Some(s.trim().to_string()).filter(|s| !s.is_empty())
        }
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => excel_datetime_to_timestamp(dt),
    }
}

fn read_workbook(path: &Path, file: &str) -> ExtractResult<SheetGrid> {
    let workbook_error = |message: String| ExtractError::Workbook {
        file: file.to_string(),
        message,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| workbook_error("workbook has no worksheet".to_string()))?
        .map_err(|e| workbook_error(e.to_string()))?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|header| header.iter().map(|c| cell_text(c).unwrap_or_default()).collect())
        .unwrap_or_default();

    Ok(SheetGrid {
        headers,
        rows: rows.map(|row| row.iter().map(cell_text).collect()).collect(),
    })
}

fn read_export(path: &Path) -> ExtractResult<SheetGrid> {
    let table = parse_file_auto(path)?;
    let rows = table
        .rows
        .iter()
        .map(|record| {
            record
                .iter()
                .map(|v| Some(v.trim().to_string()).filter(|s| !s.is_empty()))
                .collect()
        })
        .collect();

    Ok(SheetGrid {
        headers: table.headers,
        rows,
    })
}

// =============================================================================
// Row mapping
// =============================================================================

fn record_from_row(
    file: &str,
    row_number: usize,
    headers: &[String],
    cells: &[Option<String>],
    year: i32,
) -> ExtractResult<TenderRecord> {
    let get = |column: &str| -> Option<String> {
        let idx = headers.iter().position(|h| h == column)?;
        cells.get(idx).cloned().flatten()
    };
    let invalid = |column: &str, value: String| ExtractError::InvalidCell {
        file: file.to_string(),
        row: row_number,
        column: column.to_string(),
        value,
    };
    let count = |column: &str| -> ExtractResult<Option<i64>> {
        match get(column) {
            None => Ok(None),
            Some(raw) => parse_count(&raw).map(Some).ok_or_else(|| invalid(column, raw)),
        }
    };
    let tender_value = match get("tender_value") {
        None => None,
        Some(raw) => Some(raw.parse::<f64>().map_err(|_| invalid("tender_value", raw.clone()))?),
    };

    Ok(TenderRecord {
        tender_id: get("tender_id"),
        publication_date: get("publication_date"),
        end_date: get("end_date"),
        total_bids: count("total_bids")?,
        sme_bids: count("sme_bids")?,
        tender_value,
        procurement_method: get("procurement_method"),
        procurement_category: get("procurement_category"),
        award_criteria: get("award_criteria"),
        year,
    })
}

/// Extract every row of a sheet file (`.xlsx` first worksheet, or `.csv`).
pub fn extract_sheet_file(path: &Path, year: i32, policy: MalformedPolicy) -> ExtractResult<Extraction> {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let is_workbook = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("xlsx"))
        .unwrap_or(false);

    let grid = if is_workbook {
        read_workbook(path, &file)?
    } else {
        read_export(path)?
    };
    let headers: Vec<String> = grid.headers.iter().map(|h| canonical_header(h)).collect();

    let mut extraction = Extraction::default();
    for (idx, cells) in grid.rows.iter().enumerate() {
        if cells.iter().all(Option::is_none) {
            continue;
        }
        match record_from_row(&file, idx + 2, &headers, cells, year) {
            Ok(record) => extraction.records.push(record),
            Err(_) if policy == MalformedPolicy::SkipAndCount => extraction.skipped += 1,
            Err(e) => return Err(e),
        }
    }

    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::ExcelDateTimeType;
    use tempfile::tempdir;

    fn write_export(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("france_2020.csv");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_export_rows_use_file_year() {
        let (_dir, path) = write_export(
            "Tender_ID;publication_date;end_date;total_bids;tender_value;procurement_method;year\n\
             FR-1;2020-02-01;2020-03-01;3;50000;open;1999\n\
             FR-2;2020-02-10;2020-02-20;;;restricted;1999\n",
        );
        let extraction = extract_sheet_file(&path, 2020, MalformedPolicy::FailFast).unwrap();

        assert_eq!(extraction.records.len(), 2);
        let first = &extraction.records[0];
        assert_eq!(first.tender_id.as_deref(), Some("FR-1"));
        assert_eq!(first.total_bids, Some(3));
        assert_eq!(first.tender_value, Some(50000.0));
        assert_eq!(first.sme_bids, None);
        assert!(extraction.records.iter().all(|r| r.year == 2020));
        assert_eq!(extraction.records[1].total_bids, None);
    }

    #[test]
    fn test_invalid_count_cell_fails_fast() {
        let (_dir, path) = write_export("tender_id,total_bids\nFR-1,2\nFR-2,several\n");
        let err = extract_sheet_file(&path, 2020, MalformedPolicy::FailFast).unwrap_err();

        match err {
            ExtractError::InvalidCell { row, column, value, .. } => {
                assert_eq!(row, 3);
                assert_eq!(column, "total_bids");
                assert_eq!(value, "several");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_cell_skipped_and_counted() {
        let (_dir, path) = write_export("tender_id,tender_value\nFR-1,10\nFR-2,ten\nFR-3,30\n");
        let extraction = extract_sheet_file(&path, 2020, MalformedPolicy::SkipAndCount).unwrap();

        assert_eq!(extraction.records.len(), 2);
        assert_eq!(extraction.skipped, 1);
    }

    #[test]
    fn test_excel_serial_dates() {
        let cell = |serial: f64, is_1904: bool| ExcelDateTime::new(serial, ExcelDateTimeType::DateTime, is_1904);

        assert_eq!(excel_datetime_to_timestamp(&cell(44197.0, false)).as_deref(), Some("2021-01-01 00:00:00"));
        assert_eq!(excel_datetime_to_timestamp(&cell(44197.5, false)).as_deref(), Some("2021-01-01 12:00:00"));
        // 1904 date system: same calendar day, serial 1462 smaller
        assert_eq!(excel_datetime_to_timestamp(&cell(42735.0, true)).as_deref(), Some("2021-01-01 00:00:00"));
        assert_eq!(
            cell_text(&Data::DateTime(cell(42735.0, true))).as_deref(),
            Some("2021-01-01 00:00:00")
        );
    }

    #[test]
    fn test_cell_text_conversion() {
        assert_eq!(cell_text(&Data::Float(3.0)).as_deref(), Some("3"));
        assert_eq!(cell_text(&Data::Float(2.5)).as_deref(), Some("2.5"));
        assert_eq!(cell_text(&Data::String("  ".into())), None);
        assert_eq!(cell_text(&Data::Empty), None);
    }

    #[test]
    fn test_missing_workbook_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("france_2021.xlsx");
        std::fs::write(&path, b"not a zip archive").unwrap();

        let err = extract_sheet_file(&path, 2021, MalformedPolicy::FailFast).unwrap_err();
        assert!(matches!(err, ExtractError::Workbook { .. }));
    }
}
