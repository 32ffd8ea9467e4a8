//! Source record extraction and per-jurisdiction aggregation.
//!
//! - [`notice`] - line-delimited JSON notices
//! - [`sheet`] - spreadsheet rows (`.xlsx` workbooks or delimited exports)
//! - [`aggregate`] - directory scan, filename years and the raw table

pub mod aggregate;
pub mod notice;
pub mod sheet;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExtractResult;
use crate::models::TenderRecord;

pub use aggregate::{aggregate_directory, list_source_files, year_from_file_name, FileSummary, RawTable};
pub use notice::{extract_notice, extract_notice_file, extract_notices};
pub use sheet::{extract_sheet_file, CANONICAL_COLUMNS};

/// Source file layout of a jurisdiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// One JSON notice object per line (`.jsonl`).
    JsonNotices,
    /// One tender per sheet row (`.xlsx` or a `.csv` export).
    Spreadsheet,
}

impl SourceFormat {
    /// File extensions picked up when scanning an input directory.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::JsonNotices => &["jsonl"],
            Self::Spreadsheet => &["xlsx", "csv"],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::JsonNotices => "JSON notice",
            Self::Spreadsheet => "spreadsheet",
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions().iter().any(|x| ext.eq_ignore_ascii_case(x)))
            .unwrap_or(false)
    }
}

/// What to do with a record that cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Abort the run on the first malformed record.
    #[default]
    FailFast,
    /// Skip malformed records and report how many were skipped.
    SkipAndCount,
}

/// Records extracted from one source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<TenderRecord>,
    /// Malformed records skipped under [`MalformedPolicy::SkipAndCount`].
    pub skipped: usize,
}

/// Extract every record of one source file.
pub fn extract_file(
    path: &Path,
    format: SourceFormat,
    year: i32,
    policy: MalformedPolicy,
) -> ExtractResult<Extraction> {
    match format {
        SourceFormat::JsonNotices => extract_notice_file(path, year, policy),
        SourceFormat::Spreadsheet => extract_sheet_file(path, year, policy),
    }
}
