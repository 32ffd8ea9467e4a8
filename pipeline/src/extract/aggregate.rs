//! Raw per-jurisdiction table assembly.
//!
//! Scans `<data_dir>/<Country>` for source files of the jurisdiction's
//! format, extracts each with the year taken from its file name and
//! concatenates the rows in sorted file-name order.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::{extract_file, MalformedPolicy, SourceFormat};
use crate::error::{ExtractError, ExtractResult};
use crate::logs::{log_info, log_info_indent, log_success, log_warning};
use crate::models::TenderRecord;
use crate::parser::write_table_file;

static YEAR_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").expect("valid year pattern"));

/// Year encoded as the last `_`-separated segment of the file stem.
///
/// `notices_2021.jsonl` gives 2021.
pub fn year_from_file_name(path: &Path) -> ExtractResult<i32> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let segment = stem.rsplit('_').next().unwrap_or_default().trim();

    if !YEAR_SEGMENT.is_match(segment) {
        return Err(ExtractError::YearFromFileName(name));
    }
    segment
        .parse()
        .map_err(|_| ExtractError::YearFromFileName(name))
}

/// Source files of `format` in `dir`, sorted by file name.
pub fn list_source_files(dir: &Path, format: SourceFormat) -> ExtractResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ExtractError::MissingDirectory(dir.to_path_buf()));
    }

    let entries = std::fs::read_dir(dir).map_err(|e| ExtractError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| ExtractError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?
            .path();
        if path.is_file() && format.matches(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if files.is_empty() {
        return Err(ExtractError::NoSourceFiles {
            dir: dir.to_path_buf(),
            kind: format.kind().to_string(),
        });
    }
    Ok(files)
}

/// Rows contributed by one source file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileSummary {
    pub file: String,
    pub year: i32,
    pub rows: usize,
    pub skipped: usize,
}

/// All rows of a jurisdiction, in file order.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub records: Vec<TenderRecord>,
    pub files: Vec<FileSummary>,
}

impl RawTable {
    pub fn total_rows(&self) -> usize {
        self.records.len()
    }

    pub fn total_skipped(&self) -> usize {
        self.files.iter().map(|f| f.skipped).sum()
    }

    /// Replace `path` with the raw table.
    pub fn write(&self, path: &Path) -> ExtractResult<()> {
        write_table_file(path, &self.records)?;
        Ok(())
    }
}

/// Extract and concatenate every source file of a jurisdiction directory.
pub fn aggregate_directory(dir: &Path, format: SourceFormat, policy: MalformedPolicy) -> ExtractResult<RawTable> {
    let files = list_source_files(dir, format)?;
    log_info(format!("📂 {} {} files in {}", files.len(), format.kind(), dir.display()));

    let mut table = RawTable::default();
    for path in files {
        let year = year_from_file_name(&path)?;
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let extraction = extract_file(&path, format, year, policy)?;
        log_info_indent(format!("-> {}: {} rows (year {})", file, extraction.records.len(), year), 1);
        if extraction.skipped > 0 {
            log_warning(format!("{}: {} malformed records skipped", file, extraction.skipped));
        }

        table.files.push(FileSummary {
            file,
            year,
            rows: extraction.records.len(),
            skipped: extraction.skipped,
        });
        table.records.extend(extraction.records);
    }

    log_success(format!(
        "Raw table: {} rows from {} files ({} malformed skipped)",
        table.total_rows(),
        table.files.len(),
        table.total_skipped()
    ));
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read_table_file;
    use tempfile::tempdir;

    const NOTICE: &str = r#"{"date":"2021-01-01","tender":{"id":"T","procurementMethod":"open"}}"#;

    #[test]
    fn test_year_from_file_name() {
        assert_eq!(year_from_file_name(Path::new("data/ee_notices_2021.jsonl")).unwrap(), 2021);
        assert_eq!(year_from_file_name(Path::new("2019.xlsx")).unwrap(), 2019);
        assert!(matches!(
            year_from_file_name(Path::new("notices_latest.jsonl")),
            Err(ExtractError::YearFromFileName(_))
        ));
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempdir().unwrap();
        let err = aggregate_directory(&dir.path().join("Estonia"), SourceFormat::JsonNotices, MalformedPolicy::FailFast)
            .unwrap_err();
        assert!(matches!(err, ExtractError::MissingDirectory(_)));
    }

    #[test]
    fn test_directory_without_sources_is_fatal() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let err = list_source_files(dir.path(), SourceFormat::JsonNotices).unwrap_err();
        assert!(matches!(err, ExtractError::NoSourceFiles { .. }));
    }

    #[test]
    fn test_files_processed_in_name_order() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ee_2022.jsonl"), format!("{NOTICE}\n")).unwrap();
        std::fs::write(dir.path().join("ee_2020.jsonl"), format!("{NOTICE}\n{NOTICE}\n")).unwrap();
        std::fs::write(dir.path().join("ee_2021.jsonl"), "").unwrap();

        let table = aggregate_directory(dir.path(), SourceFormat::JsonNotices, MalformedPolicy::FailFast).unwrap();

        let years: Vec<i32> = table.records.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![2020, 2020, 2022]);
        let files: Vec<&str> = table.files.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(files, vec!["ee_2020.jsonl", "ee_2021.jsonl", "ee_2022.jsonl"]);
        assert_eq!(table.files[1].rows, 0);
    }

    #[test]
    fn test_raw_table_written_whole() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("Estonia");
        std::fs::create_dir(&input).unwrap();
        std::fs::write(input.join("ee_2021.jsonl"), format!("{NOTICE}\n{NOTICE}\n")).unwrap();

        let table = aggregate_directory(&input, SourceFormat::JsonNotices, MalformedPolicy::FailFast).unwrap();
        let output = dir.path().join("results").join("estonia_all_tenders_raw.csv");
        table.write(&output).unwrap();
        table.write(&output).unwrap();

        let back: Vec<TenderRecord> = read_table_file(&output).unwrap();
        assert_eq!(back, table.records);
    }
}
