//! Delimited table parsing with encoding and delimiter auto-detection.
//!
//! Used for the persisted intermediate tables and for spreadsheet exports of
//! the sheet-based jurisdictions. Typed row mapping lives in [`table`].

pub mod table;

use std::path::Path;

use csv::StringRecord;

pub use table::{read_rows, read_table_file, write_rows, write_table_file, write_text_table, RowView, TableRow};

/// CSV parsing error with context
#[derive(Debug, Clone)]
pub struct CsvError {
    pub line: usize,
    pub column: Option<String>,
    pub value: Option<String>,
    pub message: String,
}

impl std::fmt::Display for CsvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.column, &self.value) {
            (Some(col), Some(val)) => {
                write!(f, "Line {}, column '{}' (value '{}'): {}", self.line, col, val, self.message)
            }
            (Some(col), None) => {
                write!(f, "Line {}, column '{}': {}", self.line, col, self.message)
            }
            _ => {
                write!(f, "Line {}: {}", self.line, self.message)
            }
        }
    }
}

impl std::error::Error for CsvError {}

impl CsvError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column: None,
            value: None,
            message: message.into(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl From<csv::Error> for CsvError {
    fn from(e: csv::Error) -> Self {
        let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
        CsvError::new(line, e.to_string())
    }
}

/// A parsed delimited table with its detected settings
#[derive(Debug, Clone)]
pub struct DelimitedTable {
    /// Column headers, trimmed
    pub headers: Vec<String>,
    /// Data rows
    pub rows: Vec<StringRecord>,
    /// Detected or used encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
}

impl DelimitedTable {
    /// Index of a column, matched case-insensitively
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.eq_ignore_ascii_case(name))
    }
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    if bytes.starts_with(UTF8_BOM) {
        return "utf-8".to_string();
    }

    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "utf-8-sig" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding, dropping a BOM
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let decoded = match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.to_string(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.to_string(),
        // UTF-8 and anything unrecognised: lossy UTF-8
        _ => String::from_utf8_lossy(bytes).to_string(),
    };
    decoded.trim_start_matches('\u{feff}').to_string()
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse delimited text with an explicit delimiter.
///
/// # Example
/// ```ignore
/// let table = parse_delimited("a;b\n1;2", ';', "utf-8".into())?;
/// assert_eq!(table.headers, vec!["a", "b"]);
/// ```
pub fn parse_delimited(content: &str, delimiter: char, encoding: String) -> Result<DelimitedTable, CsvError> {
    if content.trim().is_empty() {
        return Err(CsvError::new(1, "Empty CSV file"));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(CsvError::new(1, "No headers found"));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        rows.push(record);
    }

    Ok(DelimitedTable {
        headers,
        rows,
        encoding,
        delimiter,
    })
}

/// Parse bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> Result<DelimitedTable, CsvError> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);
    parse_delimited(&content, delimiter, encoding)
}

/// Parse a file with auto-detection of encoding and delimiter.
pub fn parse_file_auto<P: AsRef<Path>>(path: P) -> Result<DelimitedTable, CsvError> {
    let bytes = std::fs::read(path.as_ref())
        .map_err(|e| CsvError::new(0, format!("Cannot read file '{}': {}", path.as_ref().display(), e)))?;
    parse_bytes_auto(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semicolon_table() {
        let table = parse_delimited("name;age\nAlice;30\nBob;25", ';', "utf-8".into()).unwrap();

        assert_eq!(table.headers, vec!["name", "age"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(&table.rows[1][0], "Bob");
    }

    #[test]
    fn test_quoted_values_keep_delimiters() {
        let table = parse_delimited("id,title\n1,\"Roads, bridges\"", ',', "utf-8".into()).unwrap();
        assert_eq!(&table.rows[0][1], "Roads, bridges");
    }

    #[test]
    fn test_empty_lines_skipped() {
        let table = parse_delimited("a,b\n1,2\n\n3,4\n", ',', "utf-8".into()).unwrap();
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_short_rows_allowed() {
        let table = parse_delimited("a,b,c\n1", ',', "utf-8".into()).unwrap();
        assert_eq!(&table.rows[0][0], "1");
        assert!(table.rows[0].get(2).is_none());
    }

    #[test]
    fn test_error_message_format() {
        let err = CsvError::new(5, "Invalid count")
            .with_column("total_bids")
            .with_value("many");

        let msg = err.to_string();
        assert!(msg.contains("Line 5"));
        assert!(msg.contains("column 'total_bids'"));
        assert!(msg.contains("value 'many'"));
    }

    #[test]
    fn test_empty_csv_error() {
        let err = parse_delimited("", ',', "utf-8".into()).unwrap_err();
        assert!(err.message.contains("Empty"));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), '|');
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("tender_id,year\nA-1,2021".as_bytes());

        let table = parse_bytes_auto(&bytes).unwrap();
        assert_eq!(table.encoding, "utf-8");
        assert_eq!(table.headers[0], "tender_id");
        assert_eq!(table.column_index("YEAR"), Some(1));
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Société");
    }
}
