//! Error types for the tenderflow pipeline.
//!
//! One error enum per pipeline concern:
//!
//! - [`ExtractError`] - Source file discovery and record extraction
//! - [`CleanError`] - Cleaning & derivation stage
//! - [`CombineError`] - Cross-country combination and transforms
//! - [`ConfigError`] - Configuration loading and lookup
//! - [`ModelError`] - Model frame preparation and engine fitting
//! - [`PipelineError`] - Top-level orchestration errors
//!
//! Delimited-table errors carry line/column context and live in
//! [`crate::parser::CsvError`]. Conversions are `From` implementations so `?`
//! works across stage boundaries.

use std::path::PathBuf;

use thiserror::Error;

use crate::parser::CsvError;

// =============================================================================
// Extraction Errors
// =============================================================================

/// Errors while discovering or extracting source records.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The configured input directory does not exist.
    #[error("Input directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    /// The input directory holds no file of the expected kind.
    #[error("No {kind} source files found in {}", .dir.display())]
    NoSourceFiles { dir: PathBuf, kind: String },

    /// The year could not be derived from a source file name.
    #[error("Cannot derive year from file name '{0}'")]
    YearFromFileName(String),

    /// Failed to read a source file.
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A notice line is not a valid JSON object.
    #[error("{file}, line {line}: malformed notice: {message}")]
    MalformedNotice {
        file: String,
        line: usize,
        message: String,
    },

    /// A spreadsheet cell cannot be coerced into its canonical type.
    #[error("{file}, row {row}: invalid value '{value}' for column '{column}'")]
    InvalidCell {
        file: String,
        row: usize,
        column: String,
        value: String,
    },

    /// The workbook could not be opened or holds no worksheet.
    #[error("Spreadsheet error in {file}: {message}")]
    Workbook { file: String, message: String },

    /// Delimited table error (sheet exports, raw table output).
    #[error("Table error: {0}")]
    Table(#[from] CsvError),
}

// =============================================================================
// Cleaning Errors
// =============================================================================

/// Errors during the cleaning & derivation stage.
#[derive(Debug, Error)]
pub enum CleanError {
    /// The raw table of a configured jurisdiction does not exist.
    #[error("Raw table not found: {}", .0.display())]
    MissingInput(PathBuf),

    /// Failed to read or write a table.
    #[error("Table error: {0}")]
    Table(#[from] CsvError),

    /// Failed to write the cleaning report.
    #[error("Report error: {0}")]
    Report(#[from] serde_json::Error),

    /// IO error while persisting outputs.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Combination Errors
// =============================================================================

/// Errors while combining jurisdictions and deriving regression variables.
#[derive(Debug, Error)]
pub enum CombineError {
    /// An analysis-ready table is missing.
    #[error("Analysis-ready table not found: {}", .0.display())]
    MissingInput(PathBuf),

    /// No rows left at a step that needs a sample statistic.
    #[error("No rows left after {step}")]
    EmptySample { step: String },

    /// Failed to read or write a table.
    #[error("Table error: {0}")]
    Table(#[from] CsvError),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading or querying the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration is not valid JSON or does not deserialize.
    #[error("Config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration does not satisfy the embedded schema.
    #[error("Config validation failed: {errors:?}")]
    Schema { errors: Vec<String> },

    /// Unknown analysis variant name.
    #[error("Unknown analysis variant: {0}")]
    UnknownVariant(String),

    /// Unknown model name.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Jurisdiction is not configured.
    #[error("Jurisdiction not configured: {0}")]
    UnknownJurisdiction(String),
}

// =============================================================================
// Model Boundary Errors
// =============================================================================

/// Errors at the model-fitting boundary.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model specification is inconsistent.
    #[error("Invalid model specification '{model}': {message}")]
    InvalidSpec { model: String, message: String },

    /// No rows survive listwise deletion.
    #[error("Model '{0}' has no complete observations")]
    EmptyFrame(String),

    /// The requested reference category does not occur in the data.
    #[error("Reference level '{level}' not present for '{field}'")]
    MissingReferenceLevel { field: String, level: String },

    /// A categorical value has no column in the design.
    #[error("Unknown level '{level}' for '{field}'")]
    UnknownLevel { field: String, level: String },

    /// Every optimisation strategy failed. Non-fatal for the run.
    #[error("Model '{model}' did not converge: {}", .causes.join("; "))]
    NonConvergence { model: String, causes: Vec<String> },

    /// The external engine rejected a request.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Failed to export the model frame.
    #[error("Table error: {0}")]
    Table(#[from] CsvError),
}

impl ModelError {
    /// Whether the run can continue after this error.
    pub fn is_non_fatal(&self) -> bool {
        matches!(self, ModelError::NonConvergence { .. })
    }
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Extraction error.
    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// Cleaning error.
    #[error("Cleaning error: {0}")]
    Clean(#[from] CleanError),

    /// Combination error.
    #[error("Combination error: {0}")]
    Combine(#[from] CombineError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Model boundary error.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Table error outside a specific stage.
    #[error("Table error: {0}")]
    Table(#[from] CsvError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for extraction.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Result type for cleaning.
pub type CleanResult<T> = Result<T, CleanError>;

/// Result type for combination.
pub type CombineResult<T> = Result<T, CombineError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for the model boundary.
pub type ModelResult<T> = Result<T, ModelError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
