//! # Tenderflow - procurement tender pipeline
//!
//! Tenderflow turns per-jurisdiction public procurement notices (JSON notice
//! streams and spreadsheets) into analysis-ready and regression-ready tables,
//! and prepares the model frames a statistics engine fits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ .jsonl/xlsx │────▶│   Extract   │────▶│    Clean    │────▶│   Combine   │────▶│    Model    │
//! │ per country │     │ + aggregate │     │ (per ctry)  │     │ (variant)   │     │ frame/grid  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                      raw table           analysis-ready      regression-ready    engine boundary
//! ```
//!
//! Every stage reads and writes comma-delimited UTF-8 tables with a BOM, so
//! stages can be rerun independently.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tenderflow::{run_all, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let (summary, models) = run_all(&config)?;
//! println!("{} models prepared", models.len());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`logs`] - Stage progress logging
//! - [`models`] - Records, countries and fields
//! - [`parser`] - Delimited tables with auto-detection
//! - [`extract`] - Notice and spreadsheet extraction, raw aggregation
//! - [`clean`] - Cleaning and duration derivation
//! - [`combine`] - Cross-country combination and analysis variants
//! - [`model`] - Model specifications, frames, fitting and grids
//! - [`report`] - Row counts, value thresholds, descriptives, LaTeX
//! - [`config`] - Pipeline configuration
//! - [`validation`] - Configuration schema validation
//! - [`pipeline`] - Stage orchestration

// Core modules
pub mod error;
pub mod logs;
pub mod models;

// Tables
pub mod parser;

// Stages
pub mod clean;
pub mod combine;
pub mod extract;
pub mod model;
pub mod report;

// Configuration
pub mod config;
pub mod validation;

// Orchestration
pub mod pipeline;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    CleanError,
    CombineError,
    ConfigError,
    ExtractError,
    ModelError,
    PipelineError,
    PipelineResult,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    AnalysisReadyRecord,
    Country,
    Field,
    FieldValue,
    RegressionReadyRecord,
    TenderRecord,
};

// =============================================================================
// Re-exports - Tables
// =============================================================================

pub use parser::{
    detect_delimiter,
    detect_encoding,
    parse_file_auto,
    read_table_file,
    write_table_file,
    CsvError,
    DelimitedTable,
};

// =============================================================================
// Re-exports - Stages
// =============================================================================

pub use extract::{aggregate_directory, MalformedPolicy, RawTable, SourceFormat};

pub use clean::{clean_records, CleaningConfig, CleaningReport};

pub use combine::{
    combine,
    listwise_delete,
    AnalysisVariant,
    CombineReport,
    CombinedSample,
    OutlierPolicy,
    ValueTransform,
};

pub use model::{
    build_frame,
    build_grid,
    fit_model,
    FittedModel,
    GridSpec,
    ModelEngine,
    ModelFamily,
    ModelFrame,
    ModelSpec,
    Term,
};

// =============================================================================
// Re-exports - Configuration and orchestration
// =============================================================================

pub use config::PipelineConfig;

pub use validation::{is_valid_pipeline_config, validate_pipeline_config};

pub use pipeline::{
    clean_jurisdiction,
    combine_jurisdictions,
    count_rows,
    extract_jurisdiction,
    fit_all,
    fit_prepared,
    prepare_model,
    prepare_named_model,
    run_all,
    thresholds,
    PreparedModel,
    RunSummary,
};
