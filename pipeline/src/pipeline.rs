//! Stage orchestration over a [`PipelineConfig`].
//!
//! Each function runs one stage for the configured paths and persists its
//! output table; [`run_all`] chains them for every jurisdiction, variant and
//! model:
//!
//! ```text
//! extract (per country) ─▶ clean (per country) ─▶ combine (per variant)
//!                                                   └─▶ prepare (per model)
//! ```
//!
//! Stages only communicate through the tables on disk, so any stage can be
//! rerun on its own.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::clean::{clean_records, CleaningReport};
use crate::combine::{combine, load_analysis_tables, CombinedSample};
use crate::config::PipelineConfig;
use crate::error::{CleanError, CleanResult, CombineError, ModelError, ModelResult, PipelineError, PipelineResult};
use crate::extract::{aggregate_directory, RawTable};
use crate::logs::{log_error, log_info, log_success, log_warning};
use crate::model::{build_frame, build_grid, fit_model, FittedModel, ModelEngine, ModelFrame, ModelSpec, PredictionGrid};
use crate::models::{Country, TenderRecord};
use crate::parser::{read_table_file, write_table_file};
use crate::report::{count_table_rows, threshold_summary, RowCount, RowCountReport, ThresholdSummary};

// =============================================================================
// Extraction and cleaning
// =============================================================================

/// Extract every source file of `country` into its raw table.
pub fn extract_jurisdiction(config: &PipelineConfig, country: Country) -> PipelineResult<RawTable> {
    let jurisdiction = config.jurisdiction(country)?;
    let input = config.input_dir(country)?;

    log_info(format!("🚀 Extracting {}", country));
    let table = aggregate_directory(&input, jurisdiction.source, config.extraction.malformed)?;

    let path = config.raw_table_path(country);
    table.write(&path)?;
    log_success(format!("Saved {}", path.display()));
    Ok(table)
}

/// Clean the raw table of `country` into its analysis-ready table and report.
pub fn clean_jurisdiction(config: &PipelineConfig, country: Country) -> PipelineResult<CleaningReport> {
    let raw_path = config.raw_table_path(country);
    if !raw_path.is_file() {
        return Err(CleanError::MissingInput(raw_path).into());
    }
    let raw: Vec<TenderRecord> = read_table_file(&raw_path).map_err(CleanError::from)?;

    let outcome = clean_records(&raw, &config.cleaning);
    outcome.report.log(country.label());

    write_table_file(&config.analysis_table_path(country), &outcome.records).map_err(CleanError::from)?;
    write_cleaning_report(&config.cleaning_report_path(country), &outcome.report)?;
    Ok(outcome.report)
}

fn write_cleaning_report(path: &Path, report: &CleaningReport) -> CleanResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

// =============================================================================
// Combination
// =============================================================================

/// Combine the analysis-ready tables under `variant` and persist the sample.
pub fn combine_jurisdictions(config: &PipelineConfig, variant: &str) -> PipelineResult<CombinedSample> {
    let settings = config.variant(variant)?;

    log_info(format!("🔗 Combining jurisdictions (variant {})", variant));
    let tables = load_analysis_tables(&config.analysis_table_paths())?;
    let sample = combine(tables, settings)?;
    sample.report.log();

    let path = config.regression_table_path(variant);
    write_table_file(&path, &sample.records).map_err(CombineError::from)?;
    log_success(format!("Saved {}", path.display()));
    Ok(sample)
}

// =============================================================================
// Model boundary
// =============================================================================

/// Everything handed to a statistics engine for one model.
#[derive(Debug, Clone)]
pub struct PreparedModel {
    pub spec: ModelSpec,
    pub frame: ModelFrame,
    /// Present when the model has the configured sweep and grouping predictors.
    pub grid: Option<PredictionGrid>,
}

/// Build the frame (and grid) of `spec` from a combined sample and persist
/// the frame, its formula and the grid.
pub fn prepare_model(config: &PipelineConfig, spec: &ModelSpec, sample: &CombinedSample) -> PipelineResult<PreparedModel> {
    let frame = build_frame(spec, &sample.records)?;
    log_info(format!(
        "📐 {}: {} observations ({} incomplete dropped)",
        spec.name,
        frame.len(),
        frame.rows_dropped
    ));

    frame.write_csv(&config.model_frame_path(&spec.name))?;
    fs::write(config.formula_path(&spec.name), format!("{}\n", frame.formula))?;

    let grid = if grid_applies(config, &frame) {
        let duration_stats = sample.report.duration_mean.zip(sample.report.duration_std);
        let grid = build_grid(&frame, &config.grid, duration_stats)?;
        grid.write_csv(&config.grid_path(&spec.name), &frame.predictors)?;
        Some(grid)
    } else {
        None
    };

    Ok(PreparedModel {
        spec: spec.clone(),
        frame,
        grid,
    })
}

fn grid_applies(config: &PipelineConfig, frame: &ModelFrame) -> bool {
    frame.predictors.contains(&config.grid.sweep)
        && !config.grid.sweep.is_categorical()
        && frame.factor(config.grid.group_by).is_some()
}

/// Combine the model's variant and prepare the model.
pub fn prepare_named_model(config: &PipelineConfig, name: &str) -> PipelineResult<PreparedModel> {
    let spec = config.model(name)?.clone();
    let sample = combine_jurisdictions(config, &spec.variant)?;
    prepare_model(config, &spec, &sample)
}

/// Fit a prepared model and fill its grid predictions.
pub fn fit_prepared<E: ModelEngine + ?Sized>(engine: &E, prepared: &mut PreparedModel) -> ModelResult<FittedModel> {
    let fitted = fit_model(engine, &prepared.spec, &prepared.frame)?;
    if let Some(grid) = prepared.grid.as_mut() {
        grid.predict(engine, &fitted, &prepared.frame)?;
    }
    Ok(fitted)
}

/// Fit every prepared model; non-convergence is reported and skipped.
pub fn fit_all<E: ModelEngine + ?Sized>(
    engine: &E,
    prepared: &mut [PreparedModel],
) -> ModelResult<Vec<(String, Option<FittedModel>)>> {
    let mut results = Vec::with_capacity(prepared.len());
    for model in prepared.iter_mut() {
        match fit_prepared(engine, model) {
            Ok(fitted) => results.push((model.spec.name.clone(), Some(fitted))),
            Err(e) if e.is_non_fatal() => {
                log_warning(e.to_string());
                results.push((model.spec.name.clone(), None));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(results)
}

// =============================================================================
// Reports
// =============================================================================

/// Raw versus analysis-ready rows of every configured jurisdiction.
pub fn count_rows(config: &PipelineConfig) -> PipelineResult<RowCountReport> {
    let mut countries = Vec::new();
    for country in config.countries() {
        let raw_path = config.raw_table_path(country);
        if !raw_path.is_file() {
            return Err(CleanError::MissingInput(raw_path).into());
        }
        let ready_path = config.analysis_table_path(country);
        if !ready_path.is_file() {
            return Err(CombineError::MissingInput(ready_path).into());
        }
        countries.push(RowCount {
            country,
            raw: count_table_rows(&raw_path)?,
            ready: count_table_rows(&ready_path)?,
        });
    }
    Ok(RowCountReport { countries })
}

/// Value distribution against the EU thresholds, per jurisdiction and pooled.
pub fn thresholds(config: &PipelineConfig) -> PipelineResult<ThresholdSummary> {
    let tables = load_analysis_tables(&config.analysis_table_paths())?;
    Ok(threshold_summary(&tables))
}

// =============================================================================
// Full run
// =============================================================================

/// Outcome of [`run_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub cleaning: Vec<(Country, CleaningReport)>,
    pub variants: Vec<(String, usize)>,
    pub models: Vec<(String, usize)>,
    pub failed_models: Vec<(String, String)>,
}

/// Every stage for every configured jurisdiction, variant and model.
///
/// Stage errors abort the run. A model whose frame is empty is reported and
/// skipped so one sparse subsample does not block the others.
pub fn run_all(config: &PipelineConfig) -> PipelineResult<(RunSummary, Vec<PreparedModel>)> {
    let mut summary = RunSummary::default();

    for country in config.countries() {
        extract_jurisdiction(config, country)?;
        let report = clean_jurisdiction(config, country)?;
        summary.cleaning.push((country, report));
    }

    let mut variants: Vec<&str> = config.models.iter().map(|m| m.variant.as_str()).collect();
    variants.sort_unstable();
    variants.dedup();

    let mut prepared = Vec::new();
    for variant in variants {
        let sample = combine_jurisdictions(config, variant)?;
        summary.variants.push((variant.to_string(), sample.records.len()));

        for spec in config.models.iter().filter(|m| m.variant == variant) {
            match prepare_model(config, spec, &sample) {
                Ok(model) => {
                    summary.models.push((spec.name.clone(), model.frame.len()));
                    prepared.push(model);
                }
                Err(PipelineError::Model(e @ ModelError::EmptyFrame(_))) => {
                    log_error(e.to_string());
                    summary.failed_models.push((spec.name.clone(), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
    }

    log_success(format!(
        "Run complete: {} jurisdictions, {} models prepared",
        summary.cleaning.len(),
        summary.models.len()
    ));
    Ok((summary, prepared))
}
