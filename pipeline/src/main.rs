//! Tenderflow CLI - procurement tender pipeline
//!
//! # Stage Commands
//!
//! ```bash
//! tenderflow extract                    # Raw tables for every jurisdiction
//! tenderflow clean --country Estonia    # Analysis-ready table + cleaning report
//! tenderflow combine --variant zinb     # Regression-ready table for one variant
//! tenderflow prepare-model zinb_total_bids
//! tenderflow run                        # Everything above, every model
//! ```
//!
//! # Report Commands
//!
//! ```bash
//! tenderflow count                      # Raw vs analysis-ready rows
//! tenderflow thresholds                 # Tender values against EU thresholds
//! tenderflow describe --variant main    # Descriptive statistics
//! tenderflow latex --variant main       # LaTeX descriptive + correlation tables
//! tenderflow example-config             # Print the built-in configuration
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tenderflow::config::{CONFIG_ENV, DATA_DIR_ENV, RESULTS_DIR_ENV};
use tenderflow::logs::LOG_JOURNAL;
use tenderflow::report::{
    correlation_matrix, describe_analysis, describe_fields, latex_correlation_table, latex_descriptive_table,
    render_describe, ValueThresholdReport,
};
use tenderflow::{
    clean_jurisdiction, combine_jurisdictions, count_rows, extract_jurisdiction, prepare_named_model,
    read_table_file, run_all, thresholds, validate_pipeline_config, AnalysisReadyRecord, CombineError, Country,
    Field, PipelineConfig, RegressionReadyRecord,
};
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Numeric fields reported by `describe` and `latex` unless `--fields` is given.
const DEFAULT_FIELDS: [Field; 5] = [
    Field::TotalBids,
    Field::SmeBids,
    Field::SmeShare,
    Field::DurationDaysCapped,
    Field::LogTenderValue,
];

#[derive(Parser)]
#[command(name = "tenderflow")]
#[command(about = "Procurement tender extraction, cleaning and model preparation", long_about = None)]
struct Cli {
    /// Pipeline configuration file (JSON)
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Root directory of the per-country source files
    #[arg(long, global = true, env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Directory all tables and reports are written to
    #[arg(long, global = true, env = RESULTS_DIR_ENV)]
    results_dir: Option<PathBuf>,

    /// Also write the run's log entries as JSON to this file
    #[arg(long, global = true)]
    log_json: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the raw table of one or every jurisdiction
    Extract {
        #[arg(long, value_parser = parse_country)]
        country: Option<Country>,
    },

    /// Clean raw tables into analysis-ready tables
    Clean {
        #[arg(long, value_parser = parse_country)]
        country: Option<Country>,
    },

    /// Combine the analysis-ready tables under one analysis variant
    Combine {
        #[arg(short, long, default_value = "main")]
        variant: String,
    },

    /// Write the model frame, formula and prediction grid of a model
    PrepareModel {
        /// Model name (see `example-config`)
        name: String,
    },

    /// Raw versus analysis-ready row counts
    Count,

    /// Tender values against the EU thresholds
    Thresholds,

    /// Descriptive statistics of the analysis-ready or regression-ready data
    Describe {
        /// Regression-ready variant; analysis-ready tables when omitted
        #[arg(short, long)]
        variant: Option<String>,

        #[arg(long, value_delimiter = ',', value_parser = parse_field)]
        fields: Vec<Field>,
    },

    /// LaTeX descriptive and correlation tables for a variant
    Latex {
        #[arg(short, long, default_value = "main")]
        variant: String,

        #[arg(long, value_delimiter = ',', value_parser = parse_field)]
        fields: Vec<Field>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Every stage for every jurisdiction, variant and model
    Run,

    /// Validate a configuration file against the schema
    ValidateConfig {
        input: PathBuf,
    },

    /// Print the effective configuration as JSON
    ExampleConfig,
}

fn parse_country(raw: &str) -> Result<Country, String> {
    Country::from_label(raw).ok_or_else(|| format!("unknown country '{}'", raw))
}

fn parse_field(raw: &str) -> Result<Field, String> {
    Field::from_name(raw).ok_or_else(|| format!("unknown field '{}'", raw))
}

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(&cli).and_then(|config| run_command(&config, &cli.command));

    if let Some(path) = cli.log_json.as_deref() {
        if let Err(e) = write_journal(path) {
            eprintln!("⚠️  Could not write log journal: {}", e);
        }
    }

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(config: &PipelineConfig, command: &Commands) -> CliResult {
    match command {
        Commands::Extract { country } => cmd_extract(config, *country),
        Commands::Clean { country } => cmd_clean(config, *country),
        Commands::Combine { variant } => cmd_combine(config, variant),
        Commands::PrepareModel { name } => cmd_prepare_model(config, name),
        Commands::Count => cmd_count(config),
        Commands::Thresholds => cmd_thresholds(config),
        Commands::Describe { variant, fields } => cmd_describe(config, variant.as_deref(), fields),
        Commands::Latex { variant, fields, output } => cmd_latex(config, variant, fields, output.as_deref()),
        Commands::Run => cmd_run(config),
        Commands::ValidateConfig { input } => cmd_validate_config(input),
        Commands::ExampleConfig => cmd_example_config(config),
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    Ok(config.with_overrides(cli.data_dir.clone(), cli.results_dir.clone()))
}

fn write_journal(path: &Path) -> CliResult {
    let json = serde_json::to_string_pretty(&LOG_JOURNAL.entries())?;
    fs::write(path, json)?;
    Ok(())
}

fn selected(config: &PipelineConfig, country: Option<Country>) -> Vec<Country> {
    match country {
        Some(c) => vec![c],
        None => config.countries(),
    }
}

fn cmd_extract(config: &PipelineConfig, country: Option<Country>) -> CliResult {
    for country in selected(config, country) {
        let table = extract_jurisdiction(config, country)?;
        eprintln!(
            "📄 {}: {} rows from {} files",
            country,
            table.total_rows(),
            table.files.len()
        );
    }
    Ok(())
}

fn cmd_clean(config: &PipelineConfig, country: Option<Country>) -> CliResult {
    for country in selected(config, country) {
        let report = clean_jurisdiction(config, country)?;
        eprintln!(
            "🧹 {}: {} -> {} rows ({} dropped)",
            country,
            report.rows_loaded,
            report.rows_final,
            report.dropped_total()
        );
    }
    Ok(())
}

fn cmd_combine(config: &PipelineConfig, variant: &str) -> CliResult {
    let sample = combine_jurisdictions(config, variant)?;
    eprintln!("🔗 {} regression-ready rows ({})", sample.records.len(), variant);
    eprintln!("   💾 Saved to: {}", config.regression_table_path(variant).display());
    Ok(())
}

fn cmd_prepare_model(config: &PipelineConfig, name: &str) -> CliResult {
    let prepared = prepare_named_model(config, name)?;
    println!("{}", prepared.frame.formula);
    eprintln!("📐 {} observations, {} design columns", prepared.frame.len(), prepared.frame.column_names().len());
    eprintln!("   💾 Frame: {}", config.model_frame_path(name).display());
    if prepared.grid.is_some() {
        eprintln!("   💾 Grid: {}", config.grid_path(name).display());
    }
    Ok(())
}

fn cmd_count(config: &PipelineConfig) -> CliResult {
    let report = count_rows(config)?;
    print!("{}", report.render());
    println!("\n{}", report.summary_sentence());
    Ok(())
}

fn cmd_thresholds(config: &PipelineConfig) -> CliResult {
    let summary = thresholds(config)?;
    let blocks = summary
        .countries
        .iter()
        .map(|(country, report)| (country.to_string(), report.as_ref()))
        .chain(std::iter::once(("All".to_string(), summary.pooled.as_ref())));

    for (label, report) in blocks {
        match report {
            None => println!("{}: no positive tender values", label),
            Some(r) => print_threshold_block(&label, r),
        }
    }
    Ok(())
}

fn print_threshold_block(label: &str, r: &ValueThresholdReport) {
    println!("{} ({} values)", label, r.observations);
    println!("  min {:.0}  median {:.0}  mean {:.0}  max {:.0}", r.min, r.median, r.mean, r.max);
    for share in &r.below {
        println!("  below {:>9.0}: {:>5.1}%", share.threshold, share.share * 100.0);
    }
    println!("  -> {}", r.verdict.describe());
}

fn load_regression_table(config: &PipelineConfig, variant: &str) -> Result<Vec<RegressionReadyRecord>, Box<dyn std::error::Error>> {
    config.variant(variant)?;
    let path = config.regression_table_path(variant);
    if !path.is_file() {
        return Err(CombineError::MissingInput(path).into());
    }
    Ok(read_table_file(&path)?)
}

fn fields_or_default(fields: &[Field]) -> Vec<Field> {
    if fields.is_empty() {
        DEFAULT_FIELDS.to_vec()
    } else {
        fields.to_vec()
    }
}

fn cmd_describe(config: &PipelineConfig, variant: Option<&str>, fields: &[Field]) -> CliResult {
    match variant {
        Some(variant) => {
            let records = load_regression_table(config, variant)?;
            println!("{} ({} rows)", variant, records.len());
            print!("{}", render_describe(&describe_fields(&records, &fields_or_default(fields))));
        }
        None => {
            for (country, path) in config.analysis_table_paths() {
                if !path.is_file() {
                    return Err(CombineError::MissingInput(path).into());
                }
                let records: Vec<AnalysisReadyRecord> = read_table_file(&path)?;
                println!("{} ({} rows)", country, records.len());
                print!("{}", render_describe(&describe_analysis(&records)));
                println!();
            }
        }
    }
    Ok(())
}

fn cmd_latex(config: &PipelineConfig, variant: &str, fields: &[Field], output: Option<&Path>) -> CliResult {
    let records = load_regression_table(config, variant)?;
    let fields = fields_or_default(fields);

    let descriptives = latex_descriptive_table(
        &describe_fields(&records, &fields),
        &format!("Descriptive statistics ({})", variant),
        &format!("tab:descriptives_{}", variant),
    );
    let correlations = latex_correlation_table(
        &correlation_matrix(&records, &fields),
        &format!("Correlation matrix ({})", variant),
        &format!("tab:correlations_{}", variant),
    );
    let content = format!("{}\n{}", descriptives, correlations);

    match output {
        Some(path) => {
            fs::write(path, content)?;
            eprintln!("💾 Output written to: {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn cmd_run(config: &PipelineConfig) -> CliResult {
    let (summary, prepared) = run_all(config)?;

    eprintln!("\n📊 Summary");
    for (country, report) in &summary.cleaning {
        eprintln!("   {}: {} analysis-ready rows", country, report.rows_final);
    }
    for (variant, rows) in &summary.variants {
        eprintln!("   variant {}: {} rows", variant, rows);
    }
    for model in &prepared {
        eprintln!("   📐 {} ({} obs): {}", model.spec.name, model.frame.len(), model.frame.formula);
    }
    for (name, reason) in &summary.failed_models {
        eprintln!("   ❌ {}: {}", name, reason);
    }

    eprintln!("\n✨ Done!");
    Ok(())
}

fn cmd_validate_config(input: &Path) -> CliResult {
    eprintln!("✔️  Validating: {}", input.display());

    let content = fs::read_to_string(input)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    validate_pipeline_config(&value)?;
    PipelineConfig::from_value(value)?;

    eprintln!("✅ Configuration is valid");
    Ok(())
}

fn cmd_example_config(config: &PipelineConfig) -> CliResult {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
