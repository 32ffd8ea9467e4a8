//! Pipeline configuration.
//!
//! A single JSON document (validated against the embedded schema, see
//! [`crate::validation`]) sets the directories, the jurisdictions and their
//! source formats, the stage settings, the analysis variants and the model
//! specifications. Every key is optional; built-in variants and models are
//! always available and a configured entry with the same name replaces the
//! built-in one.
//!
//! ```json
//! {
//!   "data_dir": "data",
//!   "results_dir": "results",
//!   "extraction": { "malformed": "skip_and_count" },
//!   "variants": {
//!     "strict": { "outlier": { "policy": "ceiling", "column": "total_bids", "limit": 50 } }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clean::CleaningConfig;
use crate::combine::{AnalysisVariant, CountColumn, OutlierPolicy, ValueTransform};
use crate::error::{ConfigError, ConfigResult};
use crate::extract::{MalformedPolicy, SourceFormat};
use crate::model::{GridSpec, LevelFilter, ModelFamily, ModelSpec, Term};
use crate::models::{Country, Field};
use crate::validation::validate_pipeline_config;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TENDERFLOW_CONFIG";
/// Environment override of `data_dir`.
pub const DATA_DIR_ENV: &str = "TENDERFLOW_DATA_DIR";
/// Environment override of `results_dir`.
pub const RESULTS_DIR_ENV: &str = "TENDERFLOW_RESULTS_DIR";

// =============================================================================
// Sections
// =============================================================================

/// Where and how one jurisdiction's raw files are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JurisdictionConfig {
    pub country: Country,
    pub source: SourceFormat,
    /// Sub-directory of `data_dir`; defaults to the country label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

impl JurisdictionConfig {
    pub fn new(country: Country, source: SourceFormat) -> Self {
        Self {
            country,
            source,
            directory: None,
        }
    }
}

/// Settings of the extraction stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub malformed: MalformedPolicy,
}

/// Complete configuration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    #[serde(default = "default_jurisdictions")]
    pub jurisdictions: Vec<JurisdictionConfig>,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub cleaning: CleaningConfig,

    #[serde(default)]
    pub variants: BTreeMap<String, AnalysisVariant>,

    #[serde(default)]
    pub models: Vec<ModelSpec>,

    #[serde(default)]
    pub grid: GridSpec,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_jurisdictions() -> Vec<JurisdictionConfig> {
    vec![
        JurisdictionConfig::new(Country::Estonia, SourceFormat::JsonNotices),
        JurisdictionConfig::new(Country::France, SourceFormat::Spreadsheet),
        JurisdictionConfig::new(Country::Germany, SourceFormat::JsonNotices),
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut config = Self {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            jurisdictions: default_jurisdictions(),
            extraction: ExtractionConfig::default(),
            cleaning: CleaningConfig::default(),
            variants: BTreeMap::new(),
            models: Vec::new(),
            grid: GridSpec::default(),
        };
        config.merge_builtins();
        config
    }
}

// =============================================================================
// Built-in variants and models
// =============================================================================

/// Variants of the published analyses.
///
/// - `main`: bid-count models, drops the `total_bids == 999` placeholder
/// - `sme`: SME models, drops the `sme_bids == 999` placeholder
/// - `zinb`: `total_bids < 100`, positive durations, log value (rows without value dropped)
/// - `zinb_log1p`: as `zinb` but `ln(1 + value)`, keeping every row
pub fn builtin_variants() -> BTreeMap<String, AnalysisVariant> {
    let zinb = AnalysisVariant {
        outlier: OutlierPolicy::Ceiling {
            column: CountColumn::TotalBids,
            limit: 100,
        },
        require_positive_duration: true,
        value_transform: ValueTransform::LogPositive,
        ..AnalysisVariant::default()
    };

    let mut variants = BTreeMap::new();
    variants.insert("main".to_string(), AnalysisVariant::default());
    variants.insert(
        "sme".to_string(),
        AnalysisVariant {
            outlier: OutlierPolicy::Sentinel {
                column: CountColumn::SmeBids,
                value: 999,
            },
            ..AnalysisVariant::default()
        },
    );
    variants.insert(
        "zinb_log1p".to_string(),
        AnalysisVariant {
            value_transform: ValueTransform::Log1p,
            ..zinb.clone()
        },
    );
    variants.insert("zinb".to_string(), zinb);
    variants
}

fn numeric(field: Field) -> Term {
    Term::Numeric { field }
}

fn factor(field: Field) -> Term {
    Term::Factor { field, reference: None }
}

fn by_country(numeric: Field, reference: Option<&str>) -> Term {
    Term::Interaction {
        numeric,
        factor: Field::Country,
        reference: reference.map(str::to_string),
    }
}

fn model(name: &str, family: ModelFamily, outcome: Field, terms: Vec<Term>, variant: &str) -> ModelSpec {
    ModelSpec {
        name: name.to_string(),
        family,
        outcome,
        terms,
        filters: Vec::new(),
        variant: variant.to_string(),
    }
}

/// Hypothesis models and their robustness checks.
pub fn builtin_models() -> Vec<ModelSpec> {
    let duration_controls = |first: Term| {
        vec![
            first,
            factor(Field::Year),
            factor(Field::ProcurementMethod),
        ]
    };
    let duration_main = || {
        let mut terms = duration_controls(numeric(Field::DurationDaysCapped));
        terms.insert(1, factor(Field::Country));
        terms
    };
    let zinb_terms = |category: bool| {
        let mut terms = vec![
            by_country(Field::ZDuration, Some("Estonia")),
            numeric(Field::ZValue),
            factor(Field::ProcurementMethod),
        ];
        if category {
            terms.push(factor(Field::ProcurementCategory));
        }
        terms.push(factor(Field::Year));
        terms
    };

    let mut award_terms = zinb_terms(true);
    award_terms.push(factor(Field::AwardCriteria));

    let mut services = model(
        "robust_services",
        ModelFamily::ZeroInflatedNegativeBinomial,
        Field::TotalBids,
        zinb_terms(false),
        "zinb",
    );
    services.filters.push(LevelFilter {
        field: Field::ProcurementCategory,
        level: "services".to_string(),
    });

    vec![
        model("h1_negbin", ModelFamily::NegativeBinomial, Field::TotalBids, duration_main(), "main"),
        model(
            "h3_negbin",
            ModelFamily::NegativeBinomial,
            Field::TotalBids,
            duration_controls(by_country(Field::DurationDaysCapped, None)),
            "main",
        ),
        model("h2_negbin", ModelFamily::NegativeBinomial, Field::SmeBids, duration_main(), "sme"),
        model("h2_share_ols", ModelFamily::Ols, Field::SmeShare, duration_main(), "sme"),
        model(
            "zinb_total_bids",
            ModelFamily::ZeroInflatedNegativeBinomial,
            Field::TotalBids,
            zinb_terms(true),
            "zinb",
        ),
        model("glm_sme_share", ModelFamily::FractionalLogit, Field::SmeShare, zinb_terms(true), "zinb"),
        model(
            "robust_award_criteria",
            ModelFamily::ZeroInflatedNegativeBinomial,
            Field::TotalBids,
            award_terms,
            "zinb",
        ),
        services,
    ]
}

// =============================================================================
// Loading
// =============================================================================

impl PipelineConfig {
    /// Load, validate and complete a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// The file at `path` if given, the built-in defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> ConfigResult<Self> {
        validate_pipeline_config(&value)?;
        let mut config: Self = serde_json::from_value(value)?;
        config.merge_builtins();
        config.check_references()?;
        Ok(config)
    }

    /// Add built-in variants and models that the file does not redefine.
    fn merge_builtins(&mut self) {
        for (name, variant) in builtin_variants() {
            self.variants.entry(name).or_insert(variant);
        }
        let builtin: Vec<ModelSpec> = builtin_models()
            .into_iter()
            .filter(|b| !self.models.iter().any(|m| m.name == b.name))
            .collect();
        let configured = std::mem::take(&mut self.models);
        self.models = builtin.into_iter().chain(configured).collect();
    }

    /// Every model must name a known variant.
    fn check_references(&self) -> ConfigResult<()> {
        for spec in &self.models {
            if !self.variants.contains_key(&spec.variant) {
                return Err(ConfigError::UnknownVariant(format!(
                    "{} (used by model {})",
                    spec.variant, spec.name
                )));
            }
        }
        Ok(())
    }

    /// Directory overrides from the command line or the environment.
    pub fn with_overrides(mut self, data_dir: Option<PathBuf>, results_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = data_dir {
            self.data_dir = dir;
        }
        if let Some(dir) = results_dir {
            self.results_dir = dir;
        }
        self
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn variant(&self, name: &str) -> ConfigResult<&AnalysisVariant> {
        self.variants
            .get(name)
            .ok_or_else(|| ConfigError::UnknownVariant(name.to_string()))
    }

    pub fn model(&self, name: &str) -> ConfigResult<&ModelSpec> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
    }

    pub fn jurisdiction(&self, country: Country) -> ConfigResult<&JurisdictionConfig> {
        self.jurisdictions
            .iter()
            .find(|j| j.country == country)
            .ok_or_else(|| ConfigError::UnknownJurisdiction(country.label().to_string()))
    }

    pub fn countries(&self) -> Vec<Country> {
        self.jurisdictions.iter().map(|j| j.country).collect()
    }

    // =========================================================================
    // Paths
    // =========================================================================

    /// Raw input directory of a jurisdiction.
    pub fn input_dir(&self, country: Country) -> ConfigResult<PathBuf> {
        let jurisdiction = self.jurisdiction(country)?;
        let directory = jurisdiction.directory.as_deref().unwrap_or(country.label());
        Ok(self.data_dir.join(directory))
    }

    pub fn raw_table_path(&self, country: Country) -> PathBuf {
        self.results_dir
            .join(format!("{}_all_tenders_raw.csv", country.file_stem()))
    }

    pub fn analysis_table_path(&self, country: Country) -> PathBuf {
        self.results_dir
            .join(format!("{}_analysis_ready.csv", country.file_stem()))
    }

    pub fn cleaning_report_path(&self, country: Country) -> PathBuf {
        self.results_dir
            .join(format!("{}_cleaning_report.json", country.file_stem()))
    }

    /// Analysis-ready tables of every configured jurisdiction.
    pub fn analysis_table_paths(&self) -> Vec<(Country, PathBuf)> {
        self.countries()
            .into_iter()
            .map(|c| (c, self.analysis_table_path(c)))
            .collect()
    }

    pub fn regression_table_path(&self, variant: &str) -> PathBuf {
        self.results_dir.join(format!("regression_ready_{}.csv", variant))
    }

    pub fn model_frame_path(&self, model: &str) -> PathBuf {
        self.results_dir.join(format!("{}_frame.csv", model))
    }

    pub fn formula_path(&self, model: &str) -> PathBuf {
        self.results_dir.join(format!("{}_formula.txt", model))
    }

    pub fn grid_path(&self, model: &str) -> PathBuf {
        self.results_dir.join(format!("{}_grid.csv", model))
    }
}
