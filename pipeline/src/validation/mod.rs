//! JSON Schema validation for pipeline configuration files.
//!
//! The schema is embedded at compile time from `schemas/pipeline-config.json`
//! and checked with JSON Schema Draft 7 before a configuration is
//! deserialized, so every mistake in a hand-written file is reported at once
//! instead of the first serde message.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use tenderflow::validation::is_valid_pipeline_config;
//!
//! let config = json!({ "data_dir": "data", "grid": { "points": 50 } });
//! assert!(is_valid_pipeline_config(&config));
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};

static PIPELINE_CONFIG_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/pipeline-config.json")).expect("Invalid embedded schema")
});

/// Validate `data` against `schema`.
///
/// Returns every validation error message on failure.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick yes/no check.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate a parsed configuration document.
pub fn validate_pipeline_config(data: &Value) -> ConfigResult<()> {
    validate(&PIPELINE_CONFIG_SCHEMA, data).map_err(|errors| ConfigError::Schema { errors })
}

pub fn is_valid_pipeline_config(data: &Value) -> bool {
    is_valid(&PIPELINE_CONFIG_SCHEMA, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_config_is_valid() {
        assert!(is_valid_pipeline_config(&json!({})));
    }

    #[test]
    fn test_full_config() {
        let config = json!({
            "data_dir": "data",
            "results_dir": "results",
            "jurisdictions": [
                { "country": "Estonia", "source": "json_notices" },
                { "country": "France", "source": "spreadsheet", "directory": "fr" }
            ],
            "extraction": { "malformed": "skip_and_count" },
            "cleaning": { "accepted_methods": ["open"] },
            "variants": {
                "strict": {
                    "outlier": { "policy": "ceiling", "column": "total_bids", "limit": 50 },
                    "require_positive_duration": true,
                    "value_transform": "log1p"
                }
            },
            "models": [{
                "name": "services_only",
                "family": "negative_binomial",
                "outcome": "total_bids",
                "terms": [
                    { "kind": "numeric", "field": "duration_days_capped" },
                    { "kind": "factor", "field": "country", "reference": "France" }
                ],
                "filters": [{ "field": "procurement_category", "level": "services" }],
                "variant": "strict"
            }],
            "grid": { "sweep": "z_duration", "group_by": "country", "points": 25 }
        });
        assert!(validate_pipeline_config(&config).is_ok());
    }

    #[test]
    fn test_unknown_top_level_key() {
        assert!(!is_valid_pipeline_config(&json!({ "data_directory": "data" })));
    }

    #[test]
    fn test_outlier_policy_needs_its_bound() {
        let config = json!({
            "variants": {
                "broken": { "outlier": { "policy": "sentinel", "column": "total_bids", "limit": 5 } }
            }
        });
        let err = validate_pipeline_config(&config).unwrap_err();
        match err {
            ConfigError::Schema { errors } => assert!(!errors.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_field_and_family() {
        let config = json!({
            "models": [{
                "name": "m",
                "family": "poisson",
                "outcome": "bids",
                "terms": [{ "kind": "numeric", "field": "z_duration" }]
            }]
        });
        let errors = match validate_pipeline_config(&config) {
            Err(ConfigError::Schema { errors }) => errors,
            other => panic!("unexpected result: {other:?}"),
        };
        assert!(errors.len() >= 2);
    }

    #[test]
    fn test_validate_with_inline_schema() {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" } }
        });
        assert!(validate(&schema, &json!({ "name": "x" })).is_ok());
        assert!(validate(&schema, &json!({ "age": 1 })).is_err());
        assert!(!is_valid(&schema, &json!([])));
    }
}
