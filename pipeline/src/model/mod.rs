//! Model specification and the boundary to an external statistics engine.
//!
//! The pipeline never estimates anything itself. It hands an engine:
//!
//! - a [`ModelFrame`] with no missing values in any referenced column and
//!   stable, sorted category levels (reference level first),
//! - the treatment-coded [`DesignMatrix`] built from that frame,
//! - a patsy-style formula rendered from the [`ModelSpec`].
//!
//! Fitting goes through the [`ModelEngine`] trait; prediction grids for
//! counterfactual plots are built in [`grid`].

pub mod engine;
pub mod frame;
pub mod grid;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::models::Field;

pub use engine::{fit_model, FitMethod, FitRequest, FittedModel, ModelEngine};
pub use frame::{build_frame, DesignMatrix, FactorLevels, ModelFrame, ObservationRow};
pub use grid::{build_grid, GridPoint, GridSpec, PredictionGrid};

/// Outcome column name used for the clipped fractional response.
pub const FRACTIONAL_OUTCOME: &str = "sme_share_safe";

/// Clipping margin of the fractional response.
pub const FRACTIONAL_EPSILON: f64 = 1e-6;

/// Distribution family of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Ols,
    NegativeBinomial,
    ZeroInflatedNegativeBinomial,
    /// Binomial GLM with logit link on a share in (0, 1).
    FractionalLogit,
}

impl ModelFamily {
    /// Whether the family needs the two-step fit.
    pub fn is_zero_inflated(&self) -> bool {
        matches!(self, Self::ZeroInflatedNegativeBinomial)
    }
}

/// One right-hand-side term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Term {
    Numeric {
        field: Field,
    },
    Factor {
        field: Field,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    /// `numeric * C(factor)`: both main effects plus their interaction.
    Interaction {
        numeric: Field,
        factor: Field,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
}

impl Term {
    pub fn fields(&self) -> Vec<Field> {
        match self {
            Self::Numeric { field } | Self::Factor { field, .. } => vec![*field],
            Self::Interaction { numeric, factor, .. } => vec![*numeric, *factor],
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Numeric { field } => field.name().to_string(),
            Self::Factor { field, reference } => factor_name(*field, reference.as_deref()),
            Self::Interaction {
                numeric,
                factor,
                reference,
            } => format!("{} * {}", numeric.name(), factor_name(*factor, reference.as_deref())),
        }
    }
}

/// `C(field)` or `C(field, Treatment('level'))`.
pub fn factor_name(field: Field, reference: Option<&str>) -> String {
    match reference {
        Some(level) => format!("C({}, Treatment('{}'))", field.name(), level),
        None => format!("C({})", field.name()),
    }
}

/// Keep only rows where `field` has the given level (subsample checks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelFilter {
    pub field: Field,
    pub level: String,
}

/// Declarative model: family, outcome, terms and an optional subsample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub family: ModelFamily,
    pub outcome: Field,
    pub terms: Vec<Term>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<LevelFilter>,
    /// Analysis variant the model runs on.
    #[serde(default = "default_variant")]
    pub variant: String,
}

fn default_variant() -> String {
    "main".to_string()
}

impl ModelSpec {
    /// Column name of the outcome as handed to the engine.
    pub fn outcome_column(&self) -> &str {
        match self.family {
            ModelFamily::FractionalLogit => FRACTIONAL_OUTCOME,
            _ => self.outcome.name(),
        }
    }

    /// Every field a complete observation needs (outcome first, no duplicates).
    pub fn required_fields(&self) -> Vec<Field> {
        let mut fields = vec![self.outcome];
        for field in self.terms.iter().flat_map(Term::fields) {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }

    /// Patsy-style formula.
    ///
    /// ```ignore
    /// total_bids ~ z_duration * C(country, Treatment('Estonia')) + z_value + C(year)
    /// ```
    pub fn formula(&self) -> String {
        let rhs: Vec<String> = self.terms.iter().map(Term::render).collect();
        format!("{} ~ {}", self.outcome_column(), rhs.join(" + "))
    }

    /// Reject specifications no engine could fit.
    pub fn validate(&self) -> ModelResult<()> {
        let invalid = |message: String| ModelError::InvalidSpec {
            model: self.name.clone(),
            message,
        };

        if self.terms.is_empty() {
            return Err(invalid("no terms".to_string()));
        }
        if self.outcome.is_categorical() {
            return Err(invalid(format!("outcome '{}' is categorical", self.outcome)));
        }
        if self.family == ModelFamily::FractionalLogit && self.outcome != Field::SmeShare {
            return Err(invalid("fractional logit needs the sme_share outcome".to_string()));
        }
        for term in &self.terms {
            match term {
                Term::Numeric { field } | Term::Interaction { numeric: field, .. } if field.is_categorical() => {
                    return Err(invalid(format!("'{}' is categorical, use a factor term", field)));
                }
                _ => {}
            }
            if term.fields().contains(&self.outcome) {
                return Err(invalid(format!("outcome '{}' used as a predictor", self.outcome)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zinb() -> ModelSpec {
        ModelSpec {
            name: "zinb_total_bids".into(),
            family: ModelFamily::ZeroInflatedNegativeBinomial,
            outcome: Field::TotalBids,
            terms: vec![
                Term::Interaction {
                    numeric: Field::ZDuration,
                    factor: Field::Country,
                    reference: Some("Estonia".into()),
                },
                Term::Numeric { field: Field::ZValue },
                Term::Factor { field: Field::ProcurementMethod, reference: None },
                Term::Factor { field: Field::ProcurementCategory, reference: None },
                Term::Factor { field: Field::Year, reference: None },
            ],
            filters: vec![],
            variant: "zinb".into(),
        }
    }

    #[test]
    fn test_formula_rendering() {
        assert_eq!(
            zinb().formula(),
            "total_bids ~ z_duration * C(country, Treatment('Estonia')) + z_value + \
             C(procurement_method) + C(procurement_category) + C(year)"
        );
    }

    #[test]
    fn test_fractional_outcome_column() {
        let spec = ModelSpec {
            name: "glm_sme_share".into(),
            family: ModelFamily::FractionalLogit,
            outcome: Field::SmeShare,
            ..zinb()
        };
        assert!(spec.formula().starts_with("sme_share_safe ~ "));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_required_fields_deduplicated() {
        let fields = zinb().required_fields();
        assert_eq!(
            fields,
            vec![
                Field::TotalBids,
                Field::ZDuration,
                Field::Country,
                Field::ZValue,
                Field::ProcurementMethod,
                Field::ProcurementCategory,
                Field::Year,
            ]
        );
    }

    #[test]
    fn test_validate_rejects_categorical_numeric_term() {
        let mut spec = zinb();
        spec.terms.push(Term::Numeric { field: Field::Country });
        assert!(matches!(spec.validate(), Err(ModelError::InvalidSpec { .. })));

        let mut spec = zinb();
        spec.terms.push(Term::Numeric { field: Field::TotalBids });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_term_json_shape() {
        let term: Term = serde_json::from_str(r#"{"kind": "factor", "field": "year"}"#).unwrap();
        assert_eq!(term, Term::Factor { field: Field::Year, reference: None });
    }
}
