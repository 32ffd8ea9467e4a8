//! The [`ModelEngine`] seam and the fit strategy.
//!
//! Zero-inflated count models are fitted in two steps: Nelder-Mead for start
//! values, then BFGS from those values (Newton as the fallback). Every other
//! family gets a single fit with the engine's default method.

use serde::{Deserialize, Serialize};

use super::frame::{DesignMatrix, ModelFrame};
use super::ModelSpec;
use crate::error::{ModelError, ModelResult};
use crate::logs::{log_info_indent, log_success, log_warning};

/// Iteration budget passed to every optimiser call.
pub const MAX_ITERATIONS: usize = 10_000;

/// Optimisation method requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// The engine's own choice for the family.
    Default,
    NelderMead,
    Bfgs,
    Newton,
}

impl FitMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::NelderMead => "nelder_mead",
            Self::Bfgs => "bfgs",
            Self::Newton => "newton",
        }
    }
}

/// Everything an engine needs for one fit.
#[derive(Debug, Clone, Copy)]
pub struct FitRequest<'a> {
    pub spec: &'a ModelSpec,
    pub frame: &'a ModelFrame,
    pub design: &'a DesignMatrix,
    pub method: FitMethod,
    pub start_params: Option<&'a [f64]>,
    pub max_iterations: usize,
    /// Heteroscedasticity-robust (HC0) standard errors.
    pub robust_covariance: bool,
}

/// Result returned by an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub model: String,
    pub method: FitMethod,
    pub param_names: Vec<String>,
    pub params: Vec<f64>,
    /// Printable summary (coefficient table, fit statistics).
    pub summary: String,
}

impl FittedModel {
    pub fn param(&self, name: &str) -> Option<f64> {
        self.param_names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.params.get(i).copied())
    }
}

/// External statistics engine.
///
/// Implementations wrap whatever actually estimates the model; errors are
/// reported as text and become [`ModelError::Engine`] or part of a
/// [`ModelError::NonConvergence`].
pub trait ModelEngine {
    fn fit(&self, request: &FitRequest<'_>) -> Result<FittedModel, String>;

    /// Expected outcome for each design row (mean for count models).
    fn predict(&self, fitted: &FittedModel, design: &DesignMatrix) -> Result<Vec<f64>, String>;
}

/// Fit `spec` on its frame with the family's strategy.
pub fn fit_model<E: ModelEngine + ?Sized>(engine: &E, spec: &ModelSpec, frame: &ModelFrame) -> ModelResult<FittedModel> {
    let design = frame.design_matrix()?;
    let request = FitRequest {
        spec,
        frame,
        design: &design,
        method: FitMethod::Default,
        start_params: None,
        max_iterations: MAX_ITERATIONS,
        robust_covariance: spec.family == super::ModelFamily::FractionalLogit,
    };
    log_info_indent(format!("Fitting {} on {} observations", spec.name, frame.len()), 1);

    if !spec.family.is_zero_inflated() {
        let fitted = engine.fit(&request).map_err(ModelError::Engine)?;
        log_success(format!("{} fitted", spec.name));
        return Ok(fitted);
    }

    let non_convergence = |causes: Vec<String>| ModelError::NonConvergence {
        model: spec.name.clone(),
        causes,
    };

    // Step 1: derivative-free start values
    let start = engine
        .fit(&FitRequest {
            method: FitMethod::NelderMead,
            ..request
        })
        .map_err(|e| non_convergence(vec![format!("{}: {}", FitMethod::NelderMead.name(), e)]))?;

    // Step 2: gradient-based final fit, Newton if BFGS fails
    let mut causes = Vec::new();
    for method in [FitMethod::Bfgs, FitMethod::Newton] {
        let attempt = engine.fit(&FitRequest {
            method,
            start_params: Some(start.params.as_slice()),
            ..request
        });
        match attempt {
            Ok(fitted) => {
                log_success(format!("{} fitted ({})", spec.name, method.name()));
                return Ok(fitted);
            }
            Err(e) => {
                log_warning(format!("{}: {} failed: {}", spec.name, method.name(), e));
                causes.push(format!("{}: {}", method.name(), e));
            }
        }
    }

    Err(non_convergence(causes))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::frame::build_frame;
    use crate::model::{ModelFamily, Term};
    use crate::models::{AnalysisReadyRecord, Country, Field, RegressionReadyRecord};
    use chrono::NaiveDate;
    use std::cell::RefCell;

    /// Scripted engine: records each request and fails the listed methods.
    #[derive(Default)]
    pub(crate) struct MockEngine {
        pub failing: Vec<FitMethod>,
        pub calls: RefCell<Vec<(FitMethod, Option<Vec<f64>>)>>,
    }

    impl ModelEngine for MockEngine {
        fn fit(&self, request: &FitRequest<'_>) -> Result<FittedModel, String> {
            self.calls
                .borrow_mut()
                .push((request.method, request.start_params.map(<[f64]>::to_vec)));
            if self.failing.contains(&request.method) {
                return Err("singular hessian".to_string());
            }
            let n = request.design.columns.len();
            let params = match request.method {
                FitMethod::NelderMead => vec![0.5; n],
                _ => vec![0.1; n],
            };
            Ok(FittedModel {
                model: request.spec.name.clone(),
                method: request.method,
                param_names: request.design.columns.clone(),
                params,
                summary: String::new(),
            })
        }

        fn predict(&self, fitted: &FittedModel, design: &DesignMatrix) -> Result<Vec<f64>, String> {
            Ok(design
                .rows
                .iter()
                .map(|row| row.iter().zip(&fitted.params).map(|(x, b)| x * b).sum::<f64>().exp())
                .collect())
        }
    }

    pub(crate) fn sample() -> Vec<RegressionReadyRecord> {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let mut rows = Vec::new();
        for (i, country) in Country::ALL.iter().cycle().take(12).enumerate() {
            let mut r = RegressionReadyRecord::tagged(
                *country,
                AnalysisReadyRecord {
                    tender_id: None,
                    publication_date: start,
                    end_date: start,
                    total_bids: (i % 4) as i64,
                    sme_bids: 0,
                    tender_value: Some(1000.0),
                    procurement_method: if i % 2 == 0 { "open" } else { "selective" }.into(),
                    procurement_category: Some("services".into()),
                    award_criteria: None,
                    year: 2020 + (i % 2) as i32,
                    duration_days: 10,
                },
            );
            r.z_duration = Some(i as f64 / 6.0 - 1.0);
            rows.push(r);
        }
        rows
    }

    pub(crate) fn spec(family: ModelFamily) -> ModelSpec {
        ModelSpec {
            name: "zinb_total_bids".into(),
            family,
            outcome: Field::TotalBids,
            terms: vec![
                Term::Interaction {
                    numeric: Field::ZDuration,
                    factor: Field::Country,
                    reference: Some("Estonia".into()),
                },
                Term::Factor { field: Field::ProcurementMethod, reference: None },
            ],
            filters: vec![],
            variant: "zinb".into(),
        }
    }

    #[test]
    fn test_two_step_fit_passes_start_values() {
        let spec = spec(ModelFamily::ZeroInflatedNegativeBinomial);
        let frame = build_frame(&spec, &sample()).unwrap();
        let engine = MockEngine::default();

        let fitted = fit_model(&engine, &spec, &frame).unwrap();

        assert_eq!(fitted.method, FitMethod::Bfgs);
        let calls = engine.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (FitMethod::NelderMead, None));
        assert_eq!(calls[1].0, FitMethod::Bfgs);
        assert!(calls[1].1.as_ref().unwrap().iter().all(|p| *p == 0.5));
    }

    #[test]
    fn test_newton_fallback_after_bfgs_failure() {
        let spec = spec(ModelFamily::ZeroInflatedNegativeBinomial);
        let frame = build_frame(&spec, &sample()).unwrap();
        let engine = MockEngine {
            failing: vec![FitMethod::Bfgs],
            ..Default::default()
        };

        let fitted = fit_model(&engine, &spec, &frame).unwrap();
        assert_eq!(fitted.method, FitMethod::Newton);
        assert!(engine.calls.borrow()[2].1.is_some());
    }

    #[test]
    fn test_non_convergence_carries_every_cause() {
        let spec = spec(ModelFamily::ZeroInflatedNegativeBinomial);
        let frame = build_frame(&spec, &sample()).unwrap();
        let engine = MockEngine {
            failing: vec![FitMethod::Bfgs, FitMethod::Newton],
            ..Default::default()
        };

        let err = fit_model(&engine, &spec, &frame).unwrap_err();
        assert!(err.is_non_fatal());
        match err {
            ModelError::NonConvergence { model, causes } => {
                assert_eq!(model, "zinb_total_bids");
                assert_eq!(causes.len(), 2);
                assert!(causes[0].starts_with("bfgs"));
                assert!(causes[1].starts_with("newton"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_start_value_failure_is_non_convergence() {
        let spec = spec(ModelFamily::ZeroInflatedNegativeBinomial);
        let frame = build_frame(&spec, &sample()).unwrap();
        let engine = MockEngine {
            failing: vec![FitMethod::NelderMead],
            ..Default::default()
        };

        let err = fit_model(&engine, &spec, &frame).unwrap_err();
        assert!(matches!(err, ModelError::NonConvergence { ref causes, .. } if causes.len() == 1));
        assert_eq!(engine.calls.borrow().len(), 1);
    }

    #[test]
    fn test_single_fit_for_other_families() {
        let spec = spec(ModelFamily::NegativeBinomial);
        let frame = build_frame(&spec, &sample()).unwrap();
        let engine = MockEngine::default();

        let fitted = fit_model(&engine, &spec, &frame).unwrap();
        assert_eq!(fitted.method, FitMethod::Default);
        assert_eq!(engine.calls.borrow().len(), 1);
        assert_eq!(fitted.param("Intercept"), Some(0.1));
    }

    #[test]
    fn test_engine_error_on_single_fit_is_fatal() {
        let spec = spec(ModelFamily::Ols);
        let frame = build_frame(&spec, &sample()).unwrap();
        let engine = MockEngine {
            failing: vec![FitMethod::Default],
            ..Default::default()
        };

        let err = fit_model(&engine, &spec, &frame).unwrap_err();
        assert!(matches!(err, ModelError::Engine(_)));
        assert!(!err.is_non_fatal());
    }
}
