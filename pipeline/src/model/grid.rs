//! Counterfactual prediction grids.
//!
//! One predictor is swept over its observed range while every other
//! predictor is held at its mean (numeric) or mode (categorical). The grid
//! repeats for each level of a grouping factor, by default the country.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::engine::{FittedModel, ModelEngine};
use super::frame::{ModelFrame, ObservationRow};
use crate::combine::stats;
use crate::error::{ModelError, ModelResult};
use crate::models::{Field, FieldValue};
use crate::parser::write_text_table;

/// What to sweep and how to group the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    #[serde(default = "default_sweep")]
    pub sweep: Field,
    #[serde(default = "default_group_by")]
    pub group_by: Field,
    #[serde(default = "default_points")]
    pub points: usize,
}

fn default_sweep() -> Field {
    Field::ZDuration
}

fn default_group_by() -> Field {
    Field::Country
}

fn default_points() -> usize {
    100
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            sweep: default_sweep(),
            group_by: default_group_by(),
            points: default_points(),
        }
    }
}

/// One synthetic observation of the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPoint {
    pub group: String,
    pub sweep_value: f64,
    /// Swept duration back in days (only for a `z_duration` sweep).
    pub days: Option<f64>,
    pub row: ObservationRow,
    pub prediction: Option<f64>,
}

/// Synthetic observations for plotting predicted outcomes by group.
#[derive(Debug, Clone)]
pub struct PredictionGrid {
    pub spec: GridSpec,
    pub points: Vec<GridPoint>,
}

/// Build the grid over the frame's observations.
///
/// The sweep range and the held means and modes come from the rows that
/// survived listwise deletion, so every held level is one the fitted model
/// has seen.
///
/// `duration_stats` is the `(mean, std)` of the capped duration the
/// z-scores were computed with; it is used to report the sweep in days.
pub fn build_grid(frame: &ModelFrame, spec: &GridSpec, duration_stats: Option<(f64, f64)>) -> ModelResult<PredictionGrid> {
    let spec_error = |message: String| ModelError::InvalidSpec {
        model: frame.model.clone(),
        message,
    };

    if !frame.predictors.contains(&spec.sweep) || spec.sweep.is_categorical() {
        return Err(spec_error(format!("'{}' is not a numeric predictor", spec.sweep)));
    }
    let groups = frame
        .factor(spec.group_by)
        .map(|f| f.levels.clone())
        .ok_or_else(|| spec_error(format!("'{}' is not a factor of the model", spec.group_by)))?;

    let observed: Vec<f64> = frame
        .rows
        .iter()
        .filter_map(|r| r.get(&spec.sweep).and_then(FieldValue::as_f64))
        .collect();
    if observed.is_empty() {
        return Err(ModelError::EmptyFrame(frame.model.clone()));
    }
    let low = observed.iter().copied().fold(f64::INFINITY, f64::min);
    let high = observed.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    // Typical values for the held predictors
    let mut typical = ObservationRow::new();
    for field in &frame.predictors {
        if *field == spec.sweep || *field == spec.group_by {
            continue;
        }
        let value = if frame.factor(*field).is_some() {
            let labels: Vec<String> = frame.rows.iter().filter_map(|r| r.get(field)).map(FieldValue::label).collect();
            stats::mode(labels.iter().map(String::as_str)).map(|label| typical_level(frame, *field, label))
        } else {
            let values: Vec<f64> = frame.rows.iter().filter_map(|r| r.get(field)).filter_map(FieldValue::as_f64).collect();
            stats::mean(&values).map(FieldValue::Number)
        };
        if let Some(value) = value {
            typical.insert(*field, value);
        }
    }

    let back_transform = match (spec.sweep, duration_stats) {
        (Field::ZDuration, Some((mean, std))) => Some((mean, std)),
        _ => None,
    };

    let sweep = stats::linspace(low, high, spec.points);
    let mut points = Vec::with_capacity(groups.len() * sweep.len());
    for group in &groups {
        for value in &sweep {
            let mut row = typical.clone();
            row.insert(spec.sweep, FieldValue::Number(*value));
            row.insert(spec.group_by, FieldValue::Text(group.clone()));
            points.push(GridPoint {
                group: group.clone(),
                sweep_value: *value,
                days: back_transform.map(|(mean, std)| value * std + mean),
                row,
                prediction: None,
            });
        }
    }

    Ok(PredictionGrid { spec: spec.clone(), points })
}

/// The mode keeps the frame's value type so numeric factors (years) stay numeric.
fn typical_level(frame: &ModelFrame, field: Field, label: String) -> FieldValue {
    frame
        .rows
        .iter()
        .filter_map(|r| r.get(&field))
        .find(|v| v.label() == label)
        .cloned()
        .unwrap_or(FieldValue::Text(label))
}

impl PredictionGrid {
    pub fn rows(&self) -> Vec<ObservationRow> {
        self.points.iter().map(|p| p.row.clone()).collect()
    }

    /// Ask the engine for the expected outcome at every grid point.
    pub fn predict<E: ModelEngine + ?Sized>(&mut self, engine: &E, fitted: &FittedModel, frame: &ModelFrame) -> ModelResult<()> {
        let design = frame.encode(&self.rows())?;
        let predictions = engine.predict(fitted, &design).map_err(ModelError::Engine)?;
        if predictions.len() != self.points.len() {
            return Err(ModelError::Engine(format!(
                "expected {} predictions, got {}",
                self.points.len(),
                predictions.len()
            )));
        }
        for (point, prediction) in self.points.iter_mut().zip(predictions) {
            point.prediction = Some(prediction);
        }
        Ok(())
    }

    /// Replace `path` with the grid (group, sweep, days, predictors, prediction).
    pub fn write_csv(&self, path: &Path, predictors: &[Field]) -> ModelResult<()> {
        let held: Vec<Field> = predictors
            .iter()
            .copied()
            .filter(|f| *f != self.spec.sweep && *f != self.spec.group_by)
            .collect();

        let mut headers = vec![
            self.spec.group_by.name().to_string(),
            self.spec.sweep.name().to_string(),
            "days".to_string(),
        ];
        headers.extend(held.iter().map(|f| f.name().to_string()));
        headers.push("prediction".to_string());

        let rows: Vec<Vec<String>> = self
            .points
            .iter()
            .map(|p| {
                let mut fields = vec![
                    p.group.clone(),
                    p.sweep_value.to_string(),
                    p.days.map(|d| d.to_string()).unwrap_or_default(),
                ];
                fields.extend(held.iter().map(|f| p.row.get(f).map(FieldValue::label).unwrap_or_default()));
                fields.push(p.prediction.map(|v| v.to_string()).unwrap_or_default());
                fields
            })
            .collect();

        write_text_table(path, &headers, &rows)?;
        Ok(())
    }
}
