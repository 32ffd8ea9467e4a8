//! Model frames and treatment-coded design matrices.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;

use super::{factor_name, ModelFamily, ModelSpec, Term, FRACTIONAL_EPSILON};
use crate::error::{ModelError, ModelResult};
use crate::models::{Field, FieldValue, RegressionReadyRecord};
use crate::parser::write_text_table;

/// Predictor values of one observation.
pub type ObservationRow = BTreeMap<Field, FieldValue>;

/// Category levels of one factor; the reference level comes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactorLevels {
    pub field: Field,
    pub reference: Option<String>,
    pub levels: Vec<String>,
}

impl FactorLevels {
    fn name(&self) -> String {
        factor_name(self.field, self.reference.as_deref())
    }

    /// Levels that get a dummy column (all but the reference).
    pub fn contrasts(&self) -> &[String] {
        self.levels.get(1..).unwrap_or(&[])
    }
}

/// Sort labels numerically when they are all numbers, lexically otherwise.
fn sort_levels(labels: BTreeSet<String>) -> Vec<String> {
    let mut levels: Vec<String> = labels.into_iter().collect();
    let numeric: Option<Vec<f64>> = levels.iter().map(|l| l.parse::<f64>().ok()).collect();
    if let Some(keys) = numeric {
        let mut pairs: Vec<(f64, String)> = keys.into_iter().zip(levels).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        levels = pairs.into_iter().map(|(_, l)| l).collect();
    }
    levels
}

/// Observations of one model after subsetting and listwise deletion.
#[derive(Debug, Clone)]
pub struct ModelFrame {
    pub model: String,
    pub family: ModelFamily,
    pub formula: String,
    pub outcome_column: String,
    pub outcome: Vec<f64>,
    /// Predictor fields in formula order.
    pub predictors: Vec<Field>,
    pub rows: Vec<ObservationRow>,
    pub factors: Vec<FactorLevels>,
    pub rows_in: usize,
    pub rows_dropped: usize,
    terms: Vec<Term>,
}

/// Treatment-coded regressors with an intercept.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl DesignMatrix {
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| r[idx]).collect())
    }
}

enum Column {
    Intercept,
    Dummy { factor: Field, level: String },
    Numeric(Field),
    Product { numeric: Field, factor: Field, level: String },
}

/// Build the frame of `spec` from the regression-ready sample.
pub fn build_frame(spec: &ModelSpec, records: &[RegressionReadyRecord]) -> ModelResult<ModelFrame> {
    spec.validate()?;

    let subset: Vec<&RegressionReadyRecord> = records
        .iter()
        .filter(|r| {
            spec.filters
                .iter()
                .all(|f| r.value(f.field).map(|v| v.label()).as_deref() == Some(f.level.as_str()))
        })
        .collect();

    let required = spec.required_fields();
    let complete: Vec<&RegressionReadyRecord> = subset
        .iter()
        .copied()
        .filter(|r| required.iter().all(|f| r.value(*f).is_some()))
        .collect();
    if complete.is_empty() {
        return Err(ModelError::EmptyFrame(spec.name.clone()));
    }

    let outcome_of = |r: &RegressionReadyRecord| -> ModelResult<f64> {
        let value = r
            .value(spec.outcome)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ModelError::InvalidSpec {
                model: spec.name.clone(),
                message: format!("outcome '{}' is not numeric", spec.outcome),
            })?;
        Ok(match spec.family {
            ModelFamily::FractionalLogit => value.clamp(FRACTIONAL_EPSILON, 1.0 - FRACTIONAL_EPSILON),
            _ => value,
        })
    };
    let outcome = complete.iter().map(|r| outcome_of(*r)).collect::<ModelResult<Vec<f64>>>()?;

    let predictors: Vec<Field> = required[1..].to_vec();
    let rows: Vec<ObservationRow> = complete
        .iter()
        .map(|r| {
            predictors
                .iter()
                .filter_map(|f| r.value(*f).map(|v| (*f, v)))
                .collect()
        })
        .collect();

    let mut factors: Vec<FactorLevels> = Vec::new();
    for term in &spec.terms {
        let (field, reference) = match term {
            Term::Factor { field, reference } => (*field, reference),
            Term::Interaction { factor, reference, .. } => (*factor, reference),
            Term::Numeric { .. } => continue,
        };
        if factors.iter().any(|f| f.field == field) {
            continue;
        }

        let labels: BTreeSet<String> = rows.iter().filter_map(|r| r.get(&field)).map(FieldValue::label).collect();
        let mut levels = sort_levels(labels);
        if let Some(level) = reference {
            let idx = levels
                .iter()
                .position(|l| l == level)
                .ok_or_else(|| ModelError::MissingReferenceLevel {
                    field: field.name().to_string(),
                    level: level.clone(),
                })?;
            let reference_level = levels.remove(idx);
            levels.insert(0, reference_level);
        }
        factors.push(FactorLevels {
            field,
            reference: reference.clone(),
            levels,
        });
    }

    Ok(ModelFrame {
        model: spec.name.clone(),
        family: spec.family,
        formula: spec.formula(),
        outcome_column: spec.outcome_column().to_string(),
        outcome,
        predictors,
        rows_in: subset.len(),
        rows_dropped: subset.len() - complete.len(),
        rows,
        factors,
        terms: spec.terms.clone(),
    })
}

impl ModelFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn factor(&self, field: Field) -> Option<&FactorLevels> {
        self.factors.iter().find(|f| f.field == field)
    }

    fn layout(&self) -> Vec<(String, Column)> {
        let mut columns = vec![("Intercept".to_string(), Column::Intercept)];

        // Categorical main effects first, in order of appearance
        for factor in &self.factors {
            for level in factor.contrasts() {
                columns.push((
                    format!("{}[T.{}]", factor.name(), level),
                    Column::Dummy {
                        factor: factor.field,
                        level: level.clone(),
                    },
                ));
            }
        }

        // Then each numeric variable followed by its interactions
        let mut numerics: Vec<Field> = Vec::new();
        for term in &self.terms {
            match term {
                Term::Numeric { field } | Term::Interaction { numeric: field, .. } if !numerics.contains(field) => {
                    numerics.push(*field)
                }
                _ => {}
            }
        }
        for numeric in numerics {
            columns.push((numeric.name().to_string(), Column::Numeric(numeric)));
            for term in &self.terms {
                let Term::Interaction { numeric: n, factor, .. } = term else {
                    continue;
                };
                if *n != numeric {
                    continue;
                }
                let Some(levels) = self.factor(*factor) else {
                    continue;
                };
                for level in levels.contrasts() {
                    columns.push((
                        format!("{}:{}[T.{}]", numeric.name(), levels.name(), level),
                        Column::Product {
                            numeric,
                            factor: *factor,
                            level: level.clone(),
                        },
                    ));
                }
            }
        }
        columns
    }

    /// Design column names in engine order.
    pub fn column_names(&self) -> Vec<String> {
        self.layout().into_iter().map(|(name, _)| name).collect()
    }

    /// Design matrix of the frame's own observations.
    pub fn design_matrix(&self) -> ModelResult<DesignMatrix> {
        self.encode(&self.rows)
    }

    /// Encode new observations with the frame's level sets.
    pub fn encode(&self, rows: &[ObservationRow]) -> ModelResult<DesignMatrix> {
        let layout = self.layout();
        let mut encoded = Vec::with_capacity(rows.len());

        for row in rows {
            let label = |field: Field| -> ModelResult<String> {
                let value = row.get(&field).map(FieldValue::label).ok_or_else(|| ModelError::UnknownLevel {
                    field: field.name().to_string(),
                    level: String::new(),
                })?;
                let known = self.factor(field).map(|f| f.levels.contains(&value)).unwrap_or(false);
                if known {
                    Ok(value)
                } else {
                    Err(ModelError::UnknownLevel {
                        field: field.name().to_string(),
                        level: value,
                    })
                }
            };
            let number = |field: Field| -> ModelResult<f64> {
                row.get(&field)
                    .and_then(FieldValue::as_f64)
                    .ok_or_else(|| ModelError::Engine(format!("missing numeric value for '{}'", field)))
            };

            for factor in &self.factors {
                label(factor.field)?;
            }

            let mut values = Vec::with_capacity(layout.len());
            for (_, column) in &layout {
                let value = match column {
                    Column::Intercept => 1.0,
                    Column::Dummy { factor, level } => indicator(label(*factor)? == *level),
                    Column::Numeric(field) => number(*field)?,
                    Column::Product { numeric, factor, level } => {
                        number(*numeric)? * indicator(label(*factor)? == *level)
                    }
                };
                values.push(value);
            }
            encoded.push(values);
        }

        Ok(DesignMatrix {
            columns: layout.into_iter().map(|(name, _)| name).collect(),
            rows: encoded,
        })
    }

    /// Replace `path` with the frame (outcome first, then predictors).
    pub fn write_csv(&self, path: &Path) -> ModelResult<()> {
        let mut headers = vec![self.outcome_column.clone()];
        headers.extend(self.predictors.iter().map(|f| f.name().to_string()));

        let rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .zip(&self.outcome)
            .map(|(row, y)| {
                let mut fields = vec![y.to_string()];
                fields.extend(
                    self.predictors
                        .iter()
                        .map(|f| row.get(f).map(FieldValue::label).unwrap_or_default()),
                );
                fields
            })
            .collect();

        write_text_table(path, &headers, &rows)?;
        Ok(())
    }
}

fn indicator(hit: bool) -> f64 {
    if hit {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisReadyRecord, Country};
    use crate::model::LevelFilter;
    use chrono::NaiveDate;

    fn record(country: Country, method: &str, year: i32, total: i64, sme: i64, z: Option<f64>) -> RegressionReadyRecord {
        let start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let mut r = RegressionReadyRecord::tagged(
            country,
            AnalysisReadyRecord {
                tender_id: None,
                publication_date: start,
                end_date: start,
                total_bids: total,
                sme_bids: sme,
                tender_value: None,
                procurement_method: method.into(),
                procurement_category: Some("services".into()),
                award_criteria: None,
                year,
                duration_days: 0,
            },
        );
        r.z_duration = z;
        r.sme_share = crate::combine::sme_share(sme, total);
        r
    }

    fn spec() -> ModelSpec {
        ModelSpec {
            name: "h3".into(),
            family: ModelFamily::NegativeBinomial,
            outcome: Field::TotalBids,
            terms: vec![
                Term::Interaction {
                    numeric: Field::ZDuration,
                    factor: Field::Country,
                    reference: Some("Estonia".into()),
                },
                Term::Factor { field: Field::Year, reference: None },
            ],
            filters: vec![],
            variant: "main".into(),
        }
    }

    fn sample() -> Vec<RegressionReadyRecord> {
        vec![
            record(Country::Germany, "open", 2021, 3, 1, Some(0.5)),
            record(Country::Estonia, "open", 2020, 2, 0, Some(-1.0)),
            record(Country::France, "selective", 2021, 0, 0, Some(2.0)),
            record(Country::France, "open", 2019, 4, 4, None),
        ]
    }

    #[test]
    fn test_listwise_deletion_and_levels() {
        let frame = build_frame(&spec(), &sample()).unwrap();

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.rows_dropped, 1);
        assert_eq!(frame.factor(Field::Country).unwrap().levels, vec!["Estonia", "France", "Germany"]);
        assert_eq!(frame.factor(Field::Year).unwrap().levels, vec!["2020", "2021"]);
    }

    #[test]
    fn test_design_columns_follow_patsy_order() {
        let frame = build_frame(&spec(), &sample()).unwrap();
        assert_eq!(
            frame.column_names(),
            vec![
                "Intercept",
                "C(country, Treatment('Estonia'))[T.France]",
                "C(country, Treatment('Estonia'))[T.Germany]",
                "C(year)[T.2021]",
                "z_duration",
                "z_duration:C(country, Treatment('Estonia'))[T.France]",
                "z_duration:C(country, Treatment('Estonia'))[T.Germany]",
            ]
        );
    }

    #[test]
    fn test_design_values() {
        let frame = build_frame(&spec(), &sample()).unwrap();
        let design = frame.design_matrix().unwrap();

        // Germany, 2021, z = 0.5
        assert_eq!(design.rows[0], vec![1.0, 0.0, 1.0, 1.0, 0.5, 0.0, 0.5]);
        // Estonia is the reference: no dummies, no interaction
        assert_eq!(design.rows[1], vec![1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0]);
        assert_eq!(design.column("z_duration").unwrap(), vec![0.5, -1.0, 2.0]);
    }

    #[test]
    fn test_levels_stable_across_row_order() {
        let mut reversed = sample();
        reversed.reverse();
        let a = build_frame(&spec(), &sample()).unwrap();
        let b = build_frame(&spec(), &reversed).unwrap();
        assert_eq!(a.factors, b.factors);
        assert_eq!(a.column_names(), b.column_names());
    }

    #[test]
    fn test_missing_reference_level() {
        let rows: Vec<_> = sample().into_iter().filter(|r| r.country != Country::Estonia).collect();
        let err = build_frame(&spec(), &rows).unwrap_err();
        assert!(matches!(err, ModelError::MissingReferenceLevel { .. }));
    }

    #[test]
    fn test_unknown_level_rejected_on_encode() {
        let frame = build_frame(&spec(), &sample()).unwrap();
        let mut row = frame.rows[0].clone();
        row.insert(Field::Year, FieldValue::Number(1999.0));
        assert!(matches!(frame.encode(&[row]), Err(ModelError::UnknownLevel { .. })));
    }

    #[test]
    fn test_fractional_outcome_is_clipped() {
        let spec = ModelSpec {
            family: ModelFamily::FractionalLogit,
            outcome: Field::SmeShare,
            ..spec()
        };
        let frame = build_frame(&spec, &sample()).unwrap();

        // The zero-bid row has no share and is deleted
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.outcome_column, "sme_share_safe");
        assert!(frame.outcome.iter().all(|y| *y >= FRACTIONAL_EPSILON && *y <= 1.0 - FRACTIONAL_EPSILON));
    }

    #[test]
    fn test_level_filter_subsample() {
        let mut spec = spec();
        spec.filters.push(LevelFilter {
            field: Field::ProcurementMethod,
            level: "open".into(),
        });
        let frame = build_frame(&spec, &sample()).unwrap();
        assert_eq!(frame.rows_in, 3);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn test_empty_frame() {
        let rows: Vec<_> = sample()
            .into_iter()
            .map(|mut r| {
                r.z_duration = None;
                r
            })
            .collect();
        assert!(matches!(build_frame(&spec(), &rows), Err(ModelError::EmptyFrame(_))));
    }

    #[test]
    fn test_frame_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h3_frame.csv");
        build_frame(&spec(), &sample()).unwrap().write_csv(&path).unwrap();

        let table = crate::parser::parse_file_auto(&path).unwrap();
        assert_eq!(table.headers, vec!["total_bids", "z_duration", "country", "year"]);
        assert_eq!(table.rows.len(), 3);
    }
}
