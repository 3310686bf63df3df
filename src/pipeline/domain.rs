//! Composite pipeline and the persisted artifact envelope.
//!
//! Step kinds form a closed set; structural comparison is a tag comparison.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::error::{ServeError, ServeResult};
use crate::schema::FeatureValue;

use super::boosting::GradientBoostingRegressor;
use super::dummy::DummyRegressor;
use super::encoder::ColumnTransformer;

/// Identity of a step, independent of its fitted state.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    ColumnTransformer,
    GradientBoostingRegressor,
    DummyRegressor,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ColumnTransformer => "ColumnTransformer",
            StepKind::GradientBoostingRegressor => "GradientBoostingRegressor",
            StepKind::DummyRegressor => "DummyRegressor",
        }
    }

    pub fn is_regressor(&self) -> bool {
        !matches!(self, StepKind::ColumnTransformer)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One processing step. Transformers map rows to rows, regressors map rows to scalars.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Step {
    ColumnTransformer(ColumnTransformer),
    GradientBoostingRegressor(GradientBoostingRegressor),
    DummyRegressor(DummyRegressor),
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::ColumnTransformer(_) => StepKind::ColumnTransformer,
            Step::GradientBoostingRegressor(_) => StepKind::GradientBoostingRegressor,
            Step::DummyRegressor(_) => StepKind::DummyRegressor,
        }
    }

    pub fn is_fitted(&self) -> bool {
        match self {
            Step::ColumnTransformer(t) => t.is_fitted(),
            Step::GradientBoostingRegressor(r) => r.is_fitted(),
            Step::DummyRegressor(r) => r.is_fitted(),
        }
    }

    fn fit_transform(
        &mut self,
        rows: &[Vec<FeatureValue>],
        targets: &[f64],
    ) -> ServeResult<Vec<Vec<FeatureValue>>> {
        match self {
            Step::ColumnTransformer(t) => {
                t.fit(rows, targets)?;
                t.transform(rows)
            }
            other => Err(ServeError::Training(format!(
                "{} cannot be used as an intermediate step",
                other.kind()
            ))),
        }
    }

    fn transform(&self, rows: &[Vec<FeatureValue>]) -> ServeResult<Vec<Vec<FeatureValue>>> {
        match self {
            Step::ColumnTransformer(t) => t.transform(rows),
            other => Err(ServeError::Inference(format!(
                "{} cannot be used as an intermediate step",
                other.kind()
            ))),
        }
    }

    fn fit(&mut self, rows: &[Vec<FeatureValue>], targets: &[f64]) -> ServeResult<()> {
        let matrix = numeric_matrix(rows).map_err(ServeError::Training)?;
        match self {
            Step::GradientBoostingRegressor(r) => r.fit(&matrix, targets),
            Step::DummyRegressor(r) => r.fit(targets),
            Step::ColumnTransformer(_) => Err(ServeError::Training(
                "ColumnTransformer cannot be the final step".into(),
            )),
        }
    }

    fn predict(&self, rows: &[Vec<FeatureValue>]) -> ServeResult<Vec<f64>> {
        let matrix = numeric_matrix(rows).map_err(ServeError::Inference)?;
        match self {
            Step::GradientBoostingRegressor(r) => r.predict(&matrix),
            Step::DummyRegressor(r) => r.predict(matrix.len()),
            Step::ColumnTransformer(_) => Err(ServeError::Inference(
                "ColumnTransformer cannot be the final step".into(),
            )),
        }
    }
}

/// Regressors only accept fully numeric input; categorical columns must be encoded first.
fn numeric_matrix(rows: &[Vec<FeatureValue>]) -> Result<Vec<Vec<f64>>, String> {
    rows.iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(col, v)| {
                    v.as_f64().ok_or_else(|| {
                        format!("column {col} is not numeric; is an encoder step missing?")
                    })
                })
                .collect()
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamedStep {
    pub name: String,
    pub step: Step,
}

/// Ordered named steps ending in a regressor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    steps: Vec<NamedStep>,
}

impl Pipeline {
    /// Assemble a pipeline; names must be unique and the list non-empty.
    pub fn new<S: Into<String>>(steps: Vec<(S, Step)>) -> ServeResult<Self> {
        if steps.is_empty() {
            return Err(ServeError::TypeMismatch {
                expected: "pipeline with at least one step",
                actual: "empty pipeline".into(),
            });
        }
        let mut seen = HashSet::new();
        let steps: Vec<NamedStep> = steps
            .into_iter()
            .map(|(name, step)| NamedStep {
                name: name.into(),
                step,
            })
            .collect();
        for s in &steps {
            if !seen.insert(s.name.clone()) {
                return Err(ServeError::TypeMismatch {
                    expected: "unique step names",
                    actual: format!("duplicate step '{}'", s.name),
                });
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[NamedStep] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name).map(|s| &s.step)
    }

    pub fn is_fitted(&self) -> bool {
        self.steps.iter().all(|s| s.step.is_fitted())
    }

    /// Fit every step in order: intermediate steps fit-and-transform, the last one fits.
    pub fn fit(&mut self, rows: &[Vec<FeatureValue>], targets: &[f64]) -> ServeResult<()> {
        if rows.is_empty() {
            return Err(ServeError::Training("no training rows".into()));
        }
        if rows.len() != targets.len() {
            return Err(ServeError::Training(format!(
                "{} rows but {} targets",
                rows.len(),
                targets.len()
            )));
        }

        let (last, intermediate) = match self.steps.split_last_mut() {
            Some(parts) => parts,
            None => return Err(ServeError::Training("pipeline has no steps".into())),
        };
        let mut current = rows.to_vec();
        for named in intermediate.iter_mut() {
            current = named.step.fit_transform(&current, targets)?;
        }
        last.step.fit(&current, targets)?;
        tracing::debug!(rows = rows.len(), steps = self.steps.len(), "pipeline fitted");
        Ok(())
    }

    /// Run the rows through every step and return one prediction per row.
    pub fn predict(&self, rows: &[Vec<FeatureValue>]) -> ServeResult<Vec<f64>> {
        let (last, intermediate) = match self.steps.split_last() {
            Some(parts) => parts,
            None => return Err(ServeError::Inference("pipeline has no steps".into())),
        };
        let mut current = rows.to_vec();
        for named in intermediate {
            current = named.step.transform(&current)?;
        }
        last.step.predict(&current)
    }
}

/// The unit persisted by the registry. Only `Pipeline` is servable; a bare
/// estimator may be stored, and anything else is carried as opaque JSON so
/// type checks can reject it explicitly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "artifact", content = "body", rename_all = "snake_case")]
pub enum Artifact {
    Pipeline(Pipeline),
    Estimator(Step),
    Opaque(Value),
}

impl Artifact {
    /// Short description used in type mismatch errors.
    pub fn type_name(&self) -> String {
        match self {
            Artifact::Pipeline(_) => "Pipeline".to_string(),
            Artifact::Estimator(step) => step.kind().to_string(),
            Artifact::Opaque(value) => match value {
                Value::Null => "null".to_string(),
                Value::Bool(_) => "bool".to_string(),
                Value::Number(_) => "number".to_string(),
                Value::String(_) => "string".to_string(),
                Value::Array(_) => "array".to_string(),
                Value::Object(_) => "object".to_string(),
            },
        }
    }

    pub fn as_pipeline(&self) -> Option<&Pipeline> {
        match self {
            Artifact::Pipeline(p) => Some(p),
            _ => None,
        }
    }
}

impl From<Pipeline> for Artifact {
    fn from(p: Pipeline) -> Self {
        Artifact::Pipeline(p)
    }
}

impl From<Step> for Artifact {
    fn from(s: Step) -> Self {
        Artifact::Estimator(s)
    }
}
