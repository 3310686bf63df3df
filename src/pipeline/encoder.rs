//! Column transformer that target-encodes categorical columns and passes
//! numeric columns through in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::error::{ServeError, ServeResult};
use crate::schema::FeatureValue;

/// Smoothed mean-target encoding for categorical labels.
///
/// Each category maps to a blend of its own mean target and the global prior,
/// weighted by a sigmoid of its frequency. Singletons and unseen labels get
/// the prior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetEncoder {
    pub min_samples_leaf: f64,
    pub smoothing: f64,
    #[serde(default)]
    state: Option<EncoderState>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct EncoderState {
    prior: f64,
    /// column name -> category -> encoded value
    mappings: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Default for TargetEncoder {
    fn default() -> Self {
        Self {
            min_samples_leaf: 20.0,
            smoothing: 10.0,
            state: None,
        }
    }
}

impl TargetEncoder {
    fn blend(&self, prior: f64, sum: f64, count: usize) -> f64 {
        if count <= 1 {
            return prior;
        }
        let mean = sum / count as f64;
        let excess = count as f64 - self.min_samples_leaf;
        let weight = 1.0 / (1.0 + (-excess / self.smoothing).exp());
        prior * (1.0 - weight) + mean * weight
    }

    fn encode(&self, column: &str, category: &str) -> Option<f64> {
        let state = self.state.as_ref()?;
        Some(
            state
                .mappings
                .get(column)
                .and_then(|m| m.get(category))
                .copied()
                .unwrap_or(state.prior),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransformer {
    /// Full input column order the transformer was built for.
    pub feature_names: Vec<String>,
    /// Columns routed through the encoder.
    pub categorical: Vec<String>,
    pub encoder: TargetEncoder,
}

impl ColumnTransformer {
    pub fn new(feature_names: Vec<String>, categorical: Vec<String>) -> Self {
        Self {
            feature_names,
            categorical,
            encoder: TargetEncoder::default(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.encoder.state.is_some()
    }

    fn categorical_positions(&self) -> Result<Vec<(usize, &str)>, String> {
        self.categorical
            .iter()
            .map(|name| {
                self.feature_names
                    .iter()
                    .position(|f| f == name)
                    .map(|idx| (idx, name.as_str()))
                    .ok_or_else(|| format!("categorical column '{name}' is not an input column"))
            })
            .collect()
    }

    fn check_width(&self, row: &[FeatureValue]) -> Result<(), String> {
        if row.len() != self.feature_names.len() {
            return Err(format!(
                "expected {} columns, got {}",
                self.feature_names.len(),
                row.len()
            ));
        }
        Ok(())
    }

    pub fn fit(&mut self, rows: &[Vec<FeatureValue>], targets: &[f64]) -> ServeResult<()> {
        let positions = self.categorical_positions().map_err(ServeError::Training)?;
        for row in rows {
            self.check_width(row).map_err(ServeError::Training)?;
        }
        if targets.is_empty() {
            return Err(ServeError::Training("no targets to encode against".into()));
        }

        let prior = targets.iter().sum::<f64>() / targets.len() as f64;
        let mut mappings = BTreeMap::new();
        for (idx, column) in positions {
            let mut stats: BTreeMap<String, (f64, usize)> = BTreeMap::new();
            for (row, target) in rows.iter().zip(targets) {
                let category = row[idx].as_category().ok_or_else(|| {
                    ServeError::Training(format!("column '{column}' expects a category"))
                })?;
                let entry = stats.entry(category.to_string()).or_insert((0.0, 0));
                entry.0 += target;
                entry.1 += 1;
            }
            let encoded = stats
                .into_iter()
                .map(|(category, (sum, count))| (category, self.encoder.blend(prior, sum, count)))
                .collect();
            mappings.insert(column.to_string(), encoded);
        }

        self.encoder.state = Some(EncoderState { prior, mappings });
        Ok(())
    }

    pub fn transform(&self, rows: &[Vec<FeatureValue>]) -> ServeResult<Vec<Vec<FeatureValue>>> {
        if !self.is_fitted() {
            return Err(ServeError::Inference("ColumnTransformer is not fitted".into()));
        }
        let positions = self.categorical_positions().map_err(ServeError::Inference)?;

        rows.iter()
            .map(|row| {
                self.check_width(row).map_err(ServeError::Inference)?;
                let mut out = row.clone();
                for &(idx, column) in &positions {
                    let category = row[idx].as_category().ok_or_else(|| {
                        ServeError::Inference(format!("column '{column}' expects a category"))
                    })?;
                    let encoded = self.encoder.encode(column, category).ok_or_else(|| {
                        ServeError::Inference("ColumnTransformer is not fitted".into())
                    })?;
                    out[idx] = FeatureValue::Numeric(encoded);
                }
                Ok(out)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(s: &str) -> FeatureValue {
        FeatureValue::Categorical(s.into())
    }

    fn transformer() -> ColumnTransformer {
        ColumnTransformer::new(vec!["sector".into(), "area".into()], vec!["sector".into()])
    }

    #[test]
    fn frequent_categories_approach_their_mean() {
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for _ in 0..100 {
            rows.push(vec![cat("A"), FeatureValue::Numeric(1.0)]);
            targets.push(100.0);
            rows.push(vec![cat("B"), FeatureValue::Numeric(1.0)]);
            targets.push(0.0);
        }
        let mut t = transformer();
        t.fit(&rows, &targets).unwrap();
        let out = t.transform(&[vec![cat("A"), FeatureValue::Numeric(7.0)]]).unwrap();
        let encoded = out[0][0].as_f64().unwrap();
        assert!(encoded > 99.0, "encoded = {encoded}");
        assert_eq!(out[0][1], FeatureValue::Numeric(7.0));
    }

    #[test]
    fn unseen_and_singleton_categories_use_the_prior() {
        let rows = vec![
            vec![cat("A"), FeatureValue::Numeric(1.0)],
            vec![cat("B"), FeatureValue::Numeric(1.0)],
        ];
        let mut t = transformer();
        t.fit(&rows, &[10.0, 30.0]).unwrap();
        let out = t
            .transform(&[
                vec![cat("A"), FeatureValue::Numeric(0.0)],
                vec![cat("Z"), FeatureValue::Numeric(0.0)],
            ])
            .unwrap();
        assert_eq!(out[0][0], FeatureValue::Numeric(20.0));
        assert_eq!(out[1][0], FeatureValue::Numeric(20.0));
    }

    #[test]
    fn transform_before_fit_fails() {
        let err = transformer().transform(&[]).unwrap_err();
        assert!(err.to_string().contains("not fitted"));
    }

    #[test]
    fn unknown_categorical_column_fails_fit() {
        let mut t = ColumnTransformer::new(vec!["area".into()], vec!["sector".into()]);
        let err = t.fit(&[vec![FeatureValue::Numeric(1.0)]], &[1.0]).unwrap_err();
        assert!(err.to_string().contains("'sector'"));
    }
}
