//! Gradient boosted regression trees.
//!
//! Each stage fits a depth-limited tree to the negative gradient of the loss
//! and shrinks it by the learning rate. With absolute error the trees split on
//! the residual signs and their leaves hold residual medians.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::common::error::{ServeError, ServeResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    SquaredError,
    AbsoluteError,
}

/// Boosting hyperparameters. Missing keys in config files fall back to the defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub learning_rate: f64,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub loss: Loss,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            n_estimators: 300,
            max_depth: 5,
            min_samples_split: 2,
            min_samples_leaf: 1,
            loss: Loss::AbsoluteError,
        }
    }
}

impl Hyperparameters {
    fn check(&self) -> ServeResult<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ServeError::Training("learning_rate must be positive".into()));
        }
        if self.n_estimators == 0 || self.max_depth == 0 || self.min_samples_leaf == 0 {
            return Err(ServeError::Training(
                "n_estimators, max_depth and min_samples_leaf must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                Some(Node::Leaf { value }) => return *value,
                None => return 0.0,
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Ensemble {
    init: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    pub params: Hyperparameters,
    #[serde(default)]
    state: Option<Ensemble>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    score: f64,
}

/// Grows one tree on a fixed gradient/residual snapshot.
struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    gradient: &'a [f64],
    residuals: &'a [f64],
    params: &'a Hyperparameters,
}

impl TreeBuilder<'_> {
    fn build(&self, indices: &[usize]) -> RegressionTree {
        let mut nodes = Vec::new();
        self.grow(&mut nodes, indices, 0);
        RegressionTree { nodes }
    }

    fn leaf_value(&self, indices: &[usize]) -> f64 {
        match self.params.loss {
            Loss::SquaredError => mean(indices.iter().map(|&i| self.gradient[i])),
            Loss::AbsoluteError => median(indices.iter().map(|&i| self.residuals[i]).collect()),
        }
    }

    fn grow(&self, nodes: &mut Vec<Node>, indices: &[usize], depth: usize) -> usize {
        let id = nodes.len();
        nodes.push(Node::Leaf {
            value: self.leaf_value(indices),
        });
        if depth >= self.params.max_depth || indices.len() < self.params.min_samples_split {
            return id;
        }

        if let Some(split) = self.best_split(indices) {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .copied()
                .partition(|&i| self.x[i][split.feature] <= split.threshold);
            let left = self.grow(nodes, &left_idx, depth + 1);
            let right = self.grow(nodes, &right_idx, depth + 1);
            nodes[id] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
        }
        id
    }

    /// Best variance-reducing split, scored as `sum_l^2/n_l + sum_r^2/n_r`.
    fn best_split(&self, indices: &[usize]) -> Option<Split> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf;
        let total: f64 = indices.iter().map(|&i| self.gradient[i]).sum();
        let parent_score = total * total / n as f64;
        let n_features = self.x.first().map(Vec::len).unwrap_or(0);

        let mut best: Option<Split> = None;
        let mut sorted = indices.to_vec();
        for feature in 0..n_features {
            sorted.sort_by(|&a, &b| {
                self.x[a][feature]
                    .partial_cmp(&self.x[b][feature])
                    .unwrap_or(Ordering::Equal)
            });

            let mut left_sum = 0.0;
            for k in 1..n {
                left_sum += self.gradient[sorted[k - 1]];
                let lo = self.x[sorted[k - 1]][feature];
                let hi = self.x[sorted[k]][feature];
                if lo == hi || k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
                if score <= parent_score + 1e-12 {
                    continue;
                }
                if best.as_ref().map_or(true, |b| score > b.score) {
                    let mid = lo + (hi - lo) / 2.0;
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some(Split {
                        feature,
                        threshold,
                        score,
                    });
                }
            }
        }
        best
    }
}

impl GradientBoostingRegressor {
    pub fn new(params: Hyperparameters) -> Self {
        Self {
            params,
            state: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn n_trees(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.trees.len())
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> ServeResult<()> {
        self.params.check()?;
        let n_features = match x.first() {
            Some(row) => row.len(),
            None => return Err(ServeError::Training("no training rows".into())),
        };
        if x.iter().any(|row| row.len() != n_features) {
            return Err(ServeError::Training("ragged feature matrix".into()));
        }
        if x.len() != y.len() {
            return Err(ServeError::Training(format!(
                "{} rows but {} targets",
                x.len(),
                y.len()
            )));
        }

        let init = match self.params.loss {
            Loss::SquaredError => mean(y.iter().copied()),
            Loss::AbsoluteError => median(y.to_vec()),
        };
        let indices: Vec<usize> = (0..x.len()).collect();
        let mut fitted = vec![init; x.len()];
        let mut trees = Vec::with_capacity(self.params.n_estimators);

        for _ in 0..self.params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(t, f)| t - f).collect();
            let gradient: Vec<f64> = match self.params.loss {
                Loss::SquaredError => residuals.clone(),
                Loss::AbsoluteError => residuals
                    .iter()
                    .map(|r| match r.partial_cmp(&0.0) {
                        Some(Ordering::Greater) => 1.0,
                        Some(Ordering::Less) => -1.0,
                        _ => 0.0,
                    })
                    .collect(),
            };

            let tree = TreeBuilder {
                x,
                gradient: &gradient,
                residuals: &residuals,
                params: &self.params,
            }
            .build(&indices);
            for (row, f) in x.iter().zip(fitted.iter_mut()) {
                *f += self.params.learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }

        tracing::debug!(
            trees = trees.len(),
            rows = x.len(),
            features = n_features,
            "gradient boosting fitted"
        );
        self.state = Some(Ensemble {
            init,
            n_features,
            trees,
        });
        Ok(())
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> ServeResult<Vec<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| {
                ServeError::Inference("GradientBoostingRegressor is not fitted".into())
            })?;

        x.iter()
            .map(|row| {
                if row.len() != state.n_features {
                    return Err(ServeError::Inference(format!(
                        "expected {} features, got {}",
                        state.n_features,
                        row.len()
                    )));
                }
                let boost: f64 = state.trees.iter().map(|t| t.predict_row(row)).sum();
                Ok(state.init + self.params.learning_rate * boost)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let v = i as f64;
            x.push(vec![v, 1.0]);
            y.push(if v < 20.0 { 10.0 } else { 50.0 });
        }
        (x, y)
    }

    fn params(loss: Loss) -> Hyperparameters {
        Hyperparameters {
            learning_rate: 0.5,
            n_estimators: 30,
            max_depth: 2,
            loss,
            ..Hyperparameters::default()
        }
    }

    #[test]
    fn squared_error_learns_a_step_function() {
        let (x, y) = step_data();
        let mut model = GradientBoostingRegressor::new(params(Loss::SquaredError));
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&[vec![3.0, 1.0], vec![35.0, 1.0]]).unwrap();
        assert!((preds[0] - 10.0).abs() < 0.5, "{preds:?}");
        assert!((preds[1] - 50.0).abs() < 0.5, "{preds:?}");
    }

    #[test]
    fn absolute_error_starts_from_the_median_and_converges() {
        let (x, y) = step_data();
        let mut model = GradientBoostingRegressor::new(params(Loss::AbsoluteError));
        model.fit(&x, &y).unwrap();
        assert_eq!(model.n_trees(), 30);
        let preds = model.predict(&[vec![0.0, 1.0], vec![39.0, 1.0]]).unwrap();
        assert!((preds[0] - 10.0).abs() < 1.0, "{preds:?}");
        assert!((preds[1] - 50.0).abs() < 1.0, "{preds:?}");
    }

    #[test]
    fn constant_targets_produce_constant_predictions() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let mut model = GradientBoostingRegressor::new(params(Loss::SquaredError));
        model.fit(&x, &[7.0, 7.0, 7.0]).unwrap();
        assert_eq!(model.predict(&[vec![100.0]]).unwrap(), vec![7.0]);
    }

    #[test]
    fn predict_checks_width_and_fit_state() {
        let model = GradientBoostingRegressor::new(Hyperparameters::default());
        assert!(model.predict(&[vec![1.0]]).is_err());

        let (x, y) = step_data();
        let mut model = GradientBoostingRegressor::new(params(Loss::SquaredError));
        model.fit(&x, &y).unwrap();
        let err = model.predict(&[vec![1.0]]).unwrap_err();
        assert!(err.to_string().contains("expected 2 features"));
    }

    #[test]
    fn invalid_hyperparameters_are_rejected() {
        let mut model = GradientBoostingRegressor::new(Hyperparameters {
            n_estimators: 0,
            ..Hyperparameters::default()
        });
        assert!(matches!(
            model.fit(&[vec![1.0]], &[1.0]),
            Err(ServeError::Training(_))
        ));
    }

    #[test]
    fn median_averages_the_middle_pair() {
        assert_eq!(median(vec![4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(vec![5.0, 1.0, 3.0]), 3.0);
    }
}
