//! Constant regressor predicting the training mean. Useful as a baseline.

use serde::{Deserialize, Serialize};

use crate::common::error::{ServeError, ServeResult};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DummyRegressor {
    #[serde(default)]
    constant: Option<f64>,
}

impl DummyRegressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.constant.is_some()
    }

    pub fn fit(&mut self, targets: &[f64]) -> ServeResult<()> {
        if targets.is_empty() {
            return Err(ServeError::Training("no targets".into()));
        }
        self.constant = Some(targets.iter().sum::<f64>() / targets.len() as f64);
        Ok(())
    }

    pub fn predict(&self, n_rows: usize) -> ServeResult<Vec<f64>> {
        let constant = self
            .constant
            .ok_or_else(|| ServeError::Inference("DummyRegressor is not fitted".into()))?;
        Ok(vec![constant; n_rows])
    }
}
