//! Building the code-defined reference pipeline and fitting it.

use serde_json::Value;

use crate::common::error::ServeResult;
use crate::schema::{FeatureSchema, FeatureValue};

use super::boosting::{GradientBoostingRegressor, Hyperparameters};
use super::domain::{Pipeline, Step};
use super::encoder::ColumnTransformer;

pub const PREPROCESSOR_STEP: &str = "preprocessor";
pub const MODEL_STEP: &str = "model";

/// Unfitted `preprocessor -> model` pipeline derived from the schema and hyperparameters.
///
/// This is the shape every served artifact is checked against.
pub fn reference_pipeline(
    schema: &FeatureSchema,
    params: &Hyperparameters,
) -> ServeResult<Pipeline> {
    let feature_names = schema.feature_names().into_iter().map(String::from).collect();
    let categorical = schema
        .categorical_features()
        .into_iter()
        .map(String::from)
        .collect();

    Pipeline::new(vec![
        (
            PREPROCESSOR_STEP,
            Step::ColumnTransformer(ColumnTransformer::new(feature_names, categorical)),
        ),
        (
            MODEL_STEP,
            Step::GradientBoostingRegressor(GradientBoostingRegressor::new(params.clone())),
        ),
    ])
}

/// Validate raw training rows and fit a fresh reference pipeline on them.
pub fn train(
    schema: &FeatureSchema,
    params: &Hyperparameters,
    rows: &[Value],
) -> ServeResult<Pipeline> {
    let (records, targets) = schema.validate_training_rows(rows)?;
    let matrix = records
        .iter()
        .map(|r| schema.to_vector(r))
        .collect::<ServeResult<Vec<Vec<FeatureValue>>>>()?;

    let mut pipeline = reference_pipeline(schema, params)?;
    pipeline.fit(&matrix, &targets)?;
    tracing::info!(rows = rows.len(), target_field = schema.target_field(), "training finished");
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Loss, StepKind};
    use serde_json::json;

    fn small_params() -> Hyperparameters {
        Hyperparameters {
            learning_rate: 0.3,
            n_estimators: 40,
            max_depth: 3,
            loss: Loss::SquaredError,
            ..Hyperparameters::default()
        }
    }

    #[test]
    fn reference_has_preprocessor_then_model() {
        let schema = FeatureSchema::property_valuation().unwrap();
        let reference = reference_pipeline(&schema, &Hyperparameters::default()).unwrap();
        assert_eq!(reference.step_names(), vec!["preprocessor", "model"]);
        assert_eq!(
            reference.step("model").map(|s| s.kind()),
            Some(StepKind::GradientBoostingRegressor)
        );
        assert!(!reference.is_fitted());
    }

    #[test]
    fn trained_pipeline_separates_sectors() {
        let schema = FeatureSchema::property_valuation().unwrap();
        let rows: Vec<Value> = (0..60)
            .map(|i| {
                let sector = if i % 2 == 0 { "A" } else { "B" };
                let price = if sector == "A" { 9000.0 } else { 3000.0 };
                json!({
                    "type": "house",
                    "sector": sector,
                    "net_usable_area": 100.0,
                    "net_area": 120.0,
                    "n_rooms": 3,
                    "n_bathroom": 2,
                    "latitude": -33.4,
                    "longitude": -70.6,
                    "price": price
                })
            })
            .collect();

        let pipeline = train(&schema, &small_params(), &rows).unwrap();
        assert!(pipeline.is_fitted());

        let probe = |sector: &str| {
            let mut raw = rows[0].clone();
            raw["sector"] = json!(sector);
            let record = schema.validate_one(&raw).unwrap();
            pipeline.predict(&[schema.to_vector(&record).unwrap()]).unwrap()[0]
        };
        assert!(probe("A") > 8000.0);
        assert!(probe("B") < 4000.0);
    }
}
