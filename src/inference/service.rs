//! Prediction orchestration over the registry, the structural validator and the schema.

use serde_json::Value;

use crate::common::config::AppCfg;
use crate::common::error::{ServeError, ServeResult};
use crate::pipeline::{reference_pipeline, Hyperparameters};
use crate::registry::{ModelRegistry, VersionId};
use crate::schema::FeatureSchema;
use crate::validation;

use super::domain::{ModelInfo, ServedPrediction};

/// Serves the latest registered version of one model.
///
/// Every call re-resolves the latest version, so a newly registered version is
/// picked up without a restart.
pub struct PredictionService {
    registry: ModelRegistry,
    schema: FeatureSchema,
    params: Hyperparameters,
}

impl PredictionService {
    /// Service for the model and store named in `cfg`. Fails unless the
    /// latest registered version loads and has the expected structure.
    pub fn new(cfg: &AppCfg) -> ServeResult<Self> {
        let registry = ModelRegistry::open(cfg)?;
        let schema = FeatureSchema::property_valuation()?;
        let svc = Self::from_parts(registry, schema, cfg.hyperparameters.clone());
        let version = svc.check()?;
        tracing::info!(model = %svc.model_name(), version = %version, "prediction service ready");
        Ok(svc)
    }

    pub fn from_parts(
        registry: ModelRegistry,
        schema: FeatureSchema,
        params: Hyperparameters,
    ) -> Self {
        Self {
            registry,
            schema,
            params,
        }
    }

    pub fn model_name(&self) -> &str {
        self.registry.model_name()
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Name and latest version of the served model.
    pub fn info(&self) -> ServeResult<ModelInfo> {
        Ok(ModelInfo {
            model_name: self.registry.model_name().to_string(),
            model_version: self.registry.latest_version()?,
        })
    }

    /// Load and structurally validate the latest version without predicting.
    pub fn check(&self) -> ServeResult<VersionId> {
        let loaded = self.registry.load(None)?;
        let reference = reference_pipeline(&self.schema, &self.params)?;
        validation::validate(&loaded.artifact, &reference)?;
        Ok(loaded.version.version)
    }

    /// Predict the target for one raw request record.
    pub fn predict(&self, raw: &Value) -> ServeResult<ServedPrediction> {
        let record = self.schema.validate_one(raw)?;
        let row = self.schema.to_vector(&record)?;

        let loaded = self.registry.load(None)?;
        let reference = reference_pipeline(&self.schema, &self.params)?;
        let pipeline = validation::validate(&loaded.artifact, &reference)?;

        let outputs = pipeline.predict(&[row])?;
        let value = match outputs.as_slice() {
            [value] if value.is_finite() => *value,
            [value] => return Err(ServeError::Inference(format!("model returned {value}"))),
            other => {
                return Err(ServeError::Inference(format!(
                    "expected one output, got {}",
                    other.len()
                )))
            }
        };

        tracing::debug!(
            model = %self.registry.model_name(),
            version = %loaded.version.version,
            "prediction computed"
        );
        Ok(ServedPrediction {
            result: self.schema.wrap_output(value),
            version: loaded.version.version,
        })
    }
}
