//! Values returned by the prediction service.

use serde::Serialize;

use crate::registry::VersionId;
use crate::schema::PredictionResult;

/// A prediction together with the version that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct ServedPrediction {
    pub result: PredictionResult,
    pub version: VersionId,
}

/// Identity of the model currently served.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub model_version: VersionId,
}
