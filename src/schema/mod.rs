//! Feature schema: the training/serving contract for inputs and the target.

pub mod domain;
pub mod validate;

pub use domain::{
    FeatureDescriptor, FeatureKind, FeatureSchema, FeatureValue, PredictionResult, Record,
};
