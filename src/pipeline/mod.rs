//! Composite pipelines: step kinds, fitting, prediction and the persisted artifact.

pub mod boosting;
pub mod domain;
pub mod dummy;
pub mod encoder;
pub mod service;

pub use boosting::{GradientBoostingRegressor, Hyperparameters, Loss};
pub use domain::{Artifact, NamedStep, Pipeline, Step, StepKind};
pub use dummy::DummyRegressor;
pub use encoder::{ColumnTransformer, TargetEncoder};
pub use service::{reference_pipeline, train, MODEL_STEP, PREPROCESSOR_STEP};
