//! Request-time prediction: load, structurally validate, vectorize, infer, wrap.

pub mod cache;
pub mod domain;
pub mod service;

pub use cache::ServingCache;
pub use domain::{ModelInfo, ServedPrediction};
pub use service::PredictionService;
