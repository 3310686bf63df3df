// lib.rs - serving core for the property valuation model
pub mod api;
pub mod common;
pub mod inference;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod validation;

pub use api::ServingApp;
pub use common::{AppCfg, ErrorCode, ServeError, ServeResult};
pub use inference::PredictionService;
pub use registry::ModelRegistry;
