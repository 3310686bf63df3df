//! Structural drift detection between a persisted artifact and the code-defined pipeline.

pub mod service;

pub use service::validate;
