//! Versioned model registry over an append-only artifact store.

pub mod domain;
pub mod repo_fs;
pub mod service;

pub use domain::{ArtifactStore, LoadedModel, Metrics, ModelVersion, NewVersion, VersionId};
pub use repo_fs::FsArtifactStore;
pub use service::ModelRegistry;
