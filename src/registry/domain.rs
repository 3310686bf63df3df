//! Domain types for model versioning and the artifact store contract.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::ServeResult;
use crate::pipeline::Artifact;

/// Metric name to value, attached to a version at save time.
pub type Metrics = BTreeMap<String, f64>;

/// Version label wrapper to avoid mixing with model names.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of store-assigned ids ("1", "2", ...).
    pub fn number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for VersionId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Immutable metadata of one registered version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model_name: String,
    pub version: VersionId,
    /// Milliseconds since the epoch, assigned by the store.
    pub created_ms: u64,
    /// Run the metrics and auxiliary files are attached to.
    pub run_id: String,
    /// SHA-256 of the serialized artifact.
    pub checksum: String,
    /// Type of the stored artifact, e.g. `Pipeline`.
    pub artifact_kind: String,
    #[serde(default)]
    pub aux_files: Vec<String>,
}

impl ModelVersion {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_ms as i64).single()
    }

    /// Ordering key for "latest": timestamp first, then numeric id on ties.
    pub(crate) fn recency_key(&self) -> (u64, u64, &str) {
        (
            self.created_ms,
            self.version.number().unwrap_or(0),
            self.version.as_str(),
        )
    }
}

/// A resolved version together with its deserialized artifact.
#[derive(Clone, Debug)]
pub struct LoadedModel {
    pub version: ModelVersion,
    pub artifact: Artifact,
}

/// What a training run hands to the store in one `create_version` call.
#[derive(Clone, Debug, Default)]
pub struct NewVersion {
    pub blob: Vec<u8>,
    pub artifact_kind: String,
    pub metrics: Metrics,
    pub aux_files: Vec<PathBuf>,
}

/// Repository contract for model artefacts.
///
/// Versions are append-only: implementations never mutate or delete a
/// committed version.
pub trait ArtifactStore: Send + Sync {
    /// Persist a new version and return its store-assigned metadata.
    fn create_version(&self, model: &str, new: NewVersion) -> ServeResult<ModelVersion>;
    /// All committed versions, oldest first.
    fn list_versions(&self, model: &str) -> ServeResult<Vec<ModelVersion>>;
    fn get_version(&self, model: &str, version: &VersionId) -> ServeResult<Option<ModelVersion>>;
    fn read_blob(&self, model: &str, version: &VersionId) -> ServeResult<Vec<u8>>;
    fn read_metrics(&self, run_id: &str) -> ServeResult<Metrics>;
}

/// Store double whose every call fails as if the backend were unreachable.
#[cfg(test)]
pub(crate) struct UnavailableStore;

#[cfg(test)]
impl UnavailableStore {
    fn down<T>() -> ServeResult<T> {
        Err(crate::common::error::ServeError::Connection("store unreachable".into()))
    }
}

#[cfg(test)]
impl ArtifactStore for UnavailableStore {
    fn create_version(&self, _model: &str, _new: NewVersion) -> ServeResult<ModelVersion> {
        Self::down()
    }

    fn list_versions(&self, _model: &str) -> ServeResult<Vec<ModelVersion>> {
        Self::down()
    }

    fn get_version(&self, _model: &str, _version: &VersionId) -> ServeResult<Option<ModelVersion>> {
        Self::down()
    }

    fn read_blob(&self, _model: &str, _version: &VersionId) -> ServeResult<Vec<u8>> {
        Self::down()
    }

    fn read_metrics(&self, _run_id: &str) -> ServeResult<Metrics> {
        Self::down()
    }
}
