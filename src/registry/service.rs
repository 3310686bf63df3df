//! Model registry: saves fitted artifacts under a model name and resolves
//! specific or latest versions back to loadable artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use crate::common::config::AppCfg;
use crate::common::error::{ServeError, ServeResult};
use crate::common::ids;
use crate::pipeline::Artifact;

use super::domain::{ArtifactStore, LoadedModel, Metrics, ModelVersion, NewVersion, VersionId};
use super::repo_fs::FsArtifactStore;

#[derive(Clone)]
pub struct ModelRegistry {
    model_name: String,
    store: Arc<dyn ArtifactStore>,
}

impl ModelRegistry {
    pub fn new(model_name: impl Into<String>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            model_name: model_name.into(),
            store,
        }
    }

    /// Registry backed by the filesystem store described by `cfg`.
    pub fn open(cfg: &AppCfg) -> ServeResult<Self> {
        let store = FsArtifactStore::open(&cfg.tracking_uri, &cfg.registry_uri, cfg.io_timeout())?;
        Ok(Self::new(cfg.model_name.clone(), Arc::new(store)))
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn not_found(&self, version: Option<&VersionId>) -> ServeError {
        match version {
            Some(v) => ServeError::NotFound(format!(
                "Model '{}' version '{}' does not exist.",
                self.model_name, v
            )),
            None => ServeError::NotFound(format!(
                "No versions found for model '{}'",
                self.model_name
            )),
        }
    }

    /// Register a fitted pipeline (or a bare regressor) as a new version.
    ///
    /// Nothing is persisted when the artifact has the wrong type or a metric is not finite.
    pub fn save(
        &self,
        artifact: &Artifact,
        metrics: Option<&Metrics>,
        aux_files: &[PathBuf],
    ) -> ServeResult<ModelVersion> {
        match artifact {
            Artifact::Pipeline(pipeline) => {
                if !pipeline.is_fitted() {
                    tracing::warn!(model = %self.model_name, "registering an unfitted pipeline");
                }
            }
            Artifact::Estimator(step) if step.kind().is_regressor() => {}
            other => {
                return Err(ServeError::TypeMismatch {
                    expected: "Pipeline or regressor",
                    actual: other.type_name(),
                })
            }
        }

        let metrics = metrics.cloned().unwrap_or_default();
        if let Some((name, _)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ServeError::Serialization(format!("metric '{name}' is not finite")));
        }

        let new = NewVersion {
            blob: serde_json::to_vec(artifact)?,
            artifact_kind: artifact.type_name(),
            metrics,
            aux_files: aux_files.to_vec(),
        };
        let version = self.store.create_version(&self.model_name, new)?;

        tracing::info!(
            model = %self.model_name,
            version = %version.version,
            run_id = %version.run_id,
            aux_files = version.aux_files.len(),
            "model version registered"
        );
        Ok(version)
    }

    /// Metadata of `version`, or of the latest one. `Ok(None)` means it does
    /// not exist; store failures are returned as errors.
    fn lookup(&self, version: Option<&VersionId>) -> ServeResult<Option<ModelVersion>> {
        match version {
            Some(v) => self.store.get_version(&self.model_name, v),
            None => Ok(self
                .versions()?
                .into_iter()
                .max_by(|a, b| a.recency_key().cmp(&b.recency_key()))),
        }
    }

    /// Existence probe; store failures count as "does not exist".
    pub fn exists(&self, version: Option<&VersionId>) -> bool {
        self.lookup(version)
            .map(|found| found.is_some())
            .unwrap_or_else(|err| {
                tracing::warn!(model = %self.model_name, error = %err, "existence probe failed");
                false
            })
    }

    /// All committed versions, oldest first.
    pub fn versions(&self) -> ServeResult<Vec<ModelVersion>> {
        self.store.list_versions(&self.model_name)
    }

    /// Identifier of the most recently created version.
    pub fn latest_version(&self) -> ServeResult<VersionId> {
        Ok(self.resolve(None)?.version)
    }

    /// Metadata of a specific version, or of the latest when `version` is `None`.
    pub fn resolve(&self, version: Option<&VersionId>) -> ServeResult<ModelVersion> {
        self.lookup(version)?.ok_or_else(|| self.not_found(version))
    }

    /// Load a specific version, or the latest when `version` is `None`.
    ///
    /// A missing version is `NotFound`; an unreachable store stays a `Connection` error.
    pub fn load(&self, version: Option<&VersionId>) -> ServeResult<LoadedModel> {
        let resolved = self.resolve(version)?;
        let blob = self.store.read_blob(&self.model_name, &resolved.version)?;
        if ids::checksum(&blob) != resolved.checksum {
            tracing::error!(
                model = %self.model_name,
                version = %resolved.version,
                "artifact checksum mismatch"
            );
            return Err(ServeError::Integrity(resolved.version.to_string()));
        }
        let artifact: Artifact = serde_json::from_slice(&blob)?;

        tracing::debug!(model = %self.model_name, version = %resolved.version, "model loaded");
        Ok(LoadedModel {
            version: resolved,
            artifact,
        })
    }

    /// Metrics recorded when `version` was saved.
    pub fn metrics(&self, version: &VersionId) -> ServeResult<Metrics> {
        let resolved = self.resolve(Some(version))?;
        self.store.read_metrics(&resolved.run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        reference_pipeline, ColumnTransformer, DummyRegressor, Hyperparameters, Pipeline, Step,
    };
    use crate::registry::domain::UnavailableStore;
    use crate::schema::{FeatureSchema, FeatureValue};
    use serde_json::json;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> ModelRegistry {
        let store = FsArtifactStore::new(dir.path(), Duration::from_secs(5));
        ModelRegistry::new("property-valuation-model", Arc::new(store))
    }

    fn fitted_dummy() -> Pipeline {
        let mut pipeline = Pipeline::new(vec![
            (
                "preprocessor",
                Step::ColumnTransformer(ColumnTransformer::new(
                    vec!["sector".into()],
                    vec!["sector".into()],
                )),
            ),
            ("model", Step::DummyRegressor(DummyRegressor::new())),
        ])
        .unwrap();
        pipeline
            .fit(&[vec![FeatureValue::Categorical("A".into())]], &[42.0])
            .unwrap();
        pipeline
    }

    /// Write a committed version by hand, with a chosen timestamp.
    fn fixture_version(dir: &TempDir, id: &str, created_ms: u64) {
        let blob = serde_json::to_vec(&Artifact::from(fitted_dummy())).unwrap();
        let version_dir = dir.path().join("property-valuation-model/versions").join(id);
        fs::create_dir_all(&version_dir).unwrap();
        fs::write(version_dir.join("artifact.json"), &blob).unwrap();
        let record = ModelVersion {
            model_name: "property-valuation-model".into(),
            version: VersionId::new(id),
            created_ms,
            run_id: format!("run{id}"),
            checksum: ids::checksum(&blob),
            artifact_kind: "Pipeline".into(),
            aux_files: Vec::new(),
        };
        fs::write(version_dir.join("version.json"), serde_json::to_vec(&record).unwrap()).unwrap();
    }

    #[test]
    fn save_then_load_round_trips_structure() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let pipeline = fitted_dummy();
        let saved = registry.save(&Artifact::from(pipeline.clone()), None, &[]).unwrap();

        let loaded = registry.load(Some(&saved.version)).unwrap();
        assert_eq!(loaded.version, saved);
        let loaded_pipeline = loaded.artifact.as_pipeline().unwrap();
        assert_eq!(loaded_pipeline.step_names(), pipeline.step_names());
        assert_eq!(loaded_pipeline, &pipeline);
    }

    #[test]
    fn latest_follows_the_maximum_timestamp_not_the_id() {
        let dir = TempDir::new().unwrap();
        fixture_version(&dir, "1", 3_000);
        fixture_version(&dir, "2", 5_000);
        fixture_version(&dir, "3", 1_000);
        let registry = registry(&dir);
        assert_eq!(registry.latest_version().unwrap().as_str(), "2");
        assert_eq!(registry.load(None).unwrap().version.version.as_str(), "2");
    }

    #[test]
    fn identical_timestamps_resolve_to_the_higher_id() {
        let dir = TempDir::new().unwrap();
        fixture_version(&dir, "9", 1_000);
        fixture_version(&dir, "10", 1_000);
        assert_eq!(registry(&dir).latest_version().unwrap().as_str(), "10");
    }

    #[test]
    fn unknown_version_is_not_found() {
        let dir = TempDir::new().unwrap();
        for id in 1..=5 {
            fixture_version(&dir, &id.to_string(), id * 1_000);
        }
        let err = registry(&dir).load(Some(&VersionId::new("99"))).unwrap_err();
        assert!(matches!(err, ServeError::NotFound(_)));
        assert!(err.to_string().contains("'99'"));
    }

    #[test]
    fn empty_registry_has_no_latest() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        assert!(!registry.exists(None));
        assert!(matches!(registry.latest_version(), Err(ServeError::NotFound(_))));
        assert!(matches!(registry.load(None), Err(ServeError::NotFound(_))));
    }

    #[test]
    fn store_outages_are_not_reported_as_missing_versions() {
        let registry = ModelRegistry::new("m", Arc::new(UnavailableStore));
        for version in [None, Some(VersionId::new("3"))] {
            let err = registry.load(version.as_ref()).unwrap_err();
            assert!(matches!(err, ServeError::Connection(_)), "{err:?}");
        }
        assert!(matches!(registry.latest_version(), Err(ServeError::Connection(_))));
        assert!(!registry.exists(None));
    }

    /// Filesystem store that records how often each read path is hit.
    struct CountingStore {
        inner: FsArtifactStore,
        lists: AtomicUsize,
        gets: AtomicUsize,
        reads: AtomicUsize,
    }

    impl ArtifactStore for CountingStore {
        fn create_version(&self, model: &str, new: NewVersion) -> ServeResult<ModelVersion> {
            self.inner.create_version(model, new)
        }

        fn list_versions(&self, model: &str) -> ServeResult<Vec<ModelVersion>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list_versions(model)
        }

        fn get_version(&self, model: &str, v: &VersionId) -> ServeResult<Option<ModelVersion>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get_version(model, v)
        }

        fn read_blob(&self, model: &str, version: &VersionId) -> ServeResult<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read_blob(model, version)
        }

        fn read_metrics(&self, run_id: &str) -> ServeResult<Metrics> {
            self.inner.read_metrics(run_id)
        }
    }

    #[test]
    fn loading_the_latest_lists_once_and_reads_once() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CountingStore {
            inner: FsArtifactStore::new(dir.path(), Duration::from_secs(5)),
            lists: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        });
        let registry = ModelRegistry::new("property-valuation-model", store.clone());
        registry.save(&Artifact::from(fitted_dummy()), None, &[]).unwrap();
        store.lists.store(0, Ordering::SeqCst);

        registry.load(None).unwrap();
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_pipeline_artifacts_are_rejected_before_persisting() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let err = registry
            .save(&Artifact::Opaque(json!([1.0, 2.0, 3.0])), None, &[])
            .unwrap_err();
        assert!(matches!(err, ServeError::TypeMismatch { ref actual, .. } if actual == "array"));

        let transformer = Step::ColumnTransformer(ColumnTransformer::new(vec![], vec![]));
        assert!(registry.save(&Artifact::from(transformer), None, &[]).is_err());
        assert!(!dir.path().join("property-valuation-model").exists());
    }

    #[test]
    fn bare_regressors_are_accepted() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let step = Step::DummyRegressor(DummyRegressor::new());
        let saved = registry.save(&Artifact::from(step), None, &[]).unwrap();
        assert_eq!(saved.artifact_kind, "DummyRegressor");
    }

    #[test]
    fn metrics_are_attached_to_the_version() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let mut metrics = Metrics::new();
        metrics.insert("train_r2_mean".into(), 0.91);
        let saved = registry
            .save(&Artifact::from(fitted_dummy()), Some(&metrics), &[])
            .unwrap();
        assert_eq!(registry.metrics(&saved.version).unwrap(), metrics);

        metrics.insert("broken".into(), f64::NAN);
        assert!(registry
            .save(&Artifact::from(fitted_dummy()), Some(&metrics), &[])
            .is_err());
        assert_eq!(registry.versions().unwrap().len(), 1);
    }

    #[test]
    fn tampered_artifacts_fail_the_integrity_check() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let schema = FeatureSchema::property_valuation().unwrap();
        let unfitted = reference_pipeline(&schema, &Hyperparameters::default()).unwrap();
        let saved = registry.save(&Artifact::from(unfitted), None, &[]).unwrap();

        let path = dir
            .path()
            .join("property-valuation-model/versions")
            .join(saved.version.as_str())
            .join("artifact.json");
        fs::write(&path, b"{\"artifact\":\"opaque\",\"body\":null}").unwrap();

        let err = registry.load(Some(&saved.version)).unwrap_err();
        assert!(matches!(err, ServeError::Integrity(ref v) if v == saved.version.as_str()));
    }

    #[test]
    fn open_rejects_remote_stores() {
        let cfg = AppCfg {
            tracking_uri: "http://mlflow:5000".into(),
            ..AppCfg::default()
        };
        assert!(matches!(ModelRegistry::open(&cfg), Err(ServeError::Connection(_))));
    }
}
