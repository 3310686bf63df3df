//! Filesystem artifact store for registered model versions.
//!
//! Layout:
//!
//! ```text
//! <registry_root>/<model>/versions/<id>/artifact.json
//! <registry_root>/<model>/versions/<id>/version.json   (written last)
//! <tracking_root>/runs/<run_id>/metrics.json
//! <tracking_root>/runs/<run_id>/artifacts/<file>
//! ```
//!
//! A version directory without `version.json` is an unfinished write and is
//! ignored by every reader.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::error::{ServeError, ServeResult};
use crate::common::ids;
use crate::common::time::{self, Cancellation};

use super::domain::{ArtifactStore, Metrics, ModelVersion, NewVersion, VersionId};

const ARTIFACT_FILE: &str = "artifact.json";
const VERSION_FILE: &str = "version.json";
const METRICS_FILE: &str = "metrics.json";
const MAX_ALLOCATION_ATTEMPTS: u64 = 64;

/// Resolve a `file:` URI (or a bare path) to a local directory.
pub fn parse_file_uri(uri: &str) -> ServeResult<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(rest));
    }
    if let Some(rest) = uri.strip_prefix("file:") {
        return Ok(PathBuf::from(rest));
    }
    match uri.split_once("://") {
        Some((scheme, _)) => Err(ServeError::Connection(format!(
            "unsupported artifact store scheme '{scheme}'"
        ))),
        None if uri.is_empty() => Err(ServeError::Config("empty artifact store URI".into())),
        None => Ok(PathBuf::from(uri)),
    }
}

fn check_model_name(model: &str) -> ServeResult<()> {
    let valid = !model.is_empty()
        && model != "."
        && model != ".."
        && model
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ServeError::Config(format!("invalid model name '{model}'")))
    }
}

/// Store-assigned ids are plain decimal numbers; anything else cannot exist.
fn is_version_id(version: &VersionId) -> bool {
    !version.as_str().is_empty() && version.as_str().bytes().all(|b| b.is_ascii_digit())
}

fn write_file(path: &Path, bytes: &[u8], op: &'static str) -> ServeResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| ServeError::io(op, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| ServeError::io(op, e))
}

/// Directory layout shared by the blocking helpers; cheap to clone into worker threads.
#[derive(Clone, Debug)]
struct Layout {
    registry_root: PathBuf,
    tracking_root: PathBuf,
}

impl Layout {
    fn versions_dir(&self, model: &str) -> PathBuf {
        self.registry_root.join(model).join("versions")
    }

    fn version_dir(&self, model: &str, version: &VersionId) -> PathBuf {
        self.versions_dir(model).join(version.as_str())
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.tracking_root.join("runs").join(run_id)
    }

    fn read_version(&self, model: &str, version: &VersionId) -> ServeResult<Option<ModelVersion>> {
        let path = self.version_dir(model, version).join(VERSION_FILE);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServeError::io("read version metadata", e)),
        }
    }

    fn list(&self, model: &str) -> ServeResult<Vec<ModelVersion>> {
        let dir = self.versions_dir(model);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ServeError::io("list versions", e)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ServeError::io("list versions", e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let id = VersionId::new(name);
            if !is_version_id(&id) {
                continue;
            }
            if let Some(v) = self.read_version(model, &id)? {
                versions.push(v);
            }
        }
        versions.sort_by(|a, b| a.recency_key().cmp(&b.recency_key()));
        Ok(versions)
    }

    /// Claim the next free numeric id by creating its directory.
    fn allocate(&self, model: &str) -> ServeResult<VersionId> {
        let dir = self.versions_dir(model);
        fs::create_dir_all(&dir).map_err(|e| ServeError::io("create versions dir", e))?;

        let mut next = fs::read_dir(&dir)
            .map_err(|e| ServeError::io("list versions", e))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_string_lossy().parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            match fs::create_dir(dir.join(next.to_string())) {
                Ok(()) => return Ok(VersionId::from(next)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => next += 1,
                Err(e) => return Err(ServeError::io("allocate version", e)),
            }
        }
        Err(ServeError::Connection("could not allocate a version id".into()))
    }

    fn write_run(
        &self,
        run_id: &str,
        metrics: &Metrics,
        aux_files: &[PathBuf],
    ) -> ServeResult<Vec<String>> {
        let run_dir = self.run_dir(run_id);
        let artifacts_dir = run_dir.join("artifacts");
        fs::create_dir_all(&artifacts_dir).map_err(|e| ServeError::io("create run dir", e))?;
        write_file(
            &run_dir.join(METRICS_FILE),
            &serde_json::to_vec_pretty(metrics)?,
            "write metrics",
        )?;

        let mut names = Vec::with_capacity(aux_files.len());
        for source in aux_files {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    ServeError::Serialization("auxiliary file has no file name".into())
                })?;
            fs::copy(source, artifacts_dir.join(&name))
                .map_err(|e| ServeError::io("copy auxiliary file", e))?;
            names.push(name);
        }
        Ok(names)
    }

    /// Remove the leftovers of a version whose caller gave up before the commit.
    fn discard(&self, version_dir: &Path, run_id: &str) {
        for dir in [version_dir.to_path_buf(), self.run_dir(run_id)] {
            if let Err(e) = fs::remove_dir_all(&dir) {
                tracing::warn!(
                    path = %dir.display(),
                    error = %e,
                    "cannot discard abandoned version"
                );
            }
        }
        tracing::warn!(path = %version_dir.display(), "abandoned version discarded");
    }

    fn create(
        &self,
        model: &str,
        new: NewVersion,
        cancel: &Cancellation,
    ) -> ServeResult<ModelVersion> {
        let last_created = self.list(model)?.iter().map(|v| v.created_ms).max();
        let version = self.allocate(model)?;
        let run_id = ids::new_run_id();
        let aux_files = self.write_run(&run_id, &new.metrics, &new.aux_files)?;

        let dir = self.version_dir(model, &version);
        write_file(&dir.join(ARTIFACT_FILE), &new.blob, "write artifact")?;

        let now = time::now_ms();
        let created_ms = match last_created {
            Some(last) if last >= now => last + 1,
            _ => now,
        };
        let record = ModelVersion {
            model_name: model.to_string(),
            version,
            created_ms,
            run_id,
            checksum: ids::checksum(&new.blob),
            artifact_kind: new.artifact_kind,
            aux_files,
        };

        // Commit: readers only see versions whose metadata file exists.
        let tmp = dir.join(format!("{VERSION_FILE}.tmp"));
        write_file(&tmp, &serde_json::to_vec_pretty(&record)?, "write version metadata")?;
        if !cancel.begin_commit() {
            self.discard(&dir, &record.run_id);
            return Err(ServeError::Connection("create version abandoned".into()));
        }
        fs::rename(&tmp, dir.join(VERSION_FILE))
            .map_err(|e| ServeError::io("commit version", e))?;

        tracing::debug!(
            model,
            version = %record.version,
            path = %dir.display(),
            "version committed"
        );
        Ok(record)
    }
}

/// Persist model versions on the local filesystem under `file:` URIs.
pub struct FsArtifactStore {
    layout: Layout,
    timeout: Duration,
}

impl FsArtifactStore {
    /// Open a store from tracking and registry URIs. Only `file:` URIs are supported.
    pub fn open(tracking_uri: &str, registry_uri: &str, timeout: Duration) -> ServeResult<Self> {
        Ok(Self {
            layout: Layout {
                registry_root: parse_file_uri(registry_uri)?,
                tracking_root: parse_file_uri(tracking_uri)?,
            },
            timeout,
        })
    }

    /// Store with tracking and registry data under a single root.
    pub fn new(root: impl Into<PathBuf>, timeout: Duration) -> Self {
        let root = root.into();
        Self {
            layout: Layout {
                registry_root: root.clone(),
                tracking_root: root,
            },
            timeout,
        }
    }

    fn run<T, F>(&self, op: &'static str, f: F) -> ServeResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Layout, Cancellation) -> ServeResult<T> + Send + 'static,
    {
        let layout = self.layout.clone();
        time::with_timeout(op, self.timeout, move |cancel| f(layout, cancel))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn create_version(&self, model: &str, new: NewVersion) -> ServeResult<ModelVersion> {
        check_model_name(model)?;
        let model = model.to_string();
        self.run("create version", move |layout, cancel| {
            layout.create(&model, new, &cancel)
        })
    }

    fn list_versions(&self, model: &str) -> ServeResult<Vec<ModelVersion>> {
        check_model_name(model)?;
        let model = model.to_string();
        self.run("list versions", move |layout, _| layout.list(&model))
    }

    fn get_version(&self, model: &str, version: &VersionId) -> ServeResult<Option<ModelVersion>> {
        check_model_name(model)?;
        if !is_version_id(version) {
            return Ok(None);
        }
        let model = model.to_string();
        let version = version.clone();
        self.run("get version", move |layout, _| {
            layout.read_version(&model, &version)
        })
    }

    fn read_blob(&self, model: &str, version: &VersionId) -> ServeResult<Vec<u8>> {
        check_model_name(model)?;
        if !is_version_id(version) {
            return Err(ServeError::NotFound(format!(
                "Model '{model}' version '{version}' does not exist."
            )));
        }
        let model = model.to_string();
        let version = version.clone();
        self.run("read artifact", move |layout, _| {
            let path = layout.version_dir(&model, &version).join(ARTIFACT_FILE);
            fs::read(path).map_err(|e| ServeError::io("read artifact", e))
        })
    }

    fn read_metrics(&self, run_id: &str) -> ServeResult<Metrics> {
        if run_id.is_empty() || !run_id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Ok(Metrics::new());
        }
        let run_id = run_id.to_string();
        self.run("read metrics", move |layout, _| {
            let path = layout.run_dir(&run_id).join(METRICS_FILE);
            match fs::read(path) {
                Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Metrics::new()),
                Err(e) => Err(ServeError::io("read metrics", e)),
            }
        })
    }
}
