//! Error handling primitives shared across the core.
//!
//! Messages name fields, steps and versions but never storage paths or
//! secrets. Paths are only ever emitted as `tracing` fields.

use thiserror::Error;

/// Stable error codes, grouped so hosts can map them onto transport statuses.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    /// Success code used as a sentinel.
    Ok = 0,
    /// Shared secret missing or wrong.
    Unauthorized = 1,
    /// Requested model or version does not exist.
    NotFound = 2,
    /// Request or training record failed schema validation.
    InvalidInput = 3,
    /// Feature schema definition is malformed.
    SchemaDefinition = 4,
    /// Persisted artifact does not match the expected pipeline shape.
    StructuralDrift = 5,
    /// Artifact store unreachable or I/O failed.
    StoreUnavailable = 6,
    /// Model produced something other than a single finite scalar.
    Inference = 7,
    /// Configuration could not be resolved.
    Config = 8,
    /// Catch-all for serialization bugs and corrupted artifacts.
    Internal = 9,
}

/// Canonical error type for the core.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid or missing API key")]
    Auth,

    #[error("{0}")]
    NotFound(String),

    #[error("record {index}: field '{field}' {reason}")]
    SchemaValidation {
        index: usize,
        field: String,
        reason: String,
    },

    #[error("schema definition error: {0}")]
    SchemaDefinition(String),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("loaded pipeline is missing steps: {}", .0.join(", "))]
    MissingSteps(Vec<String>),

    #[error("step '{step}' is expected to be of kind {expected}, but got {actual}")]
    StepTypeMismatch {
        step: String,
        expected: String,
        actual: String,
    },

    #[error("artifact store unavailable: {0}")]
    Connection(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("training failed: {0}")]
    Training(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("integrity check failed for version '{0}'")]
    Integrity(String),
}

/// Result alias used throughout the crate.
pub type ServeResult<T> = Result<T, ServeError>;

impl ServeError {
    /// Machine parsable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServeError::Auth => ErrorCode::Unauthorized,
            ServeError::NotFound(_) => ErrorCode::NotFound,
            ServeError::SchemaValidation { .. } | ServeError::Training(_) => {
                ErrorCode::InvalidInput
            }
            ServeError::SchemaDefinition(_) => ErrorCode::SchemaDefinition,
            ServeError::TypeMismatch { .. }
            | ServeError::MissingSteps(_)
            | ServeError::StepTypeMismatch { .. } => ErrorCode::StructuralDrift,
            ServeError::Connection(_) => ErrorCode::StoreUnavailable,
            ServeError::Inference(_) => ErrorCode::Inference,
            ServeError::Config(_) => ErrorCode::Config,
            ServeError::Serialization(_) | ServeError::Integrity(_) => ErrorCode::Internal,
        }
    }

    /// Validation helper.
    pub fn invalid_field(index: usize, field: &str, reason: impl Into<String>) -> Self {
        ServeError::SchemaValidation {
            index,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Store I/O helper. The operation name is kept, the underlying
    /// `io::Error` (which may carry a path) is only logged.
    pub fn io(op: &'static str, err: std::io::Error) -> Self {
        tracing::warn!(op, error = %err, "artifact store I/O failed");
        ServeError::Connection(format!("{op} failed ({})", err.kind()))
    }

    /// True for errors caused by the caller's request rather than the deployment.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServeError::Auth | ServeError::SchemaValidation { .. })
    }
}

impl From<serde_json::Error> for ServeError {
    fn from(err: serde_json::Error) -> Self {
        ServeError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Ok as u32, 0);
        assert_eq!(ErrorCode::Unauthorized as u32, 1);
        assert_eq!(ErrorCode::NotFound as u32, 2);
        assert_eq!(ErrorCode::InvalidInput as u32, 3);
        assert_eq!(ErrorCode::SchemaDefinition as u32, 4);
        assert_eq!(ErrorCode::StructuralDrift as u32, 5);
        assert_eq!(ErrorCode::StoreUnavailable as u32, 6);
        assert_eq!(ErrorCode::Inference as u32, 7);
        assert_eq!(ErrorCode::Config as u32, 8);
        assert_eq!(ErrorCode::Internal as u32, 9);
    }

    #[test]
    fn structural_errors_share_a_code() {
        let missing = ServeError::MissingSteps(vec!["model".into()]);
        let kind = ServeError::StepTypeMismatch {
            step: "model".into(),
            expected: "GradientBoostingRegressor".into(),
            actual: "DummyRegressor".into(),
        };
        assert_eq!(missing.code(), ErrorCode::StructuralDrift);
        assert_eq!(kind.code(), ErrorCode::StructuralDrift);
        assert_eq!(missing.to_string(), "loaded pipeline is missing steps: model");
    }

    #[test]
    fn io_errors_do_not_leak_paths() {
        let err = std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "/srv/secret/mlruns/model/versions/1/artifact.json",
        );
        let mapped = ServeError::io("read artifact", err);
        assert!(!mapped.to_string().contains("/srv"));
        assert_eq!(mapped.code(), ErrorCode::StoreUnavailable);
    }

    #[test]
    fn schema_validation_names_index_and_field() {
        let err = ServeError::invalid_field(3, "n_rooms", "is not a number");
        assert_eq!(err.to_string(), "record 3: field 'n_rooms' is not a number");
        assert!(err.is_client_error());
    }
}
