//! Typed error hierarchy for the uplift pipeline.
//!
//! Three top-level enums cover the three subsystems:
//! - `RegistryError`: snapshot persistence and record updates
//! - `OperationError`: a single collaborator call (fetch, distill, ...)
//! - `PipelineError`: orchestrator failures, including blocking validation errors

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uplift_common::{ErrorKind, PipelinePhase, SourceError, TransitionError};

use crate::gates::BlockingError;

/// Errors from the source registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Snapshot at {path} is corrupted: {reason}")]
    SnapshotCorrupted { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Unknown source {url}")]
    UnknownSource { url: String },

    #[error(transparent)]
    InvalidUpdate(#[from] TransitionError),

    #[error("Registry lock poisoned")]
    LockPoisoned,
}

/// Failure of one external operation attempt. Always retryable within budget.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OperationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperationError::Network(_) => ErrorKind::Network,
            OperationError::Timeout(_) => ErrorKind::Timeout,
            OperationError::HttpStatus { .. } => ErrorKind::HttpStatus,
            OperationError::Processing(_) => ErrorKind::Processing,
            OperationError::Io(_) => ErrorKind::Io,
        }
    }

    /// Record-level form of this error.
    pub fn to_source_error(&self, phase: PipelinePhase, retry_count: u32) -> SourceError {
        SourceError::new(self.kind(), self.to_string(), phase).with_retry_count(retry_count)
    }
}

impl From<reqwest::Error> for OperationError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => OperationError::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => OperationError::Network(err.to_string()),
        }
    }
}

/// Errors from the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Blocking(Box<BlockingError>),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<BlockingError> for PipelineError {
    fn from(err: BlockingError) -> Self {
        PipelineError::Blocking(Box::new(err))
    }
}

impl PipelineError {
    pub fn as_blocking(&self) -> Option<&BlockingError> {
        match self {
            PipelineError::Blocking(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_unknown_source_carries_url() {
        let err = RegistryError::UnknownSource {
            url: "https://example.com/missing".into(),
        };
        assert!(err.to_string().contains("https://example.com/missing"));
    }

    #[test]
    fn registry_error_converts_from_transition_error() {
        let inner = TransitionError::MissingError { url: "u".into() };
        let err: RegistryError = inner.into();
        assert!(matches!(err, RegistryError::InvalidUpdate(_)));
    }

    #[test]
    fn operation_error_maps_to_record_error_kind() {
        let err = OperationError::Timeout(Duration::from_secs(5));
        let record_err = err.to_source_error(PipelinePhase::Collection, 3);
        assert_eq!(record_err.kind, ErrorKind::Timeout);
        assert_eq!(record_err.retry_count, 3);
        assert_eq!(record_err.phase, PipelinePhase::Collection);
        assert!(record_err.message.contains("timed out"));
    }

    #[test]
    fn operation_error_http_status_is_matchable() {
        let err = OperationError::HttpStatus {
            status: 503,
            url: "https://example.com".into(),
        };
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn pipeline_error_precondition_is_not_blocking() {
        let err = PipelineError::Precondition("no records".into());
        assert!(err.as_blocking().is_none());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&RegistryError::LockPoisoned);
        assert_std_error(&OperationError::Processing("x".into()));
        assert_std_error(&PipelineError::Precondition("x".into()));
    }
}
