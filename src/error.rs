//! Error types for structforge operations.
//!
//! Defines error types for all major subsystems:
//! - Source scraping and artifact downloads
//! - Fetch / file / rendering filters
//! - Artifact compilation and rendering backends
//! - The collection loop and permanent-storage writes

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while querying a source for candidates.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The date window moved past the configured floor; the source cannot
    /// supply more data for this run. Fatal for the fetcher.
    #[error("Source exhausted: date window moved past {floor}")]
    Exhausted { floor: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Source returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from source: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScrapeError {
    /// Whether the orchestrator may sleep and retry this error.
    /// Only exhaustion is permanent; everything else is transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScrapeError::Exhausted { .. })
    }
}

/// Errors that can occur while downloading a single artifact.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Download timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Destination path does not exist: {0}")]
    MissingDestination(PathBuf),

    #[error("Repository clone failed: {0}")]
    CloneFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when a filter cannot render a decision.
///
/// A filter error is never a rejection: it aborts processing of the
/// current candidate only, and the run continues.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Required metadata '{0}' missing from scrape result")]
    MissingMetadata(String),

    #[error("Scoring service unavailable: {0}")]
    ScoringUnavailable(String),

    #[error("Failed to decode image: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when an artifact cannot be compiled at all.
///
/// Partial success (some sub-units render, others do not) is not an
/// error; compilers return the sub-units that succeeded.
#[derive(Debug, Error)]
pub enum CompilationError {
    #[error("Input path does not exist: {0}")]
    InputMissing(PathBuf),

    #[error("Input path {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("Missing metadata '{0}' required for compilation")]
    MissingMetadata(String),

    #[error("Rendering failed: {0}")]
    RenderFailed(String),

    #[error("Rendering timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Server failed to start: {0}")]
    ServerFailed(String),

    #[error("Image is not usable: {0}")]
    UnusableImage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort an entire collection run.
///
/// Per-candidate failures are logged skips and never reach this type;
/// only source exhaustion and permanent-storage failures end a run.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Failed to persist instance: {0}")]
    Persist(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_is_not_retryable() {
        let err = ScrapeError::Exhausted {
            floor: "2023-01-01".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn http_errors_are_retryable() {
        assert!(ScrapeError::Http("connection reset".to_string()).is_retryable());
        assert!(ScrapeError::Status {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(ScrapeError::InvalidResponse("empty page".to_string()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = DownloadError::Timeout { seconds: 30 };
        assert!(err.to_string().contains("30 seconds"));

        let err = FilterError::MissingMetadata("user".to_string());
        assert!(err.to_string().contains("user"));

        let err = CompilationError::InputMissing(PathBuf::from("/tmp/missing"));
        assert!(err.to_string().contains("/tmp/missing"));
    }
}
