use thiserror::Error;

use crate::backend::BackendError;

/// Failures that abort a generation job.
///
/// Retry exhaustion is deliberately absent: a job whose cuts keep failing
/// quality review ends in a FAILED status through normal classification,
/// not through an error on this type.
#[derive(Debug, Error)]
pub enum FourcutError {
    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("Storyboard parse error: {0}")]
    StoryboardParse(String),

    /// A stage observed state that an earlier stage should have produced.
    #[error("Stage contract violated: {0}")]
    Contract(&'static str),

    #[error("Generation backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
