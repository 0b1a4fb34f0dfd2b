use crate::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A malformed queue entry was handed to an enqueue operation.
    /// The queue is left unchanged.
    #[error("Invalid queue entry: {0}")]
    InvalidEntry(String),

    #[error("Job not found: {id}")]
    NotFound { id: JobId },
}
