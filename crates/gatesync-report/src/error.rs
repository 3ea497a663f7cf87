//! Status reporting error types.

use thiserror::Error;

use gatesync_state::StoreError;

pub type ReportResult<T> = Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    /// The payload was rejected before touching the store.
    #[error("invalid status report: {0}")]
    Validation(String),

    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("upstream error: {0}")]
    Sink(#[from] SinkError),
}

/// Failures delivering outcomes to the control plane.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}
