use thiserror::Error;

use gatesync_state::StoreError;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// A relevant row could not be mapped; the whole batch was rejected.
    #[error("malformed row {index} in {table}: {reason}")]
    MalformedRow { table: String, index: usize, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
