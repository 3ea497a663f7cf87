//! Bundle error types and the stable error codes they map to.

use thiserror::Error;

/// Fetched bytes did not match the expected checksum.
pub const ERROR_CHECKSUM_MISMATCH: i64 = 1001;
/// The declared checksum type is not supported.
pub const ERROR_UNSUPPORTED_CHECKSUM: i64 = 1002;
/// The bundle bytes could not be fetched.
pub const ERROR_FETCH_FAILED: i64 = 1003;
/// Verified bytes could not be written to the local cache.
pub const ERROR_CACHE_WRITE_FAILED: i64 = 1004;

/// Integrity failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },

    #[error("unsupported checksum type: {0}")]
    UnsupportedAlgorithm(String),
}

impl VerifyError {
    /// Stable error code recorded against the failed deployment.
    pub fn error_code(&self) -> i64 {
        match self {
            Self::Mismatch { .. } => ERROR_CHECKSUM_MISMATCH,
            Self::UnsupportedAlgorithm(_) => ERROR_UNSUPPORTED_CHECKSUM,
        }
    }
}

/// Failures fetching raw bundle bytes.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported bundle uri: {0}")]
    UnsupportedScheme(String),

    #[error("http error fetching {uri}: {message}")]
    Http { uri: String, message: String },

    #[error("unexpected status {status} fetching {uri}")]
    Status { uri: String, status: u16 },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures writing to or cleaning the local bundle cache.
#[derive(Debug, Error)]
#[error("bundle cache error at {path}: {source}")]
pub struct CacheError {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}
