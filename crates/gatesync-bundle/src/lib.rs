//! gatesync-bundle: getting bundle bytes onto the node safely.
//!
//! - [`verify`]: checksum verification (`crc-32`, `md5`, `sha256`, `sha512`)
//! - [`fetch`]: the `BundleFetcher` seam and its http/file implementation
//! - [`cache`]: the on-disk cache verified bytes are written to

pub mod cache;
pub mod error;
pub mod fetch;
pub mod verify;

pub use cache::BundleCache;
pub use error::*;
pub use fetch::{BundleFetcher, BundleLocation, UriFetcher};
pub use verify::{ChecksumType, verify};
