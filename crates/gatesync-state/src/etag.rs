//! ETag computation over the ready deployment set.
//!
//! The tag is the hex SHA-256 of the set's JSON encoding, quoted per RFC 9110.
//! serde_json encodes struct fields in declaration order and object keys in
//! sorted order, so equal sets always encode to equal bytes.

use sha2::{Digest, Sha256};

use crate::error::{StoreError, StoreResult};
use crate::types::ReadyDeployment;

/// Compute the ETag of a ready set.
pub fn etag(set: &[ReadyDeployment]) -> StoreResult<String> {
    let encoded = serde_json::to_vec(set).map_err(|e| StoreError::Serialize(e.to_string()))?;
    let digest = Sha256::digest(&encoded);
    Ok(format!("\"{}\"", hex::encode(digest)))
}

/// Whether an `If-None-Match` header value matches `current`.
///
/// Accepts a comma-separated list, weak (`W/`) tags, unquoted tags and `*`.
pub fn etag_matches(if_none_match: &str, current: &str) -> bool {
    let current = strip_tag(current);
    if_none_match
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .any(|candidate| candidate == "*" || strip_tag(candidate) == current)
}

fn strip_tag(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}
