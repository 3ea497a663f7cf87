//! Long-poll retrieval of the ready set.
//!
//! ```text
//! changed = view non-empty and If-None-Match does not match its ETag
//!
//! changed                 -> 200 + ETag
//! !block, tag matches     -> 304
//! !block, empty           -> 404
//! block                   -> register, re-check, wait (wake or timeout), re-read:
//!                              changed -> 200, non-empty -> 304,
//!                              empty -> EmptyBlockResponse
//! ```
//!
//! Registration happens before the re-check so a change committed between
//! the first read and the registration still wakes the request. Dropping
//! the request future (client gone) drops the subscription, which
//! unregisters it.

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::debug;

use gatesync_state::{ReadyDeployment, StateStore, etag, etag_matches};

use crate::error::{API_ERR_BAD_BLOCK, ApiError};
use crate::{ApiState, EmptyBlockResponse};

#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    pub block: Option<String>,
}

/// Which slice of the ready set a route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Every ready deployment, as an array.
    All,
    /// The newest ready deployment, as an object.
    Current,
}

struct Snapshot {
    view: View,
    deployments: Vec<ReadyDeployment>,
    etag: String,
}

impl Snapshot {
    fn read(store: &StateStore, view: View) -> Result<Self, ApiError> {
        let mut deployments = store.list_ready_deployments()?;
        if view == View::Current {
            deployments = deployments.pop().into_iter().collect();
        }
        let etag = etag(&deployments)?;
        Ok(Self { view, deployments, etag })
    }

    fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    fn changed_for(&self, client_tag: Option<&str>) -> bool {
        !self.is_empty() && !client_tag.is_some_and(|tag| etag_matches(tag, &self.etag))
    }

    fn ok(self) -> Response {
        let headers = [(header::ETAG, self.etag)];
        match self.view {
            View::All => (StatusCode::OK, headers, Json(self.deployments)).into_response(),
            View::Current => (StatusCode::OK, headers, Json(self.deployments.into_iter().next())).into_response(),
        }
    }

    fn not_modified(self) -> Response {
        (StatusCode::NOT_MODIFIED, [(header::ETAG, self.etag)]).into_response()
    }
}

/// Parse `block`: absent or empty means don't block, any non-zero integer blocks.
pub fn parse_block(raw: Option<&str>) -> Result<bool, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(false),
        Some(value) => value.parse::<i64>().map(|n| n != 0).map_err(|_| {
            ApiError::new(StatusCode::BAD_REQUEST, API_ERR_BAD_BLOCK, format!("bad block value: {value:?}"))
        }),
    }
}

pub async fn long_poll(state: &ApiState, view: View, query: &PollQuery, headers: &HeaderMap) -> Result<Response, ApiError> {
    let block = parse_block(query.block.as_deref())?;
    let client_tag = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok());

    let current = Snapshot::read(&state.store, view)?;
    if current.changed_for(client_tag) {
        return Ok(current.ok());
    }
    if !block {
        if current.is_empty() {
            return Err(ApiError::not_found("no ready deployment"));
        }
        return Ok(current.not_modified());
    }

    let mut subscription = state.hub.register();
    let current = Snapshot::read(&state.store, view)?;
    if current.changed_for(client_tag) {
        return Ok(current.ok());
    }

    let woke = tokio::time::timeout(state.config.block_timeout, subscription.wait())
        .await
        .is_ok();
    drop(subscription);
    debug!(?view, woke, "long-poll resumed");

    let current = Snapshot::read(&state.store, view)?;
    if current.changed_for(client_tag) {
        Ok(current.ok())
    } else if !current.is_empty() {
        Ok(current.not_modified())
    } else {
        match state.config.empty_block_response {
            EmptyBlockResponse::NotFound => Err(ApiError::not_found("no ready deployment")),
            EmptyBlockResponse::Empty => Ok(current.ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_values() {
        assert!(!parse_block(None).unwrap());
        assert!(!parse_block(Some("")).unwrap());
        assert!(!parse_block(Some("0")).unwrap());
        assert!(parse_block(Some("1")).unwrap());
        assert!(parse_block(Some("30")).unwrap());

        let err = parse_block(Some("yes")).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, API_ERR_BAD_BLOCK);
    }

    #[test]
    fn empty_store_yields_empty_view() {
        let store = StateStore::open_in_memory().unwrap();
        let snapshot = Snapshot::read(&store, View::Current).unwrap();
        assert!(snapshot.is_empty());
        assert!(!snapshot.changed_for(None));
    }
}
