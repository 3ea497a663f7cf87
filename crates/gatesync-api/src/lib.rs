//! gatesync-api: HTTP surface for gateway agents.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/deployments` | All ready deployments (long-poll) |
//! | GET | `/deployments/current` | Newest ready deployment (long-poll) |
//! | POST | `/deployments` | Report outcomes for a batch of deployments |
//! | POST | `/deployments/{id}` | Report the outcome of one deployment |
//! | GET | `/healthz` | Liveness and store check |
//!
//! The GET routes honour `If-None-Match` and `?block=1`; see [`poll`].

pub mod error;
pub mod handlers;
pub mod poll;

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use serde::{Deserialize, Serialize};

use gatesync_notify::NotificationHub;
use gatesync_report::StatusReporter;
use gatesync_state::StateStore;

pub use error::ApiError;

/// What a blocking request answers when it wakes to an empty ready set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBlockResponse {
    /// `404`, same as a non-blocking request.
    #[default]
    NotFound,
    /// `200` with `[]` (or `null` for `/deployments/current`).
    Empty,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Upper bound on how long a `block=1` request waits for a change.
    pub block_timeout: Duration,
    pub empty_block_response: EmptyBlockResponse,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            block_timeout: Duration::from_secs(120),
            empty_block_response: EmptyBlockResponse::NotFound,
        }
    }
}

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub hub: NotificationHub,
    pub config: ApiConfig,
    /// Forwards recorded outcomes upstream; `None` disables reporting.
    pub reporter: Option<StatusReporter>,
}

impl ApiState {
    pub fn new(store: StateStore, hub: NotificationHub, config: ApiConfig) -> Self {
        Self {
            store,
            hub,
            config,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: StatusReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/deployments", get(handlers::list_deployments).post(handlers::report_statuses))
        .route("/deployments/current", get(handlers::current_deployment))
        .route("/deployments/{id}", axum::routing::post(handlers::report_status))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}
