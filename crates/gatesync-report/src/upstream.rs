//! Delivery of recorded outcomes to the control plane.
//!
//! Outcomes stay pending (`status_reported == false`) until a send
//! succeeds, so a restart or a failed request just means they are sent
//! again on the next attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use gatesync_state::{Deployment, DeploymentStatus, StateStore};

use crate::error::{ReportResult, SinkError};

/// One outcome as sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResult {
    pub id: String,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Deployment> for UpstreamResult {
    fn from(deployment: &Deployment) -> Self {
        Self {
            id: deployment.id.clone(),
            status: deployment.status,
            error_code: deployment.error_code,
            message: deployment.error_message.clone(),
        }
    }
}

/// Receiver of deployment outcomes.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn send(&self, results: &[UpstreamResult]) -> Result<(), SinkError>;
}

/// Posts outcomes as a JSON array to a fixed URL.
pub struct HttpStatusSink {
    client: reqwest::Client,
    url: String,
}

impl HttpStatusSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn send(&self, results: &[UpstreamResult]) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(&self.url)
            .json(results)
            .send()
            .await
            .map_err(|e| SinkError::Request {
                url: self.url.clone(),
                message: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Sends pending outcomes through a sink and acknowledges them in the store.
#[derive(Clone)]
pub struct StatusReporter {
    store: StateStore,
    sink: Arc<dyn StatusSink>,
}

impl StatusReporter {
    pub fn new(store: StateStore, sink: Arc<dyn StatusSink>) -> Self {
        Self { store, sink }
    }

    /// Send every unacknowledged outcome. Returns how many were acknowledged.
    pub async fn send_pending(&self) -> ReportResult<usize> {
        let pending = self.store.pending_reports()?;
        if pending.is_empty() {
            return Ok(0);
        }
        let results: Vec<UpstreamResult> = pending.iter().map(UpstreamResult::from).collect();
        debug!(count = results.len(), "sending outcomes upstream");
        self.sink.send(&results).await?;

        let sent: Vec<_> = pending.iter().map(|d| (d.id.clone(), d.outcome())).collect();
        let marked = self.store.mark_reported(&sent)?;
        info!(sent = sent.len(), acknowledged = marked, "outcomes reported upstream");
        Ok(marked)
    }

    /// Run [`send_pending`](Self::send_pending) in the background, logging failures.
    pub fn spawn_send_pending(&self) {
        let reporter = self.clone();
        tokio::spawn(async move {
            if let Err(e) = reporter.send_pending().await {
                warn!(error = %e, "upstream status report failed; will retry on next change");
            }
        });
    }
}
