//! Provisioning pass: fetch, verify and cache every pending bundle.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, info, warn};

use gatesync_bundle::{
    BundleCache, BundleFetcher, ERROR_CACHE_WRITE_FAILED, ERROR_FETCH_FAILED, FetchError, verify,
};
use gatesync_state::{Bundle, StateStore};

use crate::error::IngestResult;

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Total fetch attempts per bundle, including the first.
    pub fetch_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub fetch_backoff: Duration,
    /// Bundles fetched at the same time within one pass.
    pub fetch_concurrency: usize,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            fetch_backoff: Duration::from_millis(200),
            fetch_concurrency: 4,
        }
    }
}

/// Counts from one provisioning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionStats {
    pub verified: usize,
    pub failed: usize,
    /// Outcomes dropped because the bundle changed or vanished meanwhile.
    pub stale: usize,
}

struct Failure {
    code: i64,
    reason: String,
}

pub struct Provisioner {
    store: StateStore,
    fetcher: Arc<dyn BundleFetcher>,
    cache: BundleCache,
    config: ProvisionConfig,
}

impl Provisioner {
    pub fn new(store: StateStore, fetcher: Arc<dyn BundleFetcher>, cache: BundleCache, config: ProvisionConfig) -> Self {
        Self {
            store,
            fetcher,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &BundleCache {
        &self.cache
    }

    /// Provision every bundle that is neither verified nor failed.
    pub async fn run_pass(&self) -> IngestResult<ProvisionStats> {
        let pending = self.store.pending_bundles()?;
        let mut stats = ProvisionStats::default();
        if pending.is_empty() {
            return Ok(stats);
        }
        debug!(pending = pending.len(), "provisioning bundles");

        let outcomes: Vec<_> = stream::iter(pending)
            .map(|bundle| async move {
                let outcome = self.provision(&bundle).await;
                (bundle, outcome)
            })
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        for (bundle, outcome) in outcomes {
            let recorded = match outcome {
                Ok(local_uri) => {
                    let recorded = self.store.mark_bundle_verified(&bundle, &local_uri)?;
                    if recorded {
                        stats.verified += 1;
                    }
                    recorded
                }
                Err(failure) => {
                    warn!(
                        deployment = %bundle.deployment_id,
                        bundle = %bundle.id,
                        error_code = failure.code,
                        reason = %failure.reason,
                        "bundle provisioning failed"
                    );
                    let recorded = self.store.mark_bundle_failed(&bundle, failure.code, &failure.reason)?;
                    if recorded {
                        stats.failed += 1;
                    }
                    recorded
                }
            };
            if !recorded {
                stats.stale += 1;
            }
        }
        info!(verified = stats.verified, failed = stats.failed, stale = stats.stale, "provisioning pass complete");
        Ok(stats)
    }

    async fn provision(&self, bundle: &Bundle) -> Result<String, Failure> {
        let bytes = self.fetch_with_retry(&bundle.uri).await.map_err(|e| Failure {
            code: ERROR_FETCH_FAILED,
            reason: e.to_string(),
        })?;
        verify(&bytes, &bundle.checksum, &bundle.checksum_type).map_err(|e| Failure {
            code: e.error_code(),
            reason: e.to_string(),
        })?;
        self.cache.store(bundle, &bytes).await.map_err(|e| Failure {
            code: ERROR_CACHE_WRITE_FAILED,
            reason: e.to_string(),
        })
    }

    async fn fetch_with_retry(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 1;
        let mut delay = self.config.fetch_backoff;
        loop {
            match self.fetcher.fetch(uri).await {
                Ok(bytes) => return Ok(bytes),
                Err(e @ FetchError::UnsupportedScheme(_)) => return Err(e),
                Err(e) if attempt >= self.config.fetch_attempts => return Err(e),
                Err(e) => {
                    debug!(%uri, attempt, error = %e, "bundle fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }
}
