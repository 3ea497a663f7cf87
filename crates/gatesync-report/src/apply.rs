//! Recording validated results in the store.

use tracing::{debug, info};

use gatesync_state::{StateStore, StoreError};

use crate::error::ReportResult;
use crate::payload::ValidResult;

/// What a batch did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Results that changed a stored outcome.
    pub applied: Vec<String>,
    /// Results that matched the stored outcome already.
    pub unchanged: Vec<String>,
    /// Results for deployments the node does not know.
    pub skipped: Vec<String>,
}

/// Apply a batch of results in a single transaction.
///
/// Unknown deployment IDs are skipped rather than failing the batch; any
/// store error aborts the whole batch.
pub fn apply_results(store: &StateStore, results: &[ValidResult]) -> ReportResult<ApplySummary> {
    let txn = store.begin()?;
    let mut summary = ApplySummary::default();
    for result in results {
        match txn.update_status(&result.id, &result.update) {
            Ok(true) => summary.applied.push(result.id.clone()),
            Ok(false) => summary.unchanged.push(result.id.clone()),
            Err(StoreError::NotFound(id)) => {
                debug!(%id, "status for unknown deployment skipped");
                summary.skipped.push(id);
            }
            Err(e) => return Err(e.into()),
        }
    }
    txn.commit()?;
    info!(
        applied = summary.applied.len(),
        unchanged = summary.unchanged.len(),
        skipped = summary.skipped.len(),
        "status batch recorded"
    );
    Ok(summary)
}
