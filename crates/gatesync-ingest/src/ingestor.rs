//! The change ingestor.
//!
//! Per event:
//! 1. map every relevant row (a malformed row rejects the event)
//! 2. apply all writes in one store transaction and commit
//! 3. evict cached bytes of deleted deployments and of replaced bundles
//! 4. run the provisioning pass
//! 5. signal the notification hub once
//!
//! A snapshot carrying no deployment rows is the startup replay on an
//! existing store: nothing is written, bundles whose fetch failed are
//! queued again, steps 4 and 5 still run and outcomes not yet acknowledged
//! upstream are sent again.

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use gatesync_bundle::ERROR_FETCH_FAILED;
use gatesync_notify::NotificationHub;
use gatesync_report::StatusReporter;
use gatesync_state::{Bundle, Deployment, StateStore, UpsertOutcome};

use crate::error::{IngestError, IngestResult};
use crate::events::{ChangeList, Operation, Snapshot, SyncEvent};
use crate::provision::{ProvisionStats, Provisioner};
use crate::row::{parse_deployment_row, row_id};

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Only rows of this table are applied.
    pub deployment_table: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            deployment_table: "edgex.deployment".to_string(),
        }
    }
}

/// What one event did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Whether the event was the empty startup snapshot.
    pub startup_replay: bool,
    pub provisioned: ProvisionStats,
}

enum Write {
    Upsert(Deployment, Vec<Bundle>),
    Delete(String),
}

pub struct Ingestor {
    store: StateStore,
    hub: NotificationHub,
    provisioner: Provisioner,
    reporter: Option<StatusReporter>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(store: StateStore, hub: NotificationHub, provisioner: Provisioner, config: IngestConfig) -> Self {
        Self {
            store,
            hub,
            provisioner,
            reporter: None,
            config,
        }
    }

    /// Forward outcomes upstream on startup and after failed provisioning.
    pub fn with_reporter(mut self, reporter: StatusReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Apply one event. On error nothing was committed and the hub was not
    /// signalled.
    pub async fn apply(&self, event: &SyncEvent) -> IngestResult<BatchSummary> {
        let (writes, startup_replay) = match event {
            SyncEvent::Snapshot(snapshot) => {
                let writes = self.plan_snapshot(snapshot)?;
                let empty = writes.is_empty();
                (writes, empty)
            }
            SyncEvent::ChangeList(list) => (self.plan_changes(list)?, false),
        };

        let (mut summary, updated) = self.commit(&writes)?;
        summary.startup_replay = startup_replay;
        if startup_replay {
            info!("startup replay: re-deriving state from the store");
            match self.store.requeue_failed_bundles(ERROR_FETCH_FAILED) {
                Ok(0) => {}
                Ok(requeued) => info!(requeued, "bundles with failed fetches queued again"),
                Err(e) => error!(error = %e, "failed to requeue bundles"),
            }
        }

        for write in &writes {
            if let Write::Delete(id) = write {
                if let Err(e) = self.provisioner.cache().evict_deployment(id).await {
                    warn!(%id, error = %e, "failed to evict cached bundles");
                }
            }
        }
        for id in updated {
            self.evict_replaced(id).await;
        }

        match self.provisioner.run_pass().await {
            Ok(stats) => summary.provisioned = stats,
            Err(e) => error!(error = %e, "provisioning pass failed"),
        }

        self.hub.notify();

        if startup_replay || summary.provisioned.failed > 0 {
            self.report_pending().await;
        }
        Ok(summary)
    }

    /// Consume events until the channel closes or shutdown is signalled.
    /// A failed event is logged and skipped.
    pub async fn run(self, mut events: mpsc::Receiver<SyncEvent>, mut shutdown: watch::Receiver<bool>) {
        info!(table = %self.config.deployment_table, "ingestor started");
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("event stream closed");
                        break;
                    };
                    match self.apply(&event).await {
                        Ok(summary) => info!(
                            inserted = summary.inserted,
                            updated = summary.updated,
                            unchanged = summary.unchanged,
                            deleted = summary.deleted,
                            verified = summary.provisioned.verified,
                            failed = summary.provisioned.failed,
                            "sync event applied"
                        ),
                        Err(e) => error!(error = %e, "sync event rejected"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("ingestor stopped");
    }

    fn plan_snapshot(&self, snapshot: &Snapshot) -> IngestResult<Vec<Write>> {
        let mut writes = Vec::new();
        for table in snapshot.tables.iter().filter(|t| t.name == self.config.deployment_table) {
            for (index, row) in table.rows.iter().enumerate() {
                let (deployment, bundles) = parse_deployment_row(row).map_err(|reason| self.malformed(index, reason))?;
                writes.push(Write::Upsert(deployment, bundles));
            }
        }
        debug!(info = %snapshot.snapshot_info, rows = writes.len(), "snapshot planned");
        Ok(writes)
    }

    fn plan_changes(&self, list: &ChangeList) -> IngestResult<Vec<Write>> {
        let mut writes = Vec::new();
        for (index, change) in list.changes.iter().enumerate() {
            if change.table != self.config.deployment_table {
                continue;
            }
            let write = match change.operation {
                Operation::Insert | Operation::Update => {
                    let row = change
                        .new_row
                        .as_ref()
                        .ok_or_else(|| self.malformed(index, "missing new_row".to_string()))?;
                    let (deployment, bundles) = parse_deployment_row(row).map_err(|reason| self.malformed(index, reason))?;
                    Write::Upsert(deployment, bundles)
                }
                Operation::Delete => {
                    let row = change
                        .old_row
                        .as_ref()
                        .or(change.new_row.as_ref())
                        .ok_or_else(|| self.malformed(index, "missing old_row".to_string()))?;
                    Write::Delete(row_id(row).map_err(|reason| self.malformed(index, reason))?)
                }
            };
            writes.push(write);
        }
        debug!(sequence = ?list.last_sequence, writes = writes.len(), "change list planned");
        Ok(writes)
    }

    /// Returns the summary and the IDs of updated deployments.
    fn commit<'w>(&self, writes: &'w [Write]) -> IngestResult<(BatchSummary, Vec<&'w str>)> {
        let mut summary = BatchSummary::default();
        let mut updated = Vec::new();
        if writes.is_empty() {
            return Ok((summary, updated));
        }
        let txn = self.store.begin()?;
        for write in writes {
            match write {
                Write::Upsert(deployment, bundles) => match txn.upsert_deployment(deployment, bundles)? {
                    UpsertOutcome::Inserted => summary.inserted += 1,
                    UpsertOutcome::Updated => {
                        summary.updated += 1;
                        updated.push(deployment.id.as_str());
                    }
                    UpsertOutcome::Unchanged => summary.unchanged += 1,
                },
                Write::Delete(id) => {
                    if txn.delete_deployment(id)? {
                        summary.deleted += 1;
                    }
                }
            }
        }
        txn.commit()?;
        Ok((summary, updated))
    }

    /// Drop cached bytes the deployment's current bundles no longer use.
    async fn evict_replaced(&self, id: &str) {
        let current = match self.store.list_bundles(id) {
            Ok(current) => current,
            Err(e) => {
                warn!(%id, error = %e, "failed to list bundles for cache eviction");
                return;
            }
        };
        if let Err(e) = self.provisioner.cache().evict_replaced(id, &current).await {
            warn!(%id, error = %e, "failed to evict replaced bundles");
        }
    }

    async fn report_pending(&self) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if let Err(e) = reporter.send_pending().await {
            warn!(error = %e, "upstream status report failed");
        }
    }

    fn malformed(&self, index: usize, reason: String) -> IngestError {
        IngestError::MalformedRow {
            table: self.config.deployment_table.clone(),
            index,
            reason,
        }
    }
}
