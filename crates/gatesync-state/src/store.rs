//! StateStore: redb-backed persistence for deployments and bundles.
//!
//! Mutations go through a [`StoreTxn`] so that a whole CDC batch (or a whole
//! status report) commits atomically. Reads each run in their own redb read
//! transaction and therefore observe one consistent committed snapshot.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

type JsonTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Thread-safe deployment store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

/// A write transaction over the store.
///
/// Dropping a `StoreTxn` without calling [`StoreTxn::commit`] discards every
/// mutation made through it.
pub struct StoreTxn {
    txn: WriteTransaction,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "deployment store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory deployment store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(BUNDLES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Begin a caller-managed write transaction.
    pub fn begin(&self) -> StoreResult<StoreTxn> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        Ok(StoreTxn { txn })
    }

    /// Run `f` in its own write transaction, committing on success.
    fn write<T>(&self, f: impl FnOnce(&StoreTxn) -> StoreResult<T>) -> StoreResult<T> {
        let txn = self.begin()?;
        let value = f(&txn)?;
        txn.commit()?;
        Ok(value)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get a deployment by ID.
    pub fn get_deployment(&self, id: &str) -> StoreResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        load(&table, id)
    }

    /// List all deployments, in ID order.
    pub fn list_deployments(&self) -> StoreResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        scan_all(&table)
    }

    /// List the bundles of one deployment.
    pub fn list_bundles(&self, deployment_id: &str) -> StoreResult<Vec<Bundle>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BUNDLES).map_err(map_err!(Table))?;
        scan_bundles(&table, deployment_id)
    }

    /// List every deployment whose bundles have all passed verification,
    /// joined with those bundles, oldest first.
    pub fn list_ready_deployments(&self) -> StoreResult<Vec<ReadyDeployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let bundles = txn.open_table(BUNDLES).map_err(map_err!(Table))?;

        let mut ready = Vec::new();
        for deployment in scan_all::<Deployment>(&deployments)? {
            let owned = scan_bundles(&bundles, &deployment.id)?;
            if let Some(view) = ReadyDeployment::from_parts(&deployment, &owned) {
                ready.push(view);
            }
        }
        ready.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(ready)
    }

    /// Bundles still awaiting verification, excluding those of failed deployments.
    pub fn pending_bundles(&self) -> StoreResult<Vec<Bundle>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let bundles = txn.open_table(BUNDLES).map_err(map_err!(Table))?;

        let mut pending = Vec::new();
        for deployment in scan_all::<Deployment>(&deployments)? {
            if deployment.status == DeploymentStatus::Fail {
                continue;
            }
            pending.extend(
                scan_bundles(&bundles, &deployment.id)?
                    .into_iter()
                    .filter(|b| !b.is_verified() && b.status != DeploymentStatus::Fail),
            );
        }
        Ok(pending)
    }

    /// Deployments with an outcome not yet acknowledged upstream.
    pub fn pending_reports(&self) -> StoreResult<Vec<Deployment>> {
        Ok(self
            .list_deployments()?
            .into_iter()
            .filter(|d| d.status.is_outcome() && !d.status_reported)
            .collect())
    }

    // ── Single-transaction writes ──────────────────────────────────

    /// Record an outcome for a deployment in its own transaction.
    pub fn update_status(&self, id: &str, update: &StatusUpdate) -> StoreResult<bool> {
        self.write(|txn| txn.update_status(id, update))
    }

    /// Record that a bundle's bytes passed verification and are cached at `local_uri`.
    pub fn mark_bundle_verified(&self, bundle: &Bundle, local_uri: &str) -> StoreResult<bool> {
        self.write(|txn| txn.mark_bundle_verified(bundle, local_uri))
    }

    /// Record that a bundle could not be fetched or verified.
    pub fn mark_bundle_failed(&self, bundle: &Bundle, error_code: i64, reason: &str) -> StoreResult<bool> {
        self.write(|txn| txn.mark_bundle_failed(bundle, error_code, reason))
    }

    /// Put bundles that failed with `error_code` back in the verification
    /// queue. Returns how many bundles were requeued.
    pub fn requeue_failed_bundles(&self, error_code: i64) -> StoreResult<usize> {
        self.write(|txn| txn.requeue_failed_bundles(error_code))
    }

    /// Acknowledge upstream delivery of outcomes. Returns how many were marked.
    pub fn mark_reported(&self, reports: &[(DeploymentId, Outcome)]) -> StoreResult<usize> {
        self.write(|txn| txn.mark_reported(reports))
    }
}

impl StoreTxn {
    /// Commit every mutation made through this transaction.
    pub fn commit(self) -> StoreResult<()> {
        self.txn.commit().map_err(map_err!(Transaction))
    }

    /// Discard every mutation made through this transaction.
    pub fn abort(self) -> StoreResult<()> {
        self.txn.abort().map_err(map_err!(Transaction))
    }

    fn tables(&self) -> StoreResult<(JsonTable<'_>, JsonTable<'_>)> {
        let deployments = self.txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let bundles = self.txn.open_table(BUNDLES).map_err(map_err!(Table))?;
        Ok((deployments, bundles))
    }

    /// Insert or update a deployment and replace its bundle set.
    ///
    /// Only upstream-owned fields are taken from the arguments. If the bundle
    /// set is content-identical to the stored one, node-local state (status,
    /// verification, errors) is kept; otherwise the deployment goes back to
    /// `Unknown` and only bundles already verified with identical content
    /// keep their cached bytes.
    pub fn upsert_deployment(&self, deployment: &Deployment, bundles: &[Bundle]) -> StoreResult<UpsertOutcome> {
        if let Some(stray) = bundles.iter().find(|b| b.deployment_id != deployment.id) {
            return Err(StoreError::Write(format!(
                "bundle {} belongs to {}, not {}",
                stray.id, stray.deployment_id, deployment.id
            )));
        }

        let (mut deployments, mut bundle_table) = self.tables()?;
        let previous: Option<Deployment> = load(&deployments, &deployment.id)?;
        let stored = scan_bundles(&bundle_table, &deployment.id)?;
        let same_bundles = stored.len() == bundles.len()
            && bundles.iter().all(|b| stored.iter().any(|s| s.same_content(b)));

        let mut record = deployment.clone();
        let outcome = match &previous {
            Some(prev) if same_bundles => {
                if prev.same_upstream_fields(deployment) {
                    debug!(id = %deployment.id, "deployment unchanged");
                    return Ok(UpsertOutcome::Unchanged);
                }
                record.carry_local_state(prev);
                put(&mut deployments, &record.id, &record)?;
                debug!(id = %record.id, "deployment updated, bundles kept");
                return Ok(UpsertOutcome::Updated);
            }
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };
        record.reset_local_state();

        let keep: Vec<String> = bundles.iter().map(Bundle::table_key).collect();
        for old in &stored {
            let key = old.table_key();
            if !keep.contains(&key) {
                bundle_table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }

        let mut all_verified = !bundles.is_empty();
        for bundle in bundles {
            let mut next = bundle.clone();
            next.reset_local_state();
            if let Some(existing) = stored.iter().find(|s| s.same_content(bundle) && s.is_verified()) {
                next.local_uri = existing.local_uri.clone();
                next.status = DeploymentStatus::Ready;
            }
            all_verified &= next.is_verified();
            put(&mut bundle_table, &next.table_key(), &next)?;
        }
        if all_verified {
            record.status = DeploymentStatus::Ready;
        }
        put(&mut deployments, &record.id, &record)?;

        debug!(id = %record.id, ?outcome, bundles = bundles.len(), "deployment stored");
        Ok(outcome)
    }

    /// Delete a deployment and all of its bundles. Returns true if it existed.
    pub fn delete_deployment(&self, id: &str) -> StoreResult<bool> {
        let (mut deployments, mut bundle_table) = self.tables()?;
        let existed = deployments.remove(id).map_err(map_err!(Write))?.is_some();
        let owned = scan_bundles(&bundle_table, id)?;
        for bundle in &owned {
            bundle_table
                .remove(bundle.table_key().as_str())
                .map_err(map_err!(Write))?;
        }
        debug!(%id, existed, bundles = owned.len(), "deployment deleted");
        Ok(existed)
    }

    /// Record an outcome against a deployment and mirror it onto its bundles.
    ///
    /// Returns false when the stored outcome already equals `update`.
    /// Fails with `NotFound` for an unknown deployment.
    pub fn update_status(&self, id: &str, update: &StatusUpdate) -> StoreResult<bool> {
        let (mut deployments, mut bundle_table) = self.tables()?;
        let Some(mut deployment) = load::<Deployment>(&deployments, id)? else {
            return Err(StoreError::NotFound(id.to_string()));
        };

        let (error_code, error_message) = match update.status {
            DeploymentStatus::Fail => (update.error_code, update.error_message.clone()),
            _ => (None, None),
        };
        let mut changed = deployment.status != update.status
            || deployment.error_code != error_code
            || deployment.error_message != error_message;

        for mut bundle in scan_bundles(&bundle_table, id)? {
            let detail = update.bundle_errors.iter().find(|e| e.bundle_id == bundle.id);
            let code = detail.map(|e| e.error_code);
            let reason = detail.map(|e| e.reason.clone());
            if bundle.status != update.status || bundle.error_code != code || bundle.error_reason != reason {
                bundle.status = update.status;
                bundle.error_code = code;
                bundle.error_reason = reason;
                put(&mut bundle_table, &bundle.table_key(), &bundle)?;
                changed = true;
            }
        }

        if changed {
            deployment.status = update.status;
            deployment.error_code = error_code;
            deployment.error_message = error_message;
            deployment.status_reported = false;
            put(&mut deployments, id, &deployment)?;
            debug!(%id, status = ?update.status, "deployment status updated");
        }
        Ok(changed)
    }

    /// See [`StateStore::mark_bundle_verified`].
    ///
    /// Ignored (returns false) if the stored bundle no longer has the same
    /// content as `bundle`, i.e. upstream replaced it mid-verification.
    pub fn mark_bundle_verified(&self, bundle: &Bundle, local_uri: &str) -> StoreResult<bool> {
        let (mut deployments, mut bundle_table) = self.tables()?;
        let Some(mut stored) = load::<Bundle>(&bundle_table, &bundle.table_key())? else {
            return Ok(false);
        };
        let Some(mut deployment) = load::<Deployment>(&deployments, &bundle.deployment_id)? else {
            return Ok(false);
        };
        if !stored.same_content(bundle) {
            return Ok(false);
        }

        stored.local_uri = Some(local_uri.to_string());
        stored.status = DeploymentStatus::Ready;
        stored.error_code = None;
        stored.error_reason = None;
        put(&mut bundle_table, &stored.table_key(), &stored)?;

        let siblings = scan_bundles(&bundle_table, &deployment.id)?;
        if deployment.status == DeploymentStatus::Unknown && siblings.iter().all(Bundle::is_verified) {
            deployment.status = DeploymentStatus::Ready;
            put(&mut deployments, &deployment.id, &deployment)?;
            debug!(id = %deployment.id, "deployment ready");
        }
        Ok(true)
    }

    /// See [`StateStore::mark_bundle_failed`].
    pub fn mark_bundle_failed(&self, bundle: &Bundle, error_code: i64, reason: &str) -> StoreResult<bool> {
        let (mut deployments, mut bundle_table) = self.tables()?;
        let Some(mut stored) = load::<Bundle>(&bundle_table, &bundle.table_key())? else {
            return Ok(false);
        };
        let Some(mut deployment) = load::<Deployment>(&deployments, &bundle.deployment_id)? else {
            return Ok(false);
        };
        if !stored.same_content(bundle) {
            return Ok(false);
        }

        stored.status = DeploymentStatus::Fail;
        stored.error_code = Some(error_code);
        stored.error_reason = Some(reason.to_string());
        put(&mut bundle_table, &stored.table_key(), &stored)?;

        deployment.status = DeploymentStatus::Fail;
        deployment.error_code = Some(error_code);
        deployment.error_message = Some(reason.to_string());
        deployment.status_reported = false;
        put(&mut deployments, &deployment.id, &deployment)?;
        debug!(id = %deployment.id, bundle = %bundle.id, error_code, "bundle failed");
        Ok(true)
    }

    /// See [`StateStore::requeue_failed_bundles`].
    ///
    /// Only deployments whose own failure came from such a bundle are reset
    /// to `Unknown`; outcomes reported by agents are left alone.
    pub fn requeue_failed_bundles(&self, error_code: i64) -> StoreResult<usize> {
        let (mut deployments, mut bundle_table) = self.tables()?;
        let failed: Vec<Deployment> = scan_all::<Deployment>(&deployments)?
            .into_iter()
            .filter(|d| d.status == DeploymentStatus::Fail && d.error_code == Some(error_code))
            .collect();

        let mut requeued = 0;
        for mut deployment in failed {
            let owned = scan_bundles(&bundle_table, &deployment.id)?;
            let failed_here = |b: &Bundle| {
                !b.is_verified() && b.status == DeploymentStatus::Fail && b.error_code == Some(error_code)
            };
            if !owned.iter().any(failed_here) {
                continue;
            }
            for mut bundle in owned {
                if bundle.is_verified() {
                    bundle.status = DeploymentStatus::Ready;
                    bundle.error_code = None;
                    bundle.error_reason = None;
                } else {
                    bundle.reset_local_state();
                    requeued += 1;
                }
                put(&mut bundle_table, &bundle.table_key(), &bundle)?;
            }
            deployment.reset_local_state();
            put(&mut deployments, &deployment.id, &deployment)?;
            debug!(id = %deployment.id, error_code, "failed deployment requeued");
        }
        Ok(requeued)
    }

    /// See [`StateStore::mark_reported`]. Skips entries whose stored outcome
    /// (status, error code or message) has moved on since the report was sent.
    pub fn mark_reported(&self, reports: &[(DeploymentId, Outcome)]) -> StoreResult<usize> {
        let (mut deployments, _) = self.tables()?;
        let mut marked = 0;
        for (id, outcome) in reports {
            let Some(mut deployment) = load::<Deployment>(&deployments, id)? else {
                continue;
            };
            if deployment.outcome() == *outcome && !deployment.status_reported {
                deployment.status_reported = true;
                put(&mut deployments, id, &deployment)?;
                marked += 1;
            }
        }
        Ok(marked)
    }
}

// ── Table helpers ──────────────────────────────────────────────────

fn load<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StoreResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn scan_all<T: DeserializeOwned>(table: &impl ReadableTable<&'static str, &'static [u8]>) -> StoreResult<Vec<T>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(results)
}

/// Range-scan the bundles of one deployment.
fn scan_bundles(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    deployment_id: &str,
) -> StoreResult<Vec<Bundle>> {
    let prefix = bundle_prefix(deployment_id);
    let mut results = Vec::new();
    for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(&prefix) {
            break;
        }
        results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(results)
}

fn put<T: Serialize>(table: &mut JsonTable<'_>, key: &str, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    table.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_deployment(id: &str) -> Deployment {
        let mut d = Deployment::new(id, "some-scope", format!(r#"{{"uri":"file:///bundles/{id}"}}"#));
        d.created_at = 1000;
        d.updated_at = 1000;
        d
    }

    fn test_bundle(deployment_id: &str, id: &str) -> Bundle {
        Bundle::new(
            deployment_id,
            id,
            format!("file:///bundles/{deployment_id}/{id}"),
            "crc-32",
            "cbf43926",
        )
    }

    fn insert(store: &StateStore, id: &str, bundles: &[Bundle]) -> UpsertOutcome {
        let txn = store.begin().unwrap();
        let outcome = txn.upsert_deployment(&test_deployment(id), bundles).unwrap();
        txn.commit().unwrap();
        outcome
    }

    fn insert_ready(store: &StateStore, id: &str) {
        let bundle = test_bundle(id, "0");
        insert(store, id, &[bundle.clone()]);
        assert!(store.mark_bundle_verified(&bundle, "file:///cache/x").unwrap());
    }

    // ── Upsert / get ───────────────────────────────────────────────

    #[test]
    fn upsert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(insert(&store, "d1", &[test_bundle("d1", "0")]), UpsertOutcome::Inserted);

        let d = store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(d.scope_id, "some-scope");
        assert_eq!(d.status, DeploymentStatus::Unknown);
        assert_eq!(store.list_bundles("d1").unwrap().len(), 1);
    }

    #[test]
    fn get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_deployment("nope").unwrap().is_none());
    }

    #[test]
    fn upsert_ignores_caller_supplied_local_state() {
        let store = StateStore::open_in_memory().unwrap();
        let mut d = test_deployment("d1");
        d.status = DeploymentStatus::Success;
        let mut b = test_bundle("d1", "0");
        b.local_uri = Some("file:///forged".to_string());

        let txn = store.begin().unwrap();
        txn.upsert_deployment(&d, &[b]).unwrap();
        txn.commit().unwrap();

        assert_eq!(store.get_deployment("d1").unwrap().unwrap().status, DeploymentStatus::Unknown);
        assert!(store.list_bundles("d1").unwrap()[0].local_uri.is_none());
        assert!(store.list_ready_deployments().unwrap().is_empty());
    }

    #[test]
    fn reapplying_same_content_is_unchanged() {
        let store = StateStore::open_in_memory().unwrap();
        insert_ready(&store, "d1");
        let before = store.list_ready_deployments().unwrap();

        assert_eq!(insert(&store, "d1", &[test_bundle("d1", "0")]), UpsertOutcome::Unchanged);
        assert_eq!(store.list_ready_deployments().unwrap(), before);
    }

    #[test]
    fn metadata_update_keeps_verification() {
        let store = StateStore::open_in_memory().unwrap();
        insert_ready(&store, "d1");

        let mut d = test_deployment("d1");
        d.updated_at = 2000;
        let txn = store.begin().unwrap();
        assert_eq!(txn.upsert_deployment(&d, &[test_bundle("d1", "0")]).unwrap(), UpsertOutcome::Updated);
        txn.commit().unwrap();

        let ready = store.list_ready_deployments().unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].updated_at, 2000);
        assert_eq!(ready[0].status, DeploymentStatus::Ready);
    }

    #[test]
    fn changed_bundle_resets_verification() {
        let store = StateStore::open_in_memory().unwrap();
        insert_ready(&store, "d1");

        let mut b = test_bundle("d1", "0");
        b.checksum = "deadbeef".to_string();
        assert_eq!(insert(&store, "d1", &[b]), UpsertOutcome::Updated);

        assert!(store.list_ready_deployments().unwrap().is_empty());
        assert_eq!(store.get_deployment("d1").unwrap().unwrap().status, DeploymentStatus::Unknown);
        assert_eq!(store.pending_bundles().unwrap().len(), 1);
    }

    #[test]
    fn dropping_a_bundle_removes_it() {
        let store = StateStore::open_in_memory().unwrap();
        let a = test_bundle("d1", "0");
        let b = test_bundle("d1", "1");
        insert(&store, "d1", &[a.clone(), b]);
        store.mark_bundle_verified(&a, "file:///cache/a").unwrap();

        insert(&store, "d1", &[a]);
        assert_eq!(store.list_bundles("d1").unwrap().len(), 1);
        // The remaining bundle was already verified, so the deployment is ready.
        assert_eq!(store.list_ready_deployments().unwrap().len(), 1);
    }

    #[test]
    fn upsert_rejects_foreign_bundle() {
        let store = StateStore::open_in_memory().unwrap();
        let txn = store.begin().unwrap();
        let err = txn
            .upsert_deployment(&test_deployment("d1"), &[test_bundle("d2", "0")])
            .unwrap_err();
        assert!(matches!(err, StoreError::Write(_)));
    }

    // ── Transactions ───────────────────────────────────────────────

    #[test]
    fn uncommitted_transaction_is_discarded() {
        let store = StateStore::open_in_memory().unwrap();
        {
            let txn = store.begin().unwrap();
            txn.upsert_deployment(&test_deployment("d1"), &[test_bundle("d1", "0")]).unwrap();
            txn.upsert_deployment(&test_deployment("d2"), &[test_bundle("d2", "0")]).unwrap();
            // dropped without commit
        }
        assert!(store.list_deployments().unwrap().is_empty());

        let txn = store.begin().unwrap();
        txn.upsert_deployment(&test_deployment("d3"), &[test_bundle("d3", "0")]).unwrap();
        txn.abort().unwrap();
        assert!(store.list_deployments().unwrap().is_empty());
        assert!(store.list_bundles("d3").unwrap().is_empty());
    }

    // ── Delete ─────────────────────────────────────────────────────

    #[test]
    fn delete_cascades_to_bundles() {
        let store = StateStore::open_in_memory().unwrap();
        insert(&store, "d1", &[test_bundle("d1", "0"), test_bundle("d1", "1")]);
        insert(&store, "d1:x", &[test_bundle("d1:x", "0")]);

        let txn = store.begin().unwrap();
        assert!(txn.delete_deployment("d1").unwrap());
        assert!(!txn.delete_deployment("d1").unwrap());
        txn.commit().unwrap();

        assert!(store.get_deployment("d1").unwrap().is_none());
        assert!(store.list_bundles("d1").unwrap().is_empty());
        // A deployment whose ID shares the key prefix is untouched.
        assert_eq!(store.list_bundles("d1:x").unwrap().len(), 1);
    }

    #[test]
    fn colon_ids_keep_bundles_apart() {
        let store = StateStore::open_in_memory().unwrap();
        let txn = store.begin().unwrap();
        txn.upsert_deployment(&test_deployment("a"), &[test_bundle("a", "b:c")]).unwrap();
        txn.upsert_deployment(&test_deployment("a:b"), &[test_bundle("a:b", "c")]).unwrap();
        txn.commit().unwrap();

        let a = store.list_bundles("a").unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, "b:c");
        let ab = store.list_bundles("a:b").unwrap();
        assert_eq!(ab.len(), 1);
        assert_eq!(ab[0].id, "c");

        let txn = store.begin().unwrap();
        txn.delete_deployment("a").unwrap();
        txn.commit().unwrap();
        assert_eq!(store.list_bundles("a:b").unwrap().len(), 1);
    }

    // ── Ready set ──────────────────────────────────────────────────

    #[test]
    fn ready_set_only_contains_verified() {
        let store = StateStore::open_in_memory().unwrap();
        insert(&store, "pending", &[test_bundle("pending", "0")]);
        insert_ready(&store, "ready");

        let ready = store.list_ready_deployments().unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "ready");
        assert_eq!(ready[0].bundles[0].local_uri, "file:///cache/x");
    }

    #[test]
    fn ready_set_ordered_by_creation() {
        let store = StateStore::open_in_memory().unwrap();
        for (id, created) in [("b", 3000), ("a", 2000), ("c", 2000)] {
            let mut d = test_deployment(id);
            d.created_at = created;
            let bundle = test_bundle(id, "0");
            let txn = store.begin().unwrap();
            txn.upsert_deployment(&d, &[bundle.clone()]).unwrap();
            txn.commit().unwrap();
            store.mark_bundle_verified(&bundle, "file:///cache").unwrap();
        }
        let ids: Vec<String> = store.list_ready_deployments().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["a", "c", "b"]);
    }

    #[test]
    fn deployment_becomes_ready_after_last_bundle() {
        let store = StateStore::open_in_memory().unwrap();
        let a = test_bundle("d1", "0");
        let b = test_bundle("d1", "1");
        insert(&store, "d1", &[a.clone(), b.clone()]);

        store.mark_bundle_verified(&a, "file:///cache/a").unwrap();
        assert_eq!(store.get_deployment("d1").unwrap().unwrap().status, DeploymentStatus::Unknown);
        assert!(store.list_ready_deployments().unwrap().is_empty());

        store.mark_bundle_verified(&b, "file:///cache/b").unwrap();
        assert_eq!(store.get_deployment("d1").unwrap().unwrap().status, DeploymentStatus::Ready);
        assert_eq!(store.list_ready_deployments().unwrap().len(), 1);
    }

    #[test]
    fn stale_verification_is_ignored() {
        let store = StateStore::open_in_memory().unwrap();
        let old = test_bundle("d1", "0");
        insert(&store, "d1", &[old.clone()]);

        let mut replaced = old.clone();
        replaced.uri = "file:///bundles/new".to_string();
        insert(&store, "d1", &[replaced]);

        assert!(!store.mark_bundle_verified(&old, "file:///cache/old").unwrap());
        assert!(store.list_ready_deployments().unwrap().is_empty());
    }

    #[test]
    fn failed_bundle_fails_deployment() {
        let store = StateStore::open_in_memory().unwrap();
        let b = test_bundle("d1", "0");
        insert(&store, "d1", &[b.clone()]);

        assert!(store.mark_bundle_failed(&b, 1001, "checksum mismatch").unwrap());
        let d = store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(d.status, DeploymentStatus::Fail);
        assert_eq!(d.error_code, Some(1001));
        assert!(store.pending_bundles().unwrap().is_empty());
        assert!(store.list_ready_deployments().unwrap().is_empty());
        assert_eq!(store.pending_reports().unwrap().len(), 1);
    }

    #[test]
    fn requeue_resets_only_matching_failures() {
        let store = StateStore::open_in_memory().unwrap();
        let fetch = test_bundle("fetch", "0");
        let mismatch = test_bundle("mismatch", "0");
        insert(&store, "fetch", &[fetch.clone()]);
        insert(&store, "mismatch", &[mismatch.clone()]);
        insert_ready(&store, "agent");
        store.mark_bundle_failed(&fetch, 1003, "connection refused").unwrap();
        store.mark_bundle_failed(&mismatch, 1001, "checksum mismatch").unwrap();
        store.update_status("agent", &StatusUpdate::fail(1003, "agent says no")).unwrap();

        assert_eq!(store.requeue_failed_bundles(1003).unwrap(), 1);

        let d = store.get_deployment("fetch").unwrap().unwrap();
        assert_eq!(d.status, DeploymentStatus::Unknown);
        assert!(d.error_code.is_none());
        let pending = store.pending_bundles().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].deployment_id, "fetch");

        assert_eq!(store.get_deployment("mismatch").unwrap().unwrap().status, DeploymentStatus::Fail);
        let agent = store.get_deployment("agent").unwrap().unwrap();
        assert_eq!(agent.status, DeploymentStatus::Fail);
        assert_eq!(agent.error_message.as_deref(), Some("agent says no"));
    }

    // ── Status ─────────────────────────────────────────────────────

    #[test]
    fn update_status_fail_persists_error() {
        let store = StateStore::open_in_memory().unwrap();
        insert_ready(&store, "d1");

        assert!(store.update_status("d1", &StatusUpdate::fail(100, "bad juju")).unwrap());
        let d = store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(d.status, DeploymentStatus::Fail);
        assert_eq!(d.error_code, Some(100));
        assert_eq!(d.error_message.as_deref(), Some("bad juju"));
        for b in store.list_bundles("d1").unwrap() {
            assert_eq!(b.status, DeploymentStatus::Fail);
        }
        // Still verified, so still served.
        assert_eq!(store.list_ready_deployments().unwrap().len(), 1);
    }

    #[test]
    fn update_status_is_idempotent() {
        let store = StateStore::open_in_memory().unwrap();
        insert_ready(&store, "d1");

        assert!(store.update_status("d1", &StatusUpdate::success()).unwrap());
        let sent = store.get_deployment("d1").unwrap().unwrap().outcome();
        store.mark_reported(&[("d1".to_string(), sent)]).unwrap();
        assert!(!store.update_status("d1", &StatusUpdate::success()).unwrap());
        assert!(store.get_deployment("d1").unwrap().unwrap().status_reported);
    }

    #[test]
    fn success_clears_previous_error() {
        let store = StateStore::open_in_memory().unwrap();
        insert_ready(&store, "d1");
        store.update_status("d1", &StatusUpdate::fail(7, "boom")).unwrap();
        store.update_status("d1", &StatusUpdate::success()).unwrap();

        let d = store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(d.status, DeploymentStatus::Success);
        assert!(d.error_code.is_none() && d.error_message.is_none());
    }

    #[test]
    fn bundle_errors_are_recorded_per_bundle() {
        let store = StateStore::open_in_memory().unwrap();
        insert(&store, "d1", &[test_bundle("d1", "0"), test_bundle("d1", "1")]);

        let mut update = StatusUpdate::fail(100, "partial");
        update.bundle_errors.push(BundleError {
            bundle_id: "1".to_string(),
            error_code: 42,
            reason: "zombies".to_string(),
        });
        store.update_status("d1", &update).unwrap();

        let bundles = store.list_bundles("d1").unwrap();
        assert_eq!(bundles[0].error_code, None);
        assert_eq!(bundles[1].error_code, Some(42));
        assert_eq!(bundles[1].error_reason.as_deref(), Some("zombies"));
    }

    #[test]
    fn update_status_unknown_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_status("ghost", &StatusUpdate::success()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "ghost"));
    }

    #[test]
    fn mark_reported_skips_moved_on_status() {
        let store = StateStore::open_in_memory().unwrap();
        insert_ready(&store, "d1");
        store.update_status("d1", &StatusUpdate::fail(1, "x")).unwrap();

        let success = Outcome {
            status: DeploymentStatus::Success,
            error_code: None,
            error_message: None,
        };
        let marked = store
            .mark_reported(&[("d1".to_string(), success.clone()), ("ghost".to_string(), success)])
            .unwrap();
        assert_eq!(marked, 0);
        assert_eq!(store.pending_reports().unwrap().len(), 1);
    }

    #[test]
    fn mark_reported_skips_newer_failure_with_same_status() {
        let store = StateStore::open_in_memory().unwrap();
        insert_ready(&store, "d1");
        store.update_status("d1", &StatusUpdate::fail(1, "first")).unwrap();
        let sent = store.get_deployment("d1").unwrap().unwrap().outcome();

        // A second failure lands while the first is in flight.
        store.update_status("d1", &StatusUpdate::fail(2, "second")).unwrap();

        assert_eq!(store.mark_reported(&[("d1".to_string(), sent)]).unwrap(), 0);
        let pending = store.pending_reports().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].error_code, Some(2));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            insert_ready(&store, "d1");
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let ready = store.list_ready_deployments().unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "d1");
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_deployments().unwrap().is_empty());
        assert!(store.list_ready_deployments().unwrap().is_empty());
        assert!(store.pending_bundles().unwrap().is_empty());
        assert!(store.pending_reports().unwrap().is_empty());
        assert!(store.list_bundles("any").unwrap().is_empty());
    }
}
