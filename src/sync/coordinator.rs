//! Sync coordinator
//!
//! Owns the authoritative store, the set of dirty record ids and the sync
//! status. Snapshot application and local edits are serialized through the
//! dirty-set lock so a consistent `(local, remote)` pair is captured and
//! applied as a single replacement. A flush only holds that lock while it
//! builds its batch and again once the push settles.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::clock::Clock;
use super::dispatcher::{RetryPolicy, SyncDispatcher};
use super::reconcile::Reconciler;
use super::store::RecordStore;
use super::transport::PushTransport;
use super::types::{ChangeKind, ReconcileOptions, ReconcileOutcome, SyncStatus};
use crate::error::Result;
use crate::records::{PatientRecord, SyncSource};

/// Dirty record ids mapped to the sequence number of their latest edit
type DirtySet = HashMap<String, u64>;

/// Drives reconciliation and pushes for one record set
pub struct SyncCoordinator<S: RecordStore, T: PushTransport, C: Clock> {
    store: S,
    dispatcher: SyncDispatcher<T, C>,
    reconciler: Reconciler,
    retry: RetryPolicy,
    device_id: String,
    dirty: Mutex<DirtySet>,
    edit_seq: AtomicU64,
    /// One flush at a time
    flushing: Mutex<()>,
    status: RwLock<SyncStatus>,
}

impl<S: RecordStore, T: PushTransport, C: Clock> SyncCoordinator<S, T, C> {
    pub fn new(
        store: S,
        dispatcher: SyncDispatcher<T, C>,
        options: ReconcileOptions,
        retry: RetryPolicy,
        device_id: &str,
    ) -> Self {
        Self {
            store,
            dispatcher,
            reconciler: Reconciler::new(options),
            retry,
            device_id: device_id.to_string(),
            dirty: Mutex::new(HashMap::new()),
            edit_seq: AtomicU64::new(0),
            flushing: Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn dispatcher(&self) -> &SyncDispatcher<T, C> {
        &self.dispatcher
    }

    /// Apply a local edit and queue the record for the next push
    pub async fn record_local_change(&self, mut record: PatientRecord) -> Result<()> {
        let mut dirty = self.dirty.lock().await;

        record.touch(self.dispatcher.clock().now_ms());

        let mut records = self.store.snapshot().await?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.store.replace(records).await?;

        let seq = self.edit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        dirty.insert(record.id, seq);
        self.status.write().await.pending_changes = dirty.len();
        Ok(())
    }

    /// Reconcile the store against a full remote snapshot
    pub async fn apply_remote_snapshot(&self, remote: Vec<PatientRecord>) -> Result<ReconcileOutcome> {
        let mut dirty = self.dirty.lock().await;

        let local = self.store.snapshot().await?;
        let now = self.dispatcher.clock().now_ms();
        let mut outcome = self.reconciler.reconcile(&local, &remote, now);

        let held = hold_unpushed(&local, &dirty, &mut outcome);
        if held > 0 {
            tracing::warn!(
                held,
                "Kept records missing from remote snapshot with unpushed local edits"
            );
        }

        if outcome.has_changes {
            self.store.replace(outcome.records.clone()).await?;
        }

        // Records taken from the remote no longer need pushing
        for change in &outcome.changes {
            dirty.remove(&change.id);
        }
        {
            let mut status = self.status.write().await;
            status.pending_changes = dirty.len();
            status.last_reconcile = Some(outcome.stats);
        }

        if outcome.stats.protected_removals > 0 {
            tracing::warn!(
                "Kept {} records missing from remote snapshot ({} local, {} remote)",
                outcome.stats.protected_removals,
                local.len(),
                remote.len()
            );
        }
        tracing::info!(
            changes = outcome.changes.len(),
            conflicts = outcome.stats.conflicts,
            stale_removals = outcome.stats.stale_removals,
            "Applied remote snapshot"
        );

        Ok(outcome)
    }

    /// Push every dirty record.
    ///
    /// On failure the records stay dirty for the next flush; a timed-out
    /// push is treated the same since its outcome is unknown. Records edited
    /// again while the push was in flight stay dirty either way.
    pub async fn flush(&self) -> Result<()> {
        let _flushing = self.flushing.lock().await;

        let (batch, pushed) = {
            let mut dirty = self.dirty.lock().await;

            if dirty.is_empty() {
                return Ok(());
            }

            let now = self.dispatcher.clock().now_ms();
            let mut records = self.store.snapshot().await?;
            let mut batch = Vec::new();
            for record in records.iter_mut().filter(|r| dirty.contains_key(&r.id)) {
                record.stamp_sync(SyncSource::Local, &self.device_id, now);
                batch.push(record.clone());
            }

            // Dirty ids whose record disappeared have nothing left to push
            let present: HashSet<String> = batch.iter().map(|r| r.id.clone()).collect();
            dirty.retain(|id, _| present.contains(id));

            if batch.is_empty() {
                self.status.write().await.pending_changes = 0;
                return Ok(());
            }

            self.store.replace(records).await?;
            self.status.write().await.in_progress = true;

            (batch, dirty.clone())
        };

        let result = self.dispatcher.push(&batch, &self.retry).await;

        let mut dirty = self.dirty.lock().await;
        let mut status = self.status.write().await;
        status.in_progress = false;
        match result {
            Ok(()) => {
                dirty.retain(|id, seq| pushed.get(id) != Some(seq));
                status.last_sync =
                    DateTime::<Utc>::from_timestamp_millis(self.dispatcher.clock().now_ms());
                status.error = None;
                status.pending_changes = dirty.len();
                tracing::info!("Pushed {} records", batch.len());
                Ok(())
            }
            Err(e) => {
                status.error = Some(e.to_string());
                status.pending_changes = dirty.len();
                Err(e)
            }
        }
    }

    /// Current sync status
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Ids waiting to be pushed
    pub async fn dirty_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.dirty.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Undo removals of records that still carry unpushed edits.
///
/// Held records go back in local order, ahead of remote additions. Returns
/// how many were held.
fn hold_unpushed(
    local: &[PatientRecord],
    dirty: &DirtySet,
    outcome: &mut ReconcileOutcome,
) -> usize {
    let (held, changes): (Vec<_>, Vec<_>) = outcome
        .changes
        .drain(..)
        .partition(|c| c.kind == ChangeKind::Remove && dirty.contains_key(&c.id));
    outcome.changes = changes;

    if held.is_empty() {
        return 0;
    }

    let held_ids: HashSet<&str> = held.iter().map(|c| c.id.as_str()).collect();
    let restored: Vec<PatientRecord> = local
        .iter()
        .filter(|r| held_ids.contains(r.id.as_str()))
        .cloned()
        .collect();

    let additions = outcome
        .changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Add)
        .count();
    let at = outcome.records.len().saturating_sub(additions);
    outcome.records.splice(at..at, restored);

    outcome.stats.stale_removals = outcome.stats.stale_removals.saturating_sub(held.len());
    outcome.has_changes = !outcome.changes.is_empty();
    held.len()
}
