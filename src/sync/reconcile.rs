//! Snapshot reconciliation
//!
//! Merges a local snapshot with a full remote snapshot. Deletions have no
//! explicit signal: a record missing from the remote snapshot is only
//! removed once it is older than the grace period, and never when the remote
//! snapshot looks like a dropout.

use std::collections::{HashMap, HashSet};

use super::conflict::ConflictResolver;
use super::types::{
    ReconcileOptions, ReconcileOutcome, ReconcileStats, RecordChange, ResolutionReason, TiePolicy,
    Winner,
};
use crate::records::PatientRecord;

/// Reconciliation engine
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Merge `remote` into `local` as of `now_ms`.
    ///
    /// Pure: both snapshots are borrowed and the result is a new snapshot
    /// the caller swaps in as a whole.
    pub fn reconcile(
        &self,
        local: &[PatientRecord],
        remote: &[PatientRecord],
        now_ms: i64,
    ) -> ReconcileOutcome {
        let resolver = ConflictResolver::new(self.options.tie_policy);
        let remote_by_id: HashMap<&str, &PatientRecord> =
            remote.iter().map(|r| (r.id.as_str(), r)).collect();

        let mut records = Vec::with_capacity(local.len().max(remote.len()));
        let mut changes = Vec::new();
        let mut stats = ReconcileStats::default();
        let mut candidates = Vec::new();

        for local_record in local {
            match remote_by_id.get(local_record.id.as_str()) {
                Some(remote_record) => {
                    let resolution = resolver.resolve(local_record, remote_record);
                    if resolution.reason != ResolutionReason::IdenticalContent {
                        stats.conflicts += 1;
                    }

                    if resolution.winner == Winner::Remote
                        && !local_record.same_content(remote_record)
                    {
                        records.push((*remote_record).clone());
                        changes.push(RecordChange::update(&remote_record.id));
                    } else {
                        records.push(local_record.clone());
                    }
                }
                None => {
                    let age = now_ms.saturating_sub(local_record.last_touched_ms());
                    if age <= self.options.grace_period_ms {
                        records.push(local_record.clone());
                    } else {
                        candidates.push(local_record);
                    }
                }
            }
        }

        if !candidates.is_empty() {
            let protect = self.options.dropout_guard.should_protect(
                local.len(),
                remote.len(),
                candidates.len(),
            );

            if protect {
                tracing::warn!(
                    candidates = candidates.len(),
                    local = local.len(),
                    remote = remote.len(),
                    "Remote snapshot looks degraded, keeping records missing from it"
                );
                stats.protected_removals += candidates.len();
                records.extend(candidates.into_iter().cloned());
            } else {
                stats.stale_removals += candidates.len();
                changes.extend(candidates.iter().map(|r| RecordChange::remove(&r.id)));
            }
        }

        let local_ids: HashSet<&str> = local.iter().map(|r| r.id.as_str()).collect();
        let mut added: HashSet<&str> = HashSet::new();
        for remote_record in remote {
            let id = remote_record.id.as_str();
            if local_ids.contains(id) || !added.insert(id) {
                continue;
            }
            // Duplicate ids in the remote snapshot resolve to the last copy
            let latest = remote_by_id.get(id).copied().unwrap_or(remote_record);
            records.push(latest.clone());
            changes.push(RecordChange::add(id));
        }

        ReconcileOutcome {
            records,
            has_changes: !changes.is_empty(),
            changes,
            stats,
        }
    }
}

/// Reconcile with the default dropout thresholds
pub fn reconcile(
    local: &[PatientRecord],
    remote: &[PatientRecord],
    now_ms: i64,
    grace_period_ms: i64,
    policy: TiePolicy,
) -> ReconcileOutcome {
    Reconciler::new(ReconcileOptions {
        grace_period_ms,
        tie_policy: policy,
        ..Default::default()
    })
    .reconcile(local, remote, now_ms)
}
