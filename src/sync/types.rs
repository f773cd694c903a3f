//! Sync data types
//!
//! Defines types for snapshot reconciliation including:
//! - Conflict resolutions and tie policies
//! - The change log emitted by a reconciliation
//! - Dropout protection thresholds
//! - Coordinator status

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ConfigError;
use crate::records::PatientRecord;

/// Rule applied when no timestamp distinguishes two versions of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TiePolicy {
    #[serde(rename = "newer-wins-local-tie")]
    NewerWinsLocalTie,
    #[serde(rename = "newer-wins-remote-tie")]
    NewerWinsRemoteTie,
}

impl TiePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TiePolicy::NewerWinsLocalTie => "newer-wins-local-tie",
            TiePolicy::NewerWinsRemoteTie => "newer-wins-remote-tie",
        }
    }
}

impl Default for TiePolicy {
    fn default() -> Self {
        TiePolicy::NewerWinsLocalTie
    }
}

impl FromStr for TiePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "newer-wins-local-tie" | "local-tie" | "local" => Ok(TiePolicy::NewerWinsLocalTie),
            "newer-wins-remote-tie" | "remote-tie" | "remote" => Ok(TiePolicy::NewerWinsRemoteTie),
            _ => Err(ConfigError::UnknownTiePolicy(s.to_string())),
        }
    }
}

impl fmt::Display for TiePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side won a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Local,
    Remote,
}

/// Why a side won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionReason {
    #[serde(rename = "newer-updatedAt")]
    NewerUpdatedAt,
    #[serde(rename = "newer-syncMetaUpdatedAt")]
    NewerSyncMetaUpdatedAt,
    #[serde(rename = "identical-content")]
    IdenticalContent,
    #[serde(rename = "tie-policy")]
    TiePolicy,
}

impl ResolutionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionReason::NewerUpdatedAt => "newer-updatedAt",
            ResolutionReason::NewerSyncMetaUpdatedAt => "newer-syncMetaUpdatedAt",
            ResolutionReason::IdenticalContent => "identical-content",
            ResolutionReason::TiePolicy => "tie-policy",
        }
    }
}

/// Unrecognized resolution reason name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown resolution reason: {0}")]
pub struct ParseReasonError(pub String);

impl FromStr for ResolutionReason {
    type Err = ParseReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "newer-updatedat" => Ok(ResolutionReason::NewerUpdatedAt),
            "newer-syncmetaupdatedat" => Ok(ResolutionReason::NewerSyncMetaUpdatedAt),
            "identical-content" => Ok(ResolutionReason::IdenticalContent),
            "tie-policy" => Ok(ResolutionReason::TiePolicy),
            _ => Err(ParseReasonError(s.to_string())),
        }
    }
}

impl fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving one overlapping pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub winner: Winner,
    pub reason: ResolutionReason,
}

/// Kind of change applied to the local snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

/// One entry of the reconciliation change log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub id: String,
}

impl RecordChange {
    pub fn add(id: &str) -> Self {
        Self {
            kind: ChangeKind::Add,
            id: id.to_string(),
        }
    }

    pub fn update(id: &str) -> Self {
        Self {
            kind: ChangeKind::Update,
            id: id.to_string(),
        }
    }

    pub fn remove(id: &str) -> Self {
        Self {
            kind: ChangeKind::Remove,
            id: id.to_string(),
        }
    }
}

/// Counters describing a reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Overlapping pairs not resolved as identical content
    pub conflicts: usize,
    /// Stale local records kept because the remote snapshot looked degraded
    #[serde(rename = "protectedRemovals")]
    pub protected_removals: usize,
    /// Stale local records dropped
    #[serde(rename = "staleRemovals")]
    pub stale_removals: usize,
}

/// New local snapshot plus what changed to get there
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub records: Vec<PatientRecord>,
    #[serde(rename = "hasChanges")]
    pub has_changes: bool,
    pub changes: Vec<RecordChange>,
    pub stats: ReconcileStats,
}

/// Thresholds under which missing records are treated as a dropout
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropoutGuard {
    /// Protection only applies from this many local records on
    #[serde(rename = "minLocalCount")]
    pub min_local_count: usize,
    /// Share of local records about to be removed that triggers protection
    #[serde(rename = "maxRemovalRatio")]
    pub max_removal_ratio: f64,
    /// Remote/local size ratio at or below which the remote looks degraded
    #[serde(rename = "maxRemoteRatio")]
    pub max_remote_ratio: f64,
}

impl Default for DropoutGuard {
    fn default() -> Self {
        Self {
            min_local_count: 10,
            max_removal_ratio: 0.5,
            max_remote_ratio: 0.5,
        }
    }
}

impl DropoutGuard {
    /// Whether removing `candidates` records looks like a degraded remote
    /// snapshot rather than genuine deletions
    pub fn should_protect(&self, local_count: usize, remote_count: usize, candidates: usize) -> bool {
        if candidates == 0 || local_count == 0 || local_count < self.min_local_count {
            return false;
        }

        let removal_ratio = candidates as f64 / local_count as f64;
        let remote_ratio = remote_count as f64 / local_count as f64;

        removal_ratio >= self.max_removal_ratio && remote_ratio <= self.max_remote_ratio
    }
}

/// Reconciliation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Window during which a record missing remotely is treated as lag
    #[serde(rename = "gracePeriodMs")]
    pub grace_period_ms: i64,
    #[serde(rename = "tiePolicy")]
    pub tie_policy: TiePolicy,
    #[serde(rename = "dropoutGuard")]
    pub dropout_guard: DropoutGuard,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            grace_period_ms: 30_000,
            tie_policy: TiePolicy::default(),
            dropout_guard: DropoutGuard::default(),
        }
    }
}

/// Sync status of the local snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last successful push
    #[serde(rename = "lastSync")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Records changed locally and not yet pushed
    #[serde(rename = "pendingChanges")]
    pub pending_changes: usize,
    /// Whether a push is in progress
    #[serde(rename = "inProgress")]
    pub in_progress: bool,
    /// Last push error if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stats of the last applied remote snapshot
    #[serde(rename = "lastReconcile", skip_serializing_if = "Option::is_none")]
    pub last_reconcile: Option<ReconcileStats>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            last_sync: None,
            pending_changes: 0,
            in_progress: false,
            error: None,
            last_reconcile: None,
        }
    }
}
