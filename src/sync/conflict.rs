//! Conflict resolution
//!
//! Decides which of two copies of the same record wins. Records are compared
//! as whole units; fields are never merged across copies.

use std::cmp::Ordering;

use super::types::{Resolution, ResolutionReason, TiePolicy, Winner};
use crate::records::PatientRecord;

/// Conflict resolver with a configurable tie policy
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: TiePolicy,
}

impl ConflictResolver {
    pub fn new(policy: TiePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> TiePolicy {
        self.policy
    }

    /// Resolve a pair of records sharing an id
    pub fn resolve(&self, local: &PatientRecord, remote: &PatientRecord) -> Resolution {
        resolve(local, remote, self.policy)
    }
}

/// Resolve one overlapping pair.
///
/// First applicable rule wins: newer `updatedAt`, newer `syncMeta.updatedAt`,
/// identical content (local kept), then the tie policy.
pub fn resolve(local: &PatientRecord, remote: &PatientRecord, policy: TiePolicy) -> Resolution {
    if let Some(winner) = newer(local.updated_at_ms(), remote.updated_at_ms()) {
        return Resolution {
            winner,
            reason: ResolutionReason::NewerUpdatedAt,
        };
    }

    if let Some(winner) = newer(local.sync_updated_at_ms(), remote.sync_updated_at_ms()) {
        return Resolution {
            winner,
            reason: ResolutionReason::NewerSyncMetaUpdatedAt,
        };
    }

    if local.same_content(remote) {
        return Resolution {
            winner: Winner::Local,
            reason: ResolutionReason::IdenticalContent,
        };
    }

    let winner = match policy {
        TiePolicy::NewerWinsLocalTie => Winner::Local,
        TiePolicy::NewerWinsRemoteTie => Winner::Remote,
    };

    Resolution {
        winner,
        reason: ResolutionReason::TiePolicy,
    }
}

fn newer(local: i64, remote: i64) -> Option<Winner> {
    match local.cmp(&remote) {
        Ordering::Greater => Some(Winner::Local),
        Ordering::Less => Some(Winner::Remote),
        Ordering::Equal => None,
    }
}
