//! Sync module for patient records
//!
//! Provides:
//! - Whole-record conflict resolution
//! - Full-snapshot reconciliation with dropout protection
//! - Retrying push dispatch with per-attempt timeouts
//! - A coordinator tying both to an authoritative store
//!
//! # Sync Flow
//!
//! 1. A local edit goes through `SyncCoordinator::record_local_change`,
//!    which marks the record dirty
//! 2. `SyncCoordinator::flush` pushes dirty records via the dispatcher
//! 3. Each remote snapshot goes through
//!    `SyncCoordinator::apply_remote_snapshot`, which reconciles and swaps
//!    the local snapshot in one step
//!
//! # Conflict Resolution
//!
//! - Newer `updatedAt` wins, then newer `syncMeta.updatedAt`
//! - Identical content keeps the local copy
//! - Otherwise the configured tie policy decides
//!
//! # Deletions
//!
//! Absence from the remote snapshot is the only deletion signal. Records
//! inside the grace period are kept, and removals are suspended entirely when
//! the remote snapshot looks like a dropout.

mod clock;
mod conflict;
mod coordinator;
mod dispatcher;
mod reconcile;
mod store;
mod transport;
mod types;

pub use clock::{Clock, SystemClock};
pub use conflict::{resolve, ConflictResolver};
pub use coordinator::SyncCoordinator;
pub use dispatcher::{RetryPolicy, SyncDispatcher};
pub use reconcile::{reconcile, Reconciler};
pub use store::{MemoryRecordStore, RecordStore, SqliteRecordStore};
pub use transport::{PushTransport, TransportError, TransportErrorCode};
pub use types::{
    ChangeKind, DropoutGuard, ParseReasonError, ReconcileOptions, ReconcileOutcome,
    ReconcileStats, RecordChange, Resolution, ResolutionReason, SyncStatus, TiePolicy, Winner,
};
