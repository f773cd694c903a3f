//! Patient record sync engine
//!
//! Keeps a local set of patient records consistent with a remote store:
//! conflicts are resolved per record, remote snapshots are reconciled with
//! protection against partial snapshots, and local changes are pushed with
//! retries.

pub mod config;
pub mod error;
pub mod records;
pub mod sync;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::SyncConfig;
pub use error::{ConfigError, Result, StoreError, SyncError};
pub use records::{PatientRecord, SyncMeta, SyncSource};

/// Install the default tracing subscriber.
///
/// Honors `RUST_LOG`. Calling it again after a subscriber is set is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "patient_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
