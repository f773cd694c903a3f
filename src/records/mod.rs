//! Patient record model
//!
//! Records are reconciled as whole units: sub-collections such as pending
//! tasks and attached files are replaced wholesale, never merged per field.

mod types;

pub use types::{AttachedFile, PatientRecord, PendingTask, SyncMeta, SyncSource};
