//! Patient record types
//!
//! A record is one clinical encounter. Field names serialize in camelCase so
//! snapshots from the remote store deserialize without a mapping layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One clinical encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    /// Stable identifier shared by the local and remote copies
    pub id: String,
    /// National identification number
    #[serde(default)]
    pub rut: String,
    #[serde(default)]
    pub name: String,
    /// Encounter date as entered (usually `YYYY-MM-DD`)
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(rename = "clinicalNote", default)]
    pub clinical_note: String,
    /// Encounter type label
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(rename = "typeId", skip_serializing_if = "Option::is_none")]
    pub type_id: Option<String>,
    #[serde(rename = "pendingTasks", default)]
    pub pending_tasks: Vec<PendingTask>,
    #[serde(rename = "attachedFiles", default)]
    pub attached_files: Vec<AttachedFile>,
    /// Creation time (epoch milliseconds)
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last write time (epoch milliseconds)
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// Stamp left by the push write path
    #[serde(rename = "syncMeta", skip_serializing_if = "Option::is_none")]
    pub sync_meta: Option<SyncMeta>,
    /// Fields this crate does not model, carried through verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A follow-up task attached to an encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    pub id: String,
    pub text: String,
    #[serde(rename = "isCompleted", default)]
    pub is_completed: bool,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

/// Reference to a file stored elsewhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "uploadedAt", skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<i64>,
}

/// Which side's write path produced a sync stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    Local,
    Remote,
}

/// Secondary timestamp used only to break `updatedAt` ties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub source: SyncSource,
    #[serde(rename = "updatedBy")]
    pub updated_by: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl PatientRecord {
    /// Create a new record for an encounter happening now
    pub fn new(rut: &str, name: &str, date: &str, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rut: rut.to_string(),
            name: name.to_string(),
            date: date.to_string(),
            diagnosis: String::new(),
            clinical_note: String::new(),
            record_type: String::new(),
            type_id: None,
            pending_tasks: Vec::new(),
            attached_files: Vec::new(),
            created_at: Some(now_ms),
            updated_at: Some(now_ms),
            sync_meta: None,
            extra: BTreeMap::new(),
        }
    }

    /// `updatedAt`, absent treated as 0
    pub fn updated_at_ms(&self) -> i64 {
        self.updated_at.unwrap_or(0)
    }

    /// `syncMeta.updatedAt`, absent treated as 0
    pub fn sync_updated_at_ms(&self) -> i64 {
        self.sync_meta.as_ref().map_or(0, |m| m.updated_at)
    }

    /// Most recent of `updatedAt` and `createdAt`
    pub fn last_touched_ms(&self) -> i64 {
        self.updated_at_ms().max(self.created_at.unwrap_or(0))
    }

    /// Compare domain content, ignoring `createdAt`, `updatedAt` and `syncMeta`
    pub fn same_content(&self, other: &PatientRecord) -> bool {
        self.id == other.id
            && self.rut == other.rut
            && self.name == other.name
            && self.date == other.date
            && self.diagnosis == other.diagnosis
            && self.clinical_note == other.clinical_note
            && self.record_type == other.record_type
            && self.type_id == other.type_id
            && self.pending_tasks == other.pending_tasks
            && self.attached_files == other.attached_files
            && self.extra == other.extra
    }

    /// Record a local edit at `now_ms`
    pub fn touch(&mut self, now_ms: i64) {
        if self.created_at.is_none() {
            self.created_at = Some(now_ms);
        }
        self.updated_at = Some(now_ms);
    }

    /// Stamp the sync metadata written alongside a push
    pub fn stamp_sync(&mut self, source: SyncSource, updated_by: &str, now_ms: i64) {
        self.sync_meta = Some(SyncMeta {
            source,
            updated_by: updated_by.to_string(),
            updated_at: now_ms,
        });
    }

    pub fn with_diagnosis(mut self, diagnosis: &str) -> Self {
        self.diagnosis = diagnosis.to_string();
        self
    }

    pub fn with_clinical_note(mut self, note: &str) -> Self {
        self.clinical_note = note.to_string();
        self
    }

    pub fn with_task(mut self, text: &str) -> Self {
        self.pending_tasks.push(PendingTask {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            is_completed: false,
            created_at: self.updated_at,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_timestamps() {
        let record = PatientRecord::new("12.345.678-9", "Ana Rojas", "2024-03-01", 1_000);
        assert_eq!(record.created_at, Some(1_000));
        assert_eq!(record.updated_at_ms(), 1_000);
        assert_eq!(record.sync_updated_at_ms(), 0);
        assert!(!record.id.is_empty());
    }

    #[test]
    fn test_same_content_ignores_bookkeeping() {
        let a = PatientRecord::new("1-9", "Ana", "2024-03-01", 1_000).with_diagnosis("Asthma");
        let mut b = a.clone();
        b.updated_at = Some(9_999);
        b.created_at = None;
        b.stamp_sync(SyncSource::Remote, "device-2", 5_000);
        assert!(a.same_content(&b));

        b.clinical_note = "follow up in 2 weeks".to_string();
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_same_content_sees_sub_collections() {
        let a = PatientRecord::new("1-9", "Ana", "2024-03-01", 1_000);
        let b = a.clone().with_task("Order chest x-ray");
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_touch_keeps_creation_time() {
        let mut record = PatientRecord::new("1-9", "Ana", "2024-03-01", 1_000);
        record.touch(2_000);
        assert_eq!(record.created_at, Some(1_000));
        assert_eq!(record.last_touched_ms(), 2_000);
    }

    #[test]
    fn test_deserialize_remote_shape() {
        let json = serde_json::json!({
            "id": "p1",
            "rut": "11.111.111-1",
            "name": "Luis Soto",
            "date": "2024-05-10",
            "diagnosis": "Hypertension",
            "clinicalNote": "BP 150/95",
            "type": "Control",
            "typeId": "control",
            "pendingTasks": [{"id": "t1", "text": "Lab panel", "isCompleted": true}],
            "attachedFiles": [{"id": "f1", "name": "ecg.pdf", "mimeType": "application/pdf"}],
            "createdAt": 100,
            "updatedAt": 200,
            "syncMeta": {"source": "remote", "updatedBy": "device-9", "updatedAt": 210},
            "bookmarked": true
        });

        let record: PatientRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.clinical_note, "BP 150/95");
        assert_eq!(record.record_type, "Control");
        assert!(record.pending_tasks[0].is_completed);
        assert_eq!(record.sync_updated_at_ms(), 210);
        assert_eq!(record.extra.get("bookmarked"), Some(&Value::Bool(true)));

        let out = serde_json::to_string(&record).unwrap();
        assert!(out.contains("\"clinicalNote\""));
        assert!(out.contains("\"bookmarked\":true"));
    }

    #[test]
    fn test_missing_timestamps_default_to_zero() {
        let record: PatientRecord = serde_json::from_value(serde_json::json!({"id": "p1"})).unwrap();
        assert_eq!(record.updated_at_ms(), 0);
        assert_eq!(record.last_touched_ms(), 0);
    }
}
