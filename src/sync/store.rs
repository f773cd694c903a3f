//! Authoritative record store
//!
//! Holds the current local snapshot. Reconciliation results are applied as a
//! whole: readers see either the old snapshot or the new one, never a mix.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::records::PatientRecord;

/// Snapshot storage used by the coordinator
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read the current snapshot
    async fn snapshot(&self) -> Result<Vec<PatientRecord>, StoreError>;

    /// Atomically replace the snapshot
    async fn replace(&self, records: Vec<PatientRecord>) -> Result<(), StoreError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<PatientRecord>>,
}

impl MemoryRecordStore {
    pub fn new(records: Vec<PatientRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn snapshot(&self) -> Result<Vec<PatientRecord>, StoreError> {
        Ok(self.records.read().await.clone())
    }

    async fn replace(&self, records: Vec<PatientRecord>) -> Result<(), StoreError> {
        *self.records.write().await = records;
        Ok(())
    }
}

/// SQLite-backed store
///
/// Records are kept as JSON payloads so fields this crate does not model
/// survive a round trip.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open `database_url` and create the table
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    /// Initialize the records table
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS patient_records (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_patient_records_position ON patient_records(position);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<usize, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM patient_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as usize)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn snapshot(&self) -> Result<Vec<PatientRecord>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT payload FROM patient_records ORDER BY position ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(payload,)| serde_json::from_str(&payload).map_err(StoreError::from))
            .collect()
    }

    async fn replace(&self, records: Vec<PatientRecord>) -> Result<(), StoreError> {
        // Serialize up front so a bad record cannot leave a half-written table
        let payloads = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM patient_records")
            .execute(&mut *tx)
            .await?;

        for (position, (record, payload)) in records.iter().zip(&payloads).enumerate() {
            sqlx::query(
                r#"
                INSERT INTO patient_records (id, position, payload, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    position = excluded.position,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&record.id)
            .bind(position as i64)
            .bind(payload)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!("Replaced record snapshot with {} records", records.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqliteRecordStore {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        let store = SqliteRecordStore::new(pool);
        store.init().await.unwrap();
        store
    }

    fn make_record(id: &str, name: &str) -> PatientRecord {
        let mut record = PatientRecord::new("7.777.777-7", name, "2024-04-04", 1_000);
        record.id = id.to_string();
        record
    }

    #[tokio::test]
    async fn test_memory_store_replace() {
        let store = MemoryRecordStore::default();
        assert!(store.snapshot().await.unwrap().is_empty());

        store
            .replace(vec![make_record("p1", "Ana"), make_record("p2", "Luis")])
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].name, "Luis");
    }

    #[tokio::test]
    async fn test_sqlite_replace_preserves_order() {
        let store = setup_test_db().await;

        let records = vec![
            make_record("p3", "Carla"),
            make_record("p1", "Ana"),
            make_record("p2", "Luis"),
        ];
        store.replace(records.clone()).await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot, records);
    }

    #[tokio::test]
    async fn test_sqlite_replace_drops_missing_records() {
        let store = setup_test_db().await;

        store
            .replace(vec![make_record("p1", "Ana"), make_record("p2", "Luis")])
            .await
            .unwrap();
        store.replace(vec![make_record("p2", "Luis")]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.snapshot().await.unwrap()[0].id, "p2");
    }

    #[tokio::test]
    async fn test_sqlite_keeps_unknown_fields() {
        let store = setup_test_db().await;

        let mut record = make_record("p1", "Ana");
        record
            .extra
            .insert("bookmarkIds".to_string(), serde_json::json!(["b1", "b2"]));
        store.replace(vec![record.clone()]).await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot[0].extra, record.extra);
    }
}
