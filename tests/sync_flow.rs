use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use patient_sync::sync::{
    Clock, MemoryRecordStore, PushTransport, ReconcileOptions, RecordStore, RetryPolicy,
    SyncCoordinator, SyncDispatcher, TransportError, TransportErrorCode,
};
use patient_sync::{PatientRecord, SyncError};

/// Clock that only moves when told to, or when slept on
struct StepClock {
    now: AtomicI64,
}

impl StepClock {
    fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for StepClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration.as_millis() as i64);
    }
}

/// Plays back queued failures, then succeeds
#[derive(Default)]
struct ScriptedTransport {
    failures: Mutex<Vec<TransportError>>,
    pushed: Mutex<Vec<Vec<String>>>,
}

impl ScriptedTransport {
    fn failing_with(failures: Vec<TransportError>) -> Self {
        Self {
            failures: Mutex::new(failures),
            pushed: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.pushed.lock().unwrap().len()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn sync_patients(&self, records: &[PatientRecord]) -> Result<(), TransportError> {
        self.pushed
            .lock()
            .unwrap()
            .push(records.iter().map(|r| r.id.clone()).collect());

        let mut failures = self.failures.lock().unwrap();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }
}

type Coordinator = SyncCoordinator<MemoryRecordStore, ScriptedTransport, StepClock>;

fn make_coordinator(
    records: Vec<PatientRecord>,
    transport: ScriptedTransport,
    now: i64,
) -> Coordinator {
    patient_sync::init_tracing();

    SyncCoordinator::new(
        MemoryRecordStore::new(records),
        SyncDispatcher::new(transport, StepClock::new(now)),
        ReconcileOptions {
            grace_period_ms: 1_000,
            ..Default::default()
        },
        RetryPolicy::new(3, 50, 0).unwrap(),
        "ward-tablet",
    )
}

fn make_record(id: &str, updated_at: i64) -> PatientRecord {
    let mut record = PatientRecord::new("12.345.678-5", "Marta Soto", "2024-05-10", updated_at);
    record.id = id.to_string();
    record
}

#[tokio::test]
async fn test_edit_push_and_reconcile_round() {
    let coordinator = make_coordinator(
        vec![make_record("p1", 1_000), make_record("p2", 1_000)],
        ScriptedTransport::default(),
        10_000,
    );

    coordinator
        .record_local_change(make_record("p1", 1_000).with_clinical_note("Control en 2 semanas"))
        .await
        .unwrap();
    coordinator.flush().await.unwrap();
    assert!(coordinator.dirty_ids().await.is_empty());

    // The remote echoes our push and adds a record from another device
    let mut remote = coordinator.store().snapshot().await.unwrap();
    remote.push(make_record("p3", 9_500));

    let outcome = coordinator.apply_remote_snapshot(remote).await.unwrap();

    assert!(outcome.has_changes);
    assert_eq!(outcome.changes.len(), 1);
    assert_eq!(outcome.changes[0].id, "p3");

    let ids: Vec<String> = coordinator
        .store()
        .snapshot()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["p1", "p2", "p3"]);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let transport = ScriptedTransport::failing_with(vec![
        TransportError::with_code(TransportErrorCode::Unavailable, "backend unavailable"),
        TransportError::new("network request failed"),
    ]);
    let coordinator = make_coordinator(vec![], transport, 10_000);

    coordinator
        .record_local_change(make_record("p1", 0))
        .await
        .unwrap();
    coordinator.flush().await.unwrap();

    let dispatcher = coordinator.dispatcher();
    assert_eq!(dispatcher.transport().calls(), 3);
    // Two backoff sleeps of at least 50ms and 100ms
    assert!(dispatcher.clock().now_ms() >= 10_150);
    assert!(coordinator.status().await.error.is_none());
}

#[tokio::test]
async fn test_denied_push_keeps_record_pending() {
    let transport = ScriptedTransport::failing_with(vec![TransportError::new(
        "Missing or insufficient permissions",
    )]);
    let coordinator = make_coordinator(vec![], transport, 10_000);

    coordinator
        .record_local_change(make_record("p1", 0))
        .await
        .unwrap();
    let result = coordinator.flush().await;

    assert!(matches!(result, Err(SyncError::NonRetryable(_))));
    assert_eq!(coordinator.dispatcher().transport().calls(), 1);
    assert_eq!(coordinator.dirty_ids().await, vec!["p1".to_string()]);

    // The next flush succeeds
    coordinator.flush().await.unwrap();
    assert!(coordinator.dirty_ids().await.is_empty());
}

#[tokio::test]
async fn test_partial_snapshot_does_not_wipe_records() {
    let local: Vec<PatientRecord> = (0..12)
        .map(|i| make_record(&format!("p{i}"), 1_000))
        .collect();
    let coordinator = make_coordinator(local, ScriptedTransport::default(), 100_000);

    let remote = vec![make_record("p0", 1_000), make_record("p1", 1_000)];
    let outcome = coordinator.apply_remote_snapshot(remote).await.unwrap();

    assert_eq!(outcome.stats.protected_removals, 10);
    assert_eq!(outcome.stats.stale_removals, 0);
    assert_eq!(coordinator.store().snapshot().await.unwrap().len(), 12);
}

#[tokio::test]
async fn test_stale_record_removed_after_grace_period() {
    let coordinator = make_coordinator(
        vec![make_record("p1", 1_000), make_record("p2", 1_000)],
        ScriptedTransport::default(),
        1_500,
    );

    // Inside the grace period the missing record stays
    let outcome = coordinator
        .apply_remote_snapshot(vec![make_record("p1", 1_000)])
        .await
        .unwrap();
    assert!(!outcome.has_changes);

    coordinator.dispatcher().clock().advance(5_000);
    let outcome = coordinator
        .apply_remote_snapshot(vec![make_record("p1", 1_000)])
        .await
        .unwrap();

    assert_eq!(outcome.stats.stale_removals, 1);
    let snapshot = coordinator.store().snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, "p1");
}
