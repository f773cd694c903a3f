//! Wall clock used for reconciliation timestamps and backoff sleeps

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

/// Time source injected into the dispatcher and coordinator
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time in epoch milliseconds
    fn now_ms(&self) -> i64;

    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real time: chrono for timestamps, tokio for sleeps
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ManualClock;
    use super::*;

    #[tokio::test]
    async fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let before = clock.now_ms();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now_ms() >= before + 5);
    }

    #[tokio::test]
    async fn test_manual_clock_records_sleeps() {
        let clock = ManualClock::new(1_000);
        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 1_250);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
    }
}
