use chrono::Utc;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shared counters for the ingest path.
///
/// Producers, the engine loop and the writer all update these concurrently, so every
/// counter is an atomic. `last_error` sits behind a std mutex that is only held for a
/// string swap and never across an await.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    accepted: AtomicU64,
    pending: AtomicU64,
    flushes: AtomicU64,
    last_batch_len: AtomicU64,
    last_flush_unix_ms: AtomicU64,
    average_flush_micros: AtomicU64,
    mqtt_connected: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`MetricsRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub pending: u64,
    pub dropped: u64,
    pub accepted: u64,
    pub flushes: u64,
    pub last_batch_len: u64,
    pub last_flush_unix_ms: u64,
    pub average_flush_micros: u64,
    pub mqtt_connected: bool,
    pub last_error: Option<String>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, events: usize) {
        self.sent.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self, events: usize) {
        self.failed.fetch_add(events as u64, Ordering::Relaxed);
    }

    /// Inbound buffer rejected an event.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Stores an observed inbound queue depth. Callers read it from the channel itself,
    /// so the gauge never reports more than the buffer can hold.
    pub fn set_pending(&self, depth: u64) {
        self.pending.store(depth, Ordering::Relaxed);
    }

    pub fn record_flush(&self, len: usize, elapsed: Duration) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.last_batch_len.store(len as u64, Ordering::Relaxed);
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.last_flush_unix_ms.store(now, Ordering::Relaxed);
        let micros = elapsed.as_micros() as u64;
        let prev = self.average_flush_micros.load(Ordering::Relaxed);
        let avg = if prev == 0 {
            micros
        } else {
            (prev + micros) / 2
        };
        self.average_flush_micros.store(avg, Ordering::Relaxed);
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: impl Into<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_error = self
            .last_error
            .lock()
            .ok()
            .and_then(|guard| guard.clone());
        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            last_batch_len: self.last_batch_len.load(Ordering::Relaxed),
            last_flush_unix_ms: self.last_flush_unix_ms.load(Ordering::Relaxed),
            average_flush_micros: self.average_flush_micros.load(Ordering::Relaxed),
            mqtt_connected: self.mqtt_connected.load(Ordering::Relaxed),
            last_error,
        }
    }
}

/// Logs a metrics snapshot every `interval` until the task is aborted.
pub fn spawn_reporter(metrics: Arc<MetricsRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = metrics.snapshot();
            tracing::info!(
                sent = snapshot.sent,
                failed = snapshot.failed,
                pending = snapshot.pending,
                dropped = snapshot.dropped,
                flushes = snapshot.flushes,
                last_batch_len = snapshot.last_batch_len,
                mqtt_connected = snapshot.mqtt_connected,
                last_error = snapshot.last_error.as_deref().unwrap_or(""),
                "ingest metrics"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_the_last_observed_depth() {
        let metrics = MetricsRegistry::new();
        metrics.record_accepted();
        metrics.record_accepted();
        metrics.set_pending(2);
        assert_eq!(metrics.pending(), 2);
        metrics.set_pending(0);
        assert_eq!(metrics.pending(), 0);
        assert_eq!(metrics.snapshot().accepted, 2);
    }

    #[test]
    fn snapshot_reports_counters_and_last_error() {
        let metrics = MetricsRegistry::new();
        metrics.record_sent(3);
        metrics.record_failed(2);
        metrics.record_dropped();
        metrics.record_flush(3, Duration::from_micros(40));
        metrics.record_error("connection refused");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sent, 3);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.flushes, 1);
        assert_eq!(snapshot.last_batch_len, 3);
        assert_eq!(snapshot.average_flush_micros, 40);
        assert_eq!(snapshot.last_error.as_deref(), Some("connection refused"));

        metrics.clear_error();
        assert_eq!(metrics.snapshot().last_error, None);
    }

    #[test]
    fn flush_average_blends_with_previous() {
        let metrics = MetricsRegistry::new();
        metrics.record_flush(1, Duration::from_micros(100));
        metrics.record_flush(1, Duration::from_micros(300));
        assert_eq!(metrics.snapshot().average_flush_micros, 200);
        assert_eq!(metrics.snapshot().flushes, 2);
    }
}
