use crate::metrics::MetricsRegistry;
use crate::store::{BatchWriter, ConnectionPool};
use crate::telemetry::TelemetryEvent;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;


const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub write_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("inbound buffer full; reading dropped")]
    BufferFull,
    #[error("ingest engine is shutting down")]
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum FlushReason {
    BatchSize,
    Interval,
    Shutdown,
}

impl FlushReason {
    fn as_str(self) -> &'static str {
        match self {
            FlushReason::BatchSize => "batch_size",
            FlushReason::Interval => "interval",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

/// Producer side of the engine. Cheap to clone; safe to share across tasks.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<TelemetryEvent>,
    metrics: Arc<MetricsRegistry>,
    state: watch::Receiver<EngineState>,
}

impl EngineHandle {
    /// Queues a reading without waiting. A full buffer drops the reading.
    pub fn submit(&self, event: TelemetryEvent) -> Result<(), SubmitError> {
        match self.tx.try_send(event) {
            Ok(()) => {
                let queue_depth = self.pending();
                self.metrics.record_accepted();
                self.metrics.set_pending(queue_depth);
                tracing::trace!(queue_depth, "queued reading");
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                self.metrics.record_dropped();
                tracing::warn!(
                    station = %event.station,
                    sensor = %event.sensor,
                    "inbound buffer full; dropping reading"
                );
                Err(SubmitError::BufferFull)
            }
            Err(TrySendError::Closed(_)) => Err(SubmitError::Stopped),
        }
    }

    /// Events sitting in the inbound buffer right now. Never exceeds its capacity.
    pub fn pending(&self) -> u64 {
        (self.tx.max_capacity() - self.tx.capacity()) as u64
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }
}

/// Buffers readings and writes them to the store in size- or time-triggered batches.
///
/// A single worker task owns the in-flight batch and performs every flush, one at a
/// time. Producers only ever touch the bounded inbound channel.
pub struct IngestEngine {
    handle: EngineHandle,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl IngestEngine {
    pub fn start(
        config: EngineConfig,
        pool: Arc<ConnectionPool>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(EngineState::Running);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            writer: BatchWriter::new(metrics.clone(), config.write_timeout),
            pool,
            metrics: metrics.clone(),
            state: state_tx,
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval,
        };
        tracing::info!(
            buffer_capacity = config.buffer_capacity,
            batch_size = worker.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            "ingest engine started"
        );
        let worker = tokio::spawn(worker.run(rx, shutdown_rx));

        Self {
            handle: EngineHandle {
                tx,
                metrics,
                state: state_rx,
            },
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn submit(&self, event: TelemetryEvent) -> Result<(), SubmitError> {
        self.handle.submit(event)
    }

    pub fn state(&self) -> EngineState {
        self.handle.state()
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.handle.metrics()
    }

    /// Events accepted into the inbound buffer but not yet taken by the worker.
    pub fn pending(&self) -> u64 {
        self.handle.pending()
    }

    /// Drains queued and accumulated readings with one final flush, closes the store
    /// pool, and returns once the worker has exited. Later calls wait for the same
    /// drain and never flush again.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let signal = self.shutdown.lock().ok().and_then(|mut guard| guard.take());
        if let Some(signal) = signal {
            tracing::info!("ingest engine draining");
            let _ = signal.send(());
        }
        if let Some(handle) = worker.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "ingest worker exited abnormally");
            }
        }
    }
}

struct Worker {
    writer: BatchWriter,
    pool: Arc<ConnectionPool>,
    metrics: Arc<MetricsRegistry>,
    state: watch::Sender<EngineState>,
    batch_size: usize,
    flush_interval: Duration,
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::Receiver<TelemetryEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut batch: Vec<TelemetryEvent> = Vec::with_capacity(self.batch_size);
        let period = self.flush_interval.max(MIN_FLUSH_INTERVAL);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                // Fires on an explicit stop and when the engine is dropped.
                _ = &mut shutdown => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    self.metrics.set_pending(rx.len() as u64);
                    batch.push(event);
                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch, FlushReason::BatchSize).await;
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut batch, FlushReason::Interval).await;
                }
            }
        }

        self.drain(rx, batch).await;
    }

    async fn drain(&self, mut rx: mpsc::Receiver<TelemetryEvent>, mut batch: Vec<TelemetryEvent>) {
        self.state.send_replace(EngineState::Draining);
        rx.close();
        while let Ok(event) = rx.try_recv() {
            batch.push(event);
        }
        self.metrics.set_pending(0);
        let drained = batch.len();
        self.flush(&mut batch, FlushReason::Shutdown).await;
        self.pool.close();
        self.state.send_replace(EngineState::Stopped);
        tracing::info!(drained, "ingest engine stopped");
    }

    async fn flush(&self, batch: &mut Vec<TelemetryEvent>, reason: FlushReason) {
        if batch.is_empty() {
            return;
        }

        let started = Instant::now();
        let items = std::mem::take(batch);
        let len = items.len();

        let Some(mut conn) = self.pool.acquire().await else {
            self.metrics.record_failed(len);
            self.metrics.record_flush(len, started.elapsed());
            self.metrics.record_error("no store connection available");
            tracing::error!(
                len,
                reason = reason.as_str(),
                endpoint = self.pool.endpoint(),
                "no store connection available; batch dropped"
            );
            return;
        };

        match self.writer.write(&mut conn, &items).await {
            Ok(sent) => {
                self.pool.release(conn);
                self.metrics.clear_error();
                tracing::debug!(
                    sent,
                    reason = reason.as_str(),
                    micros = started.elapsed().as_micros() as u64,
                    "flushed readings batch"
                );
            }
            Err(err) => {
                self.pool.discard(conn);
                self.metrics.record_error(err.to_string());
                tracing::error!(error = %err, len, reason = reason.as_str(), "failed to flush readings batch");
            }
        }
        self.metrics.record_flush(len, started.elapsed());
    }
}
