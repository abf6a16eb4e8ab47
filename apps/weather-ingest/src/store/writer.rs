use super::encoder::encode_batch;
use super::pool::PooledConnection;
use crate::metrics::MetricsRegistry;
use crate::telemetry::TelemetryEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("store write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store write exceeded {0:?} deadline")]
    Timeout(Duration),
}

/// Writes whole batches as a single payload and accounts the outcome per event.
///
/// A batch is atomic for accounting: it is either counted as sent in full or failed in
/// full, even though a byte stream may have accepted part of it before erroring.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    metrics: Arc<MetricsRegistry>,
    write_timeout: Duration,
}

impl BatchWriter {
    pub fn new(metrics: Arc<MetricsRegistry>, write_timeout: Duration) -> Self {
        Self {
            metrics,
            write_timeout,
        }
    }

    /// On error the connection is in an unknown state and must be discarded by the caller.
    pub async fn write(
        &self,
        conn: &mut PooledConnection,
        batch: &[TelemetryEvent],
    ) -> Result<usize, WriteError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let payload = encode_batch(batch);
        let stream = conn.stream_mut();
        let result = tokio::time::timeout(self.write_timeout, async {
            stream.write_all(&payload).await?;
            stream.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.metrics.record_sent(batch.len());
                tracing::trace!(events = batch.len(), bytes = payload.len(), "wrote batch");
                Ok(batch.len())
            }
            Ok(Err(err)) => {
                self.metrics.record_failed(batch.len());
                Err(WriteError::Io(err))
            }
            Err(_) => {
                self.metrics.record_failed(batch.len());
                Err(WriteError::Timeout(self.write_timeout))
            }
        }
    }
}
