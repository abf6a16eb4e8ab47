use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;

/// A live connection to the store, owned by whoever acquired it.
#[derive(Debug)]
pub struct PooledConnection {
    stream: TcpStream,
    endpoint: String,
}

impl PooledConnection {
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn local_port(&self) -> Option<u16> {
        self.stream.local_addr().ok().map(|addr| addr.port())
    }
}

#[derive(Debug)]
struct PoolState {
    idle: VecDeque<PooledConnection>,
    closed: bool,
}

/// Bounded set of long-lived TCP connections to one store endpoint.
///
/// Idle connections sit in a FIFO capped at `capacity`. A borrower owns its connection
/// outright until it hands it back through [`release`](Self::release) or
/// [`discard`](Self::discard), so a connection can never be lent twice. The state lock is
/// never held across a dial.
#[derive(Debug)]
pub struct ConnectionPool {
    endpoint: String,
    capacity: usize,
    dial_timeout: Duration,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    /// Dials up to `capacity` connections up front. Endpoints that refuse some or all of
    /// them still yield a usable pool; missing connections are dialed on demand.
    pub async fn connect(endpoint: &str, capacity: usize, dial_timeout: Duration) -> Self {
        let pool = Self {
            endpoint: endpoint.to_string(),
            capacity,
            dial_timeout,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(capacity),
                closed: false,
            }),
        };

        let mut opened = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            if let Some(conn) = pool.dial().await {
                opened.push(conn);
            }
        }
        let live = opened.len();
        if let Ok(mut state) = pool.state.lock() {
            state.idle.extend(opened);
        }

        if live < capacity {
            tracing::warn!(
                endpoint,
                live,
                capacity,
                "store pool opened with fewer connections than requested"
            );
        } else {
            tracing::info!(endpoint, live, "store pool ready");
        }
        pool
    }

    /// Takes an idle connection, or dials a new one if none is idle.
    ///
    /// Returns `None` when the dial fails or times out, or once the pool is closed.
    pub async fn acquire(&self) -> Option<PooledConnection> {
        {
            let mut state = self.state.lock().ok()?;
            if state.closed {
                return None;
            }
            if let Some(conn) = state.idle.pop_front() {
                return Some(conn);
            }
        }

        let conn = self.dial().await?;
        if self.is_closed() {
            return None;
        }
        Some(conn)
    }

    /// Returns a healthy connection. Surplus connections, and anything returned after
    /// [`close`](Self::close), are closed instead.
    pub fn release(&self, conn: PooledConnection) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.closed || state.idle.len() >= self.capacity {
            drop(state);
            tracing::debug!(endpoint = %self.endpoint, "closing surplus store connection");
            drop(conn);
            return;
        }
        state.idle.push_back(conn);
    }

    /// Closes a connection that saw an I/O error. It is never pooled again.
    pub fn discard(&self, conn: PooledConnection) {
        tracing::debug!(endpoint = %conn.endpoint, "discarding failed store connection");
        drop(conn);
    }

    /// Closes every idle connection and refuses further acquisitions. Idempotent.
    pub fn close(&self) {
        let drained: Vec<PooledConnection> = match self.state.lock() {
            Ok(mut state) => {
                state.closed = true;
                state.idle.drain(..).collect()
            }
            Err(_) => Vec::new(),
        };
        if !drained.is_empty() {
            tracing::info!(endpoint = %self.endpoint, closed = drained.len(), "store pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|state| state.closed).unwrap_or(true)
    }

    pub fn idle_len(&self) -> usize {
        self.state.lock().map(|state| state.idle.len()).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn dial(&self) -> Option<PooledConnection> {
        match tokio::time::timeout(self.dial_timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(stream)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    tracing::debug!(error = %err, "failed to set TCP_NODELAY on store connection");
                }
                Some(PooledConnection {
                    stream,
                    endpoint: self.endpoint.clone(),
                })
            }
            Ok(Err(err)) => {
                tracing::warn!(endpoint = %self.endpoint, error = %err, "store dial failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    timeout_ms = self.dial_timeout.as_millis() as u64,
                    "store dial timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{unused_endpoint, FakeStore};

    const DIAL_TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn connect_opens_connections_eagerly() {
        let store = FakeStore::start().await;
        let pool = ConnectionPool::connect(&store.endpoint(), 3, DIAL_TIMEOUT).await;
        assert_eq!(pool.idle_len(), 3);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.endpoint(), store.endpoint());
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_empty_usable_pool() {
        let endpoint = unused_endpoint().await;
        let pool = ConnectionPool::connect(&endpoint, 2, DIAL_TIMEOUT).await;
        assert_eq!(pool.idle_len(), 0);
        assert!(pool.acquire().await.is_none());
        assert!(!pool.is_closed());
    }

    #[tokio::test]
    async fn acquire_dials_when_idle_store_is_empty() {
        let store = FakeStore::start().await;
        let pool = ConnectionPool::connect(&store.endpoint(), 1, DIAL_TIMEOUT).await;

        let first = pool.acquire().await.expect("idle connection");
        assert_eq!(pool.idle_len(), 0);
        let second = pool.acquire().await.expect("dialed connection");

        assert_ne!(first.local_port(), second.local_port());
        assert_eq!(first.endpoint(), second.endpoint());

        pool.release(first);
        pool.release(second);
        assert_eq!(pool.idle_len(), 1, "surplus connection must be closed, not pooled");
    }

    #[tokio::test]
    async fn overlapping_acquires_never_share_a_connection() {
        let store = FakeStore::start().await;
        let pool = ConnectionPool::connect(&store.endpoint(), 1, DIAL_TIMEOUT).await;

        let (a, b) = tokio::join!(pool.acquire(), pool.acquire());
        let a = a.expect("first connection");
        let b = b.expect("second connection");
        assert_ne!(a.local_port(), b.local_port());
    }

    #[tokio::test]
    async fn released_connections_are_reused_in_fifo_order() {
        let store = FakeStore::start().await;
        let pool = ConnectionPool::connect(&store.endpoint(), 2, DIAL_TIMEOUT).await;

        let a = pool.acquire().await.expect("a");
        let b = pool.acquire().await.expect("b");
        let (port_a, port_b) = (a.local_port(), b.local_port());
        pool.release(b);
        pool.release(a);

        assert_eq!(pool.acquire().await.expect("first").local_port(), port_b);
        assert_eq!(pool.acquire().await.expect("second").local_port(), port_a);
    }

    #[tokio::test]
    async fn discarded_connections_are_not_pooled() {
        let store = FakeStore::start().await;
        let pool = ConnectionPool::connect(&store.endpoint(), 1, DIAL_TIMEOUT).await;
        let conn = pool.acquire().await.expect("connection");
        pool.discard(conn);
        assert_eq!(pool.idle_len(), 0);
    }

    #[tokio::test]
    async fn close_drains_idle_and_refuses_acquire() {
        let store = FakeStore::start().await;
        let pool = ConnectionPool::connect(&store.endpoint(), 2, DIAL_TIMEOUT).await;
        let on_loan = pool.acquire().await.expect("connection");

        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.idle_len(), 0);
        assert!(pool.acquire().await.is_none());

        pool.release(on_loan);
        assert_eq!(pool.idle_len(), 0, "late release after close must not repopulate");
    }
}
