use crate::telemetry::TelemetryEvent;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;

const WAIT_LIMIT: Duration = Duration::from_secs(5);
const POLL_EVERY: Duration = Duration::from_millis(10);

/// Loopback line-protocol sink that records every line it receives.
pub struct FakeStore {
    addr: SocketAddr,
    lines: Arc<Mutex<Vec<String>>>,
    accept_task: JoinHandle<()>,
}

impl FakeStore {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake store");
        let addr = listener.local_addr().expect("fake store addr");
        let lines = Arc::new(Mutex::new(Vec::new()));

        let accept_lines = lines.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let lines = accept_lines.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket).lines();
                    while let Ok(Some(line)) = reader.next_line().await {
                        lines.lock().expect("lines lock").push(line);
                    }
                });
            }
        });

        Self {
            addr,
            lines,
            accept_task,
        }
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("lines lock").clone()
    }

    /// Polls until at least `count` lines arrived; panics after a few seconds.
    pub async fn wait_for_lines(&self, count: usize) -> Vec<String> {
        let waited = tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let lines = self.lines();
                if lines.len() >= count {
                    return lines;
                }
                tokio::time::sleep(POLL_EVERY).await;
            }
        })
        .await;
        match waited {
            Ok(lines) => lines,
            Err(_) => panic!(
                "fake store saw {} lines, expected {count}",
                self.lines().len()
            ),
        }
    }
}

impl Drop for FakeStore {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerFault {
    /// Aborts every accepted socket with an RST.
    Reset,
    /// Accepts and holds sockets without ever reading from them.
    Stall,
}

/// A store endpoint that accepts connections and then misbehaves.
pub struct FaultyStore {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl FaultyStore {
    pub async fn start(fault: PeerFault) -> Self {
        let socket = TcpSocket::new_v4().expect("faulty store socket");
        if fault == PeerFault::Stall {
            // Accepted sockets inherit the tiny receive window.
            socket.set_recv_buffer_size(4096).expect("faulty store rcvbuf");
        }
        socket
            .bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .expect("bind faulty store");
        let listener = socket.listen(16).expect("listen faulty store");
        let addr = listener.local_addr().expect("faulty store addr");
        let accepted = Arc::new(AtomicUsize::new(0));

        let accept_count = accepted.clone();
        let accept_task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                match fault {
                    PeerFault::Reset => {
                        let _ = socket.set_linger(Some(Duration::ZERO));
                        drop(socket);
                    }
                    PeerFault::Stall => held.push(socket),
                }
                accept_count.fetch_add(1, Ordering::SeqCst);
            }
        });

        Self {
            addr,
            accepted,
            accept_task,
        }
    }

    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// Connections accepted and already faulted.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for FaultyStore {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// An address nothing is listening on.
pub async fn unused_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind scratch listener");
    let addr = listener.local_addr().expect("scratch listener addr");
    drop(listener);
    addr.to_string()
}

/// Readings for one station/sensor with consecutive timestamps.
pub fn events(station: &str, sensor: &str, values: &[f64]) -> Vec<TelemetryEvent> {
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            TelemetryEvent::new(station, 1_700_000_000 + idx as i64, sensor, *value)
        })
        .collect()
}

/// Polls `check` until it holds; panics after a few seconds.
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(WAIT_LIMIT, async {
        while !check() {
            tokio::time::sleep(POLL_EVERY).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
