//! TCP Socket Pool for Request-Response Communication
//!
//! Keeps idle RPC connections per peer. Peers are added lazily on first
//! use. A connection that saw any error is dropped rather than returned.
//! A request is resent on a fresh connection only when its frame never
//! left this node.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use super::common::{read_frame, write_frame};
use super::traits::RequestSender;
use crate::error::Result;
use crate::transport_error;

/// TCP connection with metadata
#[derive(Debug)]
struct TcpConnection {
    stream: TcpStream,
    last_used: Instant,
}

impl TcpConnection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            last_used: Instant::now(),
        }
    }

    fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() > idle_timeout
    }

    /// False once the peer has closed its end or sent unsolicited bytes
    fn is_open(&self) -> bool {
        let mut probe = [0u8; 1];
        matches!(
            self.stream.try_read(&mut probe),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock
        )
    }
}

type PeerConnections = Arc<Mutex<Vec<TcpConnection>>>;

/// Pool of TCP connections for efficient peer communication
#[derive(Debug)]
pub struct TcpSocketPool {
    peer_connections: Mutex<IndexMap<SocketAddr, PeerConnections>>,
    max_idle_per_peer: usize,
    request_timeout: Duration,
    idle_timeout: Duration,
    stats: Arc<TcpSocketPoolStats>,
}

/// TCP-specific statistics
#[derive(Debug, Default)]
pub struct TcpSocketPoolStats {
    pub total_connections: AtomicUsize,
    pub requests_sent: AtomicU64,
    pub responses_received: AtomicU64,
    pub connection_errors: AtomicU64,
    pub timeout_errors: AtomicU64,
}

impl TcpSocketPool {
    /// `request_timeout` bounds connect, send and receive of one call
    pub fn new(request_timeout: Duration, max_idle_per_peer: usize) -> Self {
        Self {
            peer_connections: Mutex::new(IndexMap::new()),
            max_idle_per_peer,
            request_timeout,
            idle_timeout: Duration::from_secs(60),
            stats: Arc::new(TcpSocketPoolStats::default()),
        }
    }

    async fn peer(&self, target: SocketAddr) -> PeerConnections {
        let mut peers = self.peer_connections.lock().await;
        peers
            .entry(target)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Take an idle connection, if any
    async fn take_idle(&self, target: SocketAddr) -> Option<TcpConnection> {
        let connections_arc = self.peer(target).await;
        let mut connections = connections_arc.lock().await;
        connections.retain(|conn| !conn.is_expired(self.idle_timeout) && conn.is_open());
        connections.pop()
    }

    async fn connect(&self, target: SocketAddr) -> Result<TcpConnection> {
        let stream = TcpStream::connect(target).await.map_err(|e| {
            self.stats.connection_errors.fetch_add(1, Ordering::Relaxed);
            transport_error!("Failed to connect to {}: {}", target, e)
        })?;
        debug!("Created new TCP connection to {}", target);
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        Ok(TcpConnection::new(stream))
    }

    async fn return_connection(&self, target: SocketAddr, mut connection: TcpConnection) {
        connection.last_used = Instant::now();
        let connections_arc = self.peer(target).await;
        let mut connections = connections_arc.lock().await;
        if connections.len() < self.max_idle_per_peer {
            connections.push(connection);
        }
    }

    async fn exchange(&self, target: SocketAddr, request_data: &[u8]) -> Result<Vec<u8>> {
        if let Some(mut connection) = self.take_idle(target).await {
            match write_frame(&mut connection.stream, request_data).await {
                Ok(()) => return self.await_response(target, connection).await,
                Err(e) => debug!("Pooled connection to {} failed, reconnecting: {}", target, e),
            }
        }
        let mut connection = self.connect(target).await?;
        write_frame(&mut connection.stream, request_data).await?;
        self.await_response(target, connection).await
    }

    /// Once the request is written the peer may have applied it, so a
    /// failure here is reported and never retried.
    async fn await_response(
        &self,
        target: SocketAddr,
        mut connection: TcpConnection,
    ) -> Result<Vec<u8>> {
        let response = read_frame(&mut connection.stream)
            .await?
            .ok_or_else(|| transport_error!("Connection closed by {}", target))?;
        self.return_connection(target, connection).await;
        Ok(response)
    }

    /// Forget idle connections to a peer that left the cluster
    pub async fn remove_peer(&self, peer_addr: SocketAddr) {
        if let Some(connections_arc) = self.peer_connections.lock().await.shift_remove(&peer_addr) {
            let removed_count = connections_arc.lock().await.len();
            debug!(
                "Removed TCP peer: {} ({} connections)",
                peer_addr, removed_count
            );
        }
    }

    pub fn get_stats(&self) -> &TcpSocketPoolStats {
        &self.stats
    }
}

#[async_trait]
impl RequestSender for TcpSocketPool {
    async fn send_request_response(&self, target: SocketAddr, request_data: &[u8]) -> Result<Vec<u8>> {
        self.stats.requests_sent.fetch_add(1, Ordering::Relaxed);
        let response = timeout(self.request_timeout, self.exchange(target, request_data))
            .await
            .map_err(|_| {
                self.stats.timeout_errors.fetch_add(1, Ordering::Relaxed);
                transport_error!("Request to {} timed out", target)
            })??;
        self.stats
            .responses_received
            .fetch_add(1, Ordering::Relaxed);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::transport::tcp_receiver::{TcpReceiver, TcpRequest};

    async fn echo_server() -> (SocketAddr, watch::Sender<bool>) {
        let (tx, mut rx) = mpsc::channel::<TcpRequest>(16);
        let receiver = TcpReceiver::new("127.0.0.1:0".parse().unwrap(), tx)
            .await
            .unwrap();
        let addr = receiver.local_addr;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        receiver.start(shutdown_rx);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let _ = request.response_tx.send(request.data.to_vec());
            }
        });
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let (addr, _shutdown) = echo_server().await;
        let pool = TcpSocketPool::new(Duration::from_secs(1), 4);

        for _ in 0..3 {
            let reply = pool.send_request_response(addr, b"hello").await.unwrap();
            assert_eq!(reply, b"hello");
        }
        let stats = pool.get_stats();
        assert_eq!(stats.total_connections.load(Ordering::Relaxed), 1);
        assert_eq!(stats.responses_received.load(Ordering::Relaxed), 3);

        pool.remove_peer(addr).await;
        pool.send_request_response(addr, b"again").await.unwrap();
        assert_eq!(stats.total_connections.load(Ordering::Relaxed), 2);
    }

    #[derive(Clone, Copy)]
    enum Reply {
        Echo,
        EchoThenClose,
        HangUp,
    }

    /// Echo server scripted by request number, counting every request read
    async fn scripted_server<F>(script: F) -> (SocketAddr, Arc<AtomicUsize>)
    where
        F: Fn(usize) -> Reply + Send + Sync + 'static,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let script = Arc::new(script);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let counter = counter.clone();
                let script = script.clone();
                tokio::spawn(async move {
                    while let Ok(Some(request)) = read_frame(&mut stream).await {
                        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        let reply = script(n);
                        if matches!(reply, Reply::HangUp) {
                            break;
                        }
                        if write_frame(&mut stream, &request).await.is_err() {
                            break;
                        }
                        if matches!(reply, Reply::EchoThenClose) {
                            break;
                        }
                    }
                });
            }
        });
        (addr, seen)
    }

    #[tokio::test]
    async fn test_delivered_request_is_not_resent() {
        // The second request is read, then the connection drops unanswered
        let (addr, seen) = scripted_server(|n| if n == 2 { Reply::HangUp } else { Reply::Echo }).await;
        let pool = TcpSocketPool::new(Duration::from_secs(1), 4);

        pool.send_request_response(addr, b"first").await.unwrap();
        let result = pool.send_request_response(addr, b"append").await;
        assert!(result.unwrap_err().is_unreachable());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_idle_connection_is_skipped() {
        let (addr, seen) = scripted_server(|_| Reply::EchoThenClose).await;
        let pool = TcpSocketPool::new(Duration::from_secs(1), 4);
        pool.send_request_response(addr, b"one").await.unwrap();

        // Let the hang-up reach the pooled connection
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.send_request_response(addr, b"two").await.unwrap(), b"two");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(pool.get_stats().total_connections.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let pool = TcpSocketPool::new(Duration::from_millis(500), 4);
        let result = pool.send_request_response(addr, b"hello").await;
        assert!(result.unwrap_err().is_unreachable());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        // Accepts but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let pool = TcpSocketPool::new(Duration::from_millis(100), 4);
        let result = pool.send_request_response(addr, b"hello").await;
        assert!(result.unwrap_err().is_unreachable());
        assert_eq!(pool.get_stats().timeout_errors.load(Ordering::Relaxed), 1);
    }
}
