//! TCP Receiver
//!
//! Accepts RPC connections and hands each framed request to the node
//! through a channel. A connection may carry any number of sequential
//! request/response pairs.
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use super::common::{read_frame, write_frame, FrozenReceiverStats, ReceiverStats};
use crate::error::Result;
use crate::transport_error;

/// A request with a channel to send the response back
pub struct TcpRequest {
    pub data: bytes::Bytes,
    pub peer_addr: SocketAddr,
    pub response_tx: oneshot::Sender<Vec<u8>>,
}

/// TCP message receiver
pub struct TcpReceiver {
    pub local_addr: SocketAddr,
    socket: TcpListener,
    stats: Arc<ReceiverStats>,
    message_tx: mpsc::Sender<TcpRequest>,
}

impl TcpReceiver {
    pub async fn new(bind_addr: SocketAddr, message_tx: mpsc::Sender<TcpRequest>) -> Result<Self> {
        let socket = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| transport_error!("Socket creation failed: {}", e))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| transport_error!("Socket creation failed: {}", e))?;

        Ok(Self {
            message_tx,
            local_addr,
            socket,
            stats: Arc::new(ReceiverStats::default()),
        })
    }

    /// Spawn the accept loop; it and every open connection stop once
    /// `shutdown` flips to true, and the listening socket is closed.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Arc<ReceiverStats> {
        let Self {
            local_addr,
            socket,
            stats,
            message_tx: tx,
        } = self;
        let task_stats = stats.clone();
        let mut accept_shutdown = shutdown.clone();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = socket.accept() => accepted,
                    changed = accept_shutdown.changed() => {
                        if changed.is_err() || *accept_shutdown.borrow() {
                            info!("[{}] RPC listener shutting down", local_addr);
                            break;
                        }
                        continue;
                    }
                };
                let (stream, peer_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        task_stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                        debug!("[{}] TCP accept failed: {}", local_addr, e);
                        continue;
                    }
                };

                tokio::spawn(serve_connection(
                    stream,
                    peer_addr,
                    tx.clone(),
                    task_stats.clone(),
                    shutdown.clone(),
                ));
            }
        });
        stats
    }

    pub fn get_stats(&self) -> FrozenReceiverStats {
        self.stats.freeze()
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    tx: mpsc::Sender<TcpRequest>,
    stats: Arc<ReceiverStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut stream) => frame,
            _ = shutdown.changed() => return,
        };
        let data = match frame {
            Ok(Some(data)) => data,
            Ok(None) => return,
            Err(e) => {
                stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping connection from {}: {}", peer_addr, e);
                return;
            }
        };
        stats.messages_received.fetch_add(1, Ordering::Relaxed);

        let (response_tx, response_rx) = oneshot::channel();
        let request = TcpRequest {
            data: bytes::Bytes::from(data),
            peer_addr,
            response_tx,
        };
        if tx.send(request).await.is_err() {
            debug!("Request handler is gone; closing {}", peer_addr);
            return;
        }

        let response = tokio::select! {
            response = response_rx => response,
            _ = shutdown.changed() => return,
        };
        match response {
            Ok(response_data) => {
                if let Err(e) = write_frame(&mut stream, &response_data).await {
                    debug!("Failed to write response to {}: {}", peer_addr, e);
                    return;
                }
            }
            Err(_) => {
                debug!("Handler dropped response channel for {}", peer_addr);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    async fn echo_receiver() -> (SocketAddr, Arc<ReceiverStats>, watch::Sender<bool>) {
        let (tx, mut rx) = mpsc::channel::<TcpRequest>(16);
        let receiver = TcpReceiver::new("127.0.0.1:0".parse().unwrap(), tx)
            .await
            .unwrap();
        let local_addr = receiver.local_addr;
        assert_eq!(receiver.get_stats(), FrozenReceiverStats::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = receiver.start(shutdown_rx);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let mut reply = b"echo:".to_vec();
                reply.extend_from_slice(&request.data);
                let _ = request.response_tx.send(reply);
            }
        });
        (local_addr, stats, shutdown_tx)
    }

    #[tokio::test]
    async fn test_many_requests_on_one_connection() {
        let (local_addr, stats, _shutdown) = echo_receiver().await;
        let mut stream = TcpStream::connect(local_addr).await.unwrap();

        for body in [&b"one"[..], &b"two"[..], &b""[..]] {
            write_frame(&mut stream, body).await.unwrap();
            let reply = timeout(Duration::from_secs(1), read_frame(&mut stream))
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let mut expected = b"echo:".to_vec();
            expected.extend_from_slice(body);
            assert_eq!(reply, expected);
        }
        assert_eq!(stats.freeze().messages_received, 3);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (local_addr, _stats, shutdown) = echo_receiver().await;
        let mut stream = TcpStream::connect(local_addr).await.unwrap();
        write_frame(&mut stream, b"ping").await.unwrap();
        read_frame(&mut stream).await.unwrap();

        shutdown.send(true).unwrap();
        let closed = timeout(Duration::from_secs(1), read_frame(&mut stream))
            .await
            .unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(local_addr).await.is_err());
    }
}
