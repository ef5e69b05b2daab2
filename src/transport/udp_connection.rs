//! UDP Transport Implementation
//!
//! One bound socket per node carries gossip in both directions.
//! Delivery is best-effort: callers treat send errors as lost datagrams.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::debug;

use super::common::{FrozenReceiverStats, ReceiverStats, MAX_DATAGRAM_SIZE};
use crate::error::Result;
use crate::transport_error;

#[derive(Clone, Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    messages_sent: Arc<AtomicU64>,
    send_errors: Arc<AtomicU64>,
    stats: Arc<ReceiverStats>,
}

impl UdpTransport {
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| transport_error!("Socket creation failed: {}", e))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| transport_error!("Socket creation failed: {}", e))?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            messages_sent: Arc::new(AtomicU64::new(0)),
            send_errors: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(ReceiverStats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn send_to(&self, target: SocketAddr, data: &[u8]) -> Result<()> {
        match self.socket.send_to(data, target).await {
            Ok(_) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                debug!("[{}] Failed to send UDP data to {}: {}", self.local_addr, target, e);
                Err(transport_error!("UDP send to {} failed: {}", target, e))
            }
        }
    }

    /// Wait for the next datagram
    pub async fn recv(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        match self.socket.recv_from(&mut buf).await {
            Ok((len, addr)) => {
                self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                buf.truncate(len);
                Ok((buf, addr))
            }
            Err(e) => {
                self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                Err(transport_error!("UDP receive failed: {}", e))
            }
        }
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn get_stats(&self) -> FrozenReceiverStats {
        self.stats.freeze()
    }
}
