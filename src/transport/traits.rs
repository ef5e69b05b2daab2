//! Transport traits
use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;

/// Request-response communication with a peer (typically TCP)
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Send a request to `target` and wait for its response
    async fn send_request_response(&self, target: SocketAddr, request_data: &[u8]) -> Result<Vec<u8>>;
}
