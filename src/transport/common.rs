//! Framing and counters shared by the UDP and TCP transports.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::transport_error;

/// Largest RPC frame accepted in either direction
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Receive buffer for one gossip datagram
pub const MAX_DATAGRAM_SIZE: usize = 65536;

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_SIZE {
        return Err(transport_error!("Frame too large: {} bytes", data.len()));
    }
    let len = data.len() as u32;
    let write = async {
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(data).await?;
        writer.flush().await
    };
    write
        .await
        .map_err(|e| transport_error!("Failed to write frame: {}", e))
}

/// Read one length-prefixed frame; `None` when the peer closed cleanly
/// between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(transport_error!("Failed to read frame length: {}", e)),
    }

    let frame_len = u32::from_be_bytes(len_bytes) as usize;
    if frame_len > MAX_FRAME_SIZE {
        return Err(transport_error!("Frame too large: {} bytes", frame_len));
    }

    let mut buf = vec![0u8; frame_len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| transport_error!("Failed to read frame data: {}", e))?;
    Ok(Some(buf))
}

#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub messages_received: AtomicU64,
    pub receive_errors: AtomicU64,
}

/// Point-in-time copy of `ReceiverStats`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenReceiverStats {
    pub messages_received: u64,
    pub receive_errors: u64,
}

impl ReceiverStats {
    pub fn freeze(&self) -> FrozenReceiverStats {
        FrozenReceiverStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}
