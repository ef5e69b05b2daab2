//! Typed calls to a peer's storage surface.
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use super::messages::{StorageRequest, StorageResponse};
use crate::error::{Result, SdfsError};
use crate::transport::RequestSender;

#[derive(Clone)]
pub struct StorageClient {
    sender: Arc<dyn RequestSender>,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient").finish()
    }
}

fn unexpected(method: &str, response: StorageResponse) -> SdfsError {
    SdfsError::Remote(format!("Unexpected response to {}: {:?}", method, response))
}

impl StorageClient {
    pub fn new(sender: Arc<dyn RequestSender>) -> Self {
        Self { sender }
    }

    async fn call(&self, target: SocketAddr, request: StorageRequest) -> Result<StorageResponse> {
        debug!("Calling {} on {}", request.method(), target);
        let payload = request.serialize()?;
        let reply = self.sender.send_request_response(target, &payload).await?;
        StorageResponse::deserialize(&reply)?.into_result()
    }

    /// Send a request whose only successful answer is an acknowledgement
    pub async fn call_ack(&self, target: SocketAddr, request: StorageRequest) -> Result<()> {
        let method = request.method();
        match self.call(target, request).await? {
            StorageResponse::Ack => Ok(()),
            other => Err(unexpected(method, other)),
        }
    }

    pub async fn get_file_length(&self, target: SocketAddr, name: &str) -> Result<u64> {
        let request = StorageRequest::GetFileLength {
            name: name.to_string(),
        };
        match self.call(target, request).await? {
            StorageResponse::Length(len) => Ok(len),
            other => Err(unexpected("getFileLength", other)),
        }
    }

    pub async fn get_file_chunk(&self, target: SocketAddr, name: &str, index: u64) -> Result<Vec<u8>> {
        let request = StorageRequest::GetFileChunk {
            name: name.to_string(),
            index,
        };
        match self.call(target, request).await? {
            StorageResponse::Chunk(data) => Ok(data),
            other => Err(unexpected("getFileChunk", other)),
        }
    }

    pub async fn put_file_chunk(&self, target: SocketAddr, name: &str, data: Vec<u8>) -> Result<()> {
        let request = StorageRequest::PutFileChunk {
            name: name.to_string(),
            data,
        };
        self.call_ack(target, request).await
    }

    pub async fn delete_file(&self, target: SocketAddr, name: &str) -> Result<()> {
        let request = StorageRequest::DeleteFile {
            name: name.to_string(),
        };
        self.call_ack(target, request).await
    }

    pub async fn get_replica(&self, target: SocketAddr, name: &str) -> Result<Vec<u8>> {
        let request = StorageRequest::GetReplica {
            name: name.to_string(),
        };
        match self.call(target, request).await? {
            StorageResponse::Replica(data) => Ok(data),
            other => Err(unexpected("getReplica", other)),
        }
    }

    pub async fn put_replica(&self, target: SocketAddr, name: &str, data: Vec<u8>) -> Result<()> {
        let request = StorageRequest::PutReplica {
            name: name.to_string(),
            data,
        };
        self.call_ack(target, request).await
    }
}
