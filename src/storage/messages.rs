//! Storage RPC envelope: one request variant per remote operation, with
//! its arguments in positional order.
use std::net::SocketAddr;

use bincode::{Decode, Encode};

use crate::error::{Result, SdfsError};
use crate::ring::MigrationPlan;
use crate::transport::MAX_FRAME_SIZE;

#[derive(Clone, Debug, Decode, Encode, PartialEq, Eq)]
pub enum StorageRequest {
    GetFileLength { name: String },
    GetFileChunk { name: String, index: u64 },
    PutFileChunk { name: String, data: Vec<u8> },
    DeleteFile { name: String },
    GetReplica { name: String },
    PutReplica { name: String, data: Vec<u8> },
    ApplyOwnershipUpdate {
        plan: MigrationPlan,
        destinations: Vec<SocketAddr>,
    },
    InsertEntry { name: String },
    DeleteEntry { name: String },
}

impl StorageRequest {
    /// Operation name, for logs
    pub fn method(&self) -> &'static str {
        match self {
            StorageRequest::GetFileLength { .. } => "getFileLength",
            StorageRequest::GetFileChunk { .. } => "getFileChunk",
            StorageRequest::PutFileChunk { .. } => "putFileChunk",
            StorageRequest::DeleteFile { .. } => "deleteFile",
            StorageRequest::GetReplica { .. } => "getReplica",
            StorageRequest::PutReplica { .. } => "putReplica",
            StorageRequest::ApplyOwnershipUpdate { .. } => "applyOwnershipUpdate",
            StorageRequest::InsertEntry { .. } => "insertEntry",
            StorageRequest::DeleteEntry { .. } => "deleteEntry",
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_limit::<MAX_FRAME_SIZE>();
        Ok(bincode::encode_to_vec(self, config)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_limit::<MAX_FRAME_SIZE>();
        let (request, _) = bincode::decode_from_slice(data, config)?;
        Ok(request)
    }
}

#[derive(Clone, Copy, Debug, Decode, Encode, PartialEq, Eq)]
pub enum RemoteErrorKind {
    NotFound,
    Storage,
    InvalidRequest,
}

#[derive(Clone, Debug, Decode, Encode, PartialEq, Eq)]
pub enum StorageResponse {
    Ack,
    Length(u64),
    Chunk(Vec<u8>),
    Replica(Vec<u8>),
    Error {
        kind: RemoteErrorKind,
        message: String,
    },
}

impl StorageResponse {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_limit::<MAX_FRAME_SIZE>();
        Ok(bincode::encode_to_vec(self, config)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_limit::<MAX_FRAME_SIZE>();
        let (response, _) = bincode::decode_from_slice(data, config)?;
        Ok(response)
    }

    /// Report a local failure to the remote caller
    pub fn from_error(err: &SdfsError) -> Self {
        let kind = match err {
            SdfsError::NotFound(_) => RemoteErrorKind::NotFound,
            SdfsError::Storage(_) | SdfsError::Io(_) => RemoteErrorKind::Storage,
            _ => RemoteErrorKind::InvalidRequest,
        };
        let message = match err {
            SdfsError::NotFound(name) => name.clone(),
            other => other.to_string(),
        };
        StorageResponse::Error { kind, message }
    }

    /// Turn an `Error` response back into a local error
    pub fn into_result(self) -> Result<Self> {
        match self {
            StorageResponse::Error {
                kind: RemoteErrorKind::NotFound,
                message,
            } => Err(SdfsError::NotFound(message)),
            StorageResponse::Error { kind, message } => {
                Err(SdfsError::Remote(format!("{:?}: {}", kind, message)))
            }
            ok => Ok(ok),
        }
    }
}
