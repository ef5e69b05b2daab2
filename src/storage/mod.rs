//! Replicated file storage: local replica files, the storage RPC
//! surface, and the node that ties them to the ring.
pub mod client;
pub mod local_store;
pub mod messages;
pub mod node;

pub use client::StorageClient;
pub use local_store::LocalStore;
pub use messages::{RemoteErrorKind, StorageRequest, StorageResponse};
pub use node::{DeleteOutcome, GetOutcome, PutOutcome, StorageNode};
