//! The storage data plane of one cluster node.
//!
//! Serves the remote storage surface, performs client put/get/delete
//! against the owners named by the ring, and reconciles replicas when the
//! failure detector reports departures.
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::client::StorageClient;
use super::local_store::LocalStore;
use super::messages::{RemoteErrorKind, StorageRequest, StorageResponse};
use crate::error::{Result, SdfsError};
use crate::ring::{
    plan_departures, Departure, HashRing, MembershipEventSink, MigrationPlan, MigrationTask,
};
use crate::settings::StorageSettings;
use crate::storage_error;
use crate::transport::{TcpRequest, TcpSocketPool};

/// Idle RPC connections kept per peer
const MAX_IDLE_CONNECTIONS: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PutOutcome {
    pub owners: Vec<SocketAddr>,
    pub stored_at: Vec<SocketAddr>,
    pub failed: Vec<(SocketAddr, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GetOutcome {
    pub source: SocketAddr,
    pub bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub deleted_from: Vec<SocketAddr>,
    pub failed: Vec<(SocketAddr, String)>,
}

pub struct StorageNode {
    address: SocketAddr,
    ring: RwLock<HashRing>,
    store: LocalStore,
    client: StorageClient,
    pool: Arc<TcpSocketPool>,
    chunk_size: usize,
}

impl std::fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNode")
            .field("address", &self.address)
            .field("storage_path", &self.store.root())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

async fn read_up_to(file: &mut fs::File, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

fn chunk_count(len: u64, chunk_size: usize) -> u64 {
    len.div_ceil(chunk_size as u64)
}

impl StorageNode {
    /// Create the node for cluster address `address`; the ring starts
    /// with this node alone.
    pub async fn new(address: SocketAddr, settings: &StorageSettings) -> Result<Arc<Self>> {
        let store = LocalStore::open(&settings.storage_path).await?;
        let pool = Arc::new(TcpSocketPool::new(settings.rpc_timeout, MAX_IDLE_CONNECTIONS));
        let mut ring = HashRing::new();
        ring.node_join(address);
        let leftovers = store.list().await?;
        if !leftovers.is_empty() {
            warn!(
                "[{}] Ignoring {} untracked files in {}",
                address,
                leftovers.len(),
                store.root().display()
            );
        }
        info!(
            "[{}] Storage node ready at {} (chunk size {})",
            address,
            store.root().display(),
            settings.chunk_size
        );
        Ok(Arc::new(Self {
            address,
            ring: RwLock::new(ring),
            store,
            client: StorageClient::new(pool.clone()),
            pool,
            chunk_size: settings.chunk_size,
        }))
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn client(&self) -> &StorageClient {
        &self.client
    }

    /// Copy of the current ring view
    pub async fn ring_view(&self) -> HashRing {
        self.ring.read().await.clone()
    }

    pub async fn lookup(&self, name: &str) -> Vec<SocketAddr> {
        self.ring.read().await.lookup(name)
    }

    /// Names the ring says this node holds
    pub async fn local_files(&self) -> Vec<String> {
        self.ring.read().await.local_files(&self.address)
    }

    pub async fn placements(&self) -> BTreeMap<String, Vec<SocketAddr>> {
        self.ring.read().await.placements()
    }

    // Remote surface

    /// Answer inbound RPCs until the receiver side closes; every request
    /// runs on its own task.
    pub async fn serve(self: Arc<Self>, mut requests: mpsc::Receiver<TcpRequest>) {
        while let Some(request) = requests.recv().await {
            let node = self.clone();
            tokio::spawn(async move {
                let response = match StorageRequest::deserialize(&request.data) {
                    Ok(decoded) => node.handle_request(decoded).await,
                    Err(e) => {
                        debug!(
                            "[{}] Undecodable request from {}: {}",
                            node.address, request.peer_addr, e
                        );
                        StorageResponse::Error {
                            kind: RemoteErrorKind::InvalidRequest,
                            message: e.to_string(),
                        }
                    }
                };
                match response.serialize() {
                    Ok(bytes) => {
                        let _ = request.response_tx.send(bytes);
                    }
                    Err(e) => warn!("[{}] Failed to encode response: {}", node.address, e),
                }
            });
        }
        debug!("[{}] Request channel closed", self.address);
    }

    pub async fn handle_request(&self, request: StorageRequest) -> StorageResponse {
        let method = request.method();
        let result = match request {
            StorageRequest::GetFileLength { name } => {
                self.store.len(&name).await.map(StorageResponse::Length)
            }
            StorageRequest::GetFileChunk { name, index } => self
                .store
                .read_chunk(&name, index, self.chunk_size)
                .await
                .map(StorageResponse::Chunk),
            StorageRequest::PutFileChunk { name, data } => self
                .store
                .append(&name, &data)
                .await
                .map(|_| StorageResponse::Ack),
            StorageRequest::DeleteFile { name } => {
                self.store.delete(&name).await.map(|_| StorageResponse::Ack)
            }
            StorageRequest::GetReplica { name } => {
                self.store.read_all(&name).await.map(StorageResponse::Replica)
            }
            StorageRequest::PutReplica { name, data } => self
                .store
                .write_all(&name, &data)
                .await
                .map(|_| StorageResponse::Ack),
            StorageRequest::ApplyOwnershipUpdate { plan, destinations } => {
                self.ring
                    .write()
                    .await
                    .apply_ownership_update(&plan, &destinations);
                Ok(StorageResponse::Ack)
            }
            StorageRequest::InsertEntry { name } => {
                self.ring.write().await.insert_entry(&name);
                Ok(StorageResponse::Ack)
            }
            StorageRequest::DeleteEntry { name } => {
                self.ring.write().await.delete_entry(&name);
                Ok(StorageResponse::Ack)
            }
        };
        match result {
            Ok(response) => response,
            Err(e) => {
                debug!("[{}] {} failed: {}", self.address, method, e);
                StorageResponse::from_error(&e)
            }
        }
    }

    /// Send `request` to every other ring member; failures are logged
    async fn broadcast(&self, request: StorageRequest, exclude: &[SocketAddr]) {
        let targets: Vec<SocketAddr> = self
            .ring
            .read()
            .await
            .addresses()
            .into_iter()
            .filter(|a| *a != self.address && !exclude.contains(a))
            .collect();

        let mut calls = JoinSet::new();
        for target in targets {
            let client = self.client.clone();
            let request = request.clone();
            calls.spawn(async move { (target, client.call_ack(target, request).await) });
        }
        while let Some(joined) = calls.join_next().await {
            if let Ok((target, Err(e))) = joined {
                warn!(
                    "[{}] Bookkeeping update to {} failed: {}",
                    self.address, target, e
                );
            }
        }
    }

    // Client operations

    async fn stream_to(&self, owner: SocketAddr, local_path: &Path, name: &str) -> Result<u64> {
        // Replace rather than append to an earlier copy
        self.client.delete_file(owner, name).await?;
        let mut file = fs::File::open(local_path).await?;
        let mut sent = 0u64;
        loop {
            let chunk = read_up_to(&mut file, self.chunk_size).await?;
            if chunk.is_empty() && sent > 0 {
                break;
            }
            let last = chunk.len() < self.chunk_size;
            self.client.put_file_chunk(owner, name, chunk).await?;
            sent += 1;
            if last {
                break;
            }
        }
        Ok(sent)
    }

    /// Store `local_path` as `name` on its owners, one owner at a time
    pub async fn put(&self, local_path: &Path, name: &str) -> Result<PutOutcome> {
        fs::metadata(local_path).await.map_err(|e| {
            storage_error!("Cannot read local file {}: {}", local_path.display(), e)
        })?;
        let owners = self.lookup(name).await;

        let mut stored_at = Vec::new();
        let mut failed = Vec::new();
        for owner in owners.iter() {
            match self.stream_to(*owner, local_path, name).await {
                Ok(chunks) => {
                    debug!("[{}] Sent {} chunks of {} to {}", self.address, chunks, name, owner);
                    stored_at.push(*owner);
                }
                Err(e) => {
                    warn!("[{}] Put of {} to {} failed: {}", self.address, name, owner, e);
                    failed.push((*owner, e.to_string()));
                }
            }
        }

        if stored_at.is_empty() {
            return Err(SdfsError::Transport(format!(
                "No owner of {} accepted the file",
                name
            )));
        }
        if !failed.is_empty() {
            warn!(
                "[{}] Partial put of {}: stored on {:?}, failed on {:?}",
                self.address, name, stored_at, failed
            );
        }

        self.ring.write().await.insert_entry(name);
        self.broadcast(
            StorageRequest::InsertEntry {
                name: name.to_string(),
            },
            &[],
        )
        .await;

        Ok(PutOutcome {
            owners,
            stored_at,
            failed,
        })
    }

    async fn fetch_from(&self, source: SocketAddr, name: &str, local_path: &Path) -> Result<u64> {
        let len = self.client.get_file_length(source, name).await?;
        let mut out = fs::File::create(local_path).await?;
        let mut received = 0u64;
        for index in 0..chunk_count(len, self.chunk_size) {
            let chunk = self.client.get_file_chunk(source, name, index).await?;
            out.write_all(&chunk).await?;
            received += chunk.len() as u64;
        }
        out.flush().await?;
        if received != len {
            return Err(SdfsError::Remote(format!(
                "{} changed during transfer from {}: expected {} bytes, got {}",
                name, source, len, received
            )));
        }
        Ok(len)
    }

    /// Fetch `name` into `local_path` from the first holder that answers
    pub async fn get(&self, name: &str, local_path: &Path) -> Result<GetOutcome> {
        let holders = self.ring.read().await.holders(name);
        let mut last_error = None;
        for holder in holders {
            match self.fetch_from(holder, name, local_path).await {
                Ok(bytes) => {
                    return Ok(GetOutcome {
                        source: holder,
                        bytes,
                    })
                }
                Err(e) => {
                    debug!("[{}] Get of {} from {} failed: {}", self.address, name, holder, e);
                    if !matches!(e, SdfsError::NotFound(_)) {
                        last_error = Some(e);
                    }
                }
            }
        }
        // Leave no partial output behind
        let _ = fs::remove_file(local_path).await;
        Err(last_error.unwrap_or_else(|| SdfsError::NotFound(name.to_string())))
    }

    /// Remove `name` from every node known to hold it
    pub async fn delete(&self, name: &str) -> Result<DeleteOutcome> {
        let targets = {
            let ring = self.ring.read().await;
            let mut targets = ring.holders(name);
            if targets.is_empty() {
                return Err(SdfsError::NotFound(name.to_string()));
            }
            for owner in ring.lookup(name) {
                if !targets.contains(&owner) {
                    targets.push(owner);
                }
            }
            targets
        };

        let mut deleted_from = Vec::new();
        let mut failed = Vec::new();
        for target in targets {
            match self.client.delete_file(target, name).await {
                Ok(()) => deleted_from.push(target),
                Err(e) => {
                    warn!("[{}] Delete of {} on {} failed: {}", self.address, name, target, e);
                    failed.push((target, e.to_string()));
                }
            }
        }

        self.ring.write().await.delete_entry(name);
        self.broadcast(
            StorageRequest::DeleteEntry {
                name: name.to_string(),
            },
            &[],
        )
        .await;

        Ok(DeleteOutcome {
            deleted_from,
            failed,
        })
    }

    // Migration

    async fn pull_replica(&self, source: SocketAddr, name: &str) -> Result<()> {
        let len = self.client.get_file_length(source, name).await?;
        if len <= self.chunk_size as u64 {
            let data = self.client.get_replica(source, name).await?;
            return self.store.write_all(name, &data).await;
        }
        self.store.delete(name).await?;
        for index in 0..chunk_count(len, self.chunk_size) {
            let chunk = self.client.get_file_chunk(source, name, index).await?;
            self.store.append(name, &chunk).await?;
        }
        Ok(())
    }

    async fn push_replica(&self, destination: SocketAddr, name: &str) -> Result<()> {
        let len = self.store.len(name).await?;
        if len <= self.chunk_size as u64 {
            let data = self.store.read_all(name).await?;
            return self.client.put_replica(destination, name, data).await;
        }
        self.client.delete_file(destination, name).await?;
        for index in 0..chunk_count(len, self.chunk_size) {
            let chunk = self.store.read_chunk(name, index, self.chunk_size).await?;
            self.client.put_file_chunk(destination, name, chunk).await?;
        }
        Ok(())
    }

    /// Carry out a migration this node is acting for, then tell every
    /// surviving node where the files landed.
    pub async fn handle_migration(&self, task: MigrationTask, departed: &[SocketAddr]) {
        let mut landed = MigrationPlan::default();

        for name in task.plan.to_me.iter() {
            let sources = task.sources.get(name).cloned().unwrap_or_default();
            let mut pulled = false;
            for source in sources {
                match self.pull_replica(source, name).await {
                    Ok(()) => {
                        pulled = true;
                        break;
                    }
                    Err(e) => debug!(
                        "[{}] Pull of {} from {} failed: {}",
                        self.address, name, source, e
                    ),
                }
            }
            if pulled {
                landed.to_me.insert(name.clone());
            } else {
                warn!(
                    "[{}] UNDER-REPLICATED: no reachable replica of {}",
                    self.address, name
                );
            }
        }

        let pushes = [
            (1, &task.plan.to_next, &mut landed.to_next),
            (2, &task.plan.to_next_next, &mut landed.to_next_next),
        ];
        for (index, files, landed_files) in pushes {
            let Some(destination) = task.destinations.get(index).copied() else {
                continue;
            };
            for name in files.iter() {
                match self.push_replica(destination, name).await {
                    Ok(()) => {
                        landed_files.insert(name.clone());
                    }
                    Err(e) => warn!(
                        "[{}] UNDER-REPLICATED: push of {} to {} failed: {}",
                        self.address, name, destination, e
                    ),
                }
            }
        }

        if !task.orphaned.is_empty() {
            warn!(
                "[{}] Files whose every surviving replica was lost: {:?}",
                self.address, task.orphaned
            );
        }
        if landed.is_empty() {
            return;
        }

        info!(
            "[{}] Migrated {} replicas to {:?}",
            self.address,
            landed.len(),
            task.destinations
        );
        self.ring
            .write()
            .await
            .apply_ownership_update(&landed, &task.destinations);
        self.broadcast(
            StorageRequest::ApplyOwnershipUpdate {
                plan: landed,
                destinations: task.destinations.clone(),
            },
            departed,
        )
        .await;
    }
}

#[async_trait]
impl MembershipEventSink for StorageNode {
    async fn on_node_joined(&self, address: SocketAddr) {
        if self.ring.write().await.node_join(address) {
            info!("[{}] Ring now includes {}", self.address, address);
        }
    }

    async fn on_node_left(&self, departures: Vec<Departure>) {
        let departed: Vec<SocketAddr> = departures
            .iter()
            .map(|d| d.address)
            .filter(|a| *a != self.address)
            .collect();
        if departed.is_empty() {
            return;
        }

        let tasks = {
            let mut ring = self.ring.write().await;
            let tasks = plan_departures(&ring, &departed);
            for address in departed.iter() {
                ring.remove_node(address);
            }
            tasks
        };
        for departure in departures.iter() {
            info!(
                "[{}] Ring dropped {} ({:?})",
                self.address, departure.address, departure.reason
            );
        }
        for address in departed.iter() {
            self.pool.remove_peer(*address).await;
        }

        for task in tasks {
            if task.actor == self.address {
                self.handle_migration(task, &departed).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    fn settings(dir: &Path) -> StorageSettings {
        StorageSettings {
            storage_path: dir.join("data"),
            chunk_size: 4,
            rpc_timeout: Duration::from_millis(500),
        }
    }

    async fn node() -> (tempfile::TempDir, Arc<StorageNode>) {
        let dir = tempfile::tempdir().unwrap();
        let node = StorageNode::new("127.0.0.1:1".parse().unwrap(), &settings(dir.path()))
            .await
            .unwrap();
        (dir, node)
    }

    fn name(s: &str) -> String {
        s.to_string()
    }

    #[tokio::test]
    async fn test_leftover_files_are_not_adopted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data").join("stale.txt"), b"old").unwrap();

        let node = StorageNode::new("127.0.0.1:1".parse().unwrap(), &settings(dir.path()))
            .await
            .unwrap();
        assert!(node.placements().await.is_empty());
        assert!(node.local_files().await.is_empty());
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 4), 0);
        assert_eq!(chunk_count(4, 4), 1);
        assert_eq!(chunk_count(9, 4), 3);
    }

    #[tokio::test]
    async fn test_handle_chunk_requests() {
        let (_dir, node) = node().await;
        for part in [&b"abcd"[..], &b"ef"[..]] {
            let response = node
                .handle_request(StorageRequest::PutFileChunk {
                    name: name("f"),
                    data: part.to_vec(),
                })
                .await;
            assert_eq!(response, StorageResponse::Ack);
        }

        let len = node
            .handle_request(StorageRequest::GetFileLength { name: name("f") })
            .await;
        assert_eq!(len, StorageResponse::Length(6));
        let chunk = node
            .handle_request(StorageRequest::GetFileChunk {
                name: name("f"),
                index: 1,
            })
            .await;
        assert_eq!(chunk, StorageResponse::Chunk(b"ef".to_vec()));
    }

    #[tokio::test]
    async fn test_local_failures_are_reported() {
        let (_dir, node) = node().await;
        let missing = node
            .handle_request(StorageRequest::GetReplica { name: name("nope") })
            .await;
        assert!(matches!(
            missing,
            StorageResponse::Error {
                kind: RemoteErrorKind::NotFound,
                ..
            }
        ));

        let invalid = node
            .handle_request(StorageRequest::PutFileChunk {
                name: name("../escape"),
                data: vec![1],
            })
            .await;
        assert!(matches!(
            invalid,
            StorageResponse::Error {
                kind: RemoteErrorKind::Storage,
                ..
            }
        ));

        // Deleting an absent file is not an error
        let deleted = node
            .handle_request(StorageRequest::DeleteFile { name: name("nope") })
            .await;
        assert_eq!(deleted, StorageResponse::Ack);
    }

    #[tokio::test]
    async fn test_bookkeeping_requests() {
        let (_dir, node) = node().await;
        let other: SocketAddr = "127.0.0.1:2".parse().unwrap();
        node.on_node_joined(other).await;
        node.on_node_joined(other).await;
        assert_eq!(node.ring_view().await.len(), 2);

        node.handle_request(StorageRequest::InsertEntry { name: name("x") })
            .await;
        assert_eq!(node.placements().await["x"].len(), 2);
        assert_eq!(node.local_files().await, vec![name("x")]);

        node.handle_request(StorageRequest::DeleteEntry { name: name("x") })
            .await;
        assert!(node.placements().await.is_empty());

        let mut plan = MigrationPlan::default();
        plan.to_me.insert(name("y"));
        node.handle_request(StorageRequest::ApplyOwnershipUpdate {
            plan,
            destinations: vec![other],
        })
        .await;
        assert_eq!(node.placements().await["y"], vec![other]);
    }

    #[tokio::test]
    async fn test_get_unknown_file_is_not_found() {
        let (dir, node) = node().await;
        let out: PathBuf = dir.path().join("out");
        let result = node.get("missing", &out).await;
        assert!(matches!(result, Err(SdfsError::NotFound(_))));
        assert!(!out.exists());

        assert!(matches!(
            node.delete("missing").await,
            Err(SdfsError::NotFound(_))
        ));
    }
}
