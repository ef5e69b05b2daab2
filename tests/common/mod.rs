//! Helpers for spinning up real nodes on ephemeral loopback ports.
#![allow(dead_code)]

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tempfile::TempDir;

use sdfs::node::ClusterNode;
use sdfs::settings::{GossipSettings, Settings, StorageSettings};

pub const CHUNK_SIZE: usize = 64;

pub fn fast_gossip() -> GossipSettings {
    GossipSettings {
        gossip_interval: Duration::from_millis(50),
        suspect_timeout: Duration::from_millis(1000),
        fail_timeout: Duration::from_millis(1000),
        forget_timeout: Duration::from_millis(1000),
    }
}

pub fn settings(storage_path: &Path, introducer: Option<SocketAddr>) -> Settings {
    let listen_address: IpAddr = "127.0.0.1".parse().unwrap();
    Settings {
        listen_address,
        listen_port: 0,
        http_port: 0,
        introducer: introducer.unwrap_or(SocketAddr::new(listen_address, 0)),
        gossip: fast_gossip(),
        storage: StorageSettings {
            storage_path: storage_path.to_path_buf(),
            chunk_size: CHUNK_SIZE,
            rpc_timeout: Duration::from_millis(500),
        },
    }
}

pub struct TestCluster {
    pub nodes: Vec<Arc<ClusterNode>>,
    pub scratch: TempDir,
    _dirs: Vec<TempDir>,
}

impl TestCluster {
    /// Start `size` nodes and wait until every ring lists all of them
    pub async fn start(size: usize) -> Self {
        let mut dirs = Vec::new();
        let mut nodes: Vec<Arc<ClusterNode>> = Vec::new();
        for _ in 0..size {
            let dir = tempfile::tempdir().unwrap();
            let introducer = nodes.first().map(|n| n.address());
            let node = ClusterNode::start(settings(dir.path(), introducer))
                .await
                .unwrap();
            nodes.push(node);
            dirs.push(dir);
        }

        let cluster = Self {
            nodes,
            scratch: tempfile::tempdir().unwrap(),
            _dirs: dirs,
        };
        let joined = eventually(Duration::from_secs(10), || cluster.rings_have(size)).await;
        assert!(joined, "cluster of {} never converged", size);
        cluster
    }

    pub async fn rings_have(&self, size: usize) -> bool {
        for node in self.nodes.iter() {
            if node.storage().ring_view().await.len() != size {
                return false;
            }
        }
        true
    }

    /// Write `len` random bytes to a scratch file
    pub fn local_file(&self, name: &str, len: usize) -> (std::path::PathBuf, Vec<u8>) {
        let mut data = vec![0u8; len];
        rand::rng().fill(&mut data[..]);
        let path = self.scratch.path().join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    pub fn out_path(&self, name: &str) -> std::path::PathBuf {
        self.scratch.path().join(format!("{}.out", name))
    }
}

/// Poll `check` every 50ms until it holds or `deadline` passes
pub async fn eventually<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if started.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
