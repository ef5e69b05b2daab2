//! A full cluster member: failure detector, RPC server and storage node
//! sharing one cluster address.
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

pub mod node_id;

use crate::error::Result;
use crate::gossip::FailureDetector;
use crate::settings::Settings;
use crate::storage::StorageNode;
use crate::transport::{FrozenReceiverStats, ReceiverStats, TcpReceiver, UdpTransport};
pub use node_id::NodeIdentity;

/// Queued inbound RPCs before the accept side waits
const REQUEST_QUEUE_DEPTH: usize = 1000;

pub struct ClusterNode {
    settings: Settings,
    identity: NodeIdentity,
    storage: Arc<StorageNode>,
    detector: Arc<FailureDetector>,
    rpc_stats: Arc<ReceiverStats>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for ClusterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterNode")
            .field("identity", &self.identity)
            .field("storage", &self.storage)
            .finish()
    }
}

impl ClusterNode {
    /// Bind the cluster port, then start serving RPCs and gossiping.
    ///
    /// With port 0 the TCP listener picks the port and the gossip socket
    /// follows it, so both protocols share one address.
    pub async fn start(settings: Settings) -> Result<Arc<Self>> {
        settings.validate()?;

        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let receiver = TcpReceiver::new(settings.node_address(), request_tx).await?;
        let address = receiver.local_addr;
        let transport = UdpTransport::bind(address).await?;
        let introducer = if settings.is_introducer() {
            address
        } else {
            settings.introducer
        };

        let identity = NodeIdentity::fresh(address);
        let storage = StorageNode::new(address, &settings.storage).await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let rpc_stats = receiver.start(shutdown_rx.clone());
        tokio::spawn(storage.clone().serve(request_rx));

        let detector = FailureDetector::start(
            identity,
            transport,
            introducer,
            settings.gossip.clone(),
            storage.clone(),
            shutdown_rx,
        );

        info!("[{}] Node {} is up", address, identity);
        Ok(Arc::new(Self {
            settings,
            identity,
            storage,
            detector,
            rpc_stats,
            shutdown,
        }))
    }

    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    pub fn address(&self) -> SocketAddr {
        self.identity.address
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<StorageNode> {
        &self.storage
    }

    pub fn detector(&self) -> &Arc<FailureDetector> {
        &self.detector
    }

    pub fn rpc_stats(&self) -> FrozenReceiverStats {
        self.rpc_stats.freeze()
    }

    /// Gracefully leave; returns once the final rumor has been sent
    pub async fn leave(&self) -> Result<()> {
        self.detector.leave().await
    }

    /// Stop gossiping and close the RPC listener without announcing
    pub fn stop(&self) {
        info!("[{}] Stopping", self.address());
        let _ = self.shutdown.send(true);
    }
}
