//! Storage node settings
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::config_error;
use crate::error::Result;
use crate::transport::MAX_FRAME_SIZE;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT: u16 = 2335;
pub const DEFAULT_PORT: &str = "2335";
pub const STANDARD_PORT_HTTP: u16 = 2336;
pub const DEFAULT_PORT_HTTP: &str = "2336";

/// Every file is stored on this many ring-consecutive nodes
pub const REPLICATION_FACTOR: usize = 3;
pub const STANDARD_CHUNK_SIZE: usize = 20_000_000;
pub const DEFAULT_CHUNK_SIZE: &str = "20000000";

/// Room left in an RPC frame for the envelope around a chunk
const FRAME_OVERHEAD: usize = 1024;

/// Timing thresholds for the failure detector
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipSettings {
    pub gossip_interval: Duration,
    // JOINED idle this long becomes SUSPECTED
    pub suspect_timeout: Duration,
    // SUSPECTED this long is removed as failed
    pub fail_timeout: Duration,
    // LEFT entries are retained this long so the rumor can spread
    pub forget_timeout: Duration,
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_millis(500),
            suspect_timeout: Duration::from_millis(3000),
            fail_timeout: Duration::from_millis(3000),
            forget_timeout: Duration::from_millis(6000),
        }
    }
}

impl GossipSettings {
    /// Worst case time between a node going silent and its removal
    pub fn detection_bound(&self) -> Duration {
        self.suspect_timeout + self.fail_timeout + self.gossip_interval
    }
}

/// Settings for the storage data plane
#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub storage_path: PathBuf,
    pub chunk_size: usize,
    pub rpc_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Settings {
    // Address this node binds and advertises
    pub listen_address: IpAddr,

    // Port shared by the UDP gossip socket and the TCP RPC listener
    pub listen_port: u16,

    // HTTP status API port
    pub http_port: u16,

    // Well-known bootstrap node
    pub introducer: SocketAddr,

    pub gossip: GossipSettings,

    pub storage: StorageSettings,
}

impl Settings {
    /// Cluster address of this node (gossip and RPC)
    pub fn node_address(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.listen_port)
    }

    pub fn http_address(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.http_port)
    }

    pub fn is_introducer(&self) -> bool {
        self.node_address() == self.introducer
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.chunk_size == 0 {
            return Err(config_error!("Chunk size must be positive"));
        }
        if self.storage.chunk_size > MAX_FRAME_SIZE - FRAME_OVERHEAD {
            return Err(config_error!(
                "Chunk size {} does not fit in a {} byte frame",
                self.storage.chunk_size,
                MAX_FRAME_SIZE
            ));
        }
        if self.gossip.gossip_interval.is_zero() {
            return Err(config_error!("Gossip interval must be positive"));
        }
        if self.storage.rpc_timeout.is_zero() {
            return Err(config_error!("RPC timeout must be positive"));
        }
        // Port 0 asks the OS for a free port, so equal zeros never collide
        if self.listen_port != 0 && self.listen_port == self.http_port {
            return Err(config_error!(
                "HTTP port {} collides with the cluster port",
                self.http_port
            ));
        }
        Ok(())
    }
}
