use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Epoch reserved for the virtual introducer entry
pub const PLACEHOLDER_EPOCH: u64 = 0;

/// One incarnation of a cluster node.
///
/// A restart at the same address gets a fresh epoch, so heartbeats from a
/// previous incarnation are never attributed to the current one.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    Decode,
    Encode,
    PartialEq,
    PartialOrd,
    Ord,
    Eq,
    Hash,
)]
pub struct NodeIdentity {
    pub address: SocketAddr,
    pub epoch: u64,
}

impl NodeIdentity {
    pub fn new(address: SocketAddr, epoch: u64) -> Self {
        Self { address, epoch }
    }

    /// Identity for a process starting now
    pub fn fresh(address: SocketAddr) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
            .max(PLACEHOLDER_EPOCH + 1);
        Self { address, epoch }
    }

    pub fn placeholder(address: SocketAddr) -> Self {
        Self {
            address,
            epoch: PLACEHOLDER_EPOCH,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.epoch == PLACEHOLDER_EPOCH
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.address, self.epoch)
    }
}
