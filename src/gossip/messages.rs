//! Gossip Message Protocol
//!
//! A rumor is a partial membership snapshot: identity -> {heartbeat, status}.
//! One rumor travels per gossip round as a single best-effort UDP datagram,
//! encoded with bincode for a compact binary format.
//!
use std::collections::BTreeMap;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::node::NodeIdentity;
use crate::transport::MAX_DATAGRAM_SIZE;

/// Status of a membership entry
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Decode, Encode, PartialEq, Eq, Hash)]
pub enum MemberStatus {
    /// Virtual bootstrap placeholder for the introducer, never observed
    Added,
    Joined,
    Suspected,
    Left,
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberStatus::Added => write!(f, "ADDED"),
            MemberStatus::Joined => write!(f, "JOINED"),
            MemberStatus::Suspected => write!(f, "SUSPECTED"),
            MemberStatus::Left => write!(f, "LEFT"),
        }
    }
}

/// What a rumor says about one member
#[derive(Clone, Copy, Debug, Decode, Encode, PartialEq, Eq)]
pub struct RumorEntry {
    pub heartbeat: u64,
    pub status: MemberStatus,
}

impl RumorEntry {
    pub fn new(heartbeat: u64, status: MemberStatus) -> Self {
        Self { heartbeat, status }
    }
}

pub type Rumor = BTreeMap<NodeIdentity, RumorEntry>;

/// GossipPacket wraps a rumor for network transmission
#[derive(Debug, Clone, Decode, Encode, PartialEq)]
pub struct GossipPacket {
    pub sender: NodeIdentity,
    pub rumor: Rumor,
}

impl GossipPacket {
    pub fn new(sender: NodeIdentity, rumor: Rumor) -> Self {
        Self { sender, rumor }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_limit::<MAX_DATAGRAM_SIZE>();
        bincode::encode_to_vec(self, config)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_limit::<MAX_DATAGRAM_SIZE>();
        let (result, _) = bincode::decode_from_slice(data, config)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(port: u16, epoch: u64) -> NodeIdentity {
        NodeIdentity::new(format!("10.0.0.1:{}", port).parse().unwrap(), epoch)
    }

    #[test]
    fn test_gossip_packet_serialization() {
        let mut rumor = Rumor::new();
        rumor.insert(identity(1, 7), RumorEntry::new(12, MemberStatus::Joined));
        rumor.insert(identity(2, 9), RumorEntry::new(3, MemberStatus::Left));
        let packet = GossipPacket::new(identity(3, 1), rumor);

        let serialized = packet.serialize().expect("Failed to serialize packet");
        let deserialized =
            GossipPacket::deserialize(&serialized).expect("Failed to deserialize packet");

        assert_eq!(deserialized, packet);
        assert_eq!(
            deserialized.rumor.get(&identity(2, 9)).map(|e| e.status),
            Some(MemberStatus::Left)
        );
    }

    #[test]
    fn test_rumor_fits_in_one_datagram() {
        let mut rumor = Rumor::new();
        for port in 0..10u16 {
            rumor.insert(
                identity(2000 + port, 1_700_000_000_000 + port as u64),
                RumorEntry::new(u32::MAX as u64, MemberStatus::Joined),
            );
        }
        let packet = GossipPacket::new(identity(1, 1_700_000_000_000), rumor);
        let serialized = packet.serialize().unwrap();
        assert!(serialized.len() <= 1024, "rumor was {} bytes", serialized.len());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(GossipPacket::deserialize(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn test_huge_rumor_claim_is_rejected() {
        let mut bytes = GossipPacket::new(identity(3, 1), Rumor::new())
            .serialize()
            .unwrap();
        // Replace the empty map length with a claim of 2^40 entries
        bytes.pop();
        bytes.push(253);
        bytes.extend_from_slice(&(1u64 << 40).to_be_bytes());
        assert!(GossipPacket::deserialize(&bytes).is_err());
    }
}
