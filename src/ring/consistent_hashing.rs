use std::net::SocketAddr;

use sha2::{Digest, Sha224};

/// Position of a key on the ring.
///
/// SHA-224 truncated to its first 8 bytes (big-endian). Node addresses and
/// file names share this space, so a file is owned by the first node at or
/// clockwise after its position.
pub fn ring_position(key: &str) -> u64 {
    let digest = Sha224::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

pub fn node_position(address: &SocketAddr) -> u64 {
    ring_position(&address.to_string())
}
