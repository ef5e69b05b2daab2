//! Gossip-style failure detection.
//!
//! Every member periodically pushes a heartbeat rumor to one random peer.
//! Silence past the suspect timeout marks a member SUSPECTED, and a
//! suspicion that outlives the fail timeout removes it. Nodes that leave
//! on purpose spread a LEFT rumor instead.
pub mod detector;
pub mod membership;
pub mod messages;

pub use detector::{FailureDetector, LocalStatus};
pub use membership::{MemberSnapshot, MembershipEntry, MembershipTable, MergeOutcome};
pub use messages::{GossipPacket, MemberStatus, Rumor, RumorEntry};
