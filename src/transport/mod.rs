//! Network transports
//!
//! Gossip travels as single UDP datagrams. Storage RPCs use TCP with a
//! 4-byte big-endian length prefix on every frame, over pooled connections.
pub mod common;
pub mod socket_pool_tcp;
pub mod tcp_receiver;
pub mod traits;
pub mod udp_connection;

pub use common::{FrozenReceiverStats, ReceiverStats, MAX_DATAGRAM_SIZE, MAX_FRAME_SIZE};
pub use socket_pool_tcp::TcpSocketPool;
pub use tcp_receiver::{TcpReceiver, TcpRequest};
pub use traits::RequestSender;
pub use udp_connection::UdpTransport;
