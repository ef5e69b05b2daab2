//! CLI for this application
//!
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::settings;

#[derive(Clone, Debug, clap::Parser)]
#[command(name = "sdfs", version, about = "Replicated storage node")]
pub struct Cli {
    // Address to bind and advertise to the cluster
    #[clap(
        long,
        default_value = "127.0.0.1",
        env("SDFS_LISTEN_ADDRESS"),
        help = "IP Address to listen on (advertised to peers)"
    )]
    pub listen_address: IpAddr,

    // Gossip (UDP) and RPC (TCP) port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT,
        env("SDFS_LISTEN_PORT"),
        help = "Port for UDP gossip and TCP remote calls"
    )]
    pub listen_port: u16,

    // HTTP status API port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("SDFS_HTTP_PORT"),
        help = "Port to bind the HTTP status API to"
    )]
    pub http_port: u16,

    // Bootstrap node
    #[clap(
        long,
        env("SDFS_INTRODUCER"),
        help = "Introducer address (e.g., 10.0.0.1:2335)"
    )]
    pub introducer: SocketAddr,

    #[clap(
        long,
        default_value = "500",
        env("SDFS_GOSSIP_INTERVAL_MS"),
        help = "Milliseconds between gossip rounds"
    )]
    pub gossip_interval_ms: u64,

    #[clap(
        long,
        default_value = "3000",
        env("SDFS_SUSPECT_TIMEOUT_MS"),
        help = "Milliseconds without a fresher heartbeat before a member is suspected"
    )]
    pub suspect_timeout_ms: u64,

    #[clap(
        long,
        default_value = "3000",
        env("SDFS_FAIL_TIMEOUT_MS"),
        help = "Milliseconds a suspected member is kept before it is declared failed"
    )]
    pub fail_timeout_ms: u64,

    #[clap(
        long,
        default_value = "6000",
        env("SDFS_FORGET_TIMEOUT_MS"),
        help = "Milliseconds a departed member is remembered"
    )]
    pub forget_timeout_ms: u64,

    #[clap(
        long,
        default_value = "30000",
        env("SDFS_RPC_TIMEOUT_MS"),
        help = "Timeout for each remote call"
    )]
    pub rpc_timeout_ms: u64,

    #[clap(
        long,
        default_value = "./sdfs-data",
        env("SDFS_STORAGE_PATH"),
        help = "Directory holding this node's replicas"
    )]
    pub storage_path: PathBuf,

    #[clap(
        long,
        default_value = settings::DEFAULT_CHUNK_SIZE,
        env("SDFS_CHUNK_SIZE"),
        help = "Bytes transferred per chunk"
    )]
    pub chunk_size: usize,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            http_port: self.http_port,
            introducer: self.introducer,
            gossip: settings::GossipSettings {
                gossip_interval: Duration::from_millis(self.gossip_interval_ms),
                suspect_timeout: Duration::from_millis(self.suspect_timeout_ms),
                fail_timeout: Duration::from_millis(self.fail_timeout_ms),
                forget_timeout: Duration::from_millis(self.forget_timeout_ms),
            },
            storage: settings::StorageSettings {
                storage_path: self.storage_path,
                chunk_size: self.chunk_size,
                rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            },
        }
    }
}
