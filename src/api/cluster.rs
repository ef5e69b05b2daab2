//! Read-only views of membership, ring and file placement.
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{Result, SdfsError};
use crate::gossip::MemberSnapshot;
use crate::node::ClusterNode;
use crate::transport::FrozenReceiverStats;

/// One ring slot as served by `/ring`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RingSlot {
    pub position: u64,
    pub address: SocketAddr,
    pub files: Vec<String>,
}

/// Where one file lives, as served by `/files/:name`
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileLocation {
    pub name: String,
    pub holders: Vec<SocketAddr>,
    pub owners: Vec<SocketAddr>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsResponse {
    pub rpc: FrozenReceiverStats,
    pub gossip: FrozenReceiverStats,
    pub gossip_sent: u64,
}

#[instrument(skip(node), level = "debug")]
pub async fn members(State(node): State<Arc<ClusterNode>>) -> Json<Vec<MemberSnapshot>> {
    Json(node.detector().snapshot().await)
}

#[instrument(skip(node), level = "debug")]
pub async fn ring(State(node): State<Arc<ClusterNode>>) -> Json<Vec<RingSlot>> {
    let ring = node.storage().ring_view().await;
    let slots = ring
        .entries()
        .map(|(position, entry)| RingSlot {
            position,
            address: entry.address,
            files: entry.files.iter().cloned().collect(),
        })
        .collect();
    Json(slots)
}

#[instrument(skip(node), level = "debug")]
pub async fn files(
    State(node): State<Arc<ClusterNode>>,
) -> Json<BTreeMap<String, Vec<SocketAddr>>> {
    Json(node.storage().placements().await)
}

#[instrument(skip(node), level = "debug")]
pub async fn locate(
    State(node): State<Arc<ClusterNode>>,
    Path(name): Path<String>,
) -> Result<Json<FileLocation>> {
    let holders = node
        .storage()
        .placements()
        .await
        .remove(&name)
        .ok_or_else(|| SdfsError::NotFound(name.clone()))?;
    let owners = node.storage().lookup(&name).await;
    Ok(Json(FileLocation {
        name,
        holders,
        owners,
    }))
}

#[instrument(skip(node), level = "debug")]
pub async fn stats(State(node): State<Arc<ClusterNode>>) -> Json<StatsResponse> {
    let gossip = node.detector().transport();
    Json(StatsResponse {
        rpc: node.rpc_stats(),
        gossip: gossip.get_stats(),
        gossip_sent: gossip.messages_sent(),
    })
}
