//! Membership notifications delivered by the failure detector.
use std::net::SocketAddr;

use async_trait::async_trait;
use serde::Serialize;

/// Why a member disappeared from the table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LeaveReason {
    /// Suspected and never heard from again
    Failed,
    /// Announced LEFT and was forgotten
    Graceful,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Departure {
    pub address: SocketAddr,
    pub reason: LeaveReason,
}

impl Departure {
    pub fn new(address: SocketAddr, reason: LeaveReason) -> Self {
        Self { address, reason }
    }
}

/// Consumer of join/leave notifications.
///
/// Calls are delivered one at a time, in the order the detector produced
/// them. All departures observed by one refresh sweep arrive in a single
/// `on_node_left` call so that adjacent failures are reconciled together.
#[async_trait]
pub trait MembershipEventSink: Send + Sync {
    async fn on_node_joined(&self, address: SocketAddr);

    async fn on_node_left(&self, departures: Vec<Departure>);
}
