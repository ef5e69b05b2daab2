//! Gossip failure detector.
//!
//! Two background tasks share one membership table behind a mutex. The
//! sender task sweeps the table and pushes one rumor per gossip interval;
//! the receiver task merges inbound rumors. Join and leave events are
//! handed to a third task that delivers them to the event sink in order.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use super::membership::{MemberSnapshot, MembershipTable};
use super::messages::{GossipPacket, MemberStatus, RumorEntry};
use crate::error::{GossipError, Result};
use crate::node::NodeIdentity;
use crate::ring::{Departure, MembershipEventSink};
use crate::settings::GossipSettings;
use crate::transport::UdpTransport;

/// Lifecycle of the local node as seen by its own detector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LocalStatus {
    Joined,
    /// Leave requested; the next round sends the final LEFT rumor
    ToLeave,
    AfterLeft,
}

#[derive(Debug)]
enum MembershipEvent {
    Joined(SocketAddr),
    Left(Vec<Departure>),
}

struct DetectorState {
    table: MembershipTable,
    heartbeat: u64,
    status: LocalStatus,
    // False once the send task has exited
    sending: bool,
    leave_waiters: Vec<oneshot::Sender<()>>,
}

pub struct FailureDetector {
    identity: NodeIdentity,
    transport: UdpTransport,
    timing: GossipSettings,
    state: Mutex<DetectorState>,
    events: mpsc::UnboundedSender<MembershipEvent>,
}

impl std::fmt::Debug for FailureDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureDetector")
            .field("identity", &self.identity)
            .field("gossip_interval", &self.timing.gossip_interval)
            .finish()
    }
}

impl FailureDetector {
    /// Start gossiping on `transport`; events go to `sink` until
    /// `shutdown` flips to true.
    pub fn start(
        identity: NodeIdentity,
        transport: UdpTransport,
        introducer: SocketAddr,
        timing: GossipSettings,
        sink: Arc<dyn MembershipEventSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let table = MembershipTable::new(identity, introducer, timing.clone(), Instant::now());
        let (events, events_rx) = mpsc::unbounded_channel();
        let detector = Arc::new(Self {
            identity,
            transport,
            timing,
            state: Mutex::new(DetectorState {
                table,
                heartbeat: 0,
                status: LocalStatus::Joined,
                sending: true,
                leave_waiters: Vec::new(),
            }),
            events,
        });

        info!(
            "[{}] Starting failure detector as {} (introducer {}, {}ms interval, failures detected within {}ms)",
            identity.address,
            identity,
            introducer,
            detector.timing.gossip_interval.as_millis(),
            detector.timing.detection_bound().as_millis()
        );

        tokio::spawn(detector.clone().send_loop(shutdown.clone()));
        tokio::spawn(detector.clone().receive_loop(shutdown));
        tokio::spawn(Self::deliver_events(identity.address, events_rx, sink));
        detector
    }

    pub fn local(&self) -> NodeIdentity {
        self.identity
    }

    pub fn transport(&self) -> &UdpTransport {
        &self.transport
    }

    pub async fn status(&self) -> LocalStatus {
        self.state.lock().await.status
    }

    /// Addresses currently JOINED, excluding this node
    pub async fn live_members(&self) -> Vec<SocketAddr> {
        self.state.lock().await.table.live_members()
    }

    /// The local node followed by every table entry
    pub async fn snapshot(&self) -> Vec<MemberSnapshot> {
        let state = self.state.lock().await;
        let own_status = match state.status {
            LocalStatus::Joined => MemberStatus::Joined,
            _ => MemberStatus::Left,
        };
        let mut entries = vec![MemberSnapshot {
            identity: self.identity,
            heartbeat: state.heartbeat,
            status: own_status,
            updated_at: Utc::now(),
        }];
        entries.extend(state.table.snapshot());
        entries
    }

    /// Announce departure and wait until the final rumor has gone out
    pub async fn leave(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if !state.sending || state.status == LocalStatus::AfterLeft {
                return Err(GossipError::NotMember(self.identity.to_string()).into());
            }
            if state.status == LocalStatus::Joined {
                info!("[{}] Leaving the cluster", self.identity.address);
                state.status = LocalStatus::ToLeave;
            }
            state.leave_waiters.push(done_tx);
        }
        // An error means the send task stopped first
        let _ = done_rx.await;
        Ok(())
    }

    async fn send_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(self.timing.gossip_interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if !self.gossip_round(Instant::now()).await {
                break;
            }
        }
        let mut state = self.state.lock().await;
        state.sending = false;
        state.leave_waiters.clear();
        debug!("[{}] Gossip sender stopped", self.identity.address);
    }

    /// One sweep and one outbound rumor; false once the node has left
    async fn gossip_round(&self, now: Instant) -> bool {
        let mut state = self.state.lock().await;
        if state.status == LocalStatus::AfterLeft {
            return false;
        }

        let departures = state.table.refresh(now);
        if !departures.is_empty() {
            let _ = self.events.send(MembershipEvent::Left(departures));
        }

        let leaving = state.status == LocalStatus::ToLeave;
        let (target, own_status) = if leaving {
            (state.table.select_joined(), MemberStatus::Left)
        } else {
            (state.table.select_target(), MemberStatus::Joined)
        };
        state.heartbeat += 1;

        if let Some(target) = target {
            let own = RumorEntry::new(state.heartbeat, own_status);
            let packet = GossipPacket::new(self.identity, state.table.rumor_for(target, own));
            match packet.serialize() {
                Ok(bytes) => {
                    // Lost datagrams are repaired by later rounds
                    if let Err(e) = self.transport.send_to(target, &bytes).await {
                        debug!("[{}] Gossip to {} dropped: {}", self.identity.address, target, e);
                    }
                }
                Err(e) => warn!("[{}] Failed to encode rumor: {}", self.identity.address, e),
            }
        }

        if leaving {
            info!(
                "[{}] Final LEFT rumor sent to {:?}",
                self.identity.address, target
            );
            state.status = LocalStatus::AfterLeft;
            for waiter in state.leave_waiters.drain(..) {
                let _ = waiter.send(());
            }
            return false;
        }
        true
    }

    async fn receive_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let received = tokio::select! {
                received = self.transport.recv() => received,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            match received {
                Ok((data, peer)) => self.handle_datagram(&data, peer, Instant::now()).await,
                Err(e) => debug!("[{}] Gossip receive failed: {}", self.identity.address, e),
            }
        }
        debug!("[{}] Gossip receiver stopped", self.identity.address);
    }

    async fn handle_datagram(&self, data: &[u8], peer: SocketAddr, now: Instant) {
        let decoded = GossipPacket::deserialize(data)
            .map_err(|e| GossipError::Message(e.to_string()));
        let packet = match decoded {
            Ok(packet) => packet,
            Err(e) => {
                debug!(
                    "[{}] Discarding malformed rumor from {}: {}",
                    self.identity.address, peer, e
                );
                return;
            }
        };

        let mut state = self.state.lock().await;
        if state.status == LocalStatus::AfterLeft {
            return;
        }
        for address in state.table.merge(&packet.rumor, now) {
            let _ = self.events.send(MembershipEvent::Joined(address));
        }
    }

    async fn deliver_events(
        local: SocketAddr,
        mut events: mpsc::UnboundedReceiver<MembershipEvent>,
        sink: Arc<dyn MembershipEventSink>,
    ) {
        while let Some(event) = events.recv().await {
            debug!("[{}] Delivering {:?}", local, event);
            match event {
                MembershipEvent::Joined(address) => sink.on_node_joined(address).await,
                MembershipEvent::Left(departures) => sink.on_node_left(departures).await,
            }
        }
    }
}
