//! Membership table for the gossip failure detector.
//!
//! The table is plain data: every operation takes the current `Instant`
//! so the state machine can be driven deterministically. The detector
//! owns the one instance per process and serializes access through a lock.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::messages::{MemberStatus, Rumor, RumorEntry};
use crate::node::NodeIdentity;
use crate::ring::{Departure, LeaveReason};
use crate::settings::GossipSettings;

#[derive(Clone, Debug)]
pub struct MembershipEntry {
    pub heartbeat: u64,
    pub status: MemberStatus,
    /// Last time a fresher heartbeat or status change was observed
    pub last_update: Instant,
    /// Wall clock of `last_update`, for display only
    pub updated_at: DateTime<Utc>,
    pub suspected_at: Option<Instant>,
}

impl MembershipEntry {
    fn new(heartbeat: u64, status: MemberStatus, now: Instant) -> Self {
        Self {
            heartbeat,
            status,
            last_update: now,
            updated_at: Utc::now(),
            suspected_at: None,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_update = now;
        self.updated_at = Utc::now();
    }

    fn is_live(&self) -> bool {
        matches!(self.status, MemberStatus::Joined | MemberStatus::Suspected)
    }
}

/// Result of merging a single rumor entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// A LEFT entry came back with a newer heartbeat
    Rejoined,
    Updated,
    Stale,
    Ignored,
    NoOp,
}

/// Serializable view of one entry, used by MEM and the status API
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MemberSnapshot {
    pub identity: NodeIdentity,
    pub heartbeat: u64,
    pub status: MemberStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct MembershipTable {
    local: NodeIdentity,
    introducer: SocketAddr,
    timing: GossipSettings,
    members: HashMap<NodeIdentity, MembershipEntry>,
}

impl MembershipTable {
    /// Build a table for `local`, seeded with the virtual introducer entry
    pub fn new(
        local: NodeIdentity,
        introducer: SocketAddr,
        timing: GossipSettings,
        now: Instant,
    ) -> Self {
        let mut table = Self {
            local,
            introducer,
            timing,
            members: HashMap::new(),
        };
        table.ensure_introducer(now);
        table
    }

    pub fn local(&self) -> NodeIdentity {
        self.local
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, identity: &NodeIdentity) -> Option<&MembershipEntry> {
        self.members.get(identity)
    }

    fn is_introducer(&self) -> bool {
        self.local.address == self.introducer
    }

    fn ensure_introducer(&mut self, now: Instant) {
        if self.is_introducer() {
            return;
        }
        let introducer = self.introducer;
        if self.members.keys().any(|id| id.address == introducer) {
            return;
        }
        debug!(
            "[{}] Seeding virtual introducer entry for {}",
            self.local.address, introducer
        );
        self.members.insert(
            NodeIdentity::placeholder(introducer),
            MembershipEntry::new(0, MemberStatus::Added, now),
        );
    }

    /// Merge a whole rumor; returns the addresses of newly joined members
    pub fn merge(&mut self, rumor: &Rumor, now: Instant) -> Vec<SocketAddr> {
        rumor
            .iter()
            .filter_map(|(identity, entry)| {
                match self.merge_entry(*identity, *entry, now) {
                    MergeOutcome::Inserted | MergeOutcome::Rejoined => Some(identity.address),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn merge_entry(
        &mut self,
        identity: NodeIdentity,
        incoming: RumorEntry,
        now: Instant,
    ) -> MergeOutcome {
        // Our own address under any epoch: either us or a dead incarnation
        if identity.address == self.local.address || identity.is_placeholder() {
            return MergeOutcome::Ignored;
        }

        match incoming.status {
            MemberStatus::Left => self.merge_left(identity, incoming, now),
            MemberStatus::Joined => self.merge_joined(identity, incoming, now),
            other => {
                warn!(
                    "[{}] Ignoring rumor entry for {} with status {}",
                    self.local.address, identity, other
                );
                MergeOutcome::Ignored
            }
        }
    }

    fn merge_left(
        &mut self,
        identity: NodeIdentity,
        incoming: RumorEntry,
        now: Instant,
    ) -> MergeOutcome {
        match self.members.get_mut(&identity) {
            None => MergeOutcome::NoOp,
            Some(entry) if entry.status == MemberStatus::Left => MergeOutcome::NoOp,
            Some(entry) => {
                info!("[{}] LEFT: {}", self.local.address, identity);
                entry.status = MemberStatus::Left;
                entry.heartbeat = entry.heartbeat.max(incoming.heartbeat);
                entry.suspected_at = None;
                entry.touch(now);
                MergeOutcome::Updated
            }
        }
    }

    fn merge_joined(
        &mut self,
        identity: NodeIdentity,
        incoming: RumorEntry,
        now: Instant,
    ) -> MergeOutcome {
        if identity.address == self.introducer {
            let placeholder = NodeIdentity::placeholder(self.introducer);
            if self.members.remove(&placeholder).is_some() {
                debug!(
                    "[{}] Replacing virtual introducer entry with {}",
                    self.local.address, identity
                );
            }
        }

        match self.members.get_mut(&identity) {
            None => {
                info!(
                    "[{}] JOINED: {} (heartbeat {})",
                    self.local.address, identity, incoming.heartbeat
                );
                self.members.insert(
                    identity,
                    MembershipEntry::new(incoming.heartbeat, MemberStatus::Joined, now),
                );
                MergeOutcome::Inserted
            }
            Some(entry) if incoming.heartbeat > entry.heartbeat => {
                let previous = entry.status;
                if previous != MemberStatus::Joined {
                    info!(
                        "[{}] {} is alive again after {} (heartbeat {})",
                        self.local.address, identity, previous, incoming.heartbeat
                    );
                }
                entry.heartbeat = incoming.heartbeat;
                entry.status = MemberStatus::Joined;
                entry.suspected_at = None;
                entry.touch(now);
                if previous == MemberStatus::Left {
                    MergeOutcome::Rejoined
                } else {
                    MergeOutcome::Updated
                }
            }
            Some(_) => MergeOutcome::Stale,
        }
    }

    /// Apply suspicion and removal timeouts; returns ring departures
    pub fn refresh(&mut self, now: Instant) -> Vec<Departure> {
        let mut removed = Vec::new();
        let local = self.local.address;

        for (identity, entry) in self.members.iter_mut() {
            match entry.status {
                MemberStatus::Joined => {
                    if now.saturating_duration_since(entry.last_update)
                        > self.timing.suspect_timeout
                    {
                        info!("[{}] SUSPECTING: {}", local, identity);
                        entry.status = MemberStatus::Suspected;
                        entry.suspected_at = Some(now);
                    }
                }
                MemberStatus::Suspected => {
                    let since = entry.suspected_at.unwrap_or(entry.last_update);
                    if now.saturating_duration_since(since) > self.timing.fail_timeout {
                        info!("[{}] FAILING: {}", local, identity);
                        removed.push((*identity, LeaveReason::Failed));
                    }
                }
                MemberStatus::Left => {
                    if now.saturating_duration_since(entry.last_update)
                        > self.timing.forget_timeout
                    {
                        info!("[{}] FORGETTING: {}", local, identity);
                        removed.push((*identity, LeaveReason::Graceful));
                    }
                }
                MemberStatus::Added => {}
            }
        }

        let mut departures = Vec::new();
        for (identity, _) in removed.iter() {
            self.members.remove(identity);
        }
        for (identity, reason) in removed {
            // A newer incarnation at the same address keeps its ring slot
            let still_present = self
                .members
                .iter()
                .any(|(id, entry)| id.address == identity.address && entry.is_live());
            if !still_present && !departures.iter().any(|d: &Departure| d.address == identity.address) {
                departures.push(Departure::new(identity.address, reason));
            }
        }

        self.ensure_introducer(now);
        departures
    }

    /// Pick one gossip target among JOINED and ADDED entries
    pub fn select_target(&self) -> Option<SocketAddr> {
        let candidates: Vec<SocketAddr> = self
            .members
            .iter()
            .filter(|(_, entry)| {
                matches!(entry.status, MemberStatus::Joined | MemberStatus::Added)
            })
            .map(|(identity, _)| identity.address)
            .collect();
        candidates.choose(&mut rand::rng()).copied()
    }

    /// Pick a JOINED peer to carry the final LEFT rumor
    pub fn select_joined(&self) -> Option<SocketAddr> {
        let candidates: Vec<SocketAddr> = self
            .members
            .iter()
            .filter(|(_, entry)| entry.status == MemberStatus::Joined)
            .map(|(identity, _)| identity.address)
            .collect();
        candidates.choose(&mut rand::rng()).copied()
    }

    /// JOINED and LEFT entries not belonging to `destination`, plus `own`
    pub fn rumor_for(&self, destination: SocketAddr, own: RumorEntry) -> Rumor {
        let mut rumor: Rumor = self
            .members
            .iter()
            .filter(|(identity, entry)| {
                identity.address != destination
                    && matches!(entry.status, MemberStatus::Joined | MemberStatus::Left)
            })
            .map(|(identity, entry)| (*identity, RumorEntry::new(entry.heartbeat, entry.status)))
            .collect();
        rumor.insert(self.local, own);
        rumor
    }

    pub fn live_members(&self) -> Vec<SocketAddr> {
        let mut live: Vec<SocketAddr> = self
            .members
            .iter()
            .filter(|(_, entry)| entry.status == MemberStatus::Joined)
            .map(|(identity, _)| identity.address)
            .collect();
        live.sort();
        live.dedup();
        live
    }

    pub fn snapshot(&self) -> Vec<MemberSnapshot> {
        let mut entries: Vec<MemberSnapshot> = self
            .members
            .iter()
            .map(|(identity, entry)| MemberSnapshot {
                identity: *identity,
                heartbeat: entry.heartbeat,
                status: entry.status,
                updated_at: entry.updated_at,
            })
            .collect();
        entries.sort_by_key(|e| e.identity);
        entries
    }
}
