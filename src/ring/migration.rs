//! Replica reconciliation after one or more nodes leave the ring.
//!
//! Every node computes the same plan from its pre-removal ring, but only
//! the acting node of each task moves bytes. Departures reported together
//! are reconciled against the ring with all of them removed, so a file held
//! by two departed neighbours is assigned once.
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use bincode::{Decode, Encode};
use serde::Serialize;

use super::hash_ring::HashRing;
use crate::settings::REPLICATION_FACTOR;

/// Files to place on each of `[acting, successor, next successor]`
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct MigrationPlan {
    /// Pulled by the acting node from a surviving or departed replica
    pub to_me: BTreeSet<String>,
    /// Pushed by the acting node to its successor
    pub to_next: BTreeSet<String>,
    /// Pushed by the acting node to the successor after that
    pub to_next_next: BTreeSet<String>,
}

impl MigrationPlan {
    pub fn buckets(&self) -> [&BTreeSet<String>; REPLICATION_FACTOR] {
        [&self.to_me, &self.to_next, &self.to_next_next]
    }

    fn bucket_mut(&mut self, index: usize) -> Option<&mut BTreeSet<String>> {
        match index {
            0 => Some(&mut self.to_me),
            1 => Some(&mut self.to_next),
            2 => Some(&mut self.to_next_next),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets().iter().all(|bucket| bucket.is_empty())
    }

    pub fn len(&self) -> usize {
        self.buckets().iter().map(|bucket| bucket.len()).sum()
    }
}

/// Work for one acting node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationTask {
    pub actor: SocketAddr,
    /// `[actor, successor, next successor]` in the ring after removal
    pub destinations: Vec<SocketAddr>,
    pub plan: MigrationPlan,
    /// Candidate sources for each `to_me` file: live holders, then departed
    pub sources: BTreeMap<String, Vec<SocketAddr>>,
    /// Files held by nothing that survived the batch
    pub orphaned: BTreeSet<String>,
}

impl MigrationTask {
    fn new(actor: SocketAddr, destinations: Vec<SocketAddr>) -> Self {
        Self {
            actor,
            destinations,
            plan: MigrationPlan::default(),
            sources: BTreeMap::new(),
            orphaned: BTreeSet::new(),
        }
    }
}

/// Plan the re-homing of every file held by a node in `departed`.
///
/// `ring` is the view before any of `departed` were removed. Returns one
/// task per acting node, ordered by address; tasks with nothing to move
/// are omitted.
pub fn plan_departures(ring: &HashRing, departed: &[SocketAddr]) -> Vec<MigrationTask> {
    let departed: BTreeSet<SocketAddr> = departed
        .iter()
        .filter(|address| ring.contains(address))
        .copied()
        .collect();
    if departed.is_empty() {
        return Vec::new();
    }

    let mut after = ring.clone();
    for address in departed.iter() {
        after.remove_node(address);
    }
    if after.is_empty() {
        return Vec::new();
    }

    let affected: BTreeSet<String> = departed
        .iter()
        .flat_map(|address| ring.local_files(address))
        .collect();

    let target_copies = REPLICATION_FACTOR.min(after.len());
    let mut tasks: BTreeMap<SocketAddr, MigrationTask> = BTreeMap::new();

    for name in affected {
        let holders = ring.holders(&name);
        let Some(first_departed) = holders.iter().find(|h| departed.contains(*h)) else {
            continue;
        };
        let Some(position) = ring.position_of(first_departed) else {
            continue;
        };
        // The departed position is gone from `after`, so this starts strictly past it
        let destinations = after.owners_at(position);
        let Some(actor) = destinations.first().copied() else {
            continue;
        };

        let live_holders = after.holders(&name);
        let mut missing = target_copies.saturating_sub(live_holders.len());
        let task = tasks
            .entry(actor)
            .or_insert_with(|| MigrationTask::new(actor, destinations.clone()));

        if live_holders.is_empty() {
            task.orphaned.insert(name.clone());
        }

        for (index, destination) in destinations.iter().enumerate() {
            if missing == 0 {
                break;
            }
            if after.holds(destination, &name) {
                continue;
            }
            if let Some(bucket) = task.plan.bucket_mut(index) {
                bucket.insert(name.clone());
            }
            if index == 0 {
                let departed_holders = holders.iter().filter(|h| departed.contains(*h));
                let sources = live_holders
                    .iter()
                    .chain(departed_holders)
                    .copied()
                    .collect();
                task.sources.insert(name.clone(), sources);
            }
            missing -= 1;
        }
    }

    tasks
        .into_values()
        .filter(|task| !task.plan.is_empty())
        .collect()
}
