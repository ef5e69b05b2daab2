//! Consistent-hash ring with per-node file bookkeeping.
//!
//! Positions are `ring_position(address)`; a name is owned by the first
//! `REPLICATION_FACTOR` distinct nodes at or clockwise after its own
//! position, wrapping past the end of the ring.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

use super::consistent_hashing::{node_position, ring_position};
use super::migration::MigrationPlan;
use crate::settings::REPLICATION_FACTOR;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RingEntry {
    pub address: SocketAddr,
    /// Names this node is believed to hold
    pub files: BTreeSet<String>,
}

impl RingEntry {
    fn new(address: SocketAddr) -> Self {
        Self {
            address,
            files: BTreeSet::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HashRing {
    entries: BTreeMap<u64, RingEntry>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn position_of(&self, address: &SocketAddr) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.address == *address)
            .map(|(position, _)| *position)
    }

    pub fn contains(&self, address: &SocketAddr) -> bool {
        self.position_of(address).is_some()
    }

    /// Addresses in ring order
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.entries.values().map(|entry| entry.address).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (u64, &RingEntry)> {
        self.entries.iter().map(|(position, entry)| (*position, entry))
    }

    fn entry_mut(&mut self, address: &SocketAddr) -> Option<&mut RingEntry> {
        self.entries
            .values_mut()
            .find(|entry| entry.address == *address)
    }

    /// Entries clockwise from `position` (inclusive), once around
    fn walk_from(&self, position: u64) -> impl Iterator<Item = (u64, &RingEntry)> {
        self.entries
            .range(position..)
            .chain(self.entries.range(..position))
            .map(|(position, entry)| (*position, entry))
    }

    /// Add a node with no files. Returns false if it is already present,
    /// in which case its file list is kept.
    pub fn node_join(&mut self, address: SocketAddr) -> bool {
        self.insert_at(node_position(&address), address)
    }

    /// Place `address` at an explicit position
    pub fn insert_at(&mut self, position: u64, address: SocketAddr) -> bool {
        if self.contains(&address) || self.entries.contains_key(&position) {
            return false;
        }
        self.entries.insert(position, RingEntry::new(address));
        true
    }

    pub fn remove_node(&mut self, address: &SocketAddr) -> Option<RingEntry> {
        let position = self.position_of(address)?;
        self.entries.remove(&position)
    }

    /// The owners of `position`: up to three distinct addresses in ring order
    pub fn owners_at(&self, position: u64) -> Vec<SocketAddr> {
        self.walk_from(position)
            .take(REPLICATION_FACTOR)
            .map(|(_, entry)| entry.address)
            .collect()
    }

    /// The owners of `name`. Empty only when the ring is empty.
    pub fn lookup(&self, name: &str) -> Vec<SocketAddr> {
        self.owners_at(ring_position(name))
    }

    /// Up to `count` nodes strictly after `address`, in ring order
    pub fn successors(&self, address: &SocketAddr, count: usize) -> Vec<SocketAddr> {
        match self.position_of(address) {
            Some(position) => self
                .walk_from(position)
                .skip(1)
                .take(count)
                .map(|(_, entry)| entry.address)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn holds(&self, address: &SocketAddr, name: &str) -> bool {
        self.entries
            .values()
            .any(|entry| entry.address == *address && entry.files.contains(name))
    }

    /// Record that `address` holds `name`; unknown addresses are skipped
    pub fn add_file(&mut self, address: &SocketAddr, name: &str) -> bool {
        match self.entry_mut(address) {
            Some(entry) => entry.files.insert(name.to_string()),
            None => false,
        }
    }

    /// Record `name` against its current owners
    pub fn insert_entry(&mut self, name: &str) {
        for owner in self.lookup(name) {
            self.add_file(&owner, name);
        }
    }

    /// Forget `name` on every node that lists it
    pub fn delete_entry(&mut self, name: &str) {
        for entry in self.entries.values_mut() {
            entry.files.remove(name);
        }
    }

    /// Holders of `name`, clockwise from its position
    pub fn holders(&self, name: &str) -> Vec<SocketAddr> {
        self.walk_from(ring_position(name))
            .filter(|(_, entry)| entry.files.contains(name))
            .map(|(_, entry)| entry.address)
            .collect()
    }

    /// Converge bookkeeping with a migration carried out elsewhere:
    /// the n-th bucket of the plan now lives on the n-th destination.
    pub fn apply_ownership_update(&mut self, plan: &MigrationPlan, destinations: &[SocketAddr]) {
        for (files, destination) in plan.buckets().into_iter().zip(destinations) {
            if let Some(entry) = self.entry_mut(destination) {
                entry.files.extend(files.iter().cloned());
            }
        }
    }

    pub fn local_files(&self, address: &SocketAddr) -> Vec<String> {
        self.entries
            .values()
            .find(|entry| entry.address == *address)
            .map(|entry| entry.files.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every known name with the addresses holding it
    pub fn placements(&self) -> BTreeMap<String, Vec<SocketAddr>> {
        let mut placements: BTreeMap<String, Vec<SocketAddr>> = BTreeMap::new();
        for entry in self.entries.values() {
            for name in entry.files.iter() {
                placements
                    .entry(name.clone())
                    .or_default()
                    .push(entry.address);
            }
        }
        placements
    }
}

impl fmt::Display for HashRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, entry) in self.entries.iter() {
            let files: Vec<&str> = entry.files.iter().map(String::as_str).collect();
            writeln!(
                f,
                "{:020} {} [{}]",
                position,
                entry.address,
                files.join(", ")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{}", port).parse().unwrap()
    }

    /// A:10, B:40, C:70, D:90
    pub fn example_ring() -> HashRing {
        let mut ring = HashRing::new();
        ring.insert_at(10, addr(1));
        ring.insert_at(40, addr(2));
        ring.insert_at(70, addr(3));
        ring.insert_at(90, addr(4));
        ring
    }

    #[test]
    fn test_worked_example_wraps() {
        let ring = example_ring();
        assert_eq!(ring.owners_at(55), vec![addr(3), addr(4), addr(1)]);
        assert_eq!(ring.owners_at(70), vec![addr(3), addr(4), addr(1)]);
        assert_eq!(ring.owners_at(95), vec![addr(1), addr(2), addr(3)]);
        assert_eq!(ring.owners_at(0), vec![addr(1), addr(2), addr(3)]);
    }

    #[test]
    fn test_lookup_small_rings() {
        let mut ring = HashRing::new();
        assert!(ring.lookup("x").is_empty());

        ring.node_join(addr(1));
        assert_eq!(ring.lookup("x"), vec![addr(1)]);

        ring.node_join(addr(2));
        let owners = ring.lookup("x");
        assert_eq!(owners.len(), 2);
        assert!(owners.contains(&addr(1)) && owners.contains(&addr(2)));

        ring.node_join(addr(3));
        ring.node_join(addr(4));
        ring.node_join(addr(5));
        for name in ["a", "b", "movie.mp4", "notes.txt"] {
            let owners = ring.lookup(name);
            let distinct: BTreeSet<_> = owners.iter().collect();
            assert_eq!(owners.len(), 3);
            assert_eq!(distinct.len(), 3);
        }
    }

    #[test]
    fn test_node_join_is_idempotent() {
        let mut ring = HashRing::new();
        assert!(ring.node_join(addr(1)));
        ring.insert_entry("a");
        assert!(!ring.node_join(addr(1)));
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.local_files(&addr(1)), vec!["a".to_string()]);
    }

    #[test]
    fn test_insert_and_delete_entry() {
        let mut ring = example_ring();
        ring.insert_entry("x");
        let owners = ring.lookup("x");
        assert_eq!(ring.holders("x").len(), 3);
        for owner in owners.iter() {
            assert!(ring.holds(owner, "x"));
        }

        // A stale holder outside the owners is cleared too
        let outsider = ring
            .addresses()
            .into_iter()
            .find(|a| !owners.contains(a))
            .unwrap();
        ring.add_file(&outsider, "x");
        ring.delete_entry("x");
        assert!(ring.holders("x").is_empty());
        assert!(ring.placements().is_empty());
    }

    #[test]
    fn test_successors_wrap() {
        let ring = example_ring();
        assert_eq!(ring.successors(&addr(4), 2), vec![addr(1), addr(2)]);
        assert_eq!(ring.successors(&addr(2), 5), vec![addr(3), addr(4), addr(1)]);
        assert!(ring.successors(&addr(9), 2).is_empty());
    }

    #[test]
    fn test_holders_in_ring_order() {
        let mut ring = example_ring();
        ring.add_file(&addr(1), "x");
        ring.add_file(&addr(4), "x");
        // "x" positioned by hash; holders start from the first one clockwise
        let holders = ring.holders("x");
        assert_eq!(holders.len(), 2);
        assert!(holders.contains(&addr(1)) && holders.contains(&addr(4)));
    }

    #[test]
    fn test_apply_ownership_update() {
        let mut ring = example_ring();
        let mut plan = MigrationPlan::default();
        plan.to_me.insert("x".to_string());
        plan.to_next.insert("y".to_string());
        plan.to_next_next.insert("z".to_string());

        ring.apply_ownership_update(&plan, &[addr(1), addr(2), addr(9)]);
        assert!(ring.holds(&addr(1), "x"));
        assert!(ring.holds(&addr(2), "y"));
        assert!(ring.holders("z").is_empty());
    }

    #[test]
    fn test_display_lists_files() {
        let mut ring = example_ring();
        ring.add_file(&addr(3), "x");
        let dump = ring.to_string();
        assert_eq!(dump.lines().count(), 4);
        assert!(dump.contains("10.0.0.1:3 [x]"));
    }
}
