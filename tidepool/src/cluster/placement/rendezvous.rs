//! Rendezvous (highest random weight) placement.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::hash::stable_hash32;
use super::IdentityLookup;
use crate::cluster::{ClusterIdentity, ClusterTopology};

/// Rendezvous selection over a fixed set of addresses.
///
/// Member hashes are computed once. Each lookup scores every member with
/// `hash(address) ^ hash(key)` and picks the highest score; members are
/// kept sorted by address so a tie always goes to the lowest address.
#[derive(Debug, Clone, Default)]
pub struct Rendezvous {
    members: Vec<(String, u32)>,
}

impl Rendezvous {
    /// Build from member addresses. Duplicates are ignored.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();
        addresses.sort();
        addresses.dedup();
        let members = addresses
            .into_iter()
            .map(|address| {
                let hash = stable_hash32(&address);
                (address, hash)
            })
            .collect();
        Self { members }
    }

    /// Owner of `key`, or `None` when there are no members.
    pub fn owner(&self, key: &str) -> Option<&str> {
        let key_hash = stable_hash32(key);
        let mut best: Option<(u32, &str)> = None;
        for (address, member_hash) in &self.members {
            let score = member_hash ^ key_hash;
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, address));
            }
        }
        best.map(|(_, address)| address)
    }

    /// Number of candidate members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no candidates.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Builds one [`Rendezvous`] per kind from active members that host it.
pub(crate) fn rendezvous_by_kind(topology: &ClusterTopology) -> HashMap<String, Rendezvous> {
    let mut addresses: HashMap<String, Vec<String>> = HashMap::new();
    for member in topology.members.iter().filter(|m| m.status.is_active()) {
        for kind in &member.kinds {
            addresses
                .entry(kind.clone())
                .or_default()
                .push(member.address.clone());
        }
    }
    addresses
        .into_iter()
        .map(|(kind, addresses)| (kind, Rendezvous::new(addresses)))
        .collect()
}

/// Coordination-free lookup: every member computes the owner locally.
#[derive(Debug, Default)]
pub struct RendezvousLookup {
    kinds: RwLock<HashMap<String, Rendezvous>>,
    topology_hash: AtomicU64,
}

impl RendezvousLookup {
    /// An empty lookup; owners appear after the first rebuild.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityLookup for RendezvousLookup {
    fn rebuild(&self, topology: &ClusterTopology) {
        *self.kinds.write() = rendezvous_by_kind(topology);
        self.topology_hash
            .store(topology.topology_hash, Ordering::Release);
    }

    fn owner(&self, identity: &ClusterIdentity) -> Option<String> {
        self.kinds
            .read()
            .get(&identity.kind)
            .and_then(|members| members.owner(&identity.identity))
            .map(str::to_string)
    }

    fn topology_hash(&self) -> u64 {
        self.topology_hash.load(Ordering::Acquire)
    }
}
