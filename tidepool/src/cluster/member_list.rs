//! The materialized member view.
//!
//! Gossip decides who is alive; the member list turns each decision into
//! an immutable [`ClusterTopology`] and publishes it. Readers always see a
//! complete topology, never a half-applied delta.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::placement::hash::fnv1a_64;
use super::{ClusterTopology, Member, MemberId, MemberJoined, MemberLeft};
use crate::actor::EventStream;

/// Fingerprint of a set of member ids, independent of their order.
pub fn topology_hash<'a, I>(ids: I) -> u64
where
    I: IntoIterator<Item = &'a MemberId>,
{
    let ids: BTreeSet<&MemberId> = ids.into_iter().collect();
    let mut bytes = Vec::new();
    for id in ids {
        bytes.extend_from_slice(id.as_bytes());
        bytes.push(0);
    }
    fnv1a_64(&bytes)
}

/// Versioned, monotonic view of the active members.
pub struct MemberList {
    events: Arc<EventStream>,
    current: RwLock<Arc<ClusterTopology>>,
}

impl MemberList {
    /// An empty list publishing on `events`.
    pub fn new(events: Arc<EventStream>) -> Self {
        let empty = ClusterTopology {
            topology_hash: topology_hash(std::iter::empty()),
            ..ClusterTopology::default()
        };
        Self {
            events,
            current: RwLock::new(Arc::new(empty)),
        }
    }

    /// Replace the active set.
    ///
    /// `blocked` is merged into the existing blocked set; blocked ids are
    /// dropped from `members`. Returns the new topology if anything changed.
    pub fn update(&self, members: Vec<Member>, blocked: &BTreeSet<MemberId>) -> Option<Arc<ClusterTopology>> {
        let topology = {
            let mut current = self.current.write();
            let mut all_blocked = current.blocked.clone();
            all_blocked.extend(blocked.iter().cloned());

            let mut by_id: BTreeMap<MemberId, Member> = BTreeMap::new();
            for member in members {
                if !all_blocked.contains(&member.id) {
                    by_id.insert(member.id.clone(), member);
                }
            }
            let mut next: Vec<Member> = by_id.into_values().collect();
            next.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.id.cmp(&b.id)));

            if next == current.members && all_blocked == current.blocked {
                return None;
            }

            let joined: Vec<Member> = next
                .iter()
                .filter(|m| !current.members.iter().any(|old| old.id == m.id))
                .cloned()
                .collect();
            let left: Vec<Member> = current
                .members
                .iter()
                .filter(|old| !next.iter().any(|m| m.id == old.id))
                .cloned()
                .collect();
            let topology = Arc::new(ClusterTopology {
                version: current.version + 1,
                topology_hash: topology_hash(next.iter().map(|m| &m.id)),
                members: next,
                joined,
                left,
                blocked: all_blocked,
            });
            *current = Arc::clone(&topology);
            topology
        };

        tracing::info!(
            version = topology.version,
            topology_hash = topology.topology_hash,
            members = topology.members.len(),
            joined = topology.joined.len(),
            left = topology.left.len(),
            "cluster topology changed"
        );
        self.events.publish(topology.as_ref());
        for member in &topology.joined {
            self.events.publish(&MemberJoined {
                member: member.clone(),
            });
        }
        for member in &topology.left {
            self.events.publish(&MemberLeft {
                member: member.clone(),
            });
        }
        Some(topology)
    }

    /// The current topology.
    pub fn topology(&self) -> Arc<ClusterTopology> {
        Arc::clone(&self.current.read())
    }

    /// Active members, sorted by address.
    pub fn members(&self) -> Vec<Member> {
        self.current.read().members.clone()
    }

    /// Whether the member id is active.
    pub fn contains(&self, id: &MemberId) -> bool {
        self.current.read().members.iter().any(|m| &m.id == id)
    }

    /// Whether some active member has this address.
    pub fn contains_address(&self, address: &str) -> bool {
        self.current.read().member_by_address(address).is_some()
    }

    /// Whether the member id has been blocked.
    pub fn is_blocked(&self, id: &MemberId) -> bool {
        self.current.read().blocked.contains(id)
    }

    /// Blocked member ids.
    pub fn blocked(&self) -> BTreeSet<MemberId> {
        self.current.read().blocked.clone()
    }

    /// Local version of the current topology.
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Hash of the current topology.
    pub fn topology_hash(&self) -> u64 {
        self.current.read().topology_hash
    }
}

impl std::fmt::Debug for MemberList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.read();
        f.debug_struct("MemberList")
            .field("version", &current.version)
            .field("members", &current.members.len())
            .finish_non_exhaustive()
    }
}
