//! Partition-map placement.
//!
//! Identities hash into a fixed number of partitions. Each partition is
//! owned by the rendezvous winner of `partition-<n>` among the kind's
//! members, and the whole table is rebuilt on every topology change.
//! Activators only accept requests computed against the same topology
//! hash, so two members with diverging tables never both activate.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::hash::stable_hash32;
use super::rendezvous::rendezvous_by_kind;
use super::IdentityLookup;
use crate::cluster::{ClusterIdentity, ClusterTopology};

/// Default partition count.
pub const DEFAULT_PARTITION_COUNT: u32 = 256;

/// Partition an identity falls into.
pub fn partition_of(identity: &str, partition_count: u32) -> u32 {
    stable_hash32(identity) % partition_count.max(1)
}

#[derive(Debug, Default)]
struct PartitionTable {
    topology_hash: u64,
    // kind -> owner address, indexed by partition
    owners: HashMap<String, Vec<String>>,
}

/// Lookup through a per-kind partition table.
#[derive(Debug)]
pub struct PartitionLookup {
    partition_count: u32,
    table: RwLock<PartitionTable>,
}

impl PartitionLookup {
    /// A lookup with `partition_count` partitions per kind.
    pub fn new(partition_count: u32) -> Self {
        Self {
            partition_count: partition_count.max(1),
            table: RwLock::new(PartitionTable::default()),
        }
    }

    /// Number of partitions per kind.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Current owner of `partition` for `kind`.
    pub fn partition_owner(&self, kind: &str, partition: u32) -> Option<String> {
        self.table
            .read()
            .owners
            .get(kind)
            .and_then(|owners| owners.get(partition as usize))
            .cloned()
    }
}

impl Default for PartitionLookup {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITION_COUNT)
    }
}

impl IdentityLookup for PartitionLookup {
    fn rebuild(&self, topology: &ClusterTopology) {
        let mut owners = HashMap::new();
        for (kind, members) in rendezvous_by_kind(topology) {
            let table: Option<Vec<String>> = (0..self.partition_count)
                .map(|partition| {
                    members
                        .owner(&format!("partition-{partition}"))
                        .map(str::to_string)
                })
                .collect();
            if let Some(table) = table {
                owners.insert(kind, table);
            }
        }
        let mut current = self.table.write();
        current.owners = owners;
        current.topology_hash = topology.topology_hash;
        tracing::debug!(
            topology_hash = topology.topology_hash,
            kinds = current.owners.len(),
            "partition table rebuilt"
        );
    }

    fn owner(&self, identity: &ClusterIdentity) -> Option<String> {
        let partition = partition_of(&identity.identity, self.partition_count);
        self.partition_owner(&identity.kind, partition)
    }

    fn topology_hash(&self) -> u64 {
        self.table.read().topology_hash
    }

    fn requires_topology_agreement(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::cluster::{Member, MemberStatus};

    fn topology(addresses: &[&str]) -> ClusterTopology {
        let members: Vec<Member> = addresses
            .iter()
            .map(|address| {
                Member::new(*address, ["OrderActor"])
                    .with_id(format!("id-{address}"))
                    .with_status(MemberStatus::Active)
            })
            .collect();
        ClusterTopology {
            version: 1,
            topology_hash: 7,
            members,
            joined: Vec::new(),
            left: Vec::new(),
            blocked: BTreeSet::new(),
        }
    }

    #[test]
    fn order_42_partition_and_owner() {
        assert_eq!(partition_of("order-42", DEFAULT_PARTITION_COUNT), 215);
        let lookup = PartitionLookup::default();
        lookup.rebuild(&topology(&["127.0.0.1:4501", "127.0.0.1:4502", "127.0.0.1:4503"]));
        let id = ClusterIdentity::new("order-42", "OrderActor");
        assert_eq!(lookup.owner(&id).as_deref(), Some("127.0.0.1:4502"));
        assert_eq!(lookup.topology_hash(), 7);
        assert!(lookup.requires_topology_agreement());
    }

    #[test]
    fn unknown_kind_has_no_owner() {
        let lookup = PartitionLookup::new(16);
        lookup.rebuild(&topology(&["127.0.0.1:4501"]));
        assert_eq!(lookup.owner(&ClusterIdentity::new("x", "Nope")), None);
    }

    #[test]
    fn every_partition_has_an_owner() {
        let lookup = PartitionLookup::new(32);
        lookup.rebuild(&topology(&["127.0.0.1:4501", "127.0.0.1:4502"]));
        for partition in 0..32 {
            assert!(lookup.partition_owner("OrderActor", partition).is_some());
        }
        assert_eq!(lookup.partition_owner("OrderActor", 32), None);
    }
}
