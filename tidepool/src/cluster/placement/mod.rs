//! Identity to owner resolution.
//!
//! Every member resolves owners locally from its own member list. The
//! result is only correct if all members compute the same function, so
//! both strategies bottom out in the frozen hashes of [`hash`].

pub mod hash;
mod partition;
mod rendezvous;

use std::fmt;
use std::sync::Arc;

pub use partition::{partition_of, PartitionLookup, DEFAULT_PARTITION_COUNT};
pub use rendezvous::{Rendezvous, RendezvousLookup};

use super::{ClusterIdentity, ClusterTopology};

/// Resolves the member address that owns an identity.
pub trait IdentityLookup: Send + Sync + fmt::Debug {
    /// Recompute ownership for a new topology.
    fn rebuild(&self, topology: &ClusterTopology);

    /// Address of the owning member, `None` when no member hosts the kind.
    fn owner(&self, identity: &ClusterIdentity) -> Option<String>;

    /// Topology hash the current ownership was computed from.
    fn topology_hash(&self) -> u64;

    /// Whether activators must reject requests computed from a topology
    /// other than their own.
    fn requires_topology_agreement(&self) -> bool {
        false
    }
}

/// Which lookup a cluster uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementStrategy {
    /// [`RendezvousLookup`].
    #[default]
    Rendezvous,
    /// [`PartitionLookup`] with the given partition count.
    Partition {
        /// Partitions per kind.
        partition_count: u32,
    },
}

impl PlacementStrategy {
    /// Partition placement with the default partition count.
    pub fn partition() -> Self {
        PlacementStrategy::Partition {
            partition_count: DEFAULT_PARTITION_COUNT,
        }
    }

    pub(crate) fn build(self) -> Arc<dyn IdentityLookup> {
        match self {
            PlacementStrategy::Rendezvous => Arc::new(RendezvousLookup::new()),
            PlacementStrategy::Partition { partition_count } => {
                Arc::new(PartitionLookup::new(partition_count))
            }
        }
    }
}
