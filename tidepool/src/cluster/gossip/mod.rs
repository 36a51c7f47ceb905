//! Gossip-based membership.
//!
//! Each member runs a [`Gossiper`](actor::Gossiper) actor named
//! [`GOSSIP_ACTOR`]. Every `interval` it bumps its own heartbeat key and
//! pushes its full state to up to `fanout` random peers; the peer merges
//! and answers with its own state. Peers are seeded by the membership
//! provider and by whatever gossip already knows.
//!
//! Reachability is judged locally: a peer whose heartbeat sequence has
//! not advanced for `heartbeat_expiration` is blocked, as is a peer that
//! gossips `Left` or disappears from the provider. Blocked ids never come
//! back. After every change the gossiper rebuilds the member list.

pub(crate) mod actor;
mod state;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub use state::{GossipEntry, GossipState, MergeOutcome};

use super::MemberId;

/// Name of the gossip actor on every member.
pub const GOSSIP_ACTOR: &str = "gossip";

/// Key holding a member's JSON-encoded [`Member`](crate::cluster::Member).
pub const MEMBER_KEY: &str = "member";

/// Key bumped by its owner on every gossip round.
pub const HEARTBEAT_KEY: &str = "heartbeat";

/// Gossip timing.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Time between gossip rounds.
    pub interval: Duration,

    /// Peers contacted per round.
    pub fanout: usize,

    /// A peer whose heartbeat has not advanced for this long is blocked.
    pub heartbeat_expiration: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
            fanout: 3,
            heartbeat_expiration: Duration::from_secs(20),
        }
    }
}

impl GossipConfig {
    /// Fast rounds and quick failure detection for in-process clusters.
    pub fn local_network() -> Self {
        Self {
            interval: Duration::from_millis(50),
            fanout: 3,
            heartbeat_expiration: Duration::from_millis(500),
        }
    }

    /// Set the round interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the heartbeat expiration.
    pub fn with_heartbeat_expiration(mut self, expiration: Duration) -> Self {
        self.heartbeat_expiration = expiration;
        self
    }
}

/// Latest merged gossip state, replaced wholesale after every change.
#[derive(Debug, Default)]
pub struct GossipSnapshot {
    current: RwLock<Arc<GossipState>>,
}

impl GossipSnapshot {
    /// The current state.
    pub fn load(&self) -> Arc<GossipState> {
        Arc::clone(&self.current.read())
    }

    pub(crate) fn store(&self, state: GossipState) {
        *self.current.write() = Arc::new(state);
    }
}

/// Push half of a gossip exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GossipRequest {
    pub(crate) from: MemberId,
    pub(crate) state: GossipState,
}

/// Pull half of a gossip exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GossipResponse {
    pub(crate) state: GossipState,
}
