//! Cluster members.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Durable member id, unique per process incarnation.
pub type MemberId = String;

/// Where a member is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Registered but not yet hosting activations.
    Joining,
    /// Hosting activations.
    Active,
    /// Draining before departure.
    Leaving,
    /// Gone. A member id that reached `Left` never comes back.
    Left,
}

impl MemberStatus {
    /// Whether placement may choose this member.
    pub fn is_active(self) -> bool {
        matches!(self, MemberStatus::Active)
    }

    /// Whether the member has announced its departure.
    pub fn is_departing(self) -> bool {
        matches!(self, MemberStatus::Leaving | MemberStatus::Left)
    }
}

/// One member of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Durable id.
    pub id: MemberId,
    /// Remote address, as bound by the transport.
    pub address: String,
    /// Kinds this member can host. Empty for clients.
    pub kinds: BTreeSet<String>,
    /// Lifecycle status.
    pub status: MemberStatus,
}

impl Member {
    /// A joining member with a fresh id.
    pub fn new<I, S>(address: impl Into<String>, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            address: address.into(),
            kinds: kinds.into_iter().map(Into::into).collect(),
            status: MemberStatus::Joining,
        }
    }

    /// Replace the id, for deterministic tests and stable ids.
    pub fn with_id(mut self, id: impl Into<MemberId>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the status.
    pub fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether this member can host `kind`.
    pub fn has_kind(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}
