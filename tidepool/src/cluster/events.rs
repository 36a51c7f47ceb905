//! Cluster events published on the actor system's event stream.

use std::collections::BTreeSet;

use super::{Member, MemberId};

/// A versioned view of the active members.
///
/// Published whenever the member list changes. `version` increases by one
/// per publication on a given member, and `blocked` only ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterTopology {
    /// Local version counter.
    pub version: u64,
    /// Fingerprint of the member ids, equal on members that agree.
    pub topology_hash: u64,
    /// Active members, sorted by address.
    pub members: Vec<Member>,
    /// Members added since the previous topology.
    pub joined: Vec<Member>,
    /// Members removed since the previous topology.
    pub left: Vec<Member>,
    /// Member ids this observer will never admit again.
    pub blocked: BTreeSet<MemberId>,
}

impl ClusterTopology {
    /// Member with the given address.
    pub fn member_by_address(&self, address: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.address == address)
    }

    /// Members able to host `kind`.
    pub fn members_for_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Member> + 'a {
        self.members.iter().filter(move |m| m.has_kind(kind))
    }
}

/// A member entered the member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberJoined {
    /// The member.
    pub member: Member,
}

/// A member left the member list, gracefully or by failure detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLeft {
    /// The member.
    pub member: Member,
}
