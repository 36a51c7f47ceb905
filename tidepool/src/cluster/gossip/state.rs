//! Gossip state and its merge rule.
//!
//! State is a map `member -> key -> (value, sequence)`. Only the member a
//! key belongs to ever writes it, bumping the sequence each time. Merging
//! keeps, per key, the entry with the higher sequence. On an equal
//! sequence the greater value wins, which makes the merge a join: it is
//! commutative, associative and idempotent, so replicas converge no
//! matter how updates are relayed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cluster::MemberId;

/// One versioned value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipEntry {
    /// Application value.
    pub value: String,
    /// Version, bumped by the owning member on every write.
    pub sequence: u64,
}

impl GossipEntry {
    fn supersedes(&self, other: &GossipEntry) -> bool {
        (self.sequence, &self.value) > (other.sequence, &other.value)
    }
}

/// Keys that changed during a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// `(member, key)` pairs that took the remote entry.
    pub updated: Vec<(MemberId, String)>,
}

impl MergeOutcome {
    /// Whether the merge changed nothing.
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }
}

/// Gossip state of the whole cluster as seen by one member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipState {
    members: BTreeMap<MemberId, BTreeMap<String, GossipEntry>>,
}

impl GossipState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `key` for `member`, one sequence above the current entry.
    /// Returns the new sequence.
    pub fn set(&mut self, member: &MemberId, key: &str, value: impl Into<String>) -> u64 {
        let keys = self.members.entry(member.clone()).or_default();
        let sequence = keys.get(key).map_or(1, |entry| entry.sequence + 1);
        keys.insert(
            key.to_string(),
            GossipEntry {
                value: value.into(),
                sequence,
            },
        );
        sequence
    }

    /// Entry for `member`/`key`.
    pub fn get(&self, member: &MemberId, key: &str) -> Option<&GossipEntry> {
        self.members.get(member).and_then(|keys| keys.get(key))
    }

    /// Drop every key of `member`. Returns whether it had any.
    pub fn remove_member(&mut self, member: &MemberId) -> bool {
        self.members.remove(member).is_some()
    }

    /// Members with at least one key.
    pub fn member_ids(&self) -> impl Iterator<Item = &MemberId> {
        self.members.keys()
    }

    /// Merge `remote` into this state.
    pub fn merge(&mut self, remote: &GossipState) -> MergeOutcome {
        self.merge_filtered(remote, |_| true)
    }

    /// Merge `remote`, ignoring what it says about `local`. A member's own
    /// keys are authoritative on that member.
    pub fn merge_excluding(&mut self, remote: &GossipState, local: &MemberId) -> MergeOutcome {
        self.merge_filtered(remote, |member| member != local)
    }

    /// Merge only the members of `remote` that `accept` admits.
    pub fn merge_filtered<F>(&mut self, remote: &GossipState, accept: F) -> MergeOutcome
    where
        F: Fn(&MemberId) -> bool,
    {
        let mut outcome = MergeOutcome::default();
        for (member, remote_keys) in &remote.members {
            if !accept(member) {
                continue;
            }
            let keys = self.members.entry(member.clone()).or_default();
            for (key, remote_entry) in remote_keys {
                let take = keys
                    .get(key)
                    .map_or(true, |local| remote_entry.supersedes(local));
                if take {
                    keys.insert(key.clone(), remote_entry.clone());
                    outcome.updated.push((member.clone(), key.clone()));
                }
            }
        }
        outcome
    }
}
