//! Caller-side cache of activation pids.

use dashmap::DashMap;

use super::ClusterIdentity;
use crate::actor::Pid;

/// Last known pid per identity. Entries are dropped when a request to them
/// fails, when their member leaves, or when their endpoint terminates.
#[derive(Debug, Default)]
pub struct PidCache {
    entries: DashMap<ClusterIdentity, Pid>,
}

impl PidCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached pid for `identity`.
    pub fn get(&self, identity: &ClusterIdentity) -> Option<Pid> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    /// Cache `pid` for `identity`, replacing any previous entry.
    pub fn set(&self, identity: ClusterIdentity, pid: Pid) {
        self.entries.insert(identity, pid);
    }

    /// Drop the entry for `identity`.
    pub fn remove(&self, identity: &ClusterIdentity) -> Option<Pid> {
        self.entries.remove(identity).map(|(_, pid)| pid)
    }

    /// Drop the entry only if it still points at `pid`.
    pub fn remove_if_pid(&self, identity: &ClusterIdentity, pid: &Pid) -> bool {
        self.entries
            .remove_if(identity, |_, cached| cached == pid)
            .is_some()
    }

    /// Drop every entry hosted at `address`. Returns how many were dropped.
    pub fn invalidate_member(&self, address: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, pid| pid.address != address);
        before.saturating_sub(self.entries.len())
    }

    /// Keep only entries matching `keep`.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&ClusterIdentity, &Pid) -> bool,
    {
        self.entries.retain(|identity, pid| keep(identity, pid));
    }

    /// Number of cached pids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
