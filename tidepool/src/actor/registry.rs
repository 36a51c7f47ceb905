//! System-wide `Pid -> Process` map.
//!
//! Local processes live in a [`DashMap`] keyed by id. Pids on other
//! addresses are handed to address resolvers, which the remote and cluster
//! layers install. Anything that resolves to nothing becomes a dead letter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{Pid, Process, SpawnError, LOCAL_ADDRESS};

/// Resolves a non-local pid to a process, or declines with `None`.
pub type AddressResolver = Arc<dyn Fn(&Pid) -> Option<Arc<dyn Process>> + Send + Sync>;

/// Registry of every live process in one actor system.
pub struct ProcessRegistry {
    address: RwLock<String>,
    local: DashMap<String, Arc<dyn Process>>,
    sequence: AtomicU64,
    resolvers: RwLock<Vec<AddressResolver>>,
    dead_letter: Arc<dyn Process>,
}

impl ProcessRegistry {
    pub(crate) fn new(dead_letter: Arc<dyn Process>) -> Self {
        Self {
            address: RwLock::new(LOCAL_ADDRESS.to_string()),
            local: DashMap::new(),
            sequence: AtomicU64::new(0),
            resolvers: RwLock::new(Vec::new()),
            dead_letter,
        }
    }

    /// Address that new local pids carry.
    pub fn address(&self) -> String {
        self.address.read().clone()
    }

    pub(crate) fn set_address(&self, address: impl Into<String>) {
        *self.address.write() = address.into();
    }

    /// Whether `pid` is hosted by this system.
    pub fn is_local(&self, pid: &Pid) -> bool {
        pid.address == LOCAL_ADDRESS || pid.address == *self.address.read()
    }

    /// Generate a fresh process id, `$1`, `$2`, ...
    pub fn next_id(&self) -> String {
        format!("${}", self.sequence.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register `process` under `id`.
    pub fn add(&self, id: impl Into<String>, process: Arc<dyn Process>) -> Result<Pid, SpawnError> {
        let id = id.into();
        let pid = Pid::new(self.address(), id.clone());
        match self.local.entry(id) {
            Entry::Occupied(_) => Err(SpawnError::DuplicateName { pid }),
            Entry::Vacant(slot) => {
                slot.insert(process);
                Ok(pid)
            }
        }
    }

    /// Unregister a local process. Unknown pids are ignored.
    pub fn remove(&self, pid: &Pid) {
        if self.is_local(pid) {
            self.local.remove(&pid.id);
        }
    }

    /// Resolve a pid, falling back to the dead-letter process.
    pub fn get(&self, pid: &Pid) -> Arc<dyn Process> {
        self.find(pid).unwrap_or_else(|| Arc::clone(&self.dead_letter))
    }

    /// Resolve a pid without the dead-letter fallback.
    pub fn find(&self, pid: &Pid) -> Option<Arc<dyn Process>> {
        if self.is_local(pid) {
            return self.local.get(&pid.id).map(|entry| Arc::clone(entry.value()));
        }
        let resolvers: Vec<AddressResolver> = self.resolvers.read().iter().cloned().collect();
        resolvers.iter().find_map(|resolve| resolve(pid))
    }

    /// Install a resolver for non-local pids.
    ///
    /// Resolvers are consulted most recently registered first.
    pub fn register_address_resolver(&self, resolver: AddressResolver) {
        self.resolvers.write().insert(0, resolver);
    }

    /// Ids of all registered local processes.
    pub fn local_ids(&self) -> Vec<String> {
        self.local.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered local processes.
    pub fn len(&self) -> usize {
        self.local.len()
    }

    /// Whether no local process is registered.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    pub(crate) fn dead_letter(&self) -> Arc<dyn Process> {
        Arc::clone(&self.dead_letter)
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("address", &*self.address.read())
            .field("processes", &self.local.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::actor::{MessageEnvelope, SystemMessage};

    #[derive(Default)]
    struct Sink(Mutex<Vec<Pid>>);

    impl Process for Sink {
        fn send_user_message(&self, pid: &Pid, _envelope: MessageEnvelope) {
            self.0.lock().push(pid.clone());
        }

        fn send_system_message(&self, _pid: &Pid, _message: SystemMessage) {}
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = ProcessRegistry::new(Arc::new(Sink::default()));
        let pid = registry.add("orders", Arc::new(Sink::default())).expect("first add");
        assert_eq!(pid, Pid::local("orders"));

        let err = registry
            .add("orders", Arc::new(Sink::default()))
            .expect_err("second add");
        assert_eq!(err, SpawnError::DuplicateName { pid });
    }

    #[test]
    fn missing_pids_resolve_to_dead_letter() {
        let dead = Arc::new(Sink::default());
        let registry = ProcessRegistry::new(dead.clone());
        let pid = Pid::local("ghost");
        registry.get(&pid).send_user_message(&pid, MessageEnvelope::new(1u8));
        assert_eq!(dead.0.lock().as_slice(), &[pid]);
    }

    #[test]
    fn generated_ids_are_unique() {
        let registry = ProcessRegistry::new(Arc::new(Sink::default()));
        let first = registry.next_id();
        let second = registry.next_id();
        assert_ne!(first, second);
        assert!(first.starts_with('$'));
    }

    #[test]
    fn remote_pids_go_through_resolvers() {
        let registry = ProcessRegistry::new(Arc::new(Sink::default()));
        registry.set_address("127.0.0.1:4501");
        let remote = Arc::new(Sink::default());
        let target = remote.clone();
        registry.register_address_resolver(Arc::new(move |pid: &Pid| {
            (pid.address == "127.0.0.1:4502").then(|| Arc::clone(&target) as Arc<dyn Process>)
        }));

        assert!(registry.find(&Pid::new("127.0.0.1:4502", "gossip")).is_some());
        assert!(registry.find(&Pid::new("127.0.0.1:4503", "gossip")).is_none());

        let local = registry.add("gossip", Arc::new(Sink::default())).expect("add");
        assert_eq!(local.address, "127.0.0.1:4501");
        assert!(registry.find(&Pid::local("gossip")).is_some());
        registry.remove(&local);
        assert!(registry.find(&local).is_none());
    }
}
