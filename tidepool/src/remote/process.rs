//! Process standing in for pids on other systems.

use std::sync::Weak;

use super::endpoint::EndpointManager;
use crate::actor::{MessageEnvelope, Pid, Process, SystemMessage};

/// Hands every message to the endpoint manager. Once the manager is gone,
/// messages are dropped.
pub(crate) struct RemoteProcess {
    manager: Weak<EndpointManager>,
}

impl RemoteProcess {
    pub(crate) fn new(manager: Weak<EndpointManager>) -> Self {
        Self { manager }
    }
}

impl Process for RemoteProcess {
    fn send_user_message(&self, pid: &Pid, envelope: MessageEnvelope) {
        match self.manager.upgrade() {
            Some(manager) => manager.send_user(pid, envelope),
            None => tracing::debug!(target = %pid, "remote layer stopped, dropping message"),
        }
    }

    fn send_system_message(&self, pid: &Pid, message: SystemMessage) {
        if let Some(manager) = self.manager.upgrade() {
            manager.send_system(pid, message);
        }
    }
}
