//! The addressable side of an actor.

use std::sync::Arc;

use super::mailbox::Mailbox;
use super::{MessageEnvelope, Pid, SystemMessage};

/// Something a [`Pid`] can resolve to.
///
/// Local actors, one-shot reply futures, remote references and cluster
/// deliveries all implement this. Sending never blocks and never fails from
/// the caller's point of view; undeliverable messages become dead letters.
pub trait Process: Send + Sync {
    /// Deliver a user message.
    fn send_user_message(&self, pid: &Pid, envelope: MessageEnvelope);

    /// Deliver a system message.
    fn send_system_message(&self, pid: &Pid, message: SystemMessage);

    /// Stop the process.
    fn stop(&self, pid: &Pid) {
        self.send_system_message(pid, SystemMessage::Stop);
    }
}

/// A local actor: posts into its mailbox.
pub(crate) struct ActorProcess {
    mailbox: Arc<Mailbox>,
    dead_letter: Arc<dyn Process>,
}

impl ActorProcess {
    pub(crate) fn new(mailbox: Arc<Mailbox>, dead_letter: Arc<dyn Process>) -> Self {
        Self {
            mailbox,
            dead_letter,
        }
    }
}

impl Process for ActorProcess {
    fn send_user_message(&self, pid: &Pid, envelope: MessageEnvelope) {
        if let Some(dropped) = self.mailbox.post_user(envelope) {
            tracing::debug!(pid = %pid, message = dropped.message.type_name(), "mailbox full, dropping message");
            self.dead_letter.send_user_message(pid, dropped);
        }
    }

    fn send_system_message(&self, _pid: &Pid, message: SystemMessage) {
        self.mailbox.post_system(message);
    }
}
