//! What travels between actor systems.

use serde::{Deserialize, Serialize};

use crate::actor::{MessageHeaders, Pid, Terminated};

/// Payload of a [`RemoteEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemotePayload {
    /// Serialized user message.
    User {
        /// Registered type name.
        type_name: String,
        /// Encoded message.
        bytes: Vec<u8>,
    },
    /// `watcher` wants a `Terminated` for the target.
    Watch {
        /// Watching process, on the sending system.
        watcher: Pid,
    },
    /// `watcher` no longer wants a `Terminated`.
    Unwatch {
        /// Watching process, on the sending system.
        watcher: Pid,
    },
    /// A watched process on the sending system terminated.
    Terminated(Terminated),
    /// Stop the target.
    Stop,
}

/// One message between two systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEnvelope {
    /// Destination process.
    pub target: Pid,
    /// Process to reply to.
    pub sender: Option<Pid>,
    /// Message headers.
    pub headers: MessageHeaders,
    /// Payload.
    pub payload: RemotePayload,
}

impl RemoteEnvelope {
    /// Envelope with no sender and no headers.
    pub fn new(target: Pid, payload: RemotePayload) -> Self {
        Self {
            target,
            sender: None,
            headers: MessageHeaders::new(),
            payload,
        }
    }
}
