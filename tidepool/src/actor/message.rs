//! Message types flowing through mailboxes.
//!
//! User payloads travel as [`AnyMessage`], a type-erased box that remembers
//! the concrete type it was built from. Actors match on the [`Message`] enum
//! for lifecycle events and downcast [`Message::User`] payloads to the types
//! they handle.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{ActorError, Pid};

/// Headers carried alongside a user message.
pub type MessageHeaders = BTreeMap<String, String>;

/// A type-erased user message.
pub struct AnyMessage {
    inner: Box<dyn Any + Send>,
    type_id: TypeId,
    type_name: &'static str,
}

impl AnyMessage {
    /// Wrap a value.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            inner: Box::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Name of the wrapped type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// `TypeId` of the wrapped type.
    pub fn payload_type_id(&self) -> TypeId {
        self.type_id
    }

    /// Check whether the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Take the wrapped value as a `T`, or get the message back unchanged.
    pub fn downcast<T: Any>(self) -> Result<T, AnyMessage> {
        if !self.is::<T>() {
            return Err(self);
        }
        let Self {
            inner,
            type_id,
            type_name,
        } = self;
        match inner.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(inner) => Err(Self {
                inner,
                type_id,
                type_name,
            }),
        }
    }
}

impl fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// A user message plus delivery metadata.
#[derive(Debug)]
pub struct MessageEnvelope {
    /// The payload.
    pub message: AnyMessage,
    /// Who to answer, if anyone.
    pub sender: Option<Pid>,
    /// Free-form headers, propagated by middleware.
    pub headers: MessageHeaders,
}

impl MessageEnvelope {
    /// Envelope with no sender and no headers.
    pub fn new<T: Any + Send>(message: T) -> Self {
        Self::from_any(AnyMessage::new(message))
    }

    /// Envelope around an already erased payload.
    pub fn from_any(message: AnyMessage) -> Self {
        Self {
            message,
            sender: None,
            headers: MessageHeaders::new(),
        }
    }

    /// Set the sender.
    pub fn with_sender(mut self, sender: Option<Pid>) -> Self {
        self.sender = sender;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// What an actor's `receive` is called with.
#[derive(Debug)]
pub enum Message {
    /// First message of every incarnation, delivered before any user message.
    Started,
    /// The actor is about to be replaced by a fresh instance.
    Restarting,
    /// The actor is stopping; children are being stopped.
    Stopping,
    /// Last message this instance will see.
    Stopped,
    /// A watched process or a child terminated.
    Terminated(Terminated),
    /// No user message arrived within the configured receive timeout.
    ReceiveTimeout,
    /// Application payload.
    User(AnyMessage),
}

impl Message {
    /// Borrow a user payload as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Message::User(message) => message.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Check whether this is a user payload of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        matches!(self, Message::User(message) if message.is::<T>())
    }

    /// Take a user payload as a `T`.
    pub fn downcast<T: Any>(self) -> Result<T, Message> {
        match self {
            Message::User(message) => message.downcast::<T>().map_err(Message::User),
            other => Err(other),
        }
    }

    /// Type name used in logs and supervision events.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Started => "Started",
            Message::Restarting => "Restarting",
            Message::Stopping => "Stopping",
            Message::Stopped => "Stopped",
            Message::Terminated(_) => "Terminated",
            Message::ReceiveTimeout => "ReceiveTimeout",
            Message::User(message) => message.type_name(),
        }
    }
}

/// Why a process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminatedReason {
    /// The process stopped normally or was stopped by its supervisor.
    Stopped,
    /// The process did not exist when it was watched.
    NotFound,
    /// The address hosting the process became unreachable.
    AddressTerminated,
}

/// Notification that a watched process is gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Terminated {
    /// The process that terminated.
    pub who: Pid,
    /// Why it terminated.
    pub why: TerminatedReason,
}

/// A child's failure report to its supervisor.
#[derive(Debug, Clone)]
pub struct Failure {
    /// The failing process.
    pub who: Pid,
    /// What went wrong.
    pub reason: Arc<ActorError>,
    /// Type of the message that was being handled.
    pub message_type: &'static str,
}

/// Control messages. They always run before queued user messages.
#[derive(Debug, Clone)]
pub enum SystemMessage {
    /// Deliver [`Message::Started`].
    Start,
    /// Stop immediately, ahead of queued user messages.
    Stop,
    /// Replace the actor instance, keeping the mailbox.
    Restart,
    /// Register `watcher` for a [`Terminated`] notification.
    Watch {
        /// Process to notify.
        watcher: Pid,
    },
    /// Remove a previous watch.
    Unwatch {
        /// Process that no longer wants a notification.
        watcher: Pid,
    },
    /// A watched process or child terminated.
    Terminated(Terminated),
    /// A child failed and needs a supervision decision.
    Failure(Failure),
    /// Stop taking user messages.
    SuspendMailbox,
    /// Take user messages again.
    ResumeMailbox,
}

/// User message that stops the actor once everything queued before it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoisonPill;

/// Reply sent to a requester whose message hit a dead process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterResponse {
    /// The process that was not alive.
    pub target: Pid,
}

/// Tick driving [`Message::ReceiveTimeout`]. Stale generations are ignored.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReceiveTimeoutTick(pub(crate) u64);
