//! Receive and sender middleware.
//!
//! Middleware layers are composed into a single chain when they are added
//! to [`Props`](super::Props). The first layer added runs first. A layer
//! may rewrite the envelope or return `None` to swallow it.

use std::sync::Arc;

use super::{MessageEnvelope, Pid};

/// Runs on every user message before the actor sees it.
pub trait ReceiveMiddleware: Send + Sync {
    /// Inspect or rewrite an incoming envelope for actor `pid`.
    fn on_receive(&self, pid: &Pid, envelope: MessageEnvelope) -> Option<MessageEnvelope>;
}

/// Runs on every user message an actor sends.
pub trait SenderMiddleware: Send + Sync {
    /// Inspect or rewrite an outgoing envelope from `sender` to `target`.
    fn on_send(&self, sender: &Pid, target: &Pid, envelope: MessageEnvelope) -> Option<MessageEnvelope>;
}

impl<F> ReceiveMiddleware for F
where
    F: Fn(&Pid, MessageEnvelope) -> Option<MessageEnvelope> + Send + Sync,
{
    fn on_receive(&self, pid: &Pid, envelope: MessageEnvelope) -> Option<MessageEnvelope> {
        self(pid, envelope)
    }
}

impl<F> SenderMiddleware for F
where
    F: Fn(&Pid, &Pid, MessageEnvelope) -> Option<MessageEnvelope> + Send + Sync,
{
    fn on_send(&self, sender: &Pid, target: &Pid, envelope: MessageEnvelope) -> Option<MessageEnvelope> {
        self(sender, target, envelope)
    }
}

pub(crate) type ReceiveChain = Arc<dyn Fn(&Pid, MessageEnvelope) -> Option<MessageEnvelope> + Send + Sync>;
pub(crate) type SenderChain =
    Arc<dyn Fn(&Pid, &Pid, MessageEnvelope) -> Option<MessageEnvelope> + Send + Sync>;

pub(crate) fn compose_receive(chain: Option<ReceiveChain>, layer: Arc<dyn ReceiveMiddleware>) -> ReceiveChain {
    match chain {
        None => Arc::new(move |pid: &Pid, envelope: MessageEnvelope| layer.on_receive(pid, envelope)),
        Some(outer) => Arc::new(move |pid: &Pid, envelope: MessageEnvelope| {
            outer(pid, envelope).and_then(|envelope| layer.on_receive(pid, envelope))
        }),
    }
}

pub(crate) fn compose_sender(chain: Option<SenderChain>, layer: Arc<dyn SenderMiddleware>) -> SenderChain {
    match chain {
        None => Arc::new(move |sender: &Pid, target: &Pid, envelope: MessageEnvelope| {
            layer.on_send(sender, target, envelope)
        }),
        Some(outer) => Arc::new(move |sender: &Pid, target: &Pid, envelope: MessageEnvelope| {
            outer(sender, target, envelope).and_then(|envelope| layer.on_send(sender, target, envelope))
        }),
    }
}
