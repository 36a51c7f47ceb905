//! Recipes for spawning actors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::middleware::{compose_receive, compose_sender, ReceiveChain, SenderChain};
use super::{
    Actor, ActorContext, ActorError, Dispatcher, MailboxConfig, Message, OneForOneStrategy,
    ReceiveMiddleware, SenderMiddleware, SupervisorStrategy,
};

type Producer = Arc<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

/// How to build an actor and the mailbox, supervision and middleware
/// around it.
///
/// The producer runs once per spawn and again on every restart.
#[derive(Clone)]
pub struct Props {
    producer: Producer,
    mailbox: MailboxConfig,
    supervisor: Option<Arc<dyn SupervisorStrategy>>,
    receive_timeout: Option<Duration>,
    receive_chain: Option<ReceiveChain>,
    sender_chain: Option<SenderChain>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl Props {
    /// Build actors with `producer`.
    pub fn from_producer<A, F>(producer: F) -> Self
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(move || Box::new(producer()) as Box<dyn Actor>),
            mailbox: MailboxConfig::default(),
            supervisor: None,
            receive_timeout: None,
            receive_chain: None,
            sender_chain: None,
            dispatcher: None,
        }
    }

    /// Stateless actor from a closure.
    pub fn from_fn<F>(receive: F) -> Self
    where
        F: Fn(&mut ActorContext, Message) -> Result<(), ActorError> + Send + Sync + 'static,
    {
        let receive = Arc::new(receive);
        Self::from_producer(move || FnActor {
            receive: Arc::clone(&receive),
        })
    }

    /// Set the mailbox kind.
    pub fn with_mailbox(mut self, mailbox: MailboxConfig) -> Self {
        self.mailbox = mailbox;
        self
    }

    /// Set the strategy used for this actor's children.
    pub fn with_supervisor(mut self, strategy: impl SupervisorStrategy + 'static) -> Self {
        self.supervisor = Some(Arc::new(strategy));
        self
    }

    /// Deliver [`Message::ReceiveTimeout`] after `timeout` without user messages.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Append a receive middleware layer.
    pub fn with_receive_middleware(mut self, layer: impl ReceiveMiddleware + 'static) -> Self {
        self.receive_chain = Some(compose_receive(self.receive_chain.take(), Arc::new(layer)));
        self
    }

    /// Append a sender middleware layer.
    pub fn with_sender_middleware(mut self, layer: impl SenderMiddleware + 'static) -> Self {
        self.sender_chain = Some(compose_sender(self.sender_chain.take(), Arc::new(layer)));
        self
    }

    /// Run this actor's mailbox on a specific dispatcher.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Wrap every produced actor.
    pub(crate) fn map_producer<F>(mut self, wrap: F) -> Self
    where
        F: Fn(Box<dyn Actor>) -> Box<dyn Actor> + Send + Sync + 'static,
    {
        let inner = self.producer;
        self.producer = Arc::new(move || wrap(inner()));
        self
    }

    pub(crate) fn produce(&self) -> Box<dyn Actor> {
        (self.producer)()
    }

    pub(crate) fn mailbox(&self) -> MailboxConfig {
        self.mailbox
    }

    pub(crate) fn supervisor(&self) -> Arc<dyn SupervisorStrategy> {
        match &self.supervisor {
            Some(strategy) => Arc::clone(strategy),
            None => Arc::new(OneForOneStrategy::default()),
        }
    }

    pub(crate) fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout
    }

    pub(crate) fn receive_chain(&self) -> Option<&ReceiveChain> {
        self.receive_chain.as_ref()
    }

    pub(crate) fn sender_chain(&self) -> Option<&SenderChain> {
        self.sender_chain.as_ref()
    }

    pub(crate) fn dispatcher(&self) -> Option<Arc<dyn Dispatcher>> {
        self.dispatcher.clone()
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("mailbox", &self.mailbox)
            .field("supervisor", &self.supervisor)
            .field("receive_timeout", &self.receive_timeout)
            .field("receive_middleware", &self.receive_chain.is_some())
            .field("sender_middleware", &self.sender_chain.is_some())
            .finish_non_exhaustive()
    }
}

struct FnActor<F> {
    receive: Arc<F>,
}

#[async_trait]
impl<F> Actor for FnActor<F>
where
    F: Fn(&mut ActorContext, Message) -> Result<(), ActorError> + Send + Sync + 'static,
{
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        (self.receive)(ctx, message)
    }
}
