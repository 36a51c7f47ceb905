//! Kinds: factories of virtual actors.

use std::time::Duration;

use async_trait::async_trait;

use super::ClusterIdentity;
use crate::actor::{Actor, ActorContext, ActorError, AnyMessage, Message, Props};

/// First user message of every virtual actor incarnation, delivered right
/// after `Started`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInit {
    /// The identity this instance serves.
    pub identity: ClusterIdentity,
}

/// A named factory of virtual actors.
#[derive(Debug, Clone)]
pub struct ClusterKind {
    name: String,
    props: Props,
    idle_timeout: Option<Duration>,
}

impl ClusterKind {
    /// A kind spawning instances from `props`.
    pub fn new(name: impl Into<String>, props: Props) -> Self {
        Self {
            name: name.into(),
            props,
            idle_timeout: None,
        }
    }

    /// Deactivate instances after `timeout` without user messages.
    ///
    /// Implemented with the actor's receive timeout: the instance still
    /// sees [`Message::ReceiveTimeout`] and is stopped right after.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Kind name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Idle deactivation window.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub(crate) fn activation_props(&self, identity: ClusterIdentity) -> Props {
        let idle_timeout = self.idle_timeout;
        self.props.clone().map_producer(move |inner| {
            let actor: Box<dyn Actor> = Box::new(VirtualActor {
                inner,
                identity: identity.clone(),
                idle_timeout,
            });
            actor
        })
    }
}

struct VirtualActor {
    inner: Box<dyn Actor>,
    identity: ClusterIdentity,
    idle_timeout: Option<Duration>,
}

#[async_trait]
impl Actor for VirtualActor {
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        match message {
            Message::Started => {
                self.inner.receive(ctx, Message::Started).await?;
                let init = ClusterInit {
                    identity: self.identity.clone(),
                };
                self.inner
                    .receive(ctx, Message::User(AnyMessage::new(init)))
                    .await?;
                if let Some(idle) = self.idle_timeout {
                    ctx.set_receive_timeout(idle);
                }
                Ok(())
            }
            Message::ReceiveTimeout if self.idle_timeout.is_some() => {
                self.inner.receive(ctx, Message::ReceiveTimeout).await?;
                tracing::debug!(identity = %self.identity, "virtual actor idle, deactivating");
                ctx.stop_self();
                Ok(())
            }
            other => self.inner.receive(ctx, other).await,
        }
    }
}
