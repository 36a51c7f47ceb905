//! Local actor runtime.
//!
//! An actor is spawned from [`Props`] and addressed by a [`Pid`]. Every
//! actor owns a [`mailbox`] with two queues: system messages, which always
//! run first and are never dropped, and user messages, which stop flowing
//! while the actor is suspended after a failure. Mailboxes are run on the
//! shared Tokio pool by a [`Dispatcher`], one batch per scheduling turn.
//!
//! Failures returned (or panicked) from [`Actor::receive`] are caught at the
//! dispatch boundary and handed to the parent's [`SupervisorStrategy`].

mod config;
mod context;
mod dead_letter;
mod dispatcher;
mod error;
mod event_stream;
mod future;
mod mailbox;
mod message;
mod middleware;
mod pid;
mod process;
mod props;
mod registry;
mod supervision;
mod system;
mod throttle;

pub use config::ActorSystemConfig;
pub use context::{Actor, ActorContext};
pub use dead_letter::{DeadLetterEvent, DeadLetterMessage, DeadLetterProcess};
pub use dispatcher::{Dispatcher, TokioDispatcher};
pub use error::{ActorError, RequestError, SpawnError};
pub use event_stream::{EventStream, Subscription};
pub use mailbox::{MailboxConfig, OverflowPolicy};
pub use message::{
    AnyMessage, DeadLetterResponse, Failure, Message, MessageEnvelope, MessageHeaders,
    PoisonPill, SystemMessage, Terminated, TerminatedReason,
};
pub use middleware::{ReceiveMiddleware, SenderMiddleware};
pub use pid::{Pid, LOCAL_ADDRESS};
pub use process::Process;
pub use props::Props;
pub use registry::{AddressResolver, ProcessRegistry};
pub use supervision::{
    AllForOneStrategy, Decider, Directive, FailureOutcome, OneForOneStrategy,
    RestartStatistics, RestartingStrategy, SupervisionEvent, SupervisionExhausted, Supervisor,
    SupervisorStrategy,
};
pub use system::{ActorSystem, RootContext};
pub use throttle::{Throttle, Valve};
