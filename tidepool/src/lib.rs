//! # tidepool
//!
//! Location-transparent actors with a virtual actor cluster.
//!
//! The crate has three layers:
//!
//! - [`actor`]: the local runtime. Mailboxes scheduled onto the Tokio worker
//!   pool, a process registry keyed by [`Pid`], request/response futures,
//!   watch/terminate notifications and parent/child supervision.
//! - [`remote`]: plumbing that makes a [`Pid`] on another address reachable
//!   through a pluggable [`Transport`] and [`SerializerRegistry`].
//! - [`cluster`]: gossip membership, a versioned member list, deterministic
//!   identity placement and on-demand activation of virtual actors.
//!
//! ```rust,ignore
//! let system = ActorSystem::new(ActorSystemConfig::default());
//! let pid = system.root().spawn(Props::from_producer(|| Counter::default()))?;
//! let total: u64 = system
//!     .root()
//!     .request_async(&pid, Increment(2), Duration::from_secs(1))
//!     .await?;
//! ```

pub mod actor;
pub mod cluster;
pub mod remote;

pub use actor::{
    Actor, ActorContext, ActorError, ActorSystem, ActorSystemConfig, AnyMessage,
    DeadLetterEvent, DeadLetterResponse, Directive, EventStream, MailboxConfig, Message,
    MessageEnvelope, OverflowPolicy, Pid, PoisonPill, Props, RequestError, RootContext,
    SpawnError, SupervisorStrategy, Terminated, TerminatedReason,
};
pub use cluster::{
    Cluster, ClusterConfig, ClusterError, ClusterIdentity, ClusterInit, ClusterKind,
    ClusterTopology, GossipConfig, InMemoryMembershipProvider, Member, MemberStatus,
    MembershipProvider, PlacementStrategy,
};
pub use remote::{
    EndpointConfig, InMemoryNetwork, Remote, RemoteConfig, SerializerRegistry, Transport,
};
