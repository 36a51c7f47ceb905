//! Cluster layer: virtual actors over gossip membership.
//!
//! A [`Cluster`] turns an actor system with a [`Transport`] into a member.
//! Members discover each other through a [`MembershipProvider`], agree on
//! who is alive through gossip, and place every [`ClusterIdentity`] on one
//! member with a deterministic [`IdentityLookup`]. The first request to an
//! identity activates it on its owner; later requests reuse the cached pid
//! until it fails or its member leaves.
//!
//! # Request path
//!
//! 1. Look up the pid cache.
//! 2. On a miss, resolve the owner and send it an [`ActivationRequest`].
//! 3. Send the user message and wait for the reply.
//! 4. On a dead letter, timeout or refused activation, drop the cached pid
//!    and retry with backoff, up to `max_request_retries` attempts.

pub mod activation;
mod config;
mod delivery;
mod error;
mod events;
pub mod gossip;
mod identity;
mod kind;
mod member;
mod member_list;
mod membership;
mod pid_cache;
pub mod placement;

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub use activation::{ActivationFailure, ActivationRequest, ActivationResponse, ACTIVATOR_ACTOR};
pub use config::{ClusterConfig, ClusterConfigBuilder, ClusterConfigError};
pub use delivery::CLUSTER_ADDRESS;
pub use error::ClusterError;
pub use events::{ClusterTopology, MemberJoined, MemberLeft};
pub use gossip::{GossipConfig, GossipSnapshot, GossipState, GOSSIP_ACTOR};
pub use identity::ClusterIdentity;
pub use kind::{ClusterInit, ClusterKind};
pub use member::{Member, MemberId, MemberStatus};
pub use member_list::{topology_hash, MemberList};
pub use membership::{
    InMemoryMembershipProvider, MembershipError, MembershipProvider, MembershipSnapshot,
};
pub use pid_cache::PidCache;
pub use placement::{IdentityLookup, PlacementStrategy};

use activation::activator::{activator_props, ActivatorSettings};
use activation::{Activations, ListActivations, TopologyChanged};
use delivery::ClusterDeliveryProcess;
use gossip::actor::{gossiper_props, GossiperSettings, Leave, LeaveAck};
use gossip::{GossipRequest, GossipResponse};

use crate::actor::{ActorSystem, Pid, Process, RequestError, RootContext, Subscription};
use crate::remote::{EndpointTerminated, Remote, RemoteConfig, Transport};

pub(crate) struct ClusterInner {
    system: ActorSystem,
    root: RootContext,
    remote: Remote,
    config: ClusterConfig,
    member: Member,
    member_list: Arc<MemberList>,
    lookup: Arc<dyn IdentityLookup>,
    pid_cache: Arc<PidCache>,
    gossip: Arc<GossipSnapshot>,
    gossiper: Pid,
    activator: Option<Pid>,
    subscriptions: Mutex<Vec<Subscription>>,
    shutdown: CancellationToken,
}

impl ClusterInner {
    fn system(&self) -> &ActorSystem {
        &self.system
    }

    async fn get_pid(&self, identity: &ClusterIdentity) -> Result<Pid, ClusterError> {
        if let Some(pid) = self.pid_cache.get(identity) {
            return Ok(pid);
        }
        let Some(owner) = self.lookup.owner(identity) else {
            let topology = self.member_list.topology();
            if !topology.members.is_empty()
                && topology.members_for_kind(&identity.kind).next().is_none()
            {
                return Err(ClusterError::UnknownKind {
                    kind: identity.kind.clone(),
                });
            }
            return Err(ClusterError::NoOwner {
                identity: identity.clone(),
            });
        };
        let activator = Pid::new(owner, ACTIVATOR_ACTOR);
        let request = ActivationRequest {
            identity: identity.clone(),
            topology_hash: self.lookup.topology_hash(),
        };
        let response: ActivationResponse = self
            .root
            .request_async(&activator, request, self.config.activation_timeout())
            .await?;
        match response {
            ActivationResponse { pid: Some(pid), .. } => {
                tracing::debug!(identity = %identity, pid = %pid, "activation resolved");
                self.pid_cache.set(identity.clone(), pid.clone());
                Ok(pid)
            }
            ActivationResponse { failure, .. } => Err(ClusterError::ActivationDenied {
                identity: identity.clone(),
                reason: failure.unwrap_or(ActivationFailure::SpawnFailed),
            }),
        }
    }

    /// `get_pid` with the request retry policy, for pid-based delivery.
    async fn resolve(&self, identity: &ClusterIdentity) -> Option<Pid> {
        let attempts = self.config.max_request_retries();
        for attempt in 1..=attempts {
            match self.get_pid(identity).await {
                Ok(pid) => return Some(pid),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tokio::time::sleep(self.config.retry_backoff() * attempt).await;
                }
                Err(err) => {
                    tracing::debug!(identity = %identity, error = %err, "cannot resolve activation");
                    return None;
                }
            }
        }
        None
    }
}

/// A running cluster member or client.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl Cluster {
    /// Join the cluster as a member hosting the configured kinds.
    pub async fn start_member(
        system: &ActorSystem,
        transport: Arc<dyn Transport>,
        config: ClusterConfig,
    ) -> Result<Self, ClusterError> {
        Self::start(system, transport, config, true).await
    }

    /// Join as a client: route requests, host nothing.
    pub async fn start_client(
        system: &ActorSystem,
        transport: Arc<dyn Transport>,
        config: ClusterConfig,
    ) -> Result<Self, ClusterError> {
        Self::start(system, transport, config, false).await
    }

    async fn start(
        system: &ActorSystem,
        transport: Arc<dyn Transport>,
        config: ClusterConfig,
        hosting: bool,
    ) -> Result<Self, ClusterError> {
        let serializers = Arc::clone(config.serializers());
        serializers.register::<GossipRequest>();
        serializers.register::<GossipResponse>();
        serializers.register::<ActivationRequest>();
        serializers.register::<ActivationResponse>();

        let remote_config =
            RemoteConfig::new(config.address()).with_endpoint(config.endpoint().clone());
        let remote = Remote::start(system, transport, remote_config, serializers).await?;

        let kinds: Vec<String> = if hosting {
            config.kinds().keys().cloned().collect()
        } else {
            Vec::new()
        };
        let member = Member::new(config.address(), kinds).with_status(MemberStatus::Active);
        let member_list = Arc::new(MemberList::new(Arc::clone(system.event_stream())));
        let lookup = config.placement().build();
        let pid_cache = Arc::new(PidCache::new());
        let root = system.root();

        let activator = if hosting {
            let settings = ActivatorSettings {
                address: config.address().to_string(),
                member_id: member.id.clone(),
                kinds: Arc::clone(config.kinds()),
                lookup: Arc::clone(&lookup),
            };
            Some(root.spawn_named(activator_props(settings), ACTIVATOR_ACTOR)?)
        } else {
            None
        };

        let mut subscriptions = Vec::new();
        {
            let lookup = Arc::clone(&lookup);
            let pid_cache = Arc::clone(&pid_cache);
            let root = root.clone();
            let activator = activator.clone();
            subscriptions.push(system.event_stream().subscribe::<ClusterTopology, _>(
                move |topology| {
                    lookup.rebuild(topology);
                    for member in &topology.left {
                        pid_cache.invalidate_member(&member.address);
                    }
                    if let Some(activator) = &activator {
                        root.send(activator, TopologyChanged);
                    }
                },
            ));
        }
        {
            let pid_cache = Arc::clone(&pid_cache);
            subscriptions.push(system.event_stream().subscribe::<EndpointTerminated, _>(
                move |event| {
                    let dropped = pid_cache.invalidate_member(&event.address);
                    if dropped > 0 {
                        tracing::debug!(address = %event.address, dropped, "endpoint terminated, pids invalidated");
                    }
                },
            ));
        }

        let gossip = Arc::new(GossipSnapshot::default());
        let provider = config.membership().monitor_member_status_changes().await;
        let settings = GossiperSettings {
            local: member.clone(),
            config: config.gossip().clone(),
            member_list: Arc::clone(&member_list),
            snapshot: Arc::clone(&gossip),
            provider,
        };
        let gossiper = root.spawn_named(gossiper_props(settings), GOSSIP_ACTOR)?;
        config.membership().register_member(member.clone()).await?;

        let inner = Arc::new(ClusterInner {
            system: system.clone(),
            root,
            remote,
            config,
            member,
            member_list,
            lookup,
            pid_cache,
            gossip,
            gossiper,
            activator,
            subscriptions: Mutex::new(subscriptions),
            shutdown: CancellationToken::new(),
        });

        let delivery: Arc<dyn Process> = ClusterDeliveryProcess::new(Arc::downgrade(&inner));
        system.registry().register_address_resolver(Arc::new(move |pid: &Pid| {
            if pid.address == CLUSTER_ADDRESS {
                Some(Arc::clone(&delivery))
            } else {
                None
            }
        }));

        tracing::info!(
            cluster = %inner.config.name(),
            member = %inner.member,
            hosting,
            "cluster started"
        );
        Ok(Self { inner })
    }

    /// Send `message` to a virtual actor and wait for a reply of type `R`.
    pub async fn request<R, M>(&self, identity: &str, kind: &str, message: M) -> Result<R, ClusterError>
    where
        R: Any + Send,
        M: Any + Send + Clone,
    {
        let timeout = self.inner.config.request_timeout();
        self.request_with_timeout(identity, kind, message, timeout)
            .await
    }

    /// [`request`](Self::request) with an explicit per-attempt deadline.
    pub async fn request_with_timeout<R, M>(
        &self,
        identity: &str,
        kind: &str,
        message: M,
        timeout: Duration,
    ) -> Result<R, ClusterError>
    where
        R: Any + Send,
        M: Any + Send + Clone,
    {
        let identity = ClusterIdentity::new(identity, kind);
        let attempts = self.inner.config.max_request_retries();
        let mut last = None;
        for attempt in 1..=attempts {
            if self.inner.shutdown.is_cancelled() {
                return Err(ClusterError::ShuttingDown);
            }
            match self.try_request::<R, M>(&identity, message.clone(), timeout).await {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_retryable() => {
                    tracing::debug!(identity = %identity, attempt, error = %err, "cluster request failed, retrying");
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
            if attempt < attempts {
                tokio::time::sleep(self.inner.config.retry_backoff() * attempt).await;
            }
        }
        let last = match last {
            Some(err) => err,
            None => ClusterError::NoOwner { identity },
        };
        Err(ClusterError::RetriesExhausted {
            attempts,
            last: Box::new(last),
        })
    }

    async fn try_request<R, M>(
        &self,
        identity: &ClusterIdentity,
        message: M,
        timeout: Duration,
    ) -> Result<R, ClusterError>
    where
        R: Any + Send,
        M: Any + Send,
    {
        let pid = self.inner.get_pid(identity).await?;
        match self.inner.root.request_async::<R, M>(&pid, message, timeout).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                if matches!(err, RequestError::DeadLetter { .. } | RequestError::Timeout { .. }) {
                    self.inner.pid_cache.remove_if_pid(identity, &pid);
                }
                Err(err.into())
            }
        }
    }

    /// Pid of the live activation, activating it if needed. One attempt.
    pub async fn get_pid(&self, identity: &str, kind: &str) -> Result<Pid, ClusterError> {
        self.inner
            .get_pid(&ClusterIdentity::new(identity, kind))
            .await
    }

    /// A pid that routes every message through the cluster to the current
    /// activation of `identity`.
    pub fn pid_for(&self, identity: &str, kind: &str) -> Pid {
        Pid::new(CLUSTER_ADDRESS, ClusterIdentity::new(identity, kind).to_string())
    }

    /// Identities activated on this member.
    pub async fn activations(&self) -> Result<Vec<ClusterIdentity>, ClusterError> {
        let Some(activator) = &self.inner.activator else {
            return Ok(Vec::new());
        };
        let Activations(live): Activations = self
            .inner
            .root
            .request_async(activator, ListActivations, self.inner.config.request_timeout())
            .await?;
        Ok(live)
    }

    /// This member.
    pub fn member(&self) -> &Member {
        &self.inner.member
    }

    /// The member list.
    pub fn member_list(&self) -> &Arc<MemberList> {
        &self.inner.member_list
    }

    /// Latest merged gossip state.
    pub fn gossip_state(&self) -> Arc<GossipState> {
        self.inner.gossip.load()
    }

    /// Caller-side pid cache.
    pub fn pid_cache(&self) -> &Arc<PidCache> {
        &self.inner.pid_cache
    }

    /// The identity lookup in use.
    pub fn lookup(&self) -> &Arc<dyn IdentityLookup> {
        &self.inner.lookup
    }

    /// The actor system this member runs on.
    pub fn system(&self) -> &ActorSystem {
        &self.inner.system
    }

    /// The remote layer.
    pub fn remote(&self) -> &Remote {
        &self.inner.remote
    }

    /// Configuration this member was started with.
    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    /// Leave the cluster and shut the actor system down.
    ///
    /// A graceful shutdown announces `Left` through gossip, deregisters
    /// from the provider and stops local activations before going offline,
    /// so peers drop this member without waiting for heartbeat expiry.
    pub async fn shutdown(&self, graceful: bool) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        let inner = &self.inner;
        tracing::info!(member = %inner.member, graceful, "cluster member shutting down");

        if graceful {
            let leave = inner
                .root
                .request_async::<LeaveAck, _>(&inner.gossiper, Leave, inner.config.request_timeout())
                .await;
            if let Err(err) = leave {
                tracing::warn!(error = %err, "leave announcement failed");
            }
            if let Err(err) = inner.config.membership().deregister_member(&inner.member.id).await {
                tracing::warn!(error = %err, "deregistration failed");
            }
            if let Some(activator) = &inner.activator {
                if let Err(err) = inner.root.stop_future(activator).await {
                    tracing::warn!(error = %err, "activator did not stop cleanly");
                }
            }
            // let queued gossip reach the peers
            tokio::time::sleep(inner.config.gossip().interval).await;
        }

        let subscriptions: Vec<Subscription> = inner.subscriptions.lock().drain(..).collect();
        for subscription in subscriptions {
            inner.system.event_stream().unsubscribe(subscription);
        }
        inner.system.shutdown();
        inner.remote.shutdown().await;
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("member", &self.inner.member)
            .finish_non_exhaustive()
    }
}
