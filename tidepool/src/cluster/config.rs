//! Cluster configuration.
//!
//! ```rust,ignore
//! let config = ClusterConfig::builder("shop", "127.0.0.1:4501")
//!     .membership(provider)
//!     .kind(ClusterKind::new("OrderActor", order_props))
//!     .gossip(GossipConfig::local_network())
//!     .build()?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::gossip::GossipConfig;
use super::placement::PlacementStrategy;
use super::{ClusterKind, MembershipProvider};
use crate::remote::{EndpointConfig, SerializerRegistry};

/// Errors from building a [`ClusterConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterConfigError {
    /// No membership provider was set.
    #[error("cluster config requires a membership provider")]
    MissingMembership,
    /// The cluster name is empty.
    #[error("cluster name must not be empty")]
    EmptyName,
    /// The member address is empty.
    #[error("member address must not be empty")]
    EmptyAddress,
    /// Two kinds share a name.
    #[error("kind registered twice: {kind}")]
    DuplicateKind {
        /// Kind name.
        kind: String,
    },
    /// A kind name is empty or contains `/`, so cluster pids could not
    /// carry it.
    #[error("invalid kind name: {kind:?}")]
    InvalidKindName {
        /// Kind name.
        kind: String,
    },
    /// Partition placement needs at least one partition.
    #[error("partition count must be positive")]
    ZeroPartitions,
}

/// Settings of one cluster member.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    name: String,
    address: String,
    membership: Arc<dyn MembershipProvider>,
    kinds: Arc<HashMap<String, ClusterKind>>,
    placement: PlacementStrategy,
    gossip: GossipConfig,
    endpoint: EndpointConfig,
    serializers: Arc<SerializerRegistry>,
    request_timeout: Duration,
    activation_timeout: Duration,
    max_request_retries: u32,
    retry_backoff: Duration,
}

impl ClusterConfig {
    /// Start building the config of a member listening on `address`.
    pub fn builder(name: impl Into<String>, address: impl Into<String>) -> ClusterConfigBuilder {
        ClusterConfigBuilder {
            name: name.into(),
            address: address.into(),
            membership: None,
            kinds: Vec::new(),
            placement: PlacementStrategy::default(),
            gossip: GossipConfig::default(),
            endpoint: EndpointConfig::default(),
            serializers: None,
            request_timeout: Duration::from_secs(5),
            activation_timeout: Duration::from_secs(5),
            max_request_retries: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }

    /// Cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address this member listens on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The shared membership provider.
    pub fn membership(&self) -> &Arc<dyn MembershipProvider> {
        &self.membership
    }

    /// Registered kinds by name.
    pub fn kinds(&self) -> &Arc<HashMap<String, ClusterKind>> {
        &self.kinds
    }

    /// Placement strategy.
    pub fn placement(&self) -> PlacementStrategy {
        self.placement
    }

    /// Gossip timing.
    pub fn gossip(&self) -> &GossipConfig {
        &self.gossip
    }

    /// Endpoint retry settings.
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Serializers for messages crossing members.
    pub fn serializers(&self) -> &Arc<SerializerRegistry> {
        &self.serializers
    }

    /// Default deadline of one request attempt.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Deadline of one activation request.
    pub fn activation_timeout(&self) -> Duration {
        self.activation_timeout
    }

    /// Attempts per cluster request.
    pub fn max_request_retries(&self) -> u32 {
        self.max_request_retries
    }

    /// Base delay between attempts, multiplied by the attempt number.
    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }
}

/// Builder for [`ClusterConfig`].
pub struct ClusterConfigBuilder {
    name: String,
    address: String,
    membership: Option<Arc<dyn MembershipProvider>>,
    kinds: Vec<ClusterKind>,
    placement: PlacementStrategy,
    gossip: GossipConfig,
    endpoint: EndpointConfig,
    serializers: Option<Arc<SerializerRegistry>>,
    request_timeout: Duration,
    activation_timeout: Duration,
    max_request_retries: u32,
    retry_backoff: Duration,
}

impl ClusterConfigBuilder {
    /// Set the membership provider.
    pub fn membership(mut self, membership: Arc<dyn MembershipProvider>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Register a kind this member hosts.
    pub fn kind(mut self, kind: ClusterKind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Set the placement strategy.
    pub fn placement(mut self, placement: PlacementStrategy) -> Self {
        self.placement = placement;
        self
    }

    /// Set gossip timing.
    pub fn gossip(mut self, gossip: GossipConfig) -> Self {
        self.gossip = gossip;
        self
    }

    /// Set endpoint retry settings.
    pub fn endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Use a populated serializer registry.
    pub fn serializers(mut self, serializers: Arc<SerializerRegistry>) -> Self {
        self.serializers = Some(serializers);
        self
    }

    /// Set the default per-attempt request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the activation request deadline.
    pub fn activation_timeout(mut self, timeout: Duration) -> Self {
        self.activation_timeout = timeout;
        self
    }

    /// Set attempts per cluster request.
    pub fn max_request_retries(mut self, retries: u32) -> Self {
        self.max_request_retries = retries;
        self
    }

    /// Set the base delay between attempts.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the membership provider is missing, a name is
    /// empty, a kind name contains `/`, or a kind is registered twice.
    pub fn build(self) -> Result<ClusterConfig, ClusterConfigError> {
        let membership = self.membership.ok_or(ClusterConfigError::MissingMembership)?;
        if self.name.is_empty() {
            return Err(ClusterConfigError::EmptyName);
        }
        if self.address.is_empty() {
            return Err(ClusterConfigError::EmptyAddress);
        }
        if let PlacementStrategy::Partition { partition_count: 0 } = self.placement {
            return Err(ClusterConfigError::ZeroPartitions);
        }
        let mut kinds = HashMap::new();
        for kind in self.kinds {
            let name = kind.name().to_string();
            if name.is_empty() || name.contains('/') {
                return Err(ClusterConfigError::InvalidKindName { kind: name });
            }
            if kinds.insert(name.clone(), kind).is_some() {
                return Err(ClusterConfigError::DuplicateKind { kind: name });
            }
        }

        Ok(ClusterConfig {
            name: self.name,
            address: self.address,
            membership,
            kinds: Arc::new(kinds),
            placement: self.placement,
            gossip: self.gossip,
            endpoint: self.endpoint,
            serializers: self
                .serializers
                .unwrap_or_else(|| Arc::new(SerializerRegistry::new())),
            request_timeout: self.request_timeout,
            activation_timeout: self.activation_timeout,
            max_request_retries: self.max_request_retries.max(1),
            retry_backoff: self.retry_backoff,
        })
    }
}
