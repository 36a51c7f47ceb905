//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tidepool::{
    Actor, ActorContext, ActorError, ActorSystem, ActorSystemConfig, Cluster, ClusterConfig,
    ClusterInit, ClusterKind, EndpointConfig, GossipConfig, InMemoryMembershipProvider,
    InMemoryNetwork, Message, PlacementStrategy, Props, SerializerRegistry,
};

pub const M1: &str = "127.0.0.1:4501";
pub const M2: &str = "127.0.0.1:4502";
pub const M3: &str = "127.0.0.1:4503";

pub const ORDER_KIND: &str = "OrderActor";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

pub fn system() -> ActorSystem {
    ActorSystem::new(ActorSystemConfig::default())
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Adds an amount to the order total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddItem(pub u32);

/// Reply to [`AddItem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotal {
    pub total: u32,
    pub host: String,
}

/// Activation count per hosting address.
pub type Activations = Arc<Mutex<HashMap<String, usize>>>;

pub fn activations() -> Activations {
    Arc::new(Mutex::new(HashMap::new()))
}

pub fn total_activations(activations: &Activations) -> usize {
    activations.lock().values().sum()
}

pub fn activations_on(activations: &Activations, address: &str) -> usize {
    activations.lock().get(address).copied().unwrap_or(0)
}

/// Virtual actor keeping a running order total.
pub struct OrderActor {
    total: u32,
    activations: Activations,
}

#[async_trait]
impl Actor for OrderActor {
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        if let Some(ClusterInit { .. }) = message.downcast_ref::<ClusterInit>() {
            *self
                .activations
                .lock()
                .entry(ctx.self_pid().address.clone())
                .or_default() += 1;
            return Ok(());
        }
        if let Some(AddItem(amount)) = message.downcast_ref::<AddItem>() {
            self.total += amount;
            ctx.respond(OrderTotal {
                total: self.total,
                host: ctx.self_pid().address.clone(),
            });
        }
        Ok(())
    }
}

pub fn order_kind(activations: &Activations) -> ClusterKind {
    let activations = Arc::clone(activations);
    ClusterKind::new(
        ORDER_KIND,
        Props::from_producer(move || OrderActor {
            total: 0,
            activations: Arc::clone(&activations),
        }),
    )
}

pub fn serializers() -> Arc<SerializerRegistry> {
    let serializers = Arc::new(SerializerRegistry::new());
    serializers.register::<AddItem>();
    serializers.register::<OrderTotal>();
    serializers
}

/// Shared in-process infrastructure of a test cluster.
pub struct TestCluster {
    pub network: Arc<InMemoryNetwork>,
    pub provider: Arc<InMemoryMembershipProvider>,
    pub activations: Activations,
    pub placement: PlacementStrategy,
    pub gossip: GossipConfig,
}

impl TestCluster {
    pub fn new() -> Self {
        Self {
            network: InMemoryNetwork::new(),
            provider: Arc::new(InMemoryMembershipProvider::new()),
            activations: activations(),
            placement: PlacementStrategy::default(),
            gossip: GossipConfig::local_network(),
        }
    }

    pub fn with_placement(mut self, placement: PlacementStrategy) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_gossip(mut self, gossip: GossipConfig) -> Self {
        self.gossip = gossip;
        self
    }

    pub fn config(&self, address: &str, kind: ClusterKind) -> ClusterConfig {
        ClusterConfig::builder("test-cluster", address)
            .membership(self.provider.clone())
            .kind(kind)
            .placement(self.placement)
            .gossip(self.gossip.clone())
            .endpoint(EndpointConfig::local_network())
            .serializers(serializers())
            .request_timeout(Duration::from_secs(2))
            .retry_backoff(Duration::from_millis(20))
            .build()
            .expect("valid cluster config")
    }

    pub async fn start_with(&self, address: &str, kind: ClusterKind) -> Cluster {
        let config = self.config(address, kind);
        Cluster::start_member(&system(), self.network.transport(), config)
            .await
            .expect("member starts")
    }

    pub async fn start(&self, address: &str) -> Cluster {
        self.start_with(address, order_kind(&self.activations)).await
    }
}

/// Wait until every member sees exactly `addresses` as its member list.
pub async fn converged(members: &[&Cluster], addresses: &[&str]) -> bool {
    eventually(Duration::from_secs(5), || {
        members.iter().all(|member| {
            let list = member.member_list();
            list.members().len() == addresses.len()
                && addresses.iter().all(|address| list.contains_address(address))
        })
    })
    .await
}
