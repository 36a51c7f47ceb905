//! The point-to-point channel between actor systems.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::{RemoteEnvelope, TransportError};

/// Delivers envelopes between addresses.
///
/// Implementations only need best-effort point-to-point delivery: the
/// endpoint writer handles retries, and ordering per destination is kept by
/// sending from a single task.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start accepting envelopes for `address` into `inbound`.
    async fn listen(
        &self,
        address: &str,
        inbound: mpsc::UnboundedSender<RemoteEnvelope>,
    ) -> Result<(), TransportError>;

    /// Send one envelope to `address`.
    async fn send(&self, address: &str, envelope: RemoteEnvelope) -> Result<(), TransportError>;

    /// Stop accepting envelopes for `address`.
    async fn close(&self, address: &str);
}

/// An in-process network joining any number of [`InMemoryTransport`]s.
///
/// Addresses can be disconnected to simulate a crashed or partitioned
/// member: while disconnected, every send to or from the address fails.
#[derive(Debug, Default)]
pub struct InMemoryNetwork {
    listeners: DashMap<String, mpsc::UnboundedSender<RemoteEnvelope>>,
    disconnected: RwLock<HashSet<String>>,
}

impl InMemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport attached to this network.
    pub fn transport(self: &Arc<Self>) -> Arc<InMemoryTransport> {
        Arc::new(InMemoryTransport {
            network: Arc::clone(self),
            local: OnceLock::new(),
        })
    }

    /// Cut `address` off from everyone.
    pub fn disconnect(&self, address: &str) {
        tracing::debug!(address, "network disconnect");
        self.disconnected.write().insert(address.to_string());
    }

    /// Undo [`disconnect`](Self::disconnect).
    pub fn reconnect(&self, address: &str) {
        tracing::debug!(address, "network reconnect");
        self.disconnected.write().remove(address);
    }

    /// Whether `address` is currently cut off.
    pub fn is_disconnected(&self, address: &str) -> bool {
        self.disconnected.read().contains(address)
    }

    fn deliver(&self, from: Option<&str>, to: &str, envelope: RemoteEnvelope) -> Result<(), TransportError> {
        let unreachable = || TransportError::Unreachable {
            address: to.to_string(),
        };
        if self.is_disconnected(to) || from.is_some_and(|from| self.is_disconnected(from)) {
            return Err(unreachable());
        }
        let inbound = self
            .listeners
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(unreachable)?;
        inbound.send(envelope).map_err(|_| unreachable())
    }
}

/// One system's attachment to an [`InMemoryNetwork`].
#[derive(Debug)]
pub struct InMemoryTransport {
    network: Arc<InMemoryNetwork>,
    local: OnceLock<String>,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn listen(
        &self,
        address: &str,
        inbound: mpsc::UnboundedSender<RemoteEnvelope>,
    ) -> Result<(), TransportError> {
        match self.network.listeners.entry(address.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::AddressInUse {
                    address: address.to_string(),
                })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(inbound);
            }
        }
        let _ = self.local.set(address.to_string());
        Ok(())
    }

    async fn send(&self, address: &str, envelope: RemoteEnvelope) -> Result<(), TransportError> {
        self.network
            .deliver(self.local.get().map(String::as_str), address, envelope)
    }

    async fn close(&self, address: &str) {
        self.network.listeners.remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Pid;
    use crate::remote::RemotePayload;

    fn envelope(to: &str) -> RemoteEnvelope {
        RemoteEnvelope::new(Pid::new(to, "echo"), RemotePayload::Stop)
    }

    #[tokio::test]
    async fn delivers_between_listeners() {
        let network = InMemoryNetwork::new();
        let a = network.transport();
        let b = network.transport();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        a.listen("a:1", tx_a).await.expect("listen a");
        b.listen("b:1", tx_b).await.expect("listen b");

        a.send("b:1", envelope("b:1")).await.expect("send");
        assert_eq!(rx_b.recv().await.expect("delivered"), envelope("b:1"));
    }

    #[tokio::test]
    async fn disconnected_address_is_unreachable_both_ways() {
        let network = InMemoryNetwork::new();
        let a = network.transport();
        let b = network.transport();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        a.listen("a:1", tx_a).await.expect("listen a");
        b.listen("b:1", tx_b).await.expect("listen b");

        network.disconnect("b:1");
        assert!(a.send("b:1", envelope("b:1")).await.is_err());
        assert!(b.send("a:1", envelope("a:1")).await.is_err());

        network.reconnect("b:1");
        assert!(a.send("b:1", envelope("b:1")).await.is_ok());
    }

    #[tokio::test]
    async fn address_can_only_be_bound_once() {
        let network = InMemoryNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        network.transport().listen("a:1", tx.clone()).await.expect("first");
        let err = network.transport().listen("a:1", tx).await.expect_err("second");
        assert_eq!(err, TransportError::AddressInUse { address: "a:1".into() });
    }
}
