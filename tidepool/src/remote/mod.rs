//! Remote plumbing: reach pids hosted by other actor systems.
//!
//! [`Remote::start`] binds the system to an address on a [`Transport`] and
//! installs an address resolver, so any pid carrying a foreign address
//! resolves to a remote reference. User messages are encoded by the
//! [`SerializerRegistry`]; watch, unwatch, stop and terminate notices are
//! carried as dedicated payloads.
//!
//! Each destination address gets one writer task. Its sends are retried
//! with exponential backoff; once more than `max_retries` failures land in
//! `retry_window`, the endpoint is declared unreachable. Local watchers of
//! pids on that address receive `Terminated(AddressTerminated)` and local
//! requesters of undelivered messages receive `DeadLetterResponse`.

mod config;
mod endpoint;
mod error;
mod messages;
mod process;
mod serialization;
mod transport;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::actor::{ActorSystem, Pid, Process};

pub use config::{EndpointConfig, RemoteConfig};
pub use endpoint::{EndpointConnected, EndpointTerminated};
pub use error::{CodecError, RemoteError, TransportError};
pub use messages::{RemoteEnvelope, RemotePayload};
pub use serialization::{JsonCodec, MessageCodec, SerializerRegistry};
pub use transport::{InMemoryNetwork, InMemoryTransport, Transport};

use endpoint::EndpointManager;
use process::RemoteProcess;

/// A running remote layer for one actor system.
#[derive(Clone)]
pub struct Remote {
    manager: Arc<EndpointManager>,
}

impl Remote {
    /// Listen on `config.address` and make foreign pids reachable.
    pub async fn start(
        system: &ActorSystem,
        transport: Arc<dyn Transport>,
        config: RemoteConfig,
        serializers: Arc<SerializerRegistry>,
    ) -> Result<Self, RemoteError> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        transport.listen(&config.address, inbound_tx).await?;
        system.registry().set_address(config.address.clone());

        let manager = Arc::new(EndpointManager::new(
            system.clone(),
            transport,
            config,
            serializers,
        ));
        let remote_process: Arc<dyn Process> = Arc::new(RemoteProcess::new(Arc::downgrade(&manager)));
        system
            .registry()
            .register_address_resolver(Arc::new(move |_: &Pid| Some(Arc::clone(&remote_process))));

        tokio::spawn(Arc::clone(&manager).run_inbound(inbound_rx));
        tracing::info!(address = %manager.address(), "remote listening");
        Ok(Self { manager })
    }

    /// Address this system listens on.
    pub fn address(&self) -> &str {
        self.manager.address()
    }

    /// Serializers used for user payloads.
    pub fn serializers(&self) -> &Arc<SerializerRegistry> {
        self.manager.serializers()
    }

    /// The local actor system.
    pub fn system(&self) -> &ActorSystem {
        self.manager.system()
    }

    /// Stop accepting inbound traffic and release the address.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
