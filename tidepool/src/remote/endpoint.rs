//! Per-address writers, inbound delivery and endpoint failure handling.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    EndpointConfig, RemoteConfig, RemoteEnvelope, RemotePayload, SerializerRegistry, Transport,
};
use crate::actor::{
    ActorSystem, DeadLetterResponse, MessageEnvelope, Pid, SystemMessage, Terminated,
    TerminatedReason, LOCAL_ADDRESS,
};

/// Published when the first envelope reaches an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConnected {
    /// The remote address.
    pub address: String,
}

/// Published when an address exhausted its retry budget.
///
/// Every local watcher of a pid on that address has been sent
/// `Terminated(AddressTerminated)` by the time this is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTerminated {
    /// The remote address.
    pub address: String,
}

struct EndpointWriter {
    generation: u64,
    tx: mpsc::UnboundedSender<RemoteEnvelope>,
}

/// Backoff plus rolling-window failure accounting for one writer.
#[derive(Debug)]
struct RetryState {
    config: EndpointConfig,
    delay: Duration,
    failures: VecDeque<Instant>,
}

impl RetryState {
    fn new(config: EndpointConfig) -> Self {
        Self {
            delay: config.initial_backoff,
            config,
            failures: VecDeque::new(),
        }
    }

    /// Record a failure at `now`. Returns true once the budget is exceeded.
    fn record_failure(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.failures.front() {
            if now.duration_since(*oldest) > self.config.retry_window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        self.failures.push_back(now);
        self.failures.len() > self.config.max_retries as usize
    }

    /// Delay before the next attempt, doubling up to `max_backoff`.
    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = std::cmp::min(self.delay * 2, self.config.max_backoff);
        delay
    }

    fn succeeded(&mut self) {
        self.delay = self.config.initial_backoff;
    }
}

/// Outbound and inbound traffic of one remote-enabled system.
pub(crate) struct EndpointManager {
    system: ActorSystem,
    transport: Arc<dyn Transport>,
    config: RemoteConfig,
    serializers: Arc<SerializerRegistry>,
    endpoints: DashMap<String, EndpointWriter>,
    // address -> (remote watchee, local watcher)
    watches: Mutex<HashMap<String, BTreeSet<(Pid, Pid)>>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl EndpointManager {
    pub(crate) fn new(
        system: ActorSystem,
        transport: Arc<dyn Transport>,
        config: RemoteConfig,
        serializers: Arc<SerializerRegistry>,
    ) -> Self {
        Self {
            system,
            transport,
            config,
            serializers,
            endpoints: DashMap::new(),
            watches: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn address(&self) -> &str {
        &self.config.address
    }

    pub(crate) fn serializers(&self) -> &Arc<SerializerRegistry> {
        &self.serializers
    }

    pub(crate) fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Encode and queue a user message for `target`.
    pub(crate) fn send_user(self: &Arc<Self>, target: &Pid, envelope: MessageEnvelope) {
        let (type_name, bytes) = match self.serializers.serialize(&envelope.message) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(target = %target, error = %err, "cannot serialize remote message");
                self.system
                    .registry()
                    .dead_letter()
                    .send_user_message(target, envelope);
                return;
            }
        };
        let remote = RemoteEnvelope {
            target: target.clone(),
            sender: envelope.sender.map(|sender| self.publishable(sender)),
            headers: envelope.headers,
            payload: RemotePayload::User { type_name, bytes },
        };
        self.send(remote);
    }

    /// Queue a system message for `target`.
    pub(crate) fn send_system(self: &Arc<Self>, target: &Pid, message: SystemMessage) {
        let payload = match message {
            SystemMessage::Watch { watcher } => {
                let watcher = self.publishable(watcher);
                self.record_watch(target, &watcher);
                RemotePayload::Watch { watcher }
            }
            SystemMessage::Unwatch { watcher } => {
                let watcher = self.publishable(watcher);
                self.forget_watch(target, &watcher);
                RemotePayload::Unwatch { watcher }
            }
            SystemMessage::Terminated(terminated) => RemotePayload::Terminated(Terminated {
                who: self.publishable(terminated.who),
                why: terminated.why,
            }),
            SystemMessage::Stop => RemotePayload::Stop,
            other => {
                tracing::debug!(target = %target, message = ?other, "system message not forwarded to remote");
                return;
            }
        };
        self.send(RemoteEnvelope::new(target.clone(), payload));
    }

    fn send(self: &Arc<Self>, envelope: RemoteEnvelope) {
        if self.shutdown.is_cancelled() {
            self.bounce(envelope);
            return;
        }
        let address = envelope.target.address.clone();
        let tx = match self.endpoints.entry(address.clone()) {
            Entry::Occupied(entry) => entry.get().tx.clone(),
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = mpsc::unbounded_channel();
                slot.insert(EndpointWriter {
                    generation,
                    tx: tx.clone(),
                });
                tracing::debug!(address = %address, generation, "endpoint writer started");
                tokio::spawn(Arc::clone(self).run_writer(address, generation, rx));
                tx
            }
        };
        if let Err(mpsc::error::SendError(envelope)) = tx.send(envelope) {
            self.bounce(envelope);
        }
    }

    async fn run_writer(
        self: Arc<Self>,
        address: String,
        generation: u64,
        mut rx: mpsc::UnboundedReceiver<RemoteEnvelope>,
    ) {
        let mut retry = RetryState::new(self.config.endpoint.clone());
        let mut connected = false;
        loop {
            let envelope = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                envelope = rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => return,
                },
            };
            loop {
                match self.transport.send(&address, envelope.clone()).await {
                    Ok(()) => {
                        retry.succeeded();
                        if !connected {
                            connected = true;
                            tracing::debug!(address = %address, "endpoint connected");
                            self.system.event_stream().publish(&EndpointConnected {
                                address: address.clone(),
                            });
                        }
                        break;
                    }
                    Err(err) => {
                        if retry.record_failure(Instant::now()) {
                            tracing::warn!(address = %address, error = %err, "endpoint unreachable, terminating");
                            self.terminate(&address, generation, envelope, rx);
                            return;
                        }
                        let delay = retry.next_delay();
                        tracing::debug!(address = %address, error = %err, ?delay, "endpoint send failed, retrying");
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    fn terminate(
        &self,
        address: &str,
        generation: u64,
        failed: RemoteEnvelope,
        mut rx: mpsc::UnboundedReceiver<RemoteEnvelope>,
    ) {
        self.endpoints
            .remove_if(address, |_, writer| writer.generation == generation);
        rx.close();
        self.bounce(failed);
        while let Ok(envelope) = rx.try_recv() {
            self.bounce(envelope);
        }

        let watches = self.watches.lock().remove(address).unwrap_or_default();
        for (watchee, watcher) in watches {
            self.notify_address_terminated(watchee, &watcher);
        }
        self.system.event_stream().publish(&EndpointTerminated {
            address: address.to_string(),
        });
    }

    /// Answer an envelope that will never be delivered.
    fn bounce(&self, envelope: RemoteEnvelope) {
        match envelope.payload {
            RemotePayload::User { type_name, .. } => {
                tracing::debug!(target = %envelope.target, message = %type_name, "undeliverable remote message");
                let Some(sender) = envelope.sender else {
                    return;
                };
                if !self.system.config().dead_letter_response
                    || type_name == std::any::type_name::<DeadLetterResponse>()
                    || !self.system.registry().is_local(&sender)
                {
                    return;
                }
                self.system.send_envelope(
                    &sender,
                    MessageEnvelope::new(DeadLetterResponse {
                        target: envelope.target,
                    }),
                );
            }
            RemotePayload::Watch { watcher } => {
                if self.forget_watch(&envelope.target, &watcher) {
                    self.notify_address_terminated(envelope.target, &watcher);
                }
            }
            RemotePayload::Unwatch { .. } | RemotePayload::Terminated(_) | RemotePayload::Stop => {}
        }
    }

    fn notify_address_terminated(&self, watchee: Pid, watcher: &Pid) {
        let terminated = Terminated {
            who: watchee,
            why: TerminatedReason::AddressTerminated,
        };
        self.system
            .send_system(watcher, SystemMessage::Terminated(terminated));
    }

    fn record_watch(&self, watchee: &Pid, watcher: &Pid) {
        self.watches
            .lock()
            .entry(watchee.address.clone())
            .or_default()
            .insert((watchee.clone(), watcher.clone()));
    }

    fn forget_watch(&self, watchee: &Pid, watcher: &Pid) -> bool {
        let mut watches = self.watches.lock();
        let Some(entries) = watches.get_mut(&watchee.address) else {
            return false;
        };
        let removed = entries.remove(&(watchee.clone(), watcher.clone()));
        if entries.is_empty() {
            watches.remove(&watchee.address);
        }
        removed
    }

    /// Give pids minted before the address was bound a routable address.
    fn publishable(&self, pid: Pid) -> Pid {
        if pid.address == LOCAL_ADDRESS {
            Pid::new(self.config.address.clone(), pid.id)
        } else {
            pid
        }
    }

    fn localized(&self, pid: Pid) -> Pid {
        if pid.address == self.config.address {
            pid
        } else if self.system.registry().is_local(&pid) {
            Pid::new(self.config.address.clone(), pid.id)
        } else {
            pid
        }
    }

    pub(crate) async fn run_inbound(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<RemoteEnvelope>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => self.deliver(envelope),
                    None => break,
                },
            }
        }
        tracing::debug!(address = %self.config.address, "remote inbound stopped");
    }

    fn deliver(&self, envelope: RemoteEnvelope) {
        let target = self.localized(envelope.target);
        match envelope.payload {
            RemotePayload::User { type_name, bytes } => {
                match self.serializers.deserialize(&type_name, &bytes) {
                    Ok(message) => {
                        let local = MessageEnvelope {
                            message,
                            sender: envelope.sender,
                            headers: envelope.headers,
                        };
                        self.system.send_envelope(&target, local);
                    }
                    Err(err) => {
                        tracing::warn!(target = %target, message = %type_name, error = %err, "cannot deserialize remote message");
                    }
                }
            }
            RemotePayload::Watch { watcher } => {
                self.system.send_system(&target, SystemMessage::Watch { watcher });
            }
            RemotePayload::Unwatch { watcher } => {
                self.system
                    .send_system(&target, SystemMessage::Unwatch { watcher });
            }
            RemotePayload::Terminated(terminated) => {
                self.forget_watch(&terminated.who, &target);
                self.system
                    .send_system(&target, SystemMessage::Terminated(terminated));
            }
            RemotePayload::Stop => {
                self.system.send_system(&target, SystemMessage::Stop);
            }
        }
    }

    pub(crate) async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.transport.close(&self.config.address).await;
        tracing::info!(address = %self.config.address, "remote stopped");
    }
}
