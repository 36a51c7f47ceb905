//! The actor system and its root context.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::context::ActorCell;
use super::future::{into_response, PendingReply};
use super::mailbox::Mailbox;
use super::process::ActorProcess;
use super::supervision::RootGuardian;
use super::{
    ActorContext, ActorSystemConfig, AnyMessage, DeadLetterEvent, DeadLetterMessage,
    DeadLetterProcess, DeadLetterResponse, Dispatcher, EventStream, Failure, MessageEnvelope,
    Pid, PoisonPill, ProcessRegistry, Props, RequestError, SpawnError, SystemMessage, Terminated,
    TerminatedReason, Throttle, TokioDispatcher,
};

struct SystemInner {
    config: ActorSystemConfig,
    events: Arc<EventStream>,
    registry: ProcessRegistry,
    dispatcher: Arc<dyn Dispatcher>,
    guardian: RootGuardian,
    shutdown: CancellationToken,
}

/// Owns the registry, event stream and dispatcher shared by every actor.
///
/// Cloning is cheap and yields a handle to the same system. Nothing here is
/// global: two systems in one process are fully independent.
#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<SystemInner>,
}

impl ActorSystem {
    /// Create a system dispatching onto the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: ActorSystemConfig) -> Self {
        let dispatcher = Arc::new(TokioDispatcher::current(config.throughput));
        Self::with_dispatcher(config, dispatcher)
    }

    /// Create a system with an explicit default dispatcher.
    pub fn with_dispatcher(config: ActorSystemConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let events = Arc::new(EventStream::new());
        let throttle = Throttle::new(
            config.dead_letter_throttle_count,
            config.dead_letter_throttle_interval,
        );
        let dead_letter = Arc::new(DeadLetterProcess::new(Arc::clone(&events), throttle));
        let inner = Arc::new(SystemInner {
            guardian: RootGuardian::new(Arc::clone(&config.root_supervisor)),
            registry: ProcessRegistry::new(dead_letter),
            events,
            dispatcher,
            shutdown: CancellationToken::new(),
            config,
        });

        let weak = Arc::downgrade(&inner);
        inner.events.subscribe::<DeadLetterEvent, _>(move |event| {
            if let Some(inner) = weak.upgrade() {
                ActorSystem { inner }.answer_dead_letter(event);
            }
        });
        Self { inner }
    }

    /// Context for spawning and messaging from outside any actor.
    pub fn root(&self) -> RootContext {
        RootContext {
            system: self.clone(),
        }
    }

    /// Configuration this system was built with.
    pub fn config(&self) -> &ActorSystemConfig {
        &self.inner.config
    }

    /// The process registry.
    pub fn registry(&self) -> &ProcessRegistry {
        &self.inner.registry
    }

    /// The event stream.
    pub fn event_stream(&self) -> &Arc<EventStream> {
        &self.inner.events
    }

    /// Address carried by local pids.
    pub fn address(&self) -> String {
        self.inner.registry.address()
    }

    /// Cancelled when [`shutdown`](Self::shutdown) is called.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop every local process and refuse new spawns.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        tracing::info!(address = %self.address(), "actor system shutting down");
        let address = self.address();
        for id in self.inner.registry.local_ids() {
            self.send_system(&Pid::new(address.clone(), id), SystemMessage::Stop);
        }
    }

    /// Deliver a user envelope to whatever `target` resolves to.
    pub fn send_envelope(&self, target: &Pid, envelope: MessageEnvelope) {
        self.inner
            .registry
            .get(target)
            .send_user_message(target, envelope);
    }

    pub(crate) fn send_system(&self, target: &Pid, message: SystemMessage) {
        self.inner
            .registry
            .get(target)
            .send_system_message(target, message);
    }

    pub(crate) fn spawn_actor(
        &self,
        props: &Props,
        id: String,
        parent: Option<Pid>,
    ) -> Result<Pid, SpawnError> {
        if self.is_shutting_down() {
            return Err(SpawnError::ShuttingDown);
        }
        let dispatcher = props
            .dispatcher()
            .unwrap_or_else(|| Arc::clone(&self.inner.dispatcher));
        let mailbox = Mailbox::new(props.mailbox(), dispatcher);
        let process = ActorProcess::new(Arc::clone(&mailbox), self.inner.registry.dead_letter());
        let pid = self.inner.registry.add(id, Arc::new(process))?;

        let ctx = ActorContext::new(self.clone(), props.clone(), pid.clone(), parent);
        let cell = ActorCell::new(props.produce(), ctx);
        mailbox.post_system(SystemMessage::Start);
        mailbox.register_invoker(Arc::new(cell));
        tracing::trace!(pid = %pid, "spawned");
        Ok(pid)
    }

    pub(crate) fn handle_root_failure(&self, failure: Failure) {
        self.inner.guardian.handle_failure(self, failure);
    }

    pub(crate) fn forget_root_child(&self, pid: &Pid) {
        self.inner.guardian.forget(pid);
    }

    fn answer_dead_letter(&self, event: &DeadLetterEvent) {
        match &event.message {
            DeadLetterMessage::User(message) => {
                if !self.inner.config.dead_letter_response || message.is::<DeadLetterResponse>() {
                    return;
                }
                if let Some(sender) = &event.sender {
                    let response = DeadLetterResponse {
                        target: event.pid.clone(),
                    };
                    self.send_envelope(sender, MessageEnvelope::new(response));
                }
            }
            DeadLetterMessage::System(SystemMessage::Watch { watcher }) => {
                let terminated = Terminated {
                    who: event.pid.clone(),
                    why: TerminatedReason::NotFound,
                };
                self.send_system(watcher, SystemMessage::Terminated(terminated));
            }
            DeadLetterMessage::System(_) => {}
        }
    }
}

impl fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorSystem")
            .field("address", &self.address())
            .field("processes", &self.inner.registry.len())
            .finish()
    }
}

/// Spawning and messaging from outside any actor.
#[derive(Clone, Debug)]
pub struct RootContext {
    system: ActorSystem,
}

impl RootContext {
    /// The owning system.
    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Spawn a top-level actor with a generated name.
    pub fn spawn(&self, props: Props) -> Result<Pid, SpawnError> {
        let id = self.system.registry().next_id();
        self.system.spawn_actor(&props, id, None)
    }

    /// Spawn a top-level actor under `name`.
    pub fn spawn_named(&self, props: Props, name: &str) -> Result<Pid, SpawnError> {
        self.system.spawn_actor(&props, name.to_string(), None)
    }

    /// Fire-and-forget send.
    pub fn send<T: Any + Send>(&self, target: &Pid, message: T) {
        self.system.send_envelope(target, MessageEnvelope::new(message));
    }

    /// Send with an explicit sender for replies.
    pub fn send_with_sender<T: Any + Send>(&self, target: &Pid, message: T, sender: &Pid) {
        let envelope = MessageEnvelope::new(message).with_sender(Some(sender.clone()));
        self.system.send_envelope(target, envelope);
    }

    /// Send a prepared envelope.
    pub fn send_envelope(&self, target: &Pid, envelope: MessageEnvelope) {
        self.system.send_envelope(target, envelope);
    }

    /// Send and wait up to `timeout` for a reply of type `R`.
    pub async fn request_async<R, T>(&self, target: &Pid, message: T, timeout: Duration) -> Result<R, RequestError>
    where
        R: Any + Send,
        T: Any + Send,
    {
        let reply = self.request_raw(target, AnyMessage::new(message), timeout, None).await?;
        into_response(reply, target)
    }

    /// Like [`request_async`](Self::request_async), but also gives up when
    /// `token` is cancelled.
    pub async fn request_async_with_token<R, T>(
        &self,
        target: &Pid,
        message: T,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<R, RequestError>
    where
        R: Any + Send,
        T: Any + Send,
    {
        let reply = self
            .request_raw(target, AnyMessage::new(message), timeout, Some(token))
            .await?;
        into_response(reply, target)
    }

    /// Untyped request.
    pub async fn request_raw(
        &self,
        target: &Pid,
        message: AnyMessage,
        timeout: Duration,
        token: Option<&CancellationToken>,
    ) -> Result<AnyMessage, RequestError> {
        let pending = PendingReply::register(&self.system)?;
        let envelope = MessageEnvelope::from_any(message).with_sender(Some(pending.pid().clone()));
        self.system.send_envelope(target, envelope);
        pending.wait(target, timeout, token).await
    }

    /// Stop `pid` ahead of its queued messages.
    pub fn stop(&self, pid: &Pid) {
        self.system.send_system(pid, SystemMessage::Stop);
    }

    /// Stop `pid` after its queued messages.
    pub fn poison(&self, pid: &Pid) {
        self.system.send_envelope(pid, MessageEnvelope::new(PoisonPill));
    }

    /// Stop `pid` and wait until it has terminated.
    pub async fn stop_future(&self, pid: &Pid) -> Result<Terminated, RequestError> {
        let pending = self.watch_pending(pid)?;
        self.stop(pid);
        wait_terminated(pending).await
    }

    /// Poison `pid` and wait until it has terminated.
    pub async fn poison_future(&self, pid: &Pid) -> Result<Terminated, RequestError> {
        let pending = self.watch_pending(pid)?;
        self.poison(pid);
        wait_terminated(pending).await
    }

    /// Wait for the single `Terminated` notification of `pid`.
    ///
    /// Resolves immediately with [`TerminatedReason::NotFound`] if `pid`
    /// is not alive.
    pub async fn watch_terminated(&self, pid: &Pid) -> Result<Terminated, RequestError> {
        let pending = self.watch_pending(pid)?;
        wait_terminated(pending).await
    }

    fn watch_pending(&self, pid: &Pid) -> Result<PendingReply, RequestError> {
        let pending = PendingReply::register(&self.system)?;
        self.system.send_system(
            pid,
            SystemMessage::Watch {
                watcher: pending.pid().clone(),
            },
        );
        Ok(pending)
    }
}

async fn wait_terminated(pending: PendingReply) -> Result<Terminated, RequestError> {
    let message = pending.wait_unbounded().await?;
    message
        .downcast::<Terminated>()
        .map_err(|other| RequestError::UnexpectedResponse {
            expected: std::any::type_name::<Terminated>(),
            actual: other.type_name(),
        })
}
