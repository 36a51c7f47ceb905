//! The actor trait and the per-actor context.
//!
//! An [`ActorContext`] exists for the lifetime of one spawned actor,
//! across restarts. It is only touched by the mailbox run currently
//! processing the actor, so its state needs no further synchronisation.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;

use super::future::{into_response, PendingReply};
use super::mailbox::MessageInvoker;
use super::message::ReceiveTimeoutTick;
use super::supervision::publish_outcome;
use super::{
    ActorError, ActorSystem, AnyMessage, Directive, Failure, Message, MessageEnvelope,
    MessageHeaders, Pid, PoisonPill, Props, RequestError, RestartStatistics, SpawnError,
    Supervisor, SystemMessage, Terminated, TerminatedReason,
};

/// Application logic of an actor.
///
/// `receive` runs to completion before the next message is taken, so an
/// actor observes its messages one at a time. Returning an error, or
/// panicking, hands the failure to the supervisor.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Handle one message.
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LifecycleState {
    Alive,
    Restarting,
    Stopping,
    Stopped,
}

/// Handle an actor uses to talk to the rest of the system.
pub struct ActorContext {
    system: ActorSystem,
    props: Props,
    self_pid: Pid,
    parent: Option<Pid>,
    children: BTreeSet<Pid>,
    child_stats: HashMap<Pid, RestartStatistics>,
    watchers: BTreeSet<Pid>,
    watching: BTreeSet<Pid>,
    state: LifecycleState,
    sender: Option<Pid>,
    headers: MessageHeaders,
    message_type: Option<&'static str>,
    receive_timeout: Option<Duration>,
    timeout_generation: u64,
    timeout_timer: Option<JoinHandle<()>>,
}

impl ActorContext {
    pub(crate) fn new(system: ActorSystem, props: Props, self_pid: Pid, parent: Option<Pid>) -> Self {
        let receive_timeout = props.receive_timeout();
        Self {
            system,
            props,
            self_pid,
            parent,
            children: BTreeSet::new(),
            child_stats: HashMap::new(),
            watchers: BTreeSet::new(),
            watching: BTreeSet::new(),
            state: LifecycleState::Alive,
            sender: None,
            headers: MessageHeaders::new(),
            message_type: None,
            receive_timeout,
            timeout_generation: 0,
            timeout_timer: None,
        }
    }

    /// This actor's pid.
    pub fn self_pid(&self) -> &Pid {
        &self.self_pid
    }

    /// The supervising parent, `None` for top-level actors.
    pub fn parent(&self) -> Option<&Pid> {
        self.parent.as_ref()
    }

    /// Sender of the message being handled.
    pub fn sender(&self) -> Option<&Pid> {
        self.sender.as_ref()
    }

    /// Headers of the message being handled.
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Type name of the user message being handled.
    pub fn message_type(&self) -> Option<&'static str> {
        self.message_type
    }

    /// Live children.
    pub fn children(&self) -> Vec<Pid> {
        self.children.iter().cloned().collect()
    }

    /// The owning actor system.
    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Fire-and-forget send.
    pub fn send<T: Any + Send>(&self, target: &Pid, message: T) {
        self.send_envelope(target, MessageEnvelope::new(message));
    }

    /// Send with this actor as sender; the reply arrives as a normal message.
    pub fn request<T: Any + Send>(&self, target: &Pid, message: T) {
        let envelope = MessageEnvelope::new(message).with_sender(Some(self.self_pid.clone()));
        self.send_envelope(target, envelope);
    }

    /// Answer the sender of the current message.
    pub fn respond<T: Any + Send>(&self, message: T) {
        let envelope = MessageEnvelope::new(message).with_sender(Some(self.self_pid.clone()));
        match &self.sender {
            Some(sender) => self.send_envelope(sender, envelope),
            None => {
                tracing::debug!(pid = %self.self_pid, "respond without a sender");
                self.system
                    .registry()
                    .dead_letter()
                    .send_user_message(&self.self_pid, envelope);
            }
        }
    }

    /// Pass `message` on, keeping the current sender and headers.
    pub fn forward(&self, target: &Pid, message: AnyMessage) {
        let mut envelope = MessageEnvelope::from_any(message).with_sender(self.sender.clone());
        envelope.headers = self.headers.clone();
        self.send_envelope(target, envelope);
    }

    /// Send and wait for the reply. The actor handles nothing else meanwhile.
    pub async fn request_async<R, T>(&self, target: &Pid, message: T, timeout: Duration) -> Result<R, RequestError>
    where
        R: Any + Send,
        T: Any + Send,
    {
        let pending = PendingReply::register(&self.system)?;
        let envelope = MessageEnvelope::new(message).with_sender(Some(pending.pid().clone()));
        self.send_envelope(target, envelope);
        let reply = pending.wait(target, timeout, None).await?;
        into_response(reply, target)
    }

    /// Spawn a child with a generated name.
    pub fn spawn(&mut self, props: Props) -> Result<Pid, SpawnError> {
        let name = self.system.registry().next_id();
        self.spawn_named(props, &name)
    }

    /// Spawn a child; its id is `<parent id>/<name>`.
    pub fn spawn_named(&mut self, props: Props, name: &str) -> Result<Pid, SpawnError> {
        let id = format!("{}/{}", self.self_pid.id, name);
        let pid = self.system.spawn_actor(&props, id, Some(self.self_pid.clone()))?;
        self.children.insert(pid.clone());
        Ok(pid)
    }

    /// Get one `Terminated` message when `pid` goes away.
    pub fn watch(&mut self, pid: &Pid) {
        self.watching.insert(pid.clone());
        self.system.send_system(
            pid,
            SystemMessage::Watch {
                watcher: self.self_pid.clone(),
            },
        );
    }

    /// Cancel a previous [`watch`](Self::watch).
    pub fn unwatch(&mut self, pid: &Pid) {
        self.watching.remove(pid);
        self.system.send_system(
            pid,
            SystemMessage::Unwatch {
                watcher: self.self_pid.clone(),
            },
        );
    }

    /// Stop `pid` ahead of its queued messages.
    pub fn stop(&self, pid: &Pid) {
        self.system.send_system(pid, SystemMessage::Stop);
    }

    /// Stop `pid` after its queued messages.
    pub fn poison(&self, pid: &Pid) {
        self.system.send_envelope(pid, MessageEnvelope::new(PoisonPill));
    }

    /// Stop this actor once the current message is handled.
    pub fn stop_self(&self) {
        self.system.send_system(&self.self_pid, SystemMessage::Stop);
    }

    /// Deliver [`Message::ReceiveTimeout`] after `timeout` of inactivity.
    /// A zero duration cancels.
    pub fn set_receive_timeout(&mut self, timeout: Duration) {
        if timeout.is_zero() {
            self.cancel_receive_timeout();
            return;
        }
        self.receive_timeout = Some(timeout);
        self.arm_receive_timeout();
    }

    /// Turn the receive timeout off.
    pub fn cancel_receive_timeout(&mut self) {
        self.receive_timeout = None;
        self.disarm_receive_timeout();
    }

    /// Current receive timeout.
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout
    }

    fn send_envelope(&self, target: &Pid, envelope: MessageEnvelope) {
        let envelope = match self.props.sender_chain() {
            Some(chain) => match chain(&self.self_pid, target, envelope) {
                Some(envelope) => envelope,
                None => return,
            },
            None => envelope,
        };
        self.system.send_envelope(target, envelope);
    }

    fn arm_receive_timeout(&mut self) {
        self.disarm_receive_timeout();
        let Some(timeout) = self.receive_timeout else {
            return;
        };
        self.timeout_generation += 1;
        let tick = ReceiveTimeoutTick(self.timeout_generation);
        let system = self.system.clone();
        let pid = self.self_pid.clone();
        self.timeout_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            system.send_envelope(&pid, MessageEnvelope::new(tick));
        }));
    }

    fn disarm_receive_timeout(&mut self) {
        if let Some(timer) = self.timeout_timer.take() {
            timer.abort();
        }
    }

    async fn invoke(&mut self, actor: &mut Box<dyn Actor>, message: Message) -> Result<(), ActorError> {
        match AssertUnwindSafe(actor.receive(self, message)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(ActorError::Panicked(panic_message(panic.as_ref()))),
        }
    }

    fn fail(&mut self, reason: ActorError, message_type: &'static str) {
        let reason = Arc::new(reason);
        tracing::warn!(pid = %self.self_pid, error = %reason, message_type, "actor failed");
        self.disarm_receive_timeout();
        self.escalate_failure(reason, message_type);
    }

    pub(crate) async fn handle_system(&mut self, actor: &mut Box<dyn Actor>, message: SystemMessage) {
        match message {
            SystemMessage::Start => self.handle_start(actor).await,
            SystemMessage::Stop => self.handle_stop(actor).await,
            SystemMessage::Restart => self.handle_restart(actor).await,
            SystemMessage::Watch { watcher } => self.handle_watch(watcher),
            SystemMessage::Unwatch { watcher } => {
                self.watchers.remove(&watcher);
            }
            SystemMessage::Terminated(terminated) => self.handle_terminated(actor, terminated).await,
            SystemMessage::Failure(failure) => self.handle_child_failure(failure),
            SystemMessage::SuspendMailbox | SystemMessage::ResumeMailbox => {}
        }
    }

    pub(crate) async fn handle_user(&mut self, actor: &mut Box<dyn Actor>, envelope: MessageEnvelope) {
        if self.state >= LifecycleState::Stopping {
            self.system
                .registry()
                .dead_letter()
                .send_user_message(&self.self_pid, envelope);
            return;
        }
        let tick = envelope.message.downcast_ref::<ReceiveTimeoutTick>().copied();
        if let Some(tick) = tick {
            if tick.0 == self.timeout_generation && self.receive_timeout.is_some() {
                self.timeout_timer = None;
                match self.invoke(actor, Message::ReceiveTimeout).await {
                    Ok(()) => self.arm_receive_timeout(),
                    Err(e) => self.fail(e, "ReceiveTimeout"),
                }
            }
            return;
        }
        if envelope.message.is::<PoisonPill>() {
            self.handle_stop(actor).await;
            return;
        }
        let envelope = match self.props.receive_chain() {
            Some(chain) => match chain(&self.self_pid, envelope) {
                Some(envelope) => envelope,
                None => return,
            },
            None => envelope,
        };

        self.disarm_receive_timeout();
        let MessageEnvelope {
            message,
            sender,
            headers,
        } = envelope;
        let message_type = message.type_name();
        self.sender = sender;
        self.headers = headers;
        self.message_type = Some(message_type);

        let result = self.invoke(actor, Message::User(message)).await;

        self.sender = None;
        self.headers.clear();
        self.message_type = None;
        match result {
            Ok(()) => {
                if self.state == LifecycleState::Alive {
                    self.arm_receive_timeout();
                }
            }
            Err(e) => self.fail(e, message_type),
        }
    }

    async fn handle_start(&mut self, actor: &mut Box<dyn Actor>) {
        match self.invoke(actor, Message::Started).await {
            Ok(()) => self.arm_receive_timeout(),
            Err(e) => self.fail(e, "Started"),
        }
    }

    async fn handle_restart(&mut self, actor: &mut Box<dyn Actor>) {
        if self.state >= LifecycleState::Stopping {
            return;
        }
        self.state = LifecycleState::Restarting;
        self.disarm_receive_timeout();
        if let Err(e) = self.invoke(actor, Message::Restarting).await {
            tracing::debug!(pid = %self.self_pid, error = %e, "error while restarting");
        }
        for child in &self.children {
            self.system.send_system(child, SystemMessage::Stop);
        }
        self.try_finish_restart(actor).await;
    }

    /// Complete a restart once every old child has terminated.
    async fn try_finish_restart(&mut self, actor: &mut Box<dyn Actor>) {
        if self.state != LifecycleState::Restarting || !self.children.is_empty() {
            return;
        }
        *actor = self.props.produce();
        self.state = LifecycleState::Alive;
        self.receive_timeout = self.props.receive_timeout();
        tracing::debug!(pid = %self.self_pid, "restarted");
        self.system.send_system(&self.self_pid, SystemMessage::ResumeMailbox);
        self.handle_start(actor).await;
    }

    async fn handle_stop(&mut self, actor: &mut Box<dyn Actor>) {
        if self.state >= LifecycleState::Stopping {
            return;
        }
        self.state = LifecycleState::Stopping;
        self.disarm_receive_timeout();
        if let Err(e) = self.invoke(actor, Message::Stopping).await {
            tracing::debug!(pid = %self.self_pid, error = %e, "error while stopping");
        }
        for child in &self.children {
            self.system.send_system(child, SystemMessage::Stop);
        }
        self.try_finish_stop(actor).await;
    }

    async fn try_finish_stop(&mut self, actor: &mut Box<dyn Actor>) {
        if self.state != LifecycleState::Stopping || !self.children.is_empty() {
            return;
        }
        // Queued user messages are dead-lettered once the mailbox runs again.
        self.system
            .send_system(&self.self_pid, SystemMessage::ResumeMailbox);
        self.system.registry().remove(&self.self_pid);
        if let Err(e) = self.invoke(actor, Message::Stopped).await {
            tracing::debug!(pid = %self.self_pid, error = %e, "error after stop");
        }
        self.state = LifecycleState::Stopped;
        tracing::trace!(pid = %self.self_pid, "stopped");

        let terminated = Terminated {
            who: self.self_pid.clone(),
            why: TerminatedReason::Stopped,
        };
        let watchers = std::mem::take(&mut self.watchers);
        for watcher in &watchers {
            self.system
                .send_system(watcher, SystemMessage::Terminated(terminated.clone()));
        }
        match &self.parent {
            Some(parent) if !watchers.contains(parent) => {
                self.system
                    .send_system(parent, SystemMessage::Terminated(terminated));
            }
            Some(_) => {}
            None => self.system.forget_root_child(&self.self_pid),
        }
    }

    fn handle_watch(&mut self, watcher: Pid) {
        if self.state == LifecycleState::Stopped {
            let terminated = Terminated {
                who: self.self_pid.clone(),
                why: TerminatedReason::Stopped,
            };
            self.system
                .send_system(&watcher, SystemMessage::Terminated(terminated));
        } else {
            self.watchers.insert(watcher);
        }
    }

    async fn handle_terminated(&mut self, actor: &mut Box<dyn Actor>, terminated: Terminated) {
        let was_child = self.children.remove(&terminated.who);
        if was_child {
            self.child_stats.remove(&terminated.who);
        }
        let was_watched = self.watching.remove(&terminated.who);
        if self.state == LifecycleState::Alive && (was_child || was_watched) {
            if let Err(e) = self.invoke(actor, Message::Terminated(terminated)).await {
                self.fail(e, "Terminated");
            }
        }
        self.try_finish_restart(actor).await;
        self.try_finish_stop(actor).await;
    }

    fn handle_child_failure(&mut self, failure: Failure) {
        if !self.children.contains(&failure.who) {
            tracing::debug!(pid = %self.self_pid, child = %failure.who, "failure from unknown child");
            return;
        }
        if self.state != LifecycleState::Alive {
            tracing::debug!(pid = %self.self_pid, child = %failure.who, "child failed while shutting down");
            return;
        }
        let strategy = self.props.supervisor();
        let mut stats = self.child_stats.remove(&failure.who).unwrap_or_default();
        let outcome = strategy.handle_failure(
            &*self,
            &failure.who,
            &mut stats,
            Arc::clone(&failure.reason),
            failure.message_type,
        );
        if outcome.directive != Directive::Stop {
            self.child_stats.insert(failure.who.clone(), stats);
        }
        publish_outcome(&self.system, &failure, outcome);
    }
}

impl Supervisor for ActorContext {
    fn children(&self) -> Vec<Pid> {
        self.children.iter().cloned().collect()
    }

    fn restart_children(&self, pids: &[Pid]) {
        for pid in pids {
            self.system.send_system(pid, SystemMessage::Restart);
        }
    }

    fn stop_children(&self, pids: &[Pid]) {
        for pid in pids {
            self.system.send_system(pid, SystemMessage::Stop);
        }
    }

    fn resume_children(&self, pids: &[Pid]) {
        for pid in pids {
            self.system.send_system(pid, SystemMessage::ResumeMailbox);
        }
    }

    fn escalate_failure(&self, reason: Arc<ActorError>, message_type: &'static str) {
        self.system
            .send_system(&self.self_pid, SystemMessage::SuspendMailbox);
        let failure = Failure {
            who: self.self_pid.clone(),
            reason,
            message_type,
        };
        match &self.parent {
            Some(parent) => self.system.send_system(parent, SystemMessage::Failure(failure)),
            None => self.system.handle_root_failure(failure),
        }
    }
}

impl Drop for ActorContext {
    fn drop(&mut self) {
        self.disarm_receive_timeout();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Mailbox-facing wrapper owning the actor and its context.
pub(crate) struct ActorCell {
    state: tokio::sync::Mutex<CellState>,
}

struct CellState {
    actor: Box<dyn Actor>,
    ctx: ActorContext,
}

impl ActorCell {
    pub(crate) fn new(actor: Box<dyn Actor>, ctx: ActorContext) -> Self {
        Self {
            state: tokio::sync::Mutex::new(CellState { actor, ctx }),
        }
    }
}

#[async_trait]
impl MessageInvoker for ActorCell {
    async fn invoke_system_message(&self, message: SystemMessage) {
        let mut guard = self.state.lock().await;
        let CellState { actor, ctx } = &mut *guard;
        ctx.handle_system(actor, message).await;
    }

    async fn invoke_user_message(&self, envelope: MessageEnvelope) {
        let mut guard = self.state.lock().await;
        let CellState { actor, ctx } = &mut *guard;
        ctx.handle_user(actor, envelope).await;
    }
}
