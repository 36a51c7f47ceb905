//! Per-actor message queues.
//!
//! A mailbox holds a system queue and a user queue. Posting never blocks;
//! it enqueues and, if the mailbox is idle, schedules one run on the
//! dispatcher. The idle/busy flag is flipped with a compare-exchange, so at
//! most one run processes a mailbox at any time.
//!
//! Each run drains up to `throughput` messages. System messages are taken
//! first on every step. User messages are skipped while the mailbox is
//! suspended; system messages keep flowing so a supervisor can resume,
//! restart or stop the actor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Dispatcher, MessageEnvelope, SystemMessage};

const IDLE: u8 = 0;
const BUSY: u8 = 1;

/// What happens to a user message posted to a full bounded mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Keep the queue, reject the incoming message.
    #[default]
    DropNewest,
    /// Evict the oldest queued message to make room.
    DropOldest,
}

/// Capacity of the user queue. The system queue is always unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailboxConfig {
    /// No limit.
    #[default]
    Unbounded,
    /// At most `capacity` queued user messages.
    Bounded {
        /// Maximum queued user messages.
        capacity: usize,
        /// What to drop once full.
        policy: OverflowPolicy,
    },
}

impl MailboxConfig {
    /// Bounded mailbox dropping incoming messages when full.
    pub fn bounded(capacity: usize) -> Self {
        Self::Bounded {
            capacity,
            policy: OverflowPolicy::DropNewest,
        }
    }

    /// Bounded mailbox with an explicit policy.
    pub fn bounded_with(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::Bounded { capacity, policy }
    }
}

/// Receives messages taken off a mailbox.
#[async_trait]
pub(crate) trait MessageInvoker: Send + Sync {
    async fn invoke_system_message(&self, message: SystemMessage);
    async fn invoke_user_message(&self, envelope: MessageEnvelope);
}

pub(crate) struct Mailbox {
    system: Mutex<VecDeque<SystemMessage>>,
    user: Mutex<VecDeque<MessageEnvelope>>,
    config: MailboxConfig,
    status: AtomicU8,
    suspended: AtomicBool,
    invoker: OnceLock<Arc<dyn MessageInvoker>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Mailbox {
    pub(crate) fn new(config: MailboxConfig, dispatcher: Arc<dyn Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            system: Mutex::new(VecDeque::new()),
            user: Mutex::new(VecDeque::new()),
            config,
            status: AtomicU8::new(IDLE),
            suspended: AtomicBool::new(false),
            invoker: OnceLock::new(),
            dispatcher,
        })
    }

    /// Attach the invoker. Messages posted earlier are processed now.
    pub(crate) fn register_invoker(self: &Arc<Self>, invoker: Arc<dyn MessageInvoker>) {
        if self.invoker.set(invoker).is_err() {
            tracing::warn!("mailbox invoker registered twice");
        }
        self.schedule();
    }

    /// Enqueue a user message. Returns the message that overflow evicted.
    pub(crate) fn post_user(self: &Arc<Self>, envelope: MessageEnvelope) -> Option<MessageEnvelope> {
        let dropped = {
            let mut queue = self.user.lock();
            match self.config {
                MailboxConfig::Unbounded => {
                    queue.push_back(envelope);
                    None
                }
                MailboxConfig::Bounded { capacity, policy } => {
                    if queue.len() < capacity {
                        queue.push_back(envelope);
                        None
                    } else {
                        match policy {
                            OverflowPolicy::DropNewest => Some(envelope),
                            OverflowPolicy::DropOldest => {
                                let oldest = queue.pop_front();
                                queue.push_back(envelope);
                                oldest
                            }
                        }
                    }
                }
            }
        };
        self.schedule();
        dropped
    }

    pub(crate) fn post_system(self: &Arc<Self>, message: SystemMessage) {
        self.system.lock().push_back(message);
        self.schedule();
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub(crate) fn user_len(&self) -> usize {
        self.user.lock().len()
    }

    fn schedule(self: &Arc<Self>) {
        if self
            .status
            .compare_exchange(IDLE, BUSY, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let mailbox = Arc::clone(self);
            self.dispatcher.schedule(Box::pin(async move { mailbox.run().await }));
        }
    }

    async fn run(self: Arc<Self>) {
        if let Some(invoker) = self.invoker.get().cloned() {
            self.process(invoker.as_ref()).await;
        }
        self.status.store(IDLE, Ordering::SeqCst);
        if self.has_pending_work() {
            self.schedule();
        }
    }

    async fn process(&self, invoker: &dyn MessageInvoker) {
        let throughput = self.dispatcher.throughput();
        let mut processed = 0;
        while processed < throughput {
            let system = self.system.lock().pop_front();
            if let Some(message) = system {
                match message {
                    SystemMessage::SuspendMailbox => self.suspended.store(true, Ordering::SeqCst),
                    SystemMessage::ResumeMailbox => self.suspended.store(false, Ordering::SeqCst),
                    other => invoker.invoke_system_message(other).await,
                }
                processed += 1;
                continue;
            }
            if self.is_suspended() {
                break;
            }
            let user = self.user.lock().pop_front();
            match user {
                Some(envelope) => {
                    invoker.invoke_user_message(envelope).await;
                    processed += 1;
                }
                None => break,
            }
        }
    }

    fn has_pending_work(&self) -> bool {
        if self.invoker.get().is_none() {
            return false;
        }
        if !self.system.lock().is_empty() {
            return true;
        }
        !self.is_suspended() && !self.user.lock().is_empty()
    }
}
