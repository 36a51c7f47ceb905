//! Scheduling of mailbox batches onto a worker pool.

use std::fmt;

use futures::future::BoxFuture;
use tokio::runtime::Handle;

/// Default number of messages a mailbox processes per scheduling turn.
pub const DEFAULT_THROUGHPUT: usize = 300;

/// Runs mailbox batches.
///
/// A dispatcher never owns a thread per actor. Each scheduled future drains
/// at most [`Dispatcher::throughput`] messages and then reschedules itself,
/// so actors sharing a pool take turns.
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// Run `task` on the pool.
    fn schedule(&self, task: BoxFuture<'static, ()>);

    /// Maximum messages per batch.
    fn throughput(&self) -> usize;
}

/// Dispatcher backed by a Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioDispatcher {
    handle: Handle,
    throughput: usize,
}

impl TokioDispatcher {
    /// Dispatch onto the given runtime.
    pub fn new(handle: Handle, throughput: usize) -> Self {
        Self {
            handle,
            throughput: throughput.max(1),
        }
    }

    /// Dispatch onto the runtime the caller is running in.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn current(throughput: usize) -> Self {
        Self::new(Handle::current(), throughput)
    }
}

impl Dispatcher for TokioDispatcher {
    fn schedule(&self, task: BoxFuture<'static, ()>) {
        self.handle.spawn(task);
    }

    fn throughput(&self) -> usize {
        self.throughput
    }
}
