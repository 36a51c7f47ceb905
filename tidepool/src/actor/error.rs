//! Error types for the local actor runtime.

use std::time::Duration;

use super::Pid;

/// Failure returned by actor code.
///
/// Actor failures never cross actor boundaries: the runtime catches them at
/// the dispatch boundary and turns them into a supervision decision.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    /// The actor reported a failure while handling a message.
    #[error("actor failed: {0}")]
    Failed(String),

    /// The actor panicked while handling a message.
    #[error("actor panicked: {0}")]
    Panicked(String),

    /// A request issued by the actor failed.
    #[error("request failed: {0}")]
    Request(#[from] RequestError),

    /// Spawning a child failed.
    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),
}

impl ActorError {
    /// Shorthand for [`ActorError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Errors from spawning a process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    /// Another live process is already registered under this name.
    #[error("duplicate process name: {pid}")]
    DuplicateName {
        /// Pid that is already taken.
        pid: Pid,
    },

    /// The actor system is shutting down and accepts no new processes.
    #[error("actor system is shutting down")]
    ShuttingDown,
}

/// Errors from request/response exchanges.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// No response arrived before the caller's deadline.
    #[error("request to {target} timed out after {timeout:?}")]
    Timeout {
        /// Request target.
        target: Pid,
        /// Deadline the caller waited for.
        timeout: Duration,
    },

    /// The target was not alive, so the request became a dead letter.
    #[error("request target {target} is not alive")]
    DeadLetter {
        /// Request target.
        target: Pid,
    },

    /// A response arrived but had a different type than expected.
    #[error("unexpected response type: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Type the caller asked for.
        expected: &'static str,
        /// Type that actually arrived.
        actual: &'static str,
    },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The one-shot reply process could not be registered.
    #[error("could not register reply process: {0}")]
    Spawn(#[from] SpawnError),
}
