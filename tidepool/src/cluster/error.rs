//! Error types for the cluster layer.

use super::activation::ActivationFailure;
use super::membership::MembershipError;
use super::ClusterIdentity;
use crate::actor::{RequestError, SpawnError};
use crate::remote::RemoteError;

/// Errors from cluster operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// No active member hosts the identity's kind.
    #[error("no member owns {identity}")]
    NoOwner {
        /// Identity being resolved.
        identity: ClusterIdentity,
    },

    /// The owner refused to activate.
    #[error("activation of {identity} denied: {reason}")]
    ActivationDenied {
        /// Identity being activated.
        identity: ClusterIdentity,
        /// Why the owner refused.
        reason: ActivationFailure,
    },

    /// No member of the current topology hosts the kind.
    #[error("unknown kind: {kind}")]
    UnknownKind {
        /// Kind name.
        kind: String,
    },

    /// The request to the activation failed.
    #[error("request failed: {0}")]
    Request(#[from] RequestError),

    /// All attempts failed with retryable errors.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        #[source]
        last: Box<ClusterError>,
    },

    /// A local spawn failed.
    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    /// The remote layer failed to start.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The membership provider failed.
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),

    /// This member is shutting down.
    #[error("cluster is shutting down")]
    ShuttingDown,
}

impl ClusterError {
    /// Whether re-resolving the owner and trying again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClusterError::NoOwner { .. } => true,
            ClusterError::ActivationDenied { reason, .. } => reason.is_retryable(),
            ClusterError::Request(err) => matches!(
                err,
                RequestError::Timeout { .. } | RequestError::DeadLetter { .. }
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::actor::Pid;

    fn id() -> ClusterIdentity {
        ClusterIdentity::new("order-42", "OrderActor")
    }

    #[test]
    fn stale_owner_and_lost_requests_are_retryable() {
        assert!(ClusterError::NoOwner { identity: id() }.is_retryable());
        assert!(ClusterError::ActivationDenied {
            identity: id(),
            reason: ActivationFailure::NotOwner,
        }
        .is_retryable());
        assert!(ClusterError::Request(RequestError::Timeout {
            target: Pid::local("x"),
            timeout: Duration::from_secs(1),
        })
        .is_retryable());
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!ClusterError::ActivationDenied {
            identity: id(),
            reason: ActivationFailure::UnknownKind,
        }
        .is_retryable());
        assert!(!ClusterError::UnknownKind {
            kind: "NoSuchKind".into(),
        }
        .is_retryable());
        assert!(!ClusterError::ShuttingDown.is_retryable());
        assert!(!ClusterError::Request(RequestError::Cancelled).is_retryable());
    }
}
