//! Activation protocol between callers and activators.

use serde::{Deserialize, Serialize};

use crate::actor::Pid;
use crate::cluster::ClusterIdentity;

/// Why an activator refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ActivationFailure {
    /// The activator does not believe it owns the identity.
    #[error("not the owner")]
    NotOwner,
    /// Caller and activator computed ownership from different topologies.
    #[error("topology mismatch")]
    TopologyMismatch,
    /// The kind is not registered on the activator's member.
    #[error("unknown kind")]
    UnknownKind,
    /// The previous instance is still stopping.
    #[error("deactivating")]
    Deactivating,
    /// Spawning the instance failed.
    #[error("spawn failed")]
    SpawnFailed,
}

impl ActivationFailure {
    /// Whether the caller should re-resolve and try again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ActivationFailure::NotOwner
                | ActivationFailure::TopologyMismatch
                | ActivationFailure::Deactivating
        )
    }
}

/// Ask the owner for the pid of an identity, activating it if needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRequest {
    /// Identity to activate.
    pub identity: ClusterIdentity,
    /// Topology hash the caller resolved the owner with.
    pub topology_hash: u64,
}

/// Answer to an [`ActivationRequest`]: exactly one field is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResponse {
    /// Pid of the live activation.
    pub pid: Option<Pid>,
    /// Refusal reason.
    pub failure: Option<ActivationFailure>,
}

impl ActivationResponse {
    pub(crate) fn activated(pid: Pid) -> Self {
        Self {
            pid: Some(pid),
            failure: None,
        }
    }

    pub(crate) fn denied(failure: ActivationFailure) -> Self {
        Self {
            pid: None,
            failure: Some(failure),
        }
    }
}

/// Local notice that ownership may have moved.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TopologyChanged;

/// Ask an activator for its live identities.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListActivations;

/// Live identities of one activator.
#[derive(Debug, Clone)]
pub(crate) struct Activations(pub(crate) Vec<ClusterIdentity>);
