//! Virtual actor activation.
//!
//! Every hosting member runs an activator named [`ACTIVATOR_ACTOR`]. A
//! caller resolves the owner of an identity locally and sends it an
//! [`ActivationRequest`]. The owner double-checks ownership against its
//! own view, spawns the instance on first use and answers with its pid.
//! A member that is not the owner answers with a retryable
//! [`ActivationFailure`], and the caller re-resolves.
//!
//! Per identity the owner tracks `Active -> Deactivating`; no record means
//! unknown. Activating happens inside a single activator turn, so no other
//! request observes it. On a topology change the activator stops the
//! instances whose ownership moved, so the new owner can activate a fresh
//! one.

pub(crate) mod activator;
mod messages;

pub use messages::{ActivationFailure, ActivationRequest, ActivationResponse};
pub(crate) use messages::{Activations, ListActivations, TopologyChanged};

/// Name of the activator on every hosting member.
pub const ACTIVATOR_ACTOR: &str = "activator";
