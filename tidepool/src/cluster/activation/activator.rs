//! The per-member activator actor.
//!
//! Virtual actor instances are children of the activator, so their
//! termination, whether idle, stopped on handoff, or failed past their
//! restart budget, always comes back here as `Terminated` and clears the
//! record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::messages::{
    ActivationFailure, ActivationRequest, ActivationResponse, Activations, ListActivations,
    TopologyChanged,
};
use crate::actor::{Actor, ActorContext, ActorError, AnyMessage, Message, Pid, Props, Terminated};
use crate::cluster::placement::IdentityLookup;
use crate::cluster::{ClusterIdentity, ClusterKind, MemberId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivationState {
    Active,
    Deactivating,
}

#[derive(Debug)]
struct ActivationRecord {
    pid: Pid,
    owner: MemberId,
    state: ActivationState,
}

#[derive(Clone)]
pub(crate) struct ActivatorSettings {
    pub(crate) address: String,
    pub(crate) member_id: MemberId,
    pub(crate) kinds: Arc<HashMap<String, ClusterKind>>,
    pub(crate) lookup: Arc<dyn IdentityLookup>,
}

pub(crate) fn activator_props(settings: ActivatorSettings) -> Props {
    Props::from_producer(move || Activator::new(settings.clone()))
}

pub(crate) struct Activator {
    settings: ActivatorSettings,
    records: HashMap<ClusterIdentity, ActivationRecord>,
    by_pid: HashMap<Pid, ClusterIdentity>,
}

impl Activator {
    fn new(settings: ActivatorSettings) -> Self {
        Self {
            settings,
            records: HashMap::new(),
            by_pid: HashMap::new(),
        }
    }

    fn handle(&mut self, ctx: &mut ActorContext, message: AnyMessage) {
        let message = match message.downcast::<ActivationRequest>() {
            Ok(request) => {
                let response = self.activate(ctx, request);
                ctx.respond(response);
                return;
            }
            Err(message) => message,
        };
        let message = match message.downcast::<TopologyChanged>() {
            Ok(_) => return self.hand_off(ctx),
            Err(message) => message,
        };
        if message.is::<ListActivations>() {
            let mut live: Vec<ClusterIdentity> = self
                .records
                .iter()
                .filter(|(_, record)| record.state == ActivationState::Active)
                .map(|(identity, _)| identity.clone())
                .collect();
            live.sort();
            ctx.respond(Activations(live));
            return;
        }
        tracing::debug!(message = message.type_name(), "activator ignoring message");
    }

    fn activate(&mut self, ctx: &mut ActorContext, request: ActivationRequest) -> ActivationResponse {
        let identity = request.identity;
        let Some(kind) = self.settings.kinds.get(&identity.kind) else {
            return ActivationResponse::denied(ActivationFailure::UnknownKind);
        };

        let lookup = &self.settings.lookup;
        if lookup.owner(&identity).as_deref() != Some(self.settings.address.as_str()) {
            tracing::debug!(identity = %identity, "activation request for an identity owned elsewhere");
            return ActivationResponse::denied(ActivationFailure::NotOwner);
        }
        if lookup.requires_topology_agreement() && request.topology_hash != lookup.topology_hash() {
            tracing::debug!(
                identity = %identity,
                caller = request.topology_hash,
                local = lookup.topology_hash(),
                "activation request from a different topology"
            );
            return ActivationResponse::denied(ActivationFailure::TopologyMismatch);
        }

        if let Some(record) = self.records.get(&identity) {
            return match record.state {
                ActivationState::Active => ActivationResponse::activated(record.pid.clone()),
                ActivationState::Deactivating => {
                    ActivationResponse::denied(ActivationFailure::Deactivating)
                }
            };
        }

        let props = kind.activation_props(identity.clone());
        let pid = match ctx.spawn_named(props, &identity.to_string()) {
            Ok(pid) => pid,
            Err(err) => {
                tracing::warn!(identity = %identity, error = %err, "activation failed");
                return ActivationResponse::denied(ActivationFailure::SpawnFailed);
            }
        };
        let record = ActivationRecord {
            pid: pid.clone(),
            owner: self.settings.member_id.clone(),
            state: ActivationState::Active,
        };
        tracing::debug!(identity = %identity, pid = %pid, owner = %record.owner, "activated");
        self.by_pid.insert(pid.clone(), identity.clone());
        self.records.insert(identity, record);
        ActivationResponse::activated(pid)
    }

    /// Stop every activation this member no longer owns.
    fn hand_off(&mut self, ctx: &ActorContext) {
        let address = self.settings.address.as_str();
        for (identity, record) in &mut self.records {
            if record.state != ActivationState::Active {
                continue;
            }
            if self.settings.lookup.owner(identity).as_deref() == Some(address) {
                continue;
            }
            tracing::info!(identity = %identity, pid = %record.pid, "ownership moved, deactivating");
            record.state = ActivationState::Deactivating;
            ctx.stop(&record.pid);
        }
    }

    fn terminated(&mut self, terminated: &Terminated) {
        let Some(identity) = self.by_pid.remove(&terminated.who) else {
            return;
        };
        let is_current = self
            .records
            .get(&identity)
            .is_some_and(|record| record.pid == terminated.who);
        if is_current {
            self.records.remove(&identity);
            tracing::debug!(identity = %identity, "deactivated");
        }
    }
}

#[async_trait]
impl Actor for Activator {
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        match message {
            Message::User(message) => self.handle(ctx, message),
            Message::Terminated(terminated) => self.terminated(&terminated),
            _ => {}
        }
        Ok(())
    }
}
