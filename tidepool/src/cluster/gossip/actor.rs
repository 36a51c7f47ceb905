//! The per-member gossip actor.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{
    GossipConfig, GossipRequest, GossipResponse, GossipSnapshot, GossipState, MergeOutcome,
    GOSSIP_ACTOR, HEARTBEAT_KEY, MEMBER_KEY,
};
use crate::actor::{
    Actor, ActorContext, ActorError, AnyMessage, DeadLetterResponse, Message, Pid, Props,
};
use crate::cluster::membership::MembershipSnapshot;
use crate::cluster::{Member, MemberId, MemberList, MemberStatus};

/// Start a gossip round.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GossipTick;

/// The provider published a new snapshot.
#[derive(Debug, Clone)]
pub(crate) struct ProviderSnapshot(pub(crate) MembershipSnapshot);

/// Announce `Left` to every known peer. Answered with [`LeaveAck`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Leave;

/// Reply to [`Leave`] once the announcement is queued.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeaveAck;

/// Everything a fresh gossiper incarnation needs.
#[derive(Clone)]
pub(crate) struct GossiperSettings {
    pub(crate) local: Member,
    pub(crate) config: GossipConfig,
    pub(crate) member_list: Arc<MemberList>,
    pub(crate) snapshot: Arc<GossipSnapshot>,
    pub(crate) provider: watch::Receiver<MembershipSnapshot>,
}

pub(crate) fn gossiper_props(settings: GossiperSettings) -> Props {
    Props::from_producer(move || Gossiper::new(settings.clone()))
}

pub(crate) struct Gossiper {
    settings: GossiperSettings,
    state: GossipState,
    heartbeat: u64,
    // member -> (last heartbeat sequence, when it last advanced)
    last_seen: HashMap<MemberId, (u64, Instant)>,
    provider_members: BTreeMap<MemberId, Member>,
    ever_registered: BTreeSet<MemberId>,
    blocked: BTreeSet<MemberId>,
    tasks: Vec<JoinHandle<()>>,
}

impl Gossiper {
    fn new(settings: GossiperSettings) -> Self {
        Self {
            settings,
            state: GossipState::new(),
            heartbeat: 0,
            last_seen: HashMap::new(),
            provider_members: BTreeMap::new(),
            ever_registered: BTreeSet::new(),
            blocked: BTreeSet::new(),
            tasks: Vec::new(),
        }
    }

    fn local_id(&self) -> &MemberId {
        &self.settings.local.id
    }

    fn started(&mut self, ctx: &mut ActorContext) {
        self.publish_local_member();
        self.bump_heartbeat();
        self.start_tasks(ctx);
        self.refresh_members();
        tracing::debug!(member = %self.settings.local, "gossiper started");
    }

    fn start_tasks(&mut self, ctx: &ActorContext) {
        let token = ctx.system().shutdown_token();
        let root = ctx.system().root();
        let pid = ctx.self_pid().clone();
        let interval = self.settings.config.interval;
        let ticker = {
            let token = token.clone();
            let root = root.clone();
            let pid = pid.clone();
            tokio::spawn(async move {
                let mut ticks = tokio::time::interval(interval);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticks.tick() => root.send(&pid, GossipTick),
                    }
                }
            })
        };

        let mut provider = self.settings.provider.clone();
        let monitor = tokio::spawn(async move {
            loop {
                let snapshot = provider.borrow_and_update().clone();
                root.send(&pid, ProviderSnapshot(snapshot));
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = provider.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.tasks = vec![ticker, monitor];
    }

    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn publish_local_member(&mut self) {
        match serde_json::to_string(&self.settings.local) {
            Ok(encoded) => {
                let id = self.settings.local.id.clone();
                self.state.set(&id, MEMBER_KEY, encoded);
            }
            Err(err) => tracing::error!(error = %err, "cannot encode local member"),
        }
    }

    fn bump_heartbeat(&mut self) {
        self.heartbeat += 1;
        let id = self.settings.local.id.clone();
        self.state.set(&id, HEARTBEAT_KEY, self.heartbeat.to_string());
    }

    fn handle(&mut self, ctx: &mut ActorContext, message: AnyMessage) {
        let message = match message.downcast::<GossipTick>() {
            Ok(_) => return self.tick(ctx),
            Err(message) => message,
        };
        let message = match message.downcast::<GossipRequest>() {
            Ok(request) => return self.on_request(ctx, request),
            Err(message) => message,
        };
        let message = match message.downcast::<GossipResponse>() {
            Ok(response) => return self.on_response(response),
            Err(message) => message,
        };
        let message = match message.downcast::<ProviderSnapshot>() {
            Ok(ProviderSnapshot(snapshot)) => return self.on_provider_snapshot(snapshot),
            Err(message) => message,
        };
        let message = match message.downcast::<Leave>() {
            Ok(_) => return self.leave(ctx),
            Err(message) => message,
        };
        if message.is::<DeadLetterResponse>() {
            tracing::trace!("gossip peer unreachable");
            return;
        }
        tracing::debug!(message = message.type_name(), "gossiper ignoring message");
    }

    fn tick(&mut self, ctx: &ActorContext) {
        self.bump_heartbeat();
        self.refresh_members();

        let mut peers = self.peer_addresses();
        let fanout = self.settings.config.fanout;
        if peers.len() > fanout {
            let mut rng = rand::thread_rng();
            peers.shuffle(&mut rng);
            peers.truncate(fanout);
        }
        self.push_to(ctx, &peers);
    }

    fn push_to(&self, ctx: &ActorContext, peers: &[String]) {
        for address in peers {
            let request = GossipRequest {
                from: self.local_id().clone(),
                state: self.state.clone(),
            };
            ctx.request(&Pid::new(address.clone(), GOSSIP_ACTOR), request);
        }
    }

    fn on_request(&mut self, ctx: &ActorContext, request: GossipRequest) {
        let outcome = self.merge_remote(&request.state);
        tracing::trace!(from = %request.from, updated = outcome.updated.len(), "gossip request");
        ctx.respond(GossipResponse {
            state: self.state.clone(),
        });
        if !outcome.is_empty() {
            self.refresh_members();
        }
    }

    fn on_response(&mut self, response: GossipResponse) {
        let outcome = self.merge_remote(&response.state);
        if !outcome.is_empty() {
            self.refresh_members();
        }
    }

    /// Merge peer state, skipping our own keys and blocked members.
    fn merge_remote(&mut self, remote: &GossipState) -> MergeOutcome {
        let local = self.settings.local.id.clone();
        let blocked = &self.blocked;
        self.state
            .merge_filtered(remote, |member| *member != local && !blocked.contains(member))
    }

    fn on_provider_snapshot(&mut self, snapshot: MembershipSnapshot) {
        let current: BTreeMap<MemberId, Member> = snapshot
            .members
            .into_iter()
            .map(|member| (member.id.clone(), member))
            .collect();
        for id in &self.ever_registered {
            if !current.contains_key(id) && *id != self.settings.local.id && self.blocked.insert(id.clone()) {
                tracing::info!(member = %id, "member deregistered");
            }
        }
        self.ever_registered.extend(current.keys().cloned());
        self.provider_members = current;
        self.refresh_members();
    }

    fn leave(&mut self, ctx: &ActorContext) {
        self.settings.local.status = MemberStatus::Left;
        self.publish_local_member();
        let peers = self.peer_addresses();
        tracing::info!(member = %self.settings.local, peers = peers.len(), "leaving cluster");
        self.push_to(ctx, &peers);
        self.refresh_members();
        ctx.respond(LeaveAck);
    }

    /// Addresses of every peer that may still be alive.
    fn peer_addresses(&self) -> Vec<String> {
        let mut addresses = BTreeSet::new();
        for member in self.provider_members.values() {
            if self.is_candidate_peer(member) {
                addresses.insert(member.address.clone());
            }
        }
        for id in self.state.member_ids() {
            if let Some(member) = self.gossiped_member(id) {
                if self.is_candidate_peer(&member) {
                    addresses.insert(member.address);
                }
            }
        }
        addresses.into_iter().collect()
    }

    fn is_candidate_peer(&self, member: &Member) -> bool {
        member.id != self.settings.local.id
            && member.address != self.settings.local.address
            && member.status != MemberStatus::Left
            && !self.blocked.contains(&member.id)
    }

    fn gossiped_member(&self, id: &MemberId) -> Option<Member> {
        let entry = self.state.get(id, MEMBER_KEY)?;
        match serde_json::from_str::<Member>(&entry.value) {
            Ok(member) => Some(member),
            Err(err) => {
                tracing::warn!(member = %id, error = %err, "malformed member gossip");
                None
            }
        }
    }

    /// Judge every gossiped member and rebuild the member list.
    fn refresh_members(&mut self) {
        let now = Instant::now();
        let expiration = self.settings.config.heartbeat_expiration;
        let ids: Vec<MemberId> = self
            .state
            .member_ids()
            .filter(|id| *id != self.local_id())
            .cloned()
            .collect();

        let mut active = Vec::new();
        for id in ids {
            if self.blocked.contains(&id) {
                continue;
            }
            let Some(member) = self.gossiped_member(&id) else {
                continue;
            };
            if member.status == MemberStatus::Left {
                tracing::info!(member = %member, "member left");
                self.blocked.insert(id);
                continue;
            }

            let sequence = self.state.get(&id, HEARTBEAT_KEY).map_or(0, |e| e.sequence);
            let seen = self.last_seen.entry(id.clone()).or_insert((sequence, now));
            if sequence > seen.0 {
                *seen = (sequence, now);
            } else if now.duration_since(seen.1) > expiration {
                tracing::warn!(member = %member, "member heartbeat expired, blocking");
                self.blocked.insert(id);
                continue;
            }

            if member.status.is_active() {
                active.push(member);
            }
        }
        if self.settings.local.status.is_active() {
            active.push(self.settings.local.clone());
        }
        for id in &self.blocked {
            self.state.remove_member(id);
            self.last_seen.remove(id);
        }

        self.settings.member_list.update(active, &self.blocked);
        self.settings.snapshot.store(self.state.clone());
    }
}

#[async_trait]
impl Actor for Gossiper {
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        match message {
            Message::Started => self.started(ctx),
            Message::Stopped => self.stop_tasks(),
            Message::User(message) => self.handle(ctx, message),
            _ => {}
        }
        Ok(())
    }
}

impl Drop for Gossiper {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}
