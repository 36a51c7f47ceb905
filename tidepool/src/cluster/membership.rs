//! Membership provider: the discovery backend seeding gossip.
//!
//! A provider only has to know who registered and with which status. It
//! does not judge reachability; that is left to gossip heartbeats, so a
//! crashed member may linger in the provider until it is cleaned up.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{Member, MemberId, MemberStatus};

/// Errors from a [`MembershipProvider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MembershipError {
    /// The member is not registered.
    #[error("unknown member: {id}")]
    UnknownMember {
        /// Member id.
        id: MemberId,
    },

    /// The backend is unavailable.
    #[error("membership backend unavailable: {0}")]
    Unavailable(String),
}

/// Registered members at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembershipSnapshot {
    /// Increases on every change.
    pub version: u64,
    /// Registered members, sorted by id.
    pub members: Vec<Member>,
}

/// Discovery backend shared by all members of a cluster.
#[async_trait]
pub trait MembershipProvider: Send + Sync + std::fmt::Debug {
    /// Announce a member.
    async fn register_member(&self, member: Member) -> Result<(), MembershipError>;

    /// Remove a member.
    async fn deregister_member(&self, id: &MemberId) -> Result<(), MembershipError>;

    /// Change a registered member's status.
    async fn update_status(&self, id: &MemberId, status: MemberStatus) -> Result<(), MembershipError>;

    /// Stream of snapshots, starting with the current one.
    async fn monitor_member_status_changes(&self) -> watch::Receiver<MembershipSnapshot>;

    /// Currently registered members.
    async fn members(&self) -> Vec<Member>;
}

/// A provider living in process memory, for tests and single-process
/// clusters. Share one instance between all members.
#[derive(Debug)]
pub struct InMemoryMembershipProvider {
    members: Mutex<BTreeMap<MemberId, Member>>,
    changes: watch::Sender<MembershipSnapshot>,
}

impl InMemoryMembershipProvider {
    /// An empty provider.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(MembershipSnapshot::default());
        Self {
            members: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    fn publish(&self, members: &BTreeMap<MemberId, Member>) {
        let members: Vec<Member> = members.values().cloned().collect();
        self.changes.send_modify(|snapshot| {
            snapshot.version += 1;
            snapshot.members = members;
        });
    }
}

impl Default for InMemoryMembershipProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipProvider for InMemoryMembershipProvider {
    async fn register_member(&self, member: Member) -> Result<(), MembershipError> {
        tracing::debug!(member = %member, status = ?member.status, "member registered");
        let mut members = self.members.lock();
        members.insert(member.id.clone(), member);
        self.publish(&members);
        Ok(())
    }

    async fn deregister_member(&self, id: &MemberId) -> Result<(), MembershipError> {
        let mut members = self.members.lock();
        if members.remove(id).is_none() {
            return Err(MembershipError::UnknownMember { id: id.clone() });
        }
        tracing::debug!(member = %id, "member deregistered");
        self.publish(&members);
        Ok(())
    }

    async fn update_status(&self, id: &MemberId, status: MemberStatus) -> Result<(), MembershipError> {
        let mut members = self.members.lock();
        let member = members
            .get_mut(id)
            .ok_or_else(|| MembershipError::UnknownMember { id: id.clone() })?;
        member.status = status;
        self.publish(&members);
        Ok(())
    }

    async fn monitor_member_status_changes(&self) -> watch::Receiver<MembershipSnapshot> {
        self.changes.subscribe()
    }

    async fn members(&self) -> Vec<Member> {
        self.members.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(port: u16) -> Member {
        Member::new(format!("127.0.0.1:{port}"), ["OrderActor"]).with_id(format!("m{port}"))
    }

    #[tokio::test]
    async fn register_and_deregister() {
        let provider = InMemoryMembershipProvider::new();
        provider.register_member(member(4501)).await.expect("register");
        provider.register_member(member(4502)).await.expect("register");
        assert_eq!(provider.members().await.len(), 2);

        provider.deregister_member(&"m4501".to_string()).await.expect("deregister");
        let members = provider.members().await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "m4502");
    }

    #[tokio::test]
    async fn unknown_members_are_rejected() {
        let provider = InMemoryMembershipProvider::new();
        let id = "ghost".to_string();
        assert_eq!(
            provider.deregister_member(&id).await,
            Err(MembershipError::UnknownMember { id: id.clone() })
        );
        assert!(provider.update_status(&id, MemberStatus::Left).await.is_err());
    }

    #[tokio::test]
    async fn monitors_see_every_change() {
        let provider = InMemoryMembershipProvider::new();
        let mut changes = provider.monitor_member_status_changes().await;
        provider.register_member(member(4501)).await.expect("register");

        changes.changed().await.expect("changed");
        let snapshot = changes.borrow_and_update().clone();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.members.len(), 1);

        provider
            .update_status(&"m4501".to_string(), MemberStatus::Active)
            .await
            .expect("update");
        changes.changed().await.expect("changed");
        assert_eq!(changes.borrow().members[0].status, MemberStatus::Active);
    }
}
