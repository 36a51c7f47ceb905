//! Location-transparent pids for virtual actors.
//!
//! [`Cluster::pid_for`](super::Cluster::pid_for) hands out pids on the
//! pseudo-address [`CLUSTER_ADDRESS`] whose id is `kind/identity`. The
//! registry resolves them to a [`ClusterDeliveryProcess`], which keeps one
//! queue and one worker per identity. A worker resolves the live
//! activation and forwards, so messages to one identity keep their order
//! while a slow owner never holds up another identity.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{ClusterIdentity, ClusterInner};
use crate::actor::{MessageEnvelope, Pid, Process, SystemMessage};

/// Address of pids routed through the cluster.
pub const CLUSTER_ADDRESS: &str = "cluster";

/// How long an identity worker waits for more work before exiting.
const WORKER_IDLE: Duration = Duration::from_secs(5);

enum Delivery {
    User(Pid, MessageEnvelope),
    System(Pid, SystemMessage),
}

impl Delivery {
    fn pid(&self) -> &Pid {
        match self {
            Delivery::User(pid, _) | Delivery::System(pid, _) => pid,
        }
    }
}

pub(crate) struct ClusterDeliveryProcess {
    cluster: Weak<ClusterInner>,
    // pid id -> queue of that identity's worker
    queues: Arc<DashMap<String, mpsc::UnboundedSender<Delivery>>>,
}

impl ClusterDeliveryProcess {
    pub(crate) fn new(cluster: Weak<ClusterInner>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            queues: Arc::new(DashMap::new()),
        })
    }


    fn enqueue(&self, delivery: Delivery) {
        let id = delivery.pid().id.clone();
        // The shard lock is held while sending, so a worker exiting under
        // the same lock never strands a message.
        let rejected = match self.queues.entry(id.clone()) {
            Entry::Occupied(entry) => entry.get().send(delivery).err(),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let rejected = tx.send(delivery).err();
                slot.insert(tx);
                tokio::spawn(run_identity(
                    self.cluster.clone(),
                    Arc::clone(&self.queues),
                    id,
                    rx,
                ));
                rejected
            }
        };
        if let Some(mpsc::error::SendError(delivery)) = rejected {
            tracing::debug!(pid = %delivery.pid(), "cluster delivery stopped, dropping message");
        }
    }
}

impl Process for ClusterDeliveryProcess {
    fn send_user_message(&self, pid: &Pid, envelope: MessageEnvelope) {
        self.enqueue(Delivery::User(pid.clone(), envelope));
    }

    fn send_system_message(&self, pid: &Pid, message: SystemMessage) {
        self.enqueue(Delivery::System(pid.clone(), message));
    }
}

async fn run_identity(
    cluster: Weak<ClusterInner>,
    queues: Arc<DashMap<String, mpsc::UnboundedSender<Delivery>>>,
    id: String,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
) {
    loop {
        let delivery = match tokio::time::timeout(WORKER_IDLE, rx.recv()).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => break,
            Err(_) => {
                if queues.remove_if(&id, |_, _| rx.is_empty()).is_some() {
                    break;
                }
                continue;
            }
        };
        let Some(cluster) = cluster.upgrade() else {
            queues.remove(&id);
            break;
        };
        deliver(&cluster, delivery).await;
    }
    tracing::trace!(id = %id, "cluster delivery worker idle");
}

async fn deliver(cluster: &ClusterInner, delivery: Delivery) {
    let target = match ClusterIdentity::parse(&delivery.pid().id) {
        Some(identity) => cluster.resolve(&identity).await,
        None => {
            tracing::warn!(pid = %delivery.pid(), "malformed cluster pid");
            None
        }
    };
    let system = cluster.system();
    match (delivery, target) {
        (Delivery::User(_, envelope), Some(target)) => system.send_envelope(&target, envelope),
        (Delivery::System(_, message), Some(target)) => system.send_system(&target, message),
        (Delivery::User(pid, envelope), None) => {
            system.registry().dead_letter().send_user_message(&pid, envelope);
        }
        (Delivery::System(pid, message), None) => {
            system
                .registry()
                .dead_letter()
                .send_system_message(&pid, message);
        }
    }
}
