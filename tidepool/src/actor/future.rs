//! One-shot reply processes backing request/response.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{
    ActorSystem, AnyMessage, DeadLetterResponse, MessageEnvelope, Pid, Process, RequestError,
    SpawnError, SystemMessage,
};

/// Completes a oneshot with the first message it receives.
///
/// A `Terminated` system message also completes it, which is how
/// [`super::RootContext::watch_terminated`] waits for a watched process.
struct FutureProcess {
    reply: Mutex<Option<oneshot::Sender<AnyMessage>>>,
}

impl FutureProcess {
    fn complete(&self, message: AnyMessage) {
        let reply = self.reply.lock().take();
        if let Some(reply) = reply {
            let _ = reply.send(message);
        }
    }
}

impl Process for FutureProcess {
    fn send_user_message(&self, _pid: &Pid, envelope: MessageEnvelope) {
        self.complete(envelope.message);
    }

    fn send_system_message(&self, _pid: &Pid, message: SystemMessage) {
        if let SystemMessage::Terminated(terminated) = message {
            self.complete(AnyMessage::new(terminated));
        }
    }
}

/// A registered reply process. Dropping it unregisters the pid, so the
/// registry never keeps a future alive past its caller.
pub(crate) struct PendingReply {
    system: ActorSystem,
    pid: Pid,
    rx: oneshot::Receiver<AnyMessage>,
}

impl PendingReply {
    pub(crate) fn register(system: &ActorSystem) -> Result<Self, SpawnError> {
        let (tx, rx) = oneshot::channel();
        let id = format!("future{}", system.registry().next_id());
        let process = FutureProcess {
            reply: Mutex::new(Some(tx)),
        };
        let pid = system.registry().add(id, Arc::new(process))?;
        Ok(Self {
            system: system.clone(),
            pid,
            rx,
        })
    }

    pub(crate) fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Wait for the reply until `timeout`, or until `cancel` fires.
    pub(crate) async fn wait(
        mut self,
        target: &Pid,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<AnyMessage, RequestError> {
        let receive = tokio::time::timeout(timeout, &mut self.rx);
        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(RequestError::Cancelled),
                    outcome = receive => outcome,
                }
            }
            None => receive.await,
        };
        match outcome {
            Err(_) => Err(RequestError::Timeout {
                target: target.clone(),
                timeout,
            }),
            Ok(Err(_)) => Err(RequestError::Cancelled),
            Ok(Ok(message)) => Ok(message),
        }
    }

    /// Wait without a deadline.
    pub(crate) async fn wait_unbounded(mut self) -> Result<AnyMessage, RequestError> {
        (&mut self.rx).await.map_err(|_| RequestError::Cancelled)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.system.registry().remove(&self.pid);
    }
}

/// Turn a raw reply into the type the caller asked for.
pub(crate) fn into_response<R: Any>(message: AnyMessage, target: &Pid) -> Result<R, RequestError> {
    if message.is::<DeadLetterResponse>() {
        return Err(RequestError::DeadLetter {
            target: target.clone(),
        });
    }
    let actual = message.type_name();
    message
        .downcast::<R>()
        .map_err(|_| RequestError::UnexpectedResponse {
            expected: std::any::type_name::<R>(),
            actual,
        })
}
