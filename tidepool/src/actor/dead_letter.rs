//! Dead letters: messages for processes that are not alive.

use std::sync::Arc;

use super::{AnyMessage, EventStream, MessageEnvelope, Pid, Process, SystemMessage, Throttle, Valve};

/// An undeliverable message.
#[derive(Debug)]
pub enum DeadLetterMessage {
    /// A user payload.
    User(AnyMessage),
    /// A system message.
    System(SystemMessage),
}

impl DeadLetterMessage {
    /// Type name for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            DeadLetterMessage::User(message) => message.type_name(),
            DeadLetterMessage::System(_) => "SystemMessage",
        }
    }
}

/// Published on the event stream for every dead letter.
#[derive(Debug)]
pub struct DeadLetterEvent {
    /// Intended recipient.
    pub pid: Pid,
    /// The message.
    pub message: DeadLetterMessage,
    /// Who sent it, for user messages.
    pub sender: Option<Pid>,
}

/// Sink for every pid that resolves to nothing.
///
/// Each dead letter is published as a [`DeadLetterEvent`]. Logging goes
/// through a [`Throttle`] so a burst of undeliverable traffic produces a
/// bounded number of log lines per window.
pub struct DeadLetterProcess {
    events: Arc<EventStream>,
    throttle: Throttle,
}

impl DeadLetterProcess {
    pub(crate) fn new(events: Arc<EventStream>, throttle: Throttle) -> Self {
        Self { events, throttle }
    }

    fn log(&self, pid: &Pid, message: &DeadLetterMessage) {
        match self.throttle.should_throttle() {
            Valve::Open => {
                tracing::info!(pid = %pid, message = message.type_name(), "dead letter");
            }
            Valve::Closing => {
                tracing::info!(
                    pid = %pid,
                    message = message.type_name(),
                    "dead letter, throttling further dead-letter logs"
                );
            }
            Valve::Closed => {}
        }
    }

    fn publish(&self, event: DeadLetterEvent) {
        self.log(&event.pid, &event.message);
        self.events.publish(&event);
    }
}

impl Process for DeadLetterProcess {
    fn send_user_message(&self, pid: &Pid, envelope: MessageEnvelope) {
        self.publish(DeadLetterEvent {
            pid: pid.clone(),
            message: DeadLetterMessage::User(envelope.message),
            sender: envelope.sender,
        });
    }

    fn send_system_message(&self, pid: &Pid, message: SystemMessage) {
        self.publish(DeadLetterEvent {
            pid: pid.clone(),
            message: DeadLetterMessage::System(message),
            sender: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn every_dead_letter_is_published_even_when_logging_is_throttled() {
        let events = Arc::new(EventStream::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.subscribe::<DeadLetterEvent, _>(move |event| {
            sink.lock().push((event.pid.clone(), event.message.type_name()));
        });

        let process = DeadLetterProcess::new(events, Throttle::new(3, Duration::from_secs(1)));
        let pid = Pid::local("gone");
        for i in 0..10u32 {
            process.send_user_message(&pid, MessageEnvelope::new(i));
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 10);
        assert!(seen.iter().all(|(p, name)| *p == pid && *name == "u32"));
        assert_eq!(process.throttle.window_count(), 10);
    }
}
