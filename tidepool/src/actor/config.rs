//! Actor system configuration.

use std::sync::Arc;
use std::time::Duration;

use super::dispatcher::DEFAULT_THROUGHPUT;
use super::{OneForOneStrategy, SupervisorStrategy};

/// Settings for one [`ActorSystem`](super::ActorSystem).
#[derive(Debug, Clone)]
pub struct ActorSystemConfig {
    /// Messages a mailbox processes per scheduling turn.
    pub throughput: usize,
    /// Dead letters logged per throttle window.
    pub dead_letter_throttle_count: u32,
    /// Length of the dead-letter throttle window.
    pub dead_letter_throttle_interval: Duration,
    /// Answer requesters of dead letters with `DeadLetterResponse`.
    pub dead_letter_response: bool,
    /// Strategy applied to failures of top-level actors.
    pub root_supervisor: Arc<dyn SupervisorStrategy>,
}

impl Default for ActorSystemConfig {
    fn default() -> Self {
        Self {
            throughput: DEFAULT_THROUGHPUT,
            dead_letter_throttle_count: 3,
            dead_letter_throttle_interval: Duration::from_secs(1),
            dead_letter_response: true,
            root_supervisor: Arc::new(OneForOneStrategy::default()),
        }
    }
}

impl ActorSystemConfig {
    /// Set the mailbox batch size.
    pub fn with_throughput(mut self, throughput: usize) -> Self {
        self.throughput = throughput;
        self
    }

    /// Set the dead-letter log throttle.
    pub fn with_dead_letter_throttle(mut self, count: u32, interval: Duration) -> Self {
        self.dead_letter_throttle_count = count;
        self.dead_letter_throttle_interval = interval;
        self
    }

    /// Set the strategy for top-level actors.
    pub fn with_root_supervisor(mut self, strategy: impl SupervisorStrategy + 'static) -> Self {
        self.root_supervisor = Arc::new(strategy);
        self
    }
}
