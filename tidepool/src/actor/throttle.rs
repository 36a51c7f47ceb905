//! Event-rate throttle used to keep dead-letter logging from flooding.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Throttle verdict for a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Valve {
    /// Under the limit.
    Open,
    /// This event hits the limit; the rest of the window is throttled.
    Closing,
    /// Over the limit until the window elapses.
    Closed,
}

impl Valve {
    /// `Open` or `Closing`: the caller should act on this event.
    pub fn is_triggered(self) -> bool {
        !matches!(self, Valve::Closed)
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Lets `max_events` events through per `interval`.
///
/// The window opens with the first event and closes `interval` later; the
/// next event after that opens a fresh window.
#[derive(Debug)]
pub struct Throttle {
    max_events: u32,
    interval: Duration,
    window: Mutex<Option<Window>>,
}

impl Throttle {
    /// Create a throttle.
    pub fn new(max_events: u32, interval: Duration) -> Self {
        Self {
            max_events,
            interval,
            window: Mutex::new(None),
        }
    }

    /// Record one event and decide whether it passes.
    pub fn should_throttle(&self) -> Valve {
        let now = Instant::now();
        let mut window = self.window.lock();
        let expired = window
            .as_ref()
            .map_or(true, |current| now.duration_since(current.started) >= self.interval);
        if expired {
            *window = None;
        }
        let current = window.get_or_insert(Window {
            started: now,
            count: 0,
        });
        current.count = current.count.saturating_add(1);
        match current.count.cmp(&self.max_events) {
            std::cmp::Ordering::Less => Valve::Open,
            std::cmp::Ordering::Equal => Valve::Closing,
            std::cmp::Ordering::Greater => Valve::Closed,
        }
    }

    /// Events seen in the current window, including throttled ones.
    pub fn window_count(&self) -> u32 {
        self.window.lock().as_ref().map_or(0, |window| window.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_triggers_exactly_max_events_per_window() {
        let throttle = Throttle::new(3, Duration::from_secs(1));

        let triggered = (0..1000)
            .filter(|_| throttle.should_throttle().is_triggered())
            .count();
        assert_eq!(triggered, 3);
        assert_eq!(throttle.window_count(), 1000);

        tokio::time::advance(Duration::from_millis(1001)).await;

        let verdicts: Vec<Valve> = (0..5).map(|_| throttle.should_throttle()).collect();
        assert_eq!(
            verdicts,
            vec![Valve::Open, Valve::Open, Valve::Closing, Valve::Closed, Valve::Closed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_does_not_slide_while_events_keep_arriving() {
        let throttle = Throttle::new(1, Duration::from_secs(1));
        assert_eq!(throttle.should_throttle(), Valve::Closing);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(throttle.should_throttle(), Valve::Closed);

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(throttle.should_throttle(), Valve::Closing);
    }
}
