//! Failure handling across the parent/child tree.
//!
//! When an actor fails it suspends its own mailbox and reports a
//! [`Failure`](super::Failure) to its parent, or to the root guardian for
//! top-level actors. The parent's [`SupervisorStrategy`] picks a
//! [`Directive`] and applies it through the [`Supervisor`] seam:
//!
//! - `Resume` drops the failing message and resumes the mailbox.
//! - `Restart` replaces the actor instance, keeping the mailbox. It is
//!   bounded by `max_retries` within a window: the failure after the last
//!   allowed restart stops the child instead.
//! - `Stop` stops the child; watchers get `Terminated`.
//! - `Escalate` fails the supervisor itself, so the grandparent decides.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{ActorError, ActorSystem, Failure, Pid, SystemMessage};

/// Supervisor decision for a failed child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
    /// Ignore the failure and keep going.
    Resume,
    /// Recreate the actor, keeping its mailbox.
    Restart,
    /// Stop the actor.
    Stop,
    /// Let the supervisor's own supervisor decide.
    Escalate,
}

/// Maps a failure to a directive.
pub type Decider = Arc<dyn Fn(&ActorError) -> Directive + Send + Sync>;

/// Decider that always restarts.
pub fn default_decider() -> Decider {
    Arc::new(|_| Directive::Restart)
}

/// Failure timestamps for one child.
#[derive(Debug, Clone, Default)]
pub struct RestartStatistics {
    failures: Vec<Instant>,
}

impl RestartStatistics {
    /// Empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure now.
    pub fn fail(&mut self) {
        self.failures.push(Instant::now());
    }

    /// Forget every recorded failure.
    pub fn reset(&mut self) {
        self.failures.clear();
    }

    /// Total recorded failures.
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Failures within `within` of now; every failure when `None`.
    ///
    /// Older failures are discarded, so a window of quiet resets the count.
    pub fn number_of_failures(&mut self, within: Option<Duration>) -> usize {
        if let Some(window) = within {
            let now = Instant::now();
            self.failures
                .retain(|failed| now.duration_since(*failed) < window);
        }
        self.failures.len()
    }
}

/// What a strategy did with one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Directive actually applied.
    pub directive: Directive,
    /// A restart was wanted but the retry budget was spent.
    pub exhausted: bool,
}

impl FailureOutcome {
    fn applied(directive: Directive) -> Self {
        Self {
            directive,
            exhausted: false,
        }
    }

    fn exhausted() -> Self {
        Self {
            directive: Directive::Stop,
            exhausted: true,
        }
    }
}

/// The parent side of supervision, as seen by a strategy.
pub trait Supervisor {
    /// Currently supervised children.
    fn children(&self) -> Vec<Pid>;

    /// Ask `pids` to restart.
    fn restart_children(&self, pids: &[Pid]);

    /// Ask `pids` to stop.
    fn stop_children(&self, pids: &[Pid]);

    /// Resume `pids` after a failure.
    fn resume_children(&self, pids: &[Pid]);

    /// Fail the supervisor itself with `reason`.
    fn escalate_failure(&self, reason: Arc<ActorError>, message_type: &'static str);
}

/// Policy deciding how a supervisor reacts to a child failure.
pub trait SupervisorStrategy: Send + Sync + fmt::Debug {
    /// Decide and apply a directive for `child`.
    fn handle_failure(
        &self,
        supervisor: &dyn Supervisor,
        child: &Pid,
        stats: &mut RestartStatistics,
        reason: Arc<ActorError>,
        message_type: &'static str,
    ) -> FailureOutcome;
}

fn should_stop(max_retries: usize, within: Option<Duration>, stats: &mut RestartStatistics) -> bool {
    if max_retries == 0 {
        return true;
    }
    stats.fail();
    if stats.number_of_failures(within) > max_retries {
        stats.reset();
        return true;
    }
    false
}

/// Applies the directive to the failing child only.
#[derive(Clone)]
pub struct OneForOneStrategy {
    max_retries: usize,
    within: Option<Duration>,
    decider: Decider,
}

impl OneForOneStrategy {
    /// Allow `max_retries` restarts within `within` before stopping.
    pub fn new(max_retries: usize, within: Option<Duration>) -> Self {
        Self {
            max_retries,
            within,
            decider: default_decider(),
        }
    }

    /// Replace the decider.
    pub fn with_decider<F>(mut self, decider: F) -> Self
    where
        F: Fn(&ActorError) -> Directive + Send + Sync + 'static,
    {
        self.decider = Arc::new(decider);
        self
    }
}

impl Default for OneForOneStrategy {
    fn default() -> Self {
        Self::new(10, Some(Duration::from_secs(10)))
    }
}

impl fmt::Debug for OneForOneStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneForOneStrategy")
            .field("max_retries", &self.max_retries)
            .field("within", &self.within)
            .finish_non_exhaustive()
    }
}

impl SupervisorStrategy for OneForOneStrategy {
    fn handle_failure(
        &self,
        supervisor: &dyn Supervisor,
        child: &Pid,
        stats: &mut RestartStatistics,
        reason: Arc<ActorError>,
        message_type: &'static str,
    ) -> FailureOutcome {
        let targets = std::slice::from_ref(child);
        match (self.decider)(&reason) {
            Directive::Resume => {
                supervisor.resume_children(targets);
                FailureOutcome::applied(Directive::Resume)
            }
            Directive::Restart => {
                if should_stop(self.max_retries, self.within, stats) {
                    supervisor.stop_children(targets);
                    FailureOutcome::exhausted()
                } else {
                    supervisor.restart_children(targets);
                    FailureOutcome::applied(Directive::Restart)
                }
            }
            Directive::Stop => {
                supervisor.stop_children(targets);
                FailureOutcome::applied(Directive::Stop)
            }
            Directive::Escalate => {
                supervisor.escalate_failure(reason, message_type);
                FailureOutcome::applied(Directive::Escalate)
            }
        }
    }
}

/// Applies restart and stop to every child of the supervisor.
#[derive(Clone)]
pub struct AllForOneStrategy {
    max_retries: usize,
    within: Option<Duration>,
    decider: Decider,
}

impl AllForOneStrategy {
    /// Allow `max_retries` restarts within `within` before stopping all.
    pub fn new(max_retries: usize, within: Option<Duration>) -> Self {
        Self {
            max_retries,
            within,
            decider: default_decider(),
        }
    }

    /// Replace the decider.
    pub fn with_decider<F>(mut self, decider: F) -> Self
    where
        F: Fn(&ActorError) -> Directive + Send + Sync + 'static,
    {
        self.decider = Arc::new(decider);
        self
    }
}

impl fmt::Debug for AllForOneStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllForOneStrategy")
            .field("max_retries", &self.max_retries)
            .field("within", &self.within)
            .finish_non_exhaustive()
    }
}

impl SupervisorStrategy for AllForOneStrategy {
    fn handle_failure(
        &self,
        supervisor: &dyn Supervisor,
        child: &Pid,
        stats: &mut RestartStatistics,
        reason: Arc<ActorError>,
        message_type: &'static str,
    ) -> FailureOutcome {
        match (self.decider)(&reason) {
            Directive::Resume => {
                supervisor.resume_children(std::slice::from_ref(child));
                FailureOutcome::applied(Directive::Resume)
            }
            Directive::Restart => {
                let children = supervisor.children();
                if should_stop(self.max_retries, self.within, stats) {
                    supervisor.stop_children(&children);
                    FailureOutcome::exhausted()
                } else {
                    supervisor.restart_children(&children);
                    FailureOutcome::applied(Directive::Restart)
                }
            }
            Directive::Stop => {
                supervisor.stop_children(&supervisor.children());
                FailureOutcome::applied(Directive::Stop)
            }
            Directive::Escalate => {
                supervisor.escalate_failure(reason, message_type);
                FailureOutcome::applied(Directive::Escalate)
            }
        }
    }
}

/// Restarts forever, with no budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestartingStrategy;

impl SupervisorStrategy for RestartingStrategy {
    fn handle_failure(
        &self,
        supervisor: &dyn Supervisor,
        child: &Pid,
        _stats: &mut RestartStatistics,
        _reason: Arc<ActorError>,
        _message_type: &'static str,
    ) -> FailureOutcome {
        supervisor.restart_children(std::slice::from_ref(child));
        FailureOutcome::applied(Directive::Restart)
    }
}

/// Published for every supervision decision.
#[derive(Debug, Clone)]
pub struct SupervisionEvent {
    /// The failed child.
    pub child: Pid,
    /// Why it failed.
    pub reason: Arc<ActorError>,
    /// What was done about it.
    pub directive: Directive,
}

/// Published when a child is stopped because its restart budget ran out.
#[derive(Debug, Clone)]
pub struct SupervisionExhausted {
    /// The stopped child.
    pub child: Pid,
    /// The failure that spent the budget.
    pub reason: Arc<ActorError>,
}

pub(crate) fn publish_outcome(system: &ActorSystem, failure: &Failure, outcome: FailureOutcome) {
    tracing::debug!(
        child = %failure.who,
        directive = ?outcome.directive,
        message_type = failure.message_type,
        "supervision decision"
    );
    system.event_stream().publish(&SupervisionEvent {
        child: failure.who.clone(),
        reason: Arc::clone(&failure.reason),
        directive: outcome.directive,
    });
    if outcome.exhausted {
        tracing::warn!(child = %failure.who, error = %failure.reason, "restart budget exhausted, stopping");
        system.event_stream().publish(&SupervisionExhausted {
            child: failure.who.clone(),
            reason: Arc::clone(&failure.reason),
        });
    }
}

/// Supervises top-level actors.
pub(crate) struct RootGuardian {
    strategy: Arc<dyn SupervisorStrategy>,
    stats: Mutex<HashMap<Pid, RestartStatistics>>,
}

impl RootGuardian {
    pub(crate) fn new(strategy: Arc<dyn SupervisorStrategy>) -> Self {
        Self {
            strategy,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn handle_failure(&self, system: &ActorSystem, failure: Failure) {
        let mut stats = self.stats.lock().remove(&failure.who).unwrap_or_default();
        let supervisor = GuardianSupervisor {
            system,
            child: &failure.who,
        };
        let outcome = self.strategy.handle_failure(
            &supervisor,
            &failure.who,
            &mut stats,
            Arc::clone(&failure.reason),
            failure.message_type,
        );
        if outcome.directive != Directive::Stop {
            self.stats.lock().insert(failure.who.clone(), stats);
        }
        publish_outcome(system, &failure, outcome);
    }

    pub(crate) fn forget(&self, pid: &Pid) {
        self.stats.lock().remove(pid);
    }
}

impl fmt::Debug for RootGuardian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootGuardian")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

struct GuardianSupervisor<'a> {
    system: &'a ActorSystem,
    child: &'a Pid,
}

impl Supervisor for GuardianSupervisor<'_> {
    fn children(&self) -> Vec<Pid> {
        vec![self.child.clone()]
    }

    fn restart_children(&self, pids: &[Pid]) {
        for pid in pids {
            self.system.send_system(pid, SystemMessage::Restart);
        }
    }

    fn stop_children(&self, pids: &[Pid]) {
        for pid in pids {
            self.system.send_system(pid, SystemMessage::Stop);
        }
    }

    fn resume_children(&self, pids: &[Pid]) {
        for pid in pids {
            self.system.send_system(pid, SystemMessage::ResumeMailbox);
        }
    }

    fn escalate_failure(&self, reason: Arc<ActorError>, _message_type: &'static str) {
        tracing::error!(child = %self.child, error = %reason, "failure escalated past the root, stopping");
        self.system.send_system(self.child, SystemMessage::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorded {
        restarted: Mutex<Vec<Pid>>,
        stopped: Mutex<Vec<Pid>>,
        resumed: Mutex<Vec<Pid>>,
        escalated: Mutex<usize>,
        children: Vec<Pid>,
    }

    impl Supervisor for Recorded {
        fn children(&self) -> Vec<Pid> {
            self.children.clone()
        }

        fn restart_children(&self, pids: &[Pid]) {
            self.restarted.lock().extend_from_slice(pids);
        }

        fn stop_children(&self, pids: &[Pid]) {
            self.stopped.lock().extend_from_slice(pids);
        }

        fn resume_children(&self, pids: &[Pid]) {
            self.resumed.lock().extend_from_slice(pids);
        }

        fn escalate_failure(&self, _reason: Arc<ActorError>, _message_type: &'static str) {
            *self.escalated.lock() += 1;
        }
    }

    fn reason() -> Arc<ActorError> {
        Arc::new(ActorError::failed("boom"))
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_max_retries_stops_instead_of_restarting() {
        let strategy = OneForOneStrategy::new(3, Some(Duration::from_secs(10)));
        let supervisor = Recorded::default();
        let child = Pid::local("child");
        let mut stats = RestartStatistics::new();

        for _ in 0..3 {
            let outcome = strategy.handle_failure(&supervisor, &child, &mut stats, reason(), "u32");
            assert_eq!(outcome, FailureOutcome::applied(Directive::Restart));
        }
        let outcome = strategy.handle_failure(&supervisor, &child, &mut stats, reason(), "u32");
        assert_eq!(outcome, FailureOutcome::exhausted());
        assert_eq!(supervisor.restarted.lock().len(), 3);
        assert_eq!(supervisor.stopped.lock().as_slice(), &[child]);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_window_resets_the_budget() {
        let strategy = OneForOneStrategy::new(2, Some(Duration::from_secs(1)));
        let supervisor = Recorded::default();
        let child = Pid::local("child");
        let mut stats = RestartStatistics::new();

        for _ in 0..2 {
            strategy.handle_failure(&supervisor, &child, &mut stats, reason(), "u32");
        }
        tokio::time::advance(Duration::from_millis(1500)).await;
        for _ in 0..2 {
            let outcome = strategy.handle_failure(&supervisor, &child, &mut stats, reason(), "u32");
            assert_eq!(outcome.directive, Directive::Restart);
        }
        let outcome = strategy.handle_failure(&supervisor, &child, &mut stats, reason(), "u32");
        assert!(outcome.exhausted);
    }

    #[test]
    fn zero_retries_stops_on_first_failure() {
        let strategy = OneForOneStrategy::new(0, None);
        let supervisor = Recorded::default();
        let mut stats = RestartStatistics::new();
        let outcome = strategy.handle_failure(&supervisor, &Pid::local("c"), &mut stats, reason(), "u32");
        assert_eq!(outcome.directive, Directive::Stop);
    }

    #[test]
    fn decider_routes_resume_and_escalate() {
        let resume = OneForOneStrategy::default().with_decider(|_| Directive::Resume);
        let escalate = OneForOneStrategy::default().with_decider(|_| Directive::Escalate);
        let supervisor = Recorded::default();
        let child = Pid::local("c");
        let mut stats = RestartStatistics::new();

        resume.handle_failure(&supervisor, &child, &mut stats, reason(), "u32");
        escalate.handle_failure(&supervisor, &child, &mut stats, reason(), "u32");
        assert_eq!(supervisor.resumed.lock().as_slice(), &[child]);
        assert_eq!(*supervisor.escalated.lock(), 1);
        assert_eq!(stats.failure_count(), 0);
    }

    #[test]
    fn all_for_one_restarts_every_child() {
        let strategy = AllForOneStrategy::new(5, None);
        let supervisor = Recorded {
            children: vec![Pid::local("a"), Pid::local("b"), Pid::local("c")],
            ..Recorded::default()
        };
        let mut stats = RestartStatistics::new();
        strategy.handle_failure(&supervisor, &Pid::local("b"), &mut stats, reason(), "u32");
        assert_eq!(supervisor.restarted.lock().len(), 3);
    }
}
