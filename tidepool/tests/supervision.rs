//! Supervision directives, restart budgets and escalation.

#[path = "common/mod.rs"]
mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool::actor::{
    AllForOneStrategy, OneForOneStrategy, SupervisionEvent, SupervisionExhausted,
};
use tidepool::{
    Actor, ActorContext, ActorError, ActorSystem, ActorSystemConfig, Directive, Message, Pid,
    Props, RequestError, RootContext,
};

use common::{eventually, init_tracing};

#[derive(Debug, Clone, Copy)]
enum Cmd {
    Count,
    Fail,
    Panic,
    Get,
}

struct Flaky {
    starts: Arc<AtomicUsize>,
    handled: u32,
}

#[async_trait]
impl Actor for Flaky {
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        if matches!(message, Message::Started) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        match message.downcast_ref::<Cmd>() {
            Some(Cmd::Count) => self.handled += 1,
            Some(Cmd::Fail) => return Err(ActorError::failed("boom")),
            Some(Cmd::Panic) => panic!("kaboom"),
            Some(Cmd::Get) => ctx.respond(self.handled),
            None => {}
        }
        Ok(())
    }
}

fn flaky(starts: &Arc<AtomicUsize>) -> Props {
    let starts = Arc::clone(starts);
    Props::from_producer(move || Flaky {
        starts: Arc::clone(&starts),
        handled: 0,
    })
}

#[derive(Debug, Clone, Copy)]
struct ChildNamed(&'static str);

/// Spawns a fixed set of named children on start.
struct Parent {
    layout: Vec<(&'static str, Props)>,
    children: HashMap<&'static str, Pid>,
}

#[async_trait]
impl Actor for Parent {
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        if matches!(message, Message::Started) {
            for (name, props) in &self.layout {
                let pid = ctx.spawn_named(props.clone(), name)?;
                self.children.insert(*name, pid);
            }
            return Ok(());
        }
        if let Some(Cmd::Fail) = message.downcast_ref::<Cmd>() {
            return Err(ActorError::failed("parent boom"));
        }
        if let Some(ChildNamed(name)) = message.downcast_ref::<ChildNamed>() {
            if let Some(pid) = self.children.get(name) {
                ctx.respond(pid.clone());
            }
        }
        Ok(())
    }
}

fn parent(layout: Vec<(&'static str, Props)>) -> Props {
    Props::from_producer(move || Parent {
        layout: layout.clone(),
        children: HashMap::new(),
    })
}

async fn child_of(root: &RootContext, parent: &Pid, name: &'static str) -> Pid {
    root.request_async(parent, ChildNamed(name), Duration::from_secs(1))
        .await
        .expect("child pid")
}

fn record_events(system: &ActorSystem) -> (Arc<Mutex<Vec<SupervisionEvent>>>, Arc<AtomicUsize>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    system.event_stream().subscribe::<SupervisionEvent, _>(move |event| {
        sink.lock().push(event.clone());
    });
    let exhausted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exhausted);
    system.event_stream().subscribe::<SupervisionExhausted, _>(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (events, exhausted)
}

#[tokio::test]
async fn failure_past_the_restart_budget_stops_instead_of_restarting() {
    init_tracing();
    let config = ActorSystemConfig::default()
        .with_root_supervisor(OneForOneStrategy::new(2, Some(Duration::from_secs(10))));
    let system = ActorSystem::new(config);
    let root = system.root();
    let (events, exhausted) = record_events(&system);
    let starts = Arc::new(AtomicUsize::new(0));
    let pid = root.spawn(flaky(&starts)).expect("spawn");

    root.send(&pid, Cmd::Count);
    root.send(&pid, Cmd::Fail);
    root.send(&pid, Cmd::Fail);
    let handled: u32 = root
        .request_async(&pid, Cmd::Get, Duration::from_secs(1))
        .await
        .expect("still alive after two restarts");
    assert_eq!(handled, 0, "restart recreates the instance");
    assert_eq!(starts.load(Ordering::SeqCst), 3);
    assert!(system.registry().find(&pid).is_some());

    root.send(&pid, Cmd::Fail);

    assert!(eventually(Duration::from_secs(1), || system.registry().find(&pid).is_none()).await);
    assert_eq!(starts.load(Ordering::SeqCst), 3);
    assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    let directives: Vec<Directive> = events.lock().iter().map(|event| event.directive).collect();
    assert_eq!(directives, vec![Directive::Restart, Directive::Restart, Directive::Stop]);
}

#[tokio::test]
async fn quiet_window_resets_the_restart_budget() {
    init_tracing();
    let config = ActorSystemConfig::default()
        .with_root_supervisor(OneForOneStrategy::new(1, Some(Duration::from_millis(100))));
    let system = ActorSystem::new(config);
    let root = system.root();
    let starts = Arc::new(AtomicUsize::new(0));
    let pid = root.spawn(flaky(&starts)).expect("spawn");

    root.send(&pid, Cmd::Fail);
    assert!(eventually(Duration::from_secs(1), || starts.load(Ordering::SeqCst) == 2).await);
    tokio::time::sleep(Duration::from_millis(150)).await;
    root.send(&pid, Cmd::Fail);

    assert!(eventually(Duration::from_secs(1), || starts.load(Ordering::SeqCst) == 3).await);
    assert!(system.registry().find(&pid).is_some());
}

#[tokio::test]
async fn resume_keeps_actor_state() {
    init_tracing();
    let config = ActorSystemConfig::default().with_root_supervisor(
        OneForOneStrategy::new(1, None).with_decider(|_| Directive::Resume),
    );
    let system = ActorSystem::new(config);
    let root = system.root();
    let starts = Arc::new(AtomicUsize::new(0));
    let pid = root.spawn(flaky(&starts)).expect("spawn");

    root.send(&pid, Cmd::Count);
    root.send(&pid, Cmd::Fail);
    root.send(&pid, Cmd::Count);
    root.send(&pid, Cmd::Fail);
    root.send(&pid, Cmd::Count);
    let handled: u32 = root
        .request_async(&pid, Cmd::Get, Duration::from_secs(1))
        .await
        .expect("handled count");

    assert_eq!(handled, 3);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panics_are_contained_and_restarted() {
    init_tracing();
    let system = ActorSystem::new(ActorSystemConfig::default());
    let root = system.root();
    let (events, _) = record_events(&system);
    let starts = Arc::new(AtomicUsize::new(0));
    let pid = root.spawn(flaky(&starts)).expect("spawn");

    root.send(&pid, Cmd::Panic);
    let handled: u32 = root
        .request_async(&pid, Cmd::Get, Duration::from_secs(1))
        .await
        .expect("alive after panic");

    assert_eq!(handled, 0);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert!(matches!(*events[0].reason, ActorError::Panicked(_)));
}

#[tokio::test]
async fn escalate_hands_the_decision_to_the_grandparent() {
    init_tracing();
    let system = ActorSystem::new(ActorSystemConfig::default());
    let root = system.root();
    let (events, _) = record_events(&system);
    let starts = Arc::new(AtomicUsize::new(0));

    let middle = parent(vec![("leaf", flaky(&starts))])
        .with_supervisor(OneForOneStrategy::new(5, None).with_decider(|_| Directive::Escalate));
    let top = root
        .spawn(
            parent(vec![("middle", middle)])
                .with_supervisor(OneForOneStrategy::new(5, None).with_decider(|_| Directive::Stop)),
        )
        .expect("spawn");
    let middle = child_of(&root, &top, "middle").await;
    let leaf = child_of(&root, &middle, "leaf").await;
    assert_eq!(leaf.id, format!("{}/leaf", middle.id));

    root.send(&leaf, Cmd::Fail);

    assert!(
        eventually(Duration::from_secs(1), || {
            system.registry().find(&middle).is_none() && system.registry().find(&leaf).is_none()
        })
        .await
    );
    assert!(system.registry().find(&top).is_some());
    let events = events.lock();
    assert_eq!(events[0].child, leaf);
    assert_eq!(events[0].directive, Directive::Escalate);
    assert_eq!(events[1].child, middle);
    assert_eq!(events[1].directive, Directive::Stop);
}

#[tokio::test]
async fn all_for_one_restarts_every_sibling() {
    init_tracing();
    let system = ActorSystem::new(ActorSystemConfig::default());
    let root = system.root();
    let starts_a = Arc::new(AtomicUsize::new(0));
    let starts_b = Arc::new(AtomicUsize::new(0));
    let props = parent(vec![("a", flaky(&starts_a)), ("b", flaky(&starts_b))])
        .with_supervisor(AllForOneStrategy::new(3, None));
    let top = root.spawn(props).expect("spawn");
    let a = child_of(&root, &top, "a").await;
    let b = child_of(&root, &top, "b").await;

    root.send(&a, Cmd::Fail);

    assert!(
        eventually(Duration::from_secs(1), || {
            starts_a.load(Ordering::SeqCst) == 2 && starts_b.load(Ordering::SeqCst) == 2
        })
        .await
    );
    let _: u32 = root
        .request_async(&b, Cmd::Get, Duration::from_secs(1))
        .await
        .expect("sibling alive");
}

#[tokio::test]
async fn restarting_parent_respawns_its_named_children_once() {
    init_tracing();
    let system = ActorSystem::new(ActorSystemConfig::default());
    let root = system.root();
    let (events, exhausted) = record_events(&system);
    let starts = Arc::new(AtomicUsize::new(0));
    let top = root.spawn(parent(vec![("leaf", flaky(&starts))])).expect("spawn");
    let leaf = child_of(&root, &top, "leaf").await;
    root.send(&leaf, Cmd::Count);

    root.send(&top, Cmd::Fail);

    let respawned = child_of(&root, &top, "leaf").await;
    assert_eq!(respawned, leaf);
    let handled: u32 = root
        .request_async(&respawned, Cmd::Get, Duration::from_secs(1))
        .await
        .expect("fresh leaf");
    assert_eq!(handled, 0);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = events.lock();
    assert_eq!(events.len(), 1, "one failure, one restart");
    assert_eq!(events[0].child, top);
    assert_eq!(events[0].directive, Directive::Restart);
    assert_eq!(exhausted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stopped_actor_answers_queued_requests_with_dead_letters() {
    init_tracing();
    let config = ActorSystemConfig::default().with_root_supervisor(OneForOneStrategy::new(0, None));
    let system = ActorSystem::new(config);
    let root = system.root();
    let starts = Arc::new(AtomicUsize::new(0));
    let pid = root.spawn(flaky(&starts)).expect("spawn");

    root.send(&pid, Cmd::Fail);
    let started = std::time::Instant::now();
    let result = root
        .request_async::<u32, _>(&pid, Cmd::Get, Duration::from_secs(2))
        .await;

    assert!(
        matches!(result, Err(RequestError::DeadLetter { .. })),
        "{result:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(system.registry().find(&pid).is_none());
}

#[tokio::test]
async fn stopping_a_parent_stops_its_children_first() {
    init_tracing();
    let system = ActorSystem::new(ActorSystemConfig::default());
    let root = system.root();
    let starts = Arc::new(AtomicUsize::new(0));
    let top = root.spawn(parent(vec![("leaf", flaky(&starts))])).expect("spawn");
    let leaf = child_of(&root, &top, "leaf").await;

    root.stop_future(&top).await.expect("parent stopped");

    assert!(system.registry().find(&leaf).is_none());
    assert!(system.registry().find(&top).is_none());
}
