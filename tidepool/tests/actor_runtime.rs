//! Local runtime behaviour: ordering, lifecycle, requests, watches and
//! dead letters.

#[path = "common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool::{
    Actor, ActorContext, ActorError, DeadLetterEvent, MailboxConfig, Message, MessageEnvelope,
    OverflowPolicy, Pid, Props, RequestError, SpawnError, Terminated, TerminatedReason,
};
use tokio::sync::Notify;

use common::{eventually, init_tracing, system};

#[derive(Debug, Clone, Copy)]
struct GetLog;

#[derive(Default)]
struct Recorder {
    seen: Vec<u32>,
}

#[async_trait]
impl Actor for Recorder {
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        if let Some(value) = message.downcast_ref::<u32>() {
            self.seen.push(*value);
        } else if message.is::<GetLog>() {
            ctx.respond(self.seen.clone());
        }
        Ok(())
    }
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_send_order() {
    init_tracing();
    let system = system();
    let root = system.root();
    let pid = root.spawn(Props::from_producer(Recorder::default)).expect("spawn");

    for i in 0..1000u32 {
        root.send(&pid, i);
    }
    let seen: Vec<u32> = root
        .request_async(&pid, GetLog, Duration::from_secs(2))
        .await
        .expect("log");

    assert_eq!(seen, (0..1000).collect::<Vec<_>>());
}

struct Lifecycle {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Actor for Lifecycle {
    async fn receive(&mut self, _ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        match message {
            Message::Started => self.log.lock().push("started".to_string()),
            Message::User(payload) => {
                if let Some(note) = payload.downcast_ref::<&'static str>() {
                    self.log.lock().push(note.to_string());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[tokio::test]
async fn started_is_delivered_before_queued_user_messages() {
    init_tracing();
    let system = system();
    let root = system.root();

    let mailboxes = [
        MailboxConfig::Unbounded,
        MailboxConfig::bounded(8),
        MailboxConfig::bounded_with(8, OverflowPolicy::DropOldest),
    ];
    for mailbox in mailboxes {
        let log = Arc::new(Mutex::new(Vec::new()));
        let producer_log = Arc::clone(&log);
        let props = Props::from_producer(move || Lifecycle {
            log: Arc::clone(&producer_log),
        })
        .with_mailbox(mailbox);

        let pid = root.spawn(props).expect("spawn");
        root.send(&pid, "one");
        root.send(&pid, "two");

        assert!(eventually(Duration::from_secs(1), || log.lock().len() == 3).await);
        assert_eq!(*log.lock(), vec!["started", "one", "two"], "{mailbox:?}");
    }
}

#[tokio::test]
async fn request_times_out_and_unregisters_its_future() {
    init_tracing();
    let system = system();
    let root = system.root();
    let silent = root.spawn(Props::from_fn(|_, _| Ok(()))).expect("spawn");
    let before = system.registry().len();

    let result = root
        .request_async::<u32, _>(&silent, GetLog, Duration::from_millis(50))
        .await;

    assert!(matches!(result, Err(RequestError::Timeout { ref target, .. }) if *target == silent));
    assert_eq!(system.registry().len(), before);
}

#[tokio::test]
async fn request_to_a_missing_process_fails_fast() {
    init_tracing();
    let system = system();
    let ghost = Pid::local("ghost");

    let started = tokio::time::Instant::now();
    let result = system
        .root()
        .request_async::<u32, _>(&ghost, GetLog, Duration::from_secs(5))
        .await;

    assert_eq!(result, Err(RequestError::DeadLetter { target: ghost }));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    init_tracing();
    let system = system();
    let root = system.root();
    let first = root
        .spawn_named(Props::from_fn(|_, _| Ok(())), "unique")
        .expect("first spawn");

    let second = root.spawn_named(Props::from_fn(|_, _| Ok(())), "unique");

    assert_eq!(second, Err(SpawnError::DuplicateName { pid: first }));
}

struct Block {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

struct Tick;

struct Worker {
    processed: Arc<AtomicUsize>,
}

#[async_trait]
impl Actor for Worker {
    async fn receive(&mut self, _ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        let parked = message
            .downcast_ref::<Block>()
            .map(|block| (Arc::clone(&block.entered), Arc::clone(&block.release)));
        if let Some((entered, release)) = parked {
            entered.notify_one();
            release.notified().await;
        } else if message.is::<Tick>() {
            self.processed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Spawn a worker and park it inside a `Block` message.
async fn parked_worker(root: &tidepool::RootContext, mailbox: MailboxConfig) -> (Pid, Arc<AtomicUsize>, Arc<Notify>) {
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let props = Props::from_producer(move || Worker {
        processed: Arc::clone(&counter),
    })
    .with_mailbox(mailbox);
    let pid = root.spawn(props).expect("spawn");

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    root.send(
        &pid,
        Block {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        },
    );
    entered.notified().await;
    (pid, processed, release)
}

#[tokio::test]
async fn stop_jumps_the_queue() {
    init_tracing();
    let system = system();
    let root = system.root();
    let (pid, processed, release) = parked_worker(&root, MailboxConfig::Unbounded).await;
    for _ in 0..10 {
        root.send(&pid, Tick);
    }

    let stopping = {
        let root = root.clone();
        let pid = pid.clone();
        tokio::spawn(async move { root.stop_future(&pid).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    release.notify_one();

    let terminated = stopping.await.expect("join").expect("terminated");
    assert_eq!(terminated.why, TerminatedReason::Stopped);
    assert_eq!(processed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn poison_drains_queued_messages_first() {
    init_tracing();
    let system = system();
    let root = system.root();
    let (pid, processed, release) = parked_worker(&root, MailboxConfig::Unbounded).await;
    for _ in 0..10 {
        root.send(&pid, Tick);
    }

    let stopping = {
        let root = root.clone();
        let pid = pid.clone();
        tokio::spawn(async move { root.poison_future(&pid).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    release.notify_one();

    let terminated = stopping.await.expect("join").expect("terminated");
    assert_eq!(terminated.why, TerminatedReason::Stopped);
    assert_eq!(processed.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn full_bounded_mailbox_drops_newest_into_dead_letters() {
    init_tracing();
    let system = system();
    let root = system.root();
    let dead = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&dead);
    system.event_stream().subscribe::<DeadLetterEvent, _>(move |event| {
        if event.message.type_name().ends_with("Tick") {
            sink.fetch_add(1, Ordering::SeqCst);
        }
    });

    let (pid, processed, release) = parked_worker(&root, MailboxConfig::bounded(2)).await;
    for _ in 0..5 {
        root.send(&pid, Tick);
    }
    assert_eq!(dead.load(Ordering::SeqCst), 3);

    release.notify_one();
    assert!(eventually(Duration::from_secs(1), || processed.load(Ordering::SeqCst) == 2).await);
}

struct Watcher {
    target: Pid,
    seen: Arc<Mutex<Vec<Terminated>>>,
}

#[async_trait]
impl Actor for Watcher {
    async fn receive(&mut self, ctx: &mut ActorContext, message: Message) -> Result<(), ActorError> {
        match message {
            Message::Started => ctx.watch(&self.target),
            Message::Terminated(terminated) => self.seen.lock().push(terminated),
            _ => {}
        }
        Ok(())
    }
}

fn spawn_watcher(root: &tidepool::RootContext, target: &Pid) -> Arc<Mutex<Vec<Terminated>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let target = target.clone();
    root.spawn(Props::from_producer(move || Watcher {
        target: target.clone(),
        seen: Arc::clone(&sink),
    }))
    .expect("spawn watcher");
    seen
}

#[tokio::test]
async fn watching_a_pid_that_never_existed_yields_one_terminated() {
    init_tracing();
    let system = system();
    let ghost = Pid::local("never-spawned");

    let seen = spawn_watcher(&system.root(), &ghost);

    assert!(eventually(Duration::from_secs(1), || !seen.lock().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].who, ghost);
    assert_eq!(seen[0].why, TerminatedReason::NotFound);
}

#[tokio::test]
async fn watching_a_stopped_pid_yields_one_terminated() {
    init_tracing();
    let system = system();
    let root = system.root();
    let target = root.spawn(Props::from_fn(|_, _| Ok(()))).expect("spawn");
    root.stop_future(&target).await.expect("stopped");

    let seen = spawn_watcher(&root, &target);

    assert!(eventually(Duration::from_secs(1), || !seen.lock().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(seen.lock()[0].who, target);
}

#[tokio::test]
async fn watcher_hears_once_when_a_live_target_stops() {
    init_tracing();
    let system = system();
    let root = system.root();
    let target = root.spawn(Props::from_fn(|_, _| Ok(()))).expect("spawn");
    let seen = spawn_watcher(&root, &target);
    tokio::time::sleep(Duration::from_millis(20)).await;

    root.stop(&target);

    assert!(eventually(Duration::from_secs(1), || !seen.lock().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].why, TerminatedReason::Stopped);
}

#[tokio::test]
async fn watch_terminated_resolves_for_missing_pid() {
    init_tracing();
    let system = system();

    let terminated = system
        .root()
        .watch_terminated(&Pid::local("missing"))
        .await
        .expect("terminated");

    assert_eq!(terminated.why, TerminatedReason::NotFound);
}

#[tokio::test]
async fn undeliverable_messages_are_published_as_dead_letters() {
    init_tracing();
    let system = system();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    system.event_stream().subscribe::<DeadLetterEvent, _>(move |event| {
        sink.lock().push(event.pid.clone());
    });

    let ghost = Pid::local("nobody");
    for i in 0..5u32 {
        system.root().send(&ghost, i);
    }

    assert_eq!(seen.lock().len(), 5);
    assert!(seen.lock().iter().all(|pid| *pid == ghost));
}

#[tokio::test]
async fn messages_sent_after_stop_become_dead_letters() {
    init_tracing();
    let system = system();
    let root = system.root();
    let dead = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&dead);
    system.event_stream().subscribe::<DeadLetterEvent, _>(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    let pid = root.spawn(Props::from_fn(|_, _| Ok(()))).expect("spawn");
    root.stop_future(&pid).await.expect("stopped");

    root.send(&pid, 7u32);

    assert_eq!(dead.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn receive_timeout_fires_when_idle_and_resets_on_messages() {
    init_tracing();
    let system = system();
    let root = system.root();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let props = Props::from_fn(move |ctx, message| {
        if matches!(message, Message::ReceiveTimeout) {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.cancel_receive_timeout();
        }
        Ok(())
    })
    .with_receive_timeout(Duration::from_millis(100));
    let pid = root.spawn(props).expect("spawn");

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        root.send(&pid, 1u32);
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    assert!(eventually(Duration::from_secs(1), || fired.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn receive_middleware_can_tag_and_swallow_messages() {
    init_tracing();
    let system = system();
    let root = system.root();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let props = Props::from_fn(move |ctx, message| {
        if let Some(value) = message.downcast_ref::<u32>() {
            let trail = ctx.headers().get("trail").cloned().unwrap_or_default();
            sink.lock().push((*value, trail));
        }
        Ok(())
    })
    .with_receive_middleware(|_: &Pid, envelope: MessageEnvelope| {
        if envelope.message.downcast_ref::<u32>() == Some(&13) {
            return None;
        }
        Some(envelope.with_header("trail", "outer"))
    })
    .with_receive_middleware(|_: &Pid, envelope: MessageEnvelope| {
        let trail = envelope.headers.get("trail").cloned().unwrap_or_default();
        Some(envelope.with_header("trail", format!("{trail}>inner")))
    });
    let pid = root.spawn(props).expect("spawn");

    root.send(&pid, 12u32);
    root.send(&pid, 13u32);
    root.send(&pid, 14u32);

    assert!(eventually(Duration::from_secs(1), || seen.lock().len() == 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        *seen.lock(),
        vec![(12, "outer>inner".to_string()), (14, "outer>inner".to_string())]
    );
}
