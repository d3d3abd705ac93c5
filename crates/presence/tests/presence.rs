use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use multitab::{
    Clock, Error, ManualClock, Message, MessageKind, MultiTab, PresenceConfig, SystemClock,
};
use multitab_broadcast::channel::BroadcastChannel;
use multitab_broadcast::handler::BroadcastHandler;
use multitab_broadcast::transport::BroadcastTransport;
use multitab_broadcast_memory::{MemoryChannel, MemoryTransport};
use parking_lot::Mutex;
use tokio::time::{Instant, sleep};

const CHANNEL: &str = "tabs";

type Calls = Arc<Mutex<Vec<(bool, usize)>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn config(id: &str, heartbeat_ms: u64, threshold_ms: u64) -> PresenceConfig {
    PresenceConfig::new(CHANNEL)
        .with_instance_id(id)
        .with_url(format!("https://app.test/{id}"))
        .with_heartbeat_interval(Duration::from_millis(heartbeat_ms))
        .with_inactivity_threshold(Duration::from_millis(threshold_ms))
        .with_leader_check_delay(Duration::from_millis(20))
        .with_debug(true)
}

fn recording(config: PresenceConfig) -> (PresenceConfig, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let config = config.with_on_multi_tab_change(move |is_multi, count, _urls| {
        sink.lock().push((is_multi, count));
    });

    (config, calls)
}

async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }

    condition()
}

async fn raw_channel(origin: &str) -> MemoryChannel {
    MemoryTransport::new(origin).open(CHANNEL).await.unwrap()
}

async fn publish_raw(channel: &MemoryChannel, kind: MessageKind, sender_id: &str) {
    let message = Message::new(
        kind,
        sender_id,
        SystemClock.now_ms(),
        Some(format!("https://app.test/{sender_id}")),
    );
    let payload: Bytes = message.try_into().unwrap();
    channel.publish(payload).await.unwrap();
}

#[derive(Clone)]
struct Recorder {
    messages: Arc<Mutex<Vec<Message>>>,
}

#[async_trait]
impl BroadcastHandler for Recorder {
    type Error = Error;

    async fn handle(&self, _channel_name: String, payload: Bytes) -> Result<(), Error> {
        self.messages.lock().push(Message::try_from(payload)?);
        Ok(())
    }
}

#[tokio::test]
async fn test_two_instances_discover_each_other() {
    init_tracing();
    let transport = MemoryTransport::new("test-discover");

    let (config_a, calls_a) = recording(config("a-100", 30, 300));
    let (config_b, calls_b) = recording(config("b-200", 30, 300));

    let a = MultiTab::start(&transport, config_a).await.unwrap();
    let b = MultiTab::start(&transport, config_b).await.unwrap();

    assert!(eventually(|| a.count() == 2 && b.count() == 2).await);
    assert!(a.is_multi());
    assert!(b.is_multi());
    assert!(eventually(|| a.is_leader() && !b.is_leader()).await);

    let snapshot = b.snapshot();
    assert_eq!(snapshot.self_id, "b-200");
    assert!(snapshot.is_supported);
    assert_eq!(
        snapshot.url_map.get("a-100").map(String::as_str),
        Some("https://app.test/a-100")
    );

    // Keep heartbeating for a while; nothing else should be reported.
    sleep(Duration::from_millis(150)).await;
    assert_eq!(*calls_a.lock(), vec![(true, 2)]);
    assert!(calls_b.lock().is_empty());

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_graceful_close_is_seen_before_eviction() {
    init_tracing();
    let transport = MemoryTransport::new("test-close");

    let (config_a, calls_a) = recording(config("a-100", 30, 10_000));
    let a = MultiTab::start(&transport, config_a).await.unwrap();
    let b = MultiTab::start(&transport, config("b-200", 30, 10_000))
        .await
        .unwrap();

    assert!(eventually(|| a.count() == 2).await);

    b.shutdown().await;

    assert!(eventually(|| a.count() == 1).await);
    assert!(!a.is_multi());
    assert!(!a.snapshot().url_map.contains_key("b-200"));
    assert_eq!(*calls_a.lock(), vec![(true, 2), (false, 1)]);

    a.shutdown().await;
}

#[tokio::test]
async fn test_silent_peer_is_evicted() {
    init_tracing();
    let origin = "test-crash";
    let transport = MemoryTransport::new(origin);

    let (config_a, calls_a) = recording(config("a-100", 20, 100));
    let a = MultiTab::start(&transport, config_a).await.unwrap();

    // A peer that announces itself once and then disappears without a word.
    let crashed = raw_channel(origin).await;
    publish_raw(&crashed, MessageKind::Heartbeat, "b-200").await;

    assert!(eventually(|| a.count() == 2).await);
    assert!(eventually(|| a.count() == 1).await);
    assert_eq!(*calls_a.lock(), vec![(true, 2), (false, 1)]);

    a.shutdown().await;
}

#[tokio::test]
async fn test_leadership_moves_when_leader_leaves() {
    init_tracing();
    let transport = MemoryTransport::new("test-handover");

    let (config_a, calls_a) = recording(config("a", 30, 10_000));
    let (config_b, calls_b) = recording(config("b", 30, 10_000));
    let (config_c, calls_c) = recording(config("c", 30, 10_000));

    let a = MultiTab::start(&transport, config_a).await.unwrap();
    let b = MultiTab::start(&transport, config_b).await.unwrap();
    assert!(eventually(|| a.count() == 2 && b.count() == 2).await);

    // b must already know a, or it would briefly lead a pair with c.
    let c = MultiTab::start(&transport, config_c).await.unwrap();

    assert!(eventually(|| a.count() == 3 && b.count() == 3 && c.count() == 3).await);
    assert!(eventually(|| a.is_leader() && !b.is_leader() && !c.is_leader()).await);
    assert!(calls_b.lock().is_empty());

    a.shutdown().await;

    assert!(eventually(|| b.count() == 2 && c.count() == 2).await);
    assert!(b.is_leader());
    assert!(!c.is_leader());
    assert_eq!(*calls_b.lock(), vec![(true, 2)]);
    assert!(calls_c.lock().is_empty());
    assert_eq!(calls_a.lock().last().copied(), Some((true, 3)));

    b.shutdown().await;
    c.shutdown().await;
}

#[tokio::test]
async fn test_late_joiner_learns_the_group_without_waiting_for_heartbeats() {
    init_tracing();
    let transport = MemoryTransport::new("test-late-joiner");

    // Heartbeats are far apart, so only the reply to the join request can
    // make the newcomer see the others in time.
    let a = MultiTab::start(&transport, config("a", 60_000, 180_000))
        .await
        .unwrap();
    let b = MultiTab::start(&transport, config("b", 60_000, 180_000))
        .await
        .unwrap();

    assert!(eventually(|| a.count() == 2 && b.count() == 2).await);

    let c = MultiTab::start(&transport, config("c", 60_000, 180_000))
        .await
        .unwrap();

    assert!(eventually(|| a.count() == 3 && b.count() == 3 && c.count() == 3).await);
    assert!(!c.is_leader());

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_transport_runs_alone() {
    init_tracing();
    let (config_a, calls_a) = recording(config("a-100", 30, 300));

    let a = MultiTab::start(&MemoryTransport::unsupported(), config_a)
        .await
        .unwrap();

    let snapshot = a.snapshot();
    assert!(!snapshot.is_supported);
    assert!(!snapshot.is_multi);
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.self_id, "a-100");

    a.request_leader().await;
    sleep(Duration::from_millis(100)).await;

    assert_eq!(a.count(), 1);
    assert!(calls_a.lock().is_empty());

    a.shutdown().await;
}

#[tokio::test]
async fn test_groups_are_isolated_by_channel_and_origin() {
    init_tracing();
    let transport = MemoryTransport::new("test-isolation");

    let a = MultiTab::start(&transport, config("a", 30, 300)).await.unwrap();
    let b = MultiTab::start(
        &transport,
        config("b", 30, 300).with_debug(false),
    )
    .await
    .unwrap();
    let mut other_channel = config("c", 30, 300);
    other_channel.channel_name = "other".to_string();
    let c = MultiTab::start(&transport, other_channel).await.unwrap();
    let d = MultiTab::start(&MemoryTransport::new("test-isolation-2"), config("d", 30, 300))
        .await
        .unwrap();

    assert!(eventually(|| a.count() == 2 && b.count() == 2).await);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(a.count(), 2);
    assert_eq!(c.count(), 1);
    assert_eq!(d.count(), 1);

    for instance in [&a, &b, &c, &d] {
        instance.shutdown().await;
    }
}

#[tokio::test]
async fn test_malformed_payloads_are_ignored() {
    init_tracing();
    let origin = "test-malformed";
    let transport = MemoryTransport::new(origin);

    let a = MultiTab::start(&transport, config("a", 30, 300)).await.unwrap();

    let noisy = raw_channel(origin).await;
    noisy
        .publish(Bytes::from_static(b"not json"))
        .await
        .unwrap();
    noisy
        .publish(Bytes::from_static(
            br#"{"kind":"request-snapshot","senderId":"z","timestamp":1}"#,
        ))
        .await
        .unwrap();
    noisy
        .publish(Bytes::from_static(br#"{"kind":"heartbeat"}"#))
        .await
        .unwrap();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(a.count(), 1);

    // The handler is still alive after the bad input.
    let b = MultiTab::start(&transport, config("b", 30, 300)).await.unwrap();
    assert!(eventually(|| a.count() == 2 && b.count() == 2).await);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_instance_closed_from_unknown_sender_is_harmless() {
    init_tracing();
    let origin = "test-unknown-close";
    let transport = MemoryTransport::new(origin);

    let a = MultiTab::start(&transport, config("a", 30, 300)).await.unwrap();

    let stranger = raw_channel(origin).await;
    publish_raw(&stranger, MessageKind::InstanceClosed, "zz").await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(a.count(), 1);
    assert!(a.is_leader());

    a.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_announces_once() {
    init_tracing();
    let origin = "test-shutdown";
    let transport = MemoryTransport::new(origin);

    let observer = raw_channel(origin).await;
    let messages = Arc::new(Mutex::new(Vec::new()));
    observer
        .subscribe(Recorder {
            messages: messages.clone(),
        })
        .await
        .unwrap();

    let a = MultiTab::start(&transport, config("a", 20, 200)).await.unwrap();
    sleep(Duration::from_millis(60)).await;

    a.shutdown().await;
    a.shutdown().await;
    sleep(Duration::from_millis(80)).await;

    let messages = messages.lock();
    let kinds: Vec<MessageKind> = messages.iter().map(|message| message.kind).collect();

    assert_eq!(kinds.first(), Some(&MessageKind::RequestActiveInstances));
    assert_eq!(kinds.get(1), Some(&MessageKind::Heartbeat));
    assert_eq!(kinds.last(), Some(&MessageKind::InstanceClosed));
    assert_eq!(
        kinds
            .iter()
            .filter(|kind| **kind == MessageKind::InstanceClosed)
            .count(),
        1
    );
    assert!(messages.iter().all(|message| message.sender_id == "a"));
    assert!(
        messages
            .iter()
            .all(|message| message.url.as_deref() == Some("https://app.test/a"))
    );
}

#[tokio::test]
async fn test_dropping_an_instance_announces_departure() {
    init_tracing();
    let transport = MemoryTransport::new("test-drop");

    let a = MultiTab::start(&transport, config("a", 30, 10_000))
        .await
        .unwrap();
    let b = MultiTab::start(&transport, config("b", 30, 10_000))
        .await
        .unwrap();

    assert!(eventually(|| a.count() == 2).await);

    drop(b);

    assert!(eventually(|| a.count() == 1).await);

    a.shutdown().await;
}

#[tokio::test]
async fn test_navigate_reaches_peers() {
    init_tracing();
    let transport = MemoryTransport::new("test-navigate");

    let a = MultiTab::start(&transport, config("a", 20, 300)).await.unwrap();
    let b = MultiTab::start(&transport, config("b", 20, 300)).await.unwrap();

    assert!(eventually(|| a.count() == 2 && b.count() == 2).await);

    b.navigate("https://app.test/settings").await;
    assert_eq!(
        b.snapshot().url_map.get("b").map(String::as_str),
        Some("https://app.test/settings")
    );

    assert!(
        eventually(|| {
            a.snapshot().url_map.get("b").map(String::as_str) == Some("https://app.test/settings")
        })
        .await
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_request_leader_makes_peers_resurface() {
    init_tracing();
    let origin = "test-request-leader";
    let transport = MemoryTransport::new(origin);

    // Long heartbeat so every heartbeat seen below is a reply.
    let a = MultiTab::start(&transport, config("a", 60_000, 180_000))
        .await
        .unwrap();
    let b = MultiTab::start(&transport, config("b", 60_000, 180_000))
        .await
        .unwrap();
    assert!(eventually(|| a.count() == 2 && b.count() == 2).await);

    let observer = raw_channel(origin).await;
    let messages = Arc::new(Mutex::new(Vec::new()));
    observer
        .subscribe(Recorder {
            messages: messages.clone(),
        })
        .await
        .unwrap();

    b.request_leader().await;

    assert!(
        eventually(|| {
            messages.lock().iter().any(|message| {
                message.kind == MessageKind::Heartbeat && message.sender_id == "a"
            })
        })
        .await
    );
    assert!(
        messages
            .lock()
            .iter()
            .any(|message| message.kind == MessageKind::RequestLeader && message.sender_id == "b")
    );

    sleep(Duration::from_millis(60)).await;
    assert!(a.is_leader());
    assert!(!b.is_leader());

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_updates_are_observable() {
    init_tracing();
    let transport = MemoryTransport::new("test-watch");

    let a = MultiTab::start(&transport, config("a", 30, 300)).await.unwrap();
    let mut updates = a.subscribe();
    assert_eq!(updates.borrow_and_update().count, 1);

    let b = MultiTab::start(&transport, config("b", 30, 300)).await.unwrap();

    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|snapshot| snapshot.is_multi),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(snapshot.count, 2);
    assert!(snapshot.is_leader);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_generated_ids_are_unique() {
    init_tracing();
    let transport = MemoryTransport::new("test-generated-ids");

    let a = MultiTab::start(&transport, PresenceConfig::new(CHANNEL))
        .await
        .unwrap();
    let b = MultiTab::start(&transport, PresenceConfig::new(CHANNEL))
        .await
        .unwrap();

    assert_ne!(a.self_id(), b.self_id());
    assert!(eventually(|| a.count() == 2 && b.count() == 2).await);
    assert_eq!(
        a.is_leader(),
        a.self_id() < b.self_id(),
        "the smaller id leads"
    );

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let result = MultiTab::start(
        &MemoryTransport::new("test-invalid"),
        PresenceConfig::new(CHANNEL).with_heartbeat_interval(Duration::ZERO),
    )
    .await;

    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_abandoned_instance_is_only_evicted_by_silence() {
    init_tracing();
    let transport = MemoryTransport::new("test-abandon");

    let a = MultiTab::start(&transport, config("a", 20, 150)).await.unwrap();
    let b = MultiTab::start(&transport, config("b", 20, 150)).await.unwrap();

    assert!(eventually(|| a.count() == 2).await);

    let abandoned_at = Instant::now();
    b.abandon();

    assert!(eventually(|| a.count() == 1).await);
    assert!(abandoned_at.elapsed() >= Duration::from_millis(100));

    a.shutdown().await;
}

#[tokio::test]
async fn test_staleness_follows_the_configured_clock() {
    init_tracing();
    let origin = "test-manual-clock";
    let transport = MemoryTransport::new(origin);
    let clock = ManualClock::new(1_000_000);

    let a = MultiTab::start(
        &transport,
        config("a", 20, 100).with_clock(clock.clone()),
    )
    .await
    .unwrap();

    let peer = raw_channel(origin).await;
    let heartbeat: Bytes = Message::new(
        MessageKind::Heartbeat,
        "b",
        1_000_000,
        Some("https://app.test/b".to_string()),
    )
    .try_into()
    .unwrap();
    peer.publish(heartbeat).await.unwrap();

    assert!(eventually(|| a.count() == 2).await);

    // Real time passes, the configured clock does not.
    sleep(Duration::from_millis(250)).await;
    assert_eq!(a.count(), 2);

    clock.advance(100);
    assert!(eventually(|| a.count() == 1).await);

    a.shutdown().await;
}
