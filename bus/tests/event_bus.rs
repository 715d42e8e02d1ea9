//! Integration tests for the event bus against the in-memory broker.
//!
//! These validate the full reliability contract:
//! - Topology declaration and the initialize/close lifecycle
//! - Wildcard subscription dispatch and envelope metadata
//! - Publish degradation to the spool and batch replay
//! - The ack/requeue/discard settlement state machine

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use questline_bus::{EventBus, EventBusError, EventHandler, HandlerError, QueueSpec};
use questline_core::envelope::EventEnvelope;
use questline_core::environment::Clock;
use questline_core::spool::SpoolStore;
use questline_core::transport::MessageTransport;
use questline_testing::{test_clock, FixedClock, InMemorySpool, InMemoryTransport, Settlement};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Handler that records every envelope it sees.
struct RecordingHandler {
    seen: Mutex<Vec<EventEnvelope>>,
}

impl RecordingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<EventEnvelope> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

/// Handler that fails a fixed number of attempts before succeeding.
struct FlakyHandler {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyHandler {
    fn failing_once() -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicUsize::new(1),
            attempts: AtomicUsize::new(0),
        })
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FlakyHandler {
    async fn handle(&self, _envelope: &EventEnvelope) -> Result<(), HandlerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err("simulated handler failure".into());
        }
        Ok(())
    }
}

struct TestRig {
    bus: EventBus,
    transport: InMemoryTransport,
    spool: Arc<InMemorySpool>,
    clock: Arc<FixedClock>,
}

/// Build a bus wired to fresh in-memory collaborators.
fn rig(queues: Vec<QueueSpec>) -> TestRig {
    let transport = InMemoryTransport::new();
    let spool = Arc::new(InMemorySpool::new());
    let clock = Arc::new(test_clock());

    let bus = EventBus::builder()
        .transport(Arc::new(transport.clone()))
        .spool(Arc::clone(&spool) as Arc<dyn SpoolStore>)
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .source("progression-service")
        .exchange("questline.events")
        .queues(queues)
        .publish_timeout(Duration::from_millis(500))
        .retry_delay(Duration::from_millis(20))
        .build()
        .expect("bus configuration is valid");

    TestRig {
        bus,
        transport,
        spool,
        clock,
    }
}

/// Poll until `cond` holds, panicking after a short deadline.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within deadline");
}

// ============================================================================
// Lifecycle and topology
// ============================================================================

#[tokio::test]
async fn test_initialize_declares_topology() {
    let rig = rig(vec![
        QueueSpec::new("progression", ["achievement.*", "quest.*"]),
        QueueSpec::new("notifications", ["notification.created"]),
    ]);

    rig.bus.initialize().await.expect("initialize succeeds");

    assert_eq!(rig.transport.declared_exchanges(), vec!["questline.events"]);
    assert_eq!(
        rig.transport.declared_queues(),
        vec!["notifications", "progression"]
    );
    assert!(rig
        .transport
        .has_binding("progression", "questline.events", "achievement.*"));
    assert!(rig
        .transport
        .has_binding("progression", "questline.events", "quest.*"));
    assert!(rig.transport.has_binding(
        "notifications",
        "questline.events",
        "notification.created"
    ));

    let second = rig.bus.initialize().await;
    assert!(matches!(second, Err(EventBusError::AlreadyInitialized)));

    rig.bus.close().await.expect("close succeeds");
}

#[tokio::test]
async fn test_publish_before_initialize_is_rejected() {
    let rig = rig(vec![]);

    let result = rig.bus.publish("quest.started", json!({})).await;
    assert!(matches!(result, Err(EventBusError::NotInitialized)));
}

#[tokio::test]
async fn test_close_is_idempotent_and_rejects_further_publishes() {
    let rig = rig(vec![QueueSpec::new("progression", ["quest.*"])]);
    rig.bus.initialize().await.expect("initialize succeeds");

    rig.bus.close().await.expect("first close succeeds");
    rig.bus.close().await.expect("second close is a no-op");

    assert!(rig.transport.is_closed());
    assert!(rig.spool.is_closed());

    let result = rig.bus.publish("quest.started", json!({})).await;
    assert!(matches!(result, Err(EventBusError::Closed)));
}

// ============================================================================
// Publish and dispatch
// ============================================================================

#[tokio::test]
async fn test_publish_routes_to_matching_subscription() {
    let rig = rig(vec![QueueSpec::new("progression", ["achievement.*"])]);
    rig.bus.initialize().await.expect("initialize succeeds");

    let handler = RecordingHandler::new();
    rig.bus.subscribe("achievement.*", handler.clone()).await;

    // Colon form on the way in, dot form on the wire.
    rig.bus
        .publish("achievement:completed", json!({"achievementId": "a-1"}))
        .await
        .expect("publish succeeds");

    wait_until(|| handler.seen().len() == 1).await;

    let envelope = &handler.seen()[0];
    assert_eq!(envelope.event_type, "achievement.completed");
    assert_eq!(envelope.data, json!({"achievementId": "a-1"}));
    assert_eq!(envelope.metadata.source, "progression-service");
    assert_eq!(envelope.metadata.version, "1.0");
    assert_eq!(envelope.metadata.timestamp, rig.clock.now());

    wait_until(|| !rig.transport.settlements().is_empty()).await;
    assert_eq!(
        rig.transport.settlements(),
        vec![Settlement::Acked {
            queue: "progression".to_string(),
            routing_key: "achievement.completed".to_string(),
        }]
    );

    rig.bus.close().await.expect("close succeeds");
}

#[tokio::test]
async fn test_wildcard_matches_exactly_one_segment() {
    let rig = rig(vec![QueueSpec::new(
        "progression",
        ["achievement.*", "achievement.progress.*"],
    )]);
    rig.bus.initialize().await.expect("initialize succeeds");

    let single = RecordingHandler::new();
    let exact = RecordingHandler::new();
    rig.bus.subscribe("achievement.*", single.clone()).await;
    rig.bus
        .subscribe("achievement.progress.updated", exact.clone())
        .await;

    rig.bus
        .publish("achievement.progress.updated", json!({"value": 3}))
        .await
        .expect("publish succeeds");

    wait_until(|| exact.seen().len() == 1).await;

    // Three segments never match a two-segment pattern.
    assert!(single.seen().is_empty());

    rig.bus.close().await.expect("close succeeds");
}

#[tokio::test]
async fn test_unmatched_delivery_is_acked() {
    let rig = rig(vec![QueueSpec::new("progression", ["quest.*"])]);
    rig.bus.initialize().await.expect("initialize succeeds");

    // No subscriptions at all: the queue still drains.
    rig.bus
        .publish("quest.started", json!({"questId": "q-1"}))
        .await
        .expect("publish succeeds");

    wait_until(|| !rig.transport.settlements().is_empty()).await;
    assert_eq!(
        rig.transport.settlements(),
        vec![Settlement::Acked {
            queue: "progression".to_string(),
            routing_key: "quest.started".to_string(),
        }]
    );

    rig.bus.close().await.expect("close succeeds");
}

// ============================================================================
// Settlement state machine
// ============================================================================

#[tokio::test]
async fn test_malformed_payload_is_discarded_without_requeue() {
    let rig = rig(vec![QueueSpec::new("progression", ["quest.*"])]);
    rig.bus.initialize().await.expect("initialize succeeds");

    let handler = RecordingHandler::new();
    rig.bus.subscribe("quest.*", handler.clone()).await;

    // Inject garbage straight through the transport, bypassing the codec.
    rig.transport
        .publish("questline.events", "quest.started", b"not json")
        .await
        .expect("raw publish succeeds");

    wait_until(|| !rig.transport.settlements().is_empty()).await;
    assert_eq!(
        rig.transport.settlements(),
        vec![Settlement::Rejected {
            queue: "progression".to_string(),
            routing_key: "quest.started".to_string(),
            requeue: false,
        }]
    );
    assert!(handler.seen().is_empty());

    rig.bus.close().await.expect("close succeeds");
}

#[tokio::test]
async fn test_handler_failure_requeues_then_redelivery_acks() {
    let rig = rig(vec![QueueSpec::new("progression", ["quest.*"])]);
    rig.bus.initialize().await.expect("initialize succeeds");

    let handler = FlakyHandler::failing_once();
    rig.bus.subscribe("quest.completed", handler.clone()).await;

    rig.bus
        .publish("quest.completed", json!({"questId": "q-1"}))
        .await
        .expect("publish succeeds");

    wait_until(|| rig.transport.settlements().len() == 2).await;
    assert_eq!(
        rig.transport.settlements(),
        vec![
            Settlement::Rejected {
                queue: "progression".to_string(),
                routing_key: "quest.completed".to_string(),
                requeue: true,
            },
            Settlement::Acked {
                queue: "progression".to_string(),
                routing_key: "quest.completed".to_string(),
            },
        ]
    );
    assert_eq!(handler.attempts(), 2);

    rig.bus.close().await.expect("close succeeds");
}

// ============================================================================
// Spool fallback and replay
// ============================================================================

#[tokio::test]
async fn test_publish_failure_spools_and_returns_ok() {
    let rig = rig(vec![]);
    rig.bus.initialize().await.expect("initialize succeeds");

    rig.transport.set_publishes_failing(true);

    rig.bus
        .publish("achievement:completed", json!({"achievementId": "a-1"}))
        .await
        .expect("publish degrades to the spool instead of failing");

    let entries = rig.spool.entries("achievement.completed");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data, json!({"achievementId": "a-1"}));
    assert_eq!(entries[0].timestamp, rig.clock.now());

    assert!(rig.transport.published().is_empty());
}

#[tokio::test]
async fn test_retry_replays_with_original_timestamp_and_clears_spool() {
    let rig = rig(vec![]);
    rig.bus.initialize().await.expect("initialize succeeds");

    rig.transport.set_publishes_failing(true);
    rig.bus
        .publish("quest.completed", json!({"questId": "q-1"}))
        .await
        .expect("publish spools");
    let spooled_at = rig.clock.now();

    // The broker comes back later; replay must keep the original timestamp.
    rig.clock.advance(ChronoDuration::seconds(90));
    rig.transport.set_publishes_failing(false);

    let replayed = rig
        .bus
        .retry_failed_events()
        .await
        .expect("replay succeeds");
    assert_eq!(replayed, 1);
    assert!(rig.spool.is_empty());

    let published = rig.transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].routing_key, "quest.completed");

    let envelope = EventEnvelope::from_bytes(&published[0].payload).unwrap();
    assert_eq!(envelope.event_type, "quest.completed");
    assert_eq!(envelope.metadata.timestamp, spooled_at);
}

#[tokio::test]
async fn test_retry_partial_failure_keeps_batch_for_next_run() {
    let rig = rig(vec![]);
    rig.bus.initialize().await.expect("initialize succeeds");

    rig.transport.set_publishes_failing(true);
    rig.bus
        .publish("quest.completed", json!({"questId": "q-1"}))
        .await
        .expect("first publish spools");
    rig.bus
        .publish("quest.completed", json!({"questId": "q-2"}))
        .await
        .expect("second publish spools");
    assert_eq!(rig.spool.entries("quest.completed").len(), 2);

    // First entry goes out, second fails: the whole batch must survive.
    rig.transport.plan_publish_outcomes([true, false]);
    let result = rig.bus.retry_failed_events().await;
    assert!(matches!(result, Err(EventBusError::Transport(_))));
    assert_eq!(rig.spool.entries("quest.completed").len(), 2);

    // Next run with a healthy broker clears the batch. The entry that got
    // out during the failed run goes out again, so downstream consumers see
    // it twice.
    rig.transport.set_publishes_failing(false);
    let replayed = rig
        .bus
        .retry_failed_events()
        .await
        .expect("second replay succeeds");
    assert_eq!(replayed, 2);
    assert!(rig.spool.is_empty());

    let published = rig.transport.published();
    assert_eq!(published.len(), 3);
    assert_eq!(published[0], published[1]);
}
