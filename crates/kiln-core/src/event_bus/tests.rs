use super::*;
use crate::types::{BuildState, EventKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

fn memory_bus() -> LogEventBus {
    LogEventBus::new(Arc::new(MemoryLog::new(4, 64)), 64)
}

async fn collect(mut rx: mpsc::Receiver<BuildEvent>) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    while let Some(event) = timeout(WAIT, rx.recv()).await.expect("stream did not close") {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_subscriber_sees_events_in_publish_order() {
    let bus = memory_bus();
    let id = BuildId::new();
    let (tx, rx) = mpsc::channel(16);
    bus.subscribe(tx, CancellationToken::new(), id).await.unwrap();

    for i in 0..5 {
        bus.publish(&BuildEvent::new(id, EventKind::BuildOutput, format!("step {}", i)))
            .unwrap();
    }
    bus.publish(&BuildEvent::finished(id, BuildState::Success, None))
        .unwrap();

    let events = collect(rx).await;
    let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        messages,
        vec!["step 0", "step 1", "step 2", "step 3", "step 4", "state: SUCCESS"]
    );
    assert!(events.last().unwrap().build_finished);
}

#[tokio::test]
async fn test_subscriber_never_sees_other_builds() {
    let bus = memory_bus();
    let mine = BuildId::new();
    let other = BuildId::new();
    let (tx, rx) = mpsc::channel(16);
    bus.subscribe(tx, CancellationToken::new(), mine).await.unwrap();

    bus.publish(&BuildEvent::new(other, EventKind::Lifecycle, "other 1"))
        .unwrap();
    bus.publish(&BuildEvent::new(mine, EventKind::Lifecycle, "mine"))
        .unwrap();
    bus.publish(&BuildEvent::finished(other, BuildState::Success, None))
        .unwrap();
    bus.publish(&BuildEvent::finished(mine, BuildState::BuildFailure, Some("boom".into())))
        .unwrap();

    let events = collect(rx).await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.build_id == mine));
}

#[tokio::test]
async fn test_error_event_ends_stream() {
    let bus = memory_bus();
    let id = BuildId::new();
    let (tx, rx) = mpsc::channel(16);
    bus.subscribe(tx, CancellationToken::new(), id).await.unwrap();

    let mut failed = BuildEvent::new(id, EventKind::PushOutput, "denied");
    failed.error = Some("push denied".to_string());
    bus.publish(&failed).unwrap();
    bus.publish(&BuildEvent::new(id, EventKind::Lifecycle, "after error"))
        .unwrap();

    let events = collect(rx).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_error());
}

#[tokio::test]
async fn test_cancellation_closes_output() {
    let bus = memory_bus();
    let id = BuildId::new();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);
    bus.subscribe(tx, cancel.clone(), id).await.unwrap();

    bus.publish(&BuildEvent::state_changed(id, BuildState::Building))
        .unwrap();
    let first = timeout(WAIT, rx.recv()).await.unwrap();
    assert!(first.is_some());

    cancel.cancel();
    let next = timeout(WAIT, rx.recv()).await.expect("output not closed");
    assert!(next.is_none());
}

#[tokio::test]
async fn test_subscription_starts_at_tail() {
    let bus = memory_bus();
    let id = BuildId::new();

    bus.publish(&BuildEvent::new(id, EventKind::Lifecycle, "before"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (tx, rx) = mpsc::channel(16);
    bus.subscribe(tx, CancellationToken::new(), id).await.unwrap();
    bus.publish(&BuildEvent::finished(id, BuildState::Success, None))
        .unwrap();

    let events = collect(rx).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "state: SUCCESS");
}

/// Transport whose appends never complete.
struct StalledLog;

#[async_trait]
impl EventLog for StalledLog {
    async fn append(&self, _record: LogRecord) -> Result<(), LogError> {
        std::future::pending().await
    }

    async fn consume(&self, _group: &str) -> Result<LogConsumer, LogError> {
        Ok(LogConsumer::channel().0)
    }

    fn partitions(&self) -> usize {
        1
    }
}

#[tokio::test]
async fn test_publish_fails_fast_when_saturated() {
    let bus = LogEventBus::new(Arc::new(StalledLog), 1);
    let id = BuildId::new();

    // The producer holds at most one record and the channel one more.
    let results: Vec<_> = (0..3)
        .map(|i| bus.publish(&BuildEvent::new(id, EventKind::Lifecycle, format!("{}", i))))
        .collect();

    assert!(results
        .iter()
        .any(|r| matches!(r, Err(BusError::ChannelFull))));
    assert!(results[0].is_ok());
}

#[tokio::test]
async fn test_memory_log_consumer_ends_when_log_closes() {
    let log = MemoryLog::new(2, 16);
    let consumer = log.consume("test").await.unwrap();
    let (mut messages, _errors, _guard) = consumer.into_parts();

    let record = LogRecord {
        key: *BuildId::new().as_bytes(),
        value: b"payload".to_vec(),
    };
    log.append(record.clone()).await.unwrap();
    let received = timeout(WAIT, messages.recv()).await.unwrap();
    assert_eq!(received, Some(record));

    drop(log);
    let end = timeout(WAIT, messages.recv()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_memory_log_lagging_consumer_is_closed() {
    let log = MemoryLog::new(1, 4);
    let consumer = log.consume("slow").await.unwrap();
    let (mut messages, mut errors, _guard) = consumer.into_parts();

    // Nobody reads `messages`, so the reader stalls and the ring overruns.
    for i in 0..400u32 {
        let record = LogRecord {
            key: *BuildId::new().as_bytes(),
            value: i.to_be_bytes().to_vec(),
        };
        log.append(record).await.unwrap();
        tokio::task::yield_now().await;
    }

    let mut drained = 0;
    while timeout(WAIT, messages.recv()).await.unwrap().is_some() {
        drained += 1;
    }
    assert!(drained < 400);
    let error = timeout(WAIT, errors.recv()).await.unwrap();
    assert!(matches!(error, Some(LogError::Lagged { partition: 0, .. })));
}

#[tokio::test]
async fn test_subscription_closes_when_events_are_skipped() {
    let bus = LogEventBus::new(Arc::new(MemoryLog::new(1, 8)), 1024);
    let mine = BuildId::new();
    let other = BuildId::new();
    let (tx, rx) = mpsc::channel(1);
    bus.subscribe(tx, CancellationToken::new(), mine).await.unwrap();

    for i in 0..2 {
        bus.publish(&BuildEvent::new(mine, EventKind::BuildOutput, format!("mine {i}")))
            .unwrap();
    }
    for i in 0..300 {
        bus.publish(&BuildEvent::new(other, EventKind::BuildOutput, format!("other {i}")))
            .unwrap();
    }
    bus.publish(&BuildEvent::finished(mine, BuildState::Success, None))
        .unwrap();
    for i in 0..20 {
        bus.publish(&BuildEvent::new(other, EventKind::BuildOutput, format!("late {i}")))
            .unwrap();
    }
    while bus.pending() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Whether or not the finishing event survived, the stream must end.
    let events = collect(rx).await;
    assert!(events.len() <= 3);
    assert!(events.iter().all(|e| e.build_id == mine));
}

#[test]
fn test_partition_is_stable_and_in_range() {
    let id = BuildId::new();
    let p = log::partition_for(id.as_bytes(), 8);
    assert!(p < 8);
    assert_eq!(p, log::partition_for(id.as_bytes(), 8));
    assert_eq!(log::partition_for(id.as_bytes(), 0), 0);
}

#[cfg(feature = "redis-tests")]
mod redis_transport {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    async fn test_redis_stream_roundtrip_in_order() {
        let topic = format!("kiln-test-{}", uuid::Uuid::new_v4());
        let log = RedisStreamLog::new(&redis_url(), &topic, 2, 1000, Duration::from_millis(50))
            .unwrap();
        let bus = LogEventBus::new(Arc::new(log), 64);

        let id = BuildId::new();
        let (tx, rx) = mpsc::channel(16);
        bus.subscribe(tx, CancellationToken::new(), id).await.unwrap();

        bus.publish(&BuildEvent::state_changed(id, BuildState::Building))
            .unwrap();
        bus.publish(&BuildEvent::state_changed(id, BuildState::Pushing))
            .unwrap();
        bus.publish(&BuildEvent::finished(id, BuildState::Success, None))
            .unwrap();

        let events = collect(rx).await;
        let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["state: BUILDING", "state: PUSHING", "state: SUCCESS"]
        );
    }
}
