use super::*;

fn task() -> WorkerTask {
    WorkerTask {
        id: BuildId::new(),
        request: BuildRequest::default(),
        cancel: CancellationToken::new(),
    }
}

#[test]
fn test_default_config() {
    let config = QueueConfig::default();
    assert_eq!(config.capacity, 64);
    assert_eq!(config.max_concurrent, 4);

    let config: QueueConfig = serde_json::from_str(r#"{"capacity": 2}"#).unwrap();
    assert_eq!(config.capacity, 2);
    assert_eq!(config.max_concurrent, 4);
}

#[tokio::test]
async fn test_enqueue_until_full() {
    let (queue, mut rx) = AdmissionQueue::new(2);
    assert_eq!(queue.capacity(), 2);

    queue.try_enqueue(task()).unwrap();
    queue.try_enqueue(task()).unwrap();
    assert_eq!(queue.pending(), 2);

    let rejected = task();
    let rejected_id = rejected.id;
    match queue.try_enqueue(rejected) {
        Err(EnqueueError::Full(t)) => assert_eq!(t.id, rejected_id),
        other => panic!("expected full queue, got {other:?}"),
    }

    rx.recv().await.unwrap();
    assert_eq!(queue.pending(), 1);
    queue.try_enqueue(task()).unwrap();
}

#[tokio::test]
async fn test_enqueue_preserves_order() {
    let (queue, mut rx) = AdmissionQueue::new(4);
    let first = task();
    let second = task();
    let (a, b) = (first.id, second.id);
    queue.try_enqueue(first).unwrap();
    queue.try_enqueue(second).unwrap();

    assert_eq!(rx.recv().await.unwrap().id, a);
    assert_eq!(rx.recv().await.unwrap().id, b);
}

#[test]
fn test_enqueue_closed() {
    let (queue, rx) = AdmissionQueue::new(1);
    drop(rx);
    let err = queue.try_enqueue(task()).unwrap_err();
    assert!(matches!(err, EnqueueError::Closed(_)));
    let _ = err.into_task();
}

#[test]
fn test_zero_capacity_is_clamped() {
    let (queue, _rx) = AdmissionQueue::new(0);
    assert_eq!(queue.capacity(), 1);
    queue.try_enqueue(task()).unwrap();
    assert!(queue.try_enqueue(task()).is_err());
}

#[tokio::test]
async fn test_worker_slots() {
    let slots = WorkerSlots::new(2);
    assert_eq!(slots.available_slots(), 2);
    assert_eq!(slots.max_concurrent(), 2);

    let p1 = slots.acquire().await.unwrap();
    let p2 = slots.acquire().await.unwrap();
    assert_eq!(slots.available_slots(), 0);
    assert_eq!(slots.running(), 2);

    drop(p1);
    assert_eq!(slots.available_slots(), 1);
    drop(p2);
    assert_eq!(slots.running(), 0);
}

#[tokio::test]
async fn test_closed_slots_refuse_acquire() {
    let slots = WorkerSlots::new(1);
    slots.close();
    assert!(slots.acquire().await.is_none());
}
