//! Integration tests for Kiln
//!
//! Drive builds end to end through the engine, the event bus over the
//! in-memory log, and the SQLite store, with a scripted image builder.

use async_trait::async_trait;
use kiln_core::{
    BuildContext, BuildDefinition, BuildEngine, BuildEvent, BuildId, BuildRequest, BuildState,
    BuilderError, EventSubscriber, ImageBuilder, ImageHandle, LogEventBus, MemoryLog,
    PushDefinition, QueueConfig, RegistryPush, ShutdownController, SqliteBuildStore,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct ScriptedBuilder {
    fail_build: bool,
    /// When set, `build` waits for a permit
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedBuilder {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBuilder for ScriptedBuilder {
    async fn build(
        &self,
        _ctx: &BuildContext,
        _request: &BuildRequest,
    ) -> Result<ImageHandle, BuilderError> {
        self.record("build");
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if self.fail_build {
            return Err(BuilderError::InvalidRequest("Dockerfile not found".into()));
        }
        Ok(ImageHandle::new("sha256:integration"))
    }

    async fn push_to_registry(
        &self,
        _ctx: &BuildContext,
        _request: &BuildRequest,
    ) -> Result<(), BuilderError> {
        self.record("push_registry");
        Ok(())
    }

    async fn push_to_object_storage(
        &self,
        _ctx: &BuildContext,
        _request: &BuildRequest,
    ) -> Result<(), BuilderError> {
        self.record("push_object_storage");
        Ok(())
    }

    async fn clean(&self, _ctx: &BuildContext, _image: &ImageHandle) -> Result<(), BuilderError> {
        self.record("clean");
        Ok(())
    }
}

fn registry_request() -> BuildRequest {
    BuildRequest {
        build: BuildDefinition {
            source_repo: "acme/widgets".into(),
            git_ref: "main".into(),
            tags: vec!["v1".into()],
            ..Default::default()
        },
        push: PushDefinition {
            registry: RegistryPush {
                repo: "registry.example.com/acme/widgets".into(),
            },
            ..Default::default()
        },
    }
}

struct Service {
    engine: Arc<BuildEngine>,
    bus: Arc<LogEventBus>,
    shutdown: Arc<ShutdownController>,
}

async fn start_service(builder: Arc<ScriptedBuilder>) -> Service {
    let store = Arc::new(SqliteBuildStore::in_memory().await.unwrap());
    let bus = Arc::new(LogEventBus::new(Arc::new(MemoryLog::new(4, 256)), 256));
    let shutdown = ShutdownController::with_timeout(Duration::from_secs(5));
    let (engine, receiver) = BuildEngine::new(
        store,
        bus.clone(),
        builder,
        &QueueConfig {
            capacity: 8,
            max_concurrent: 2,
        },
        shutdown.clone(),
    );
    engine.spawn_workers(receiver);
    Service {
        engine,
        bus,
        shutdown,
    }
}

/// Collect events until the subscription closes.
async fn collect(mut rx: mpsc::Receiver<BuildEvent>) -> Vec<BuildEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

async fn wait_finished(engine: &BuildEngine, id: BuildId) -> kiln_core::BuildRecord {
    timeout(Duration::from_secs(5), async {
        loop {
            let record = engine.get_status(id).await.unwrap();
            if record.finished {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("build did not finish")
}

#[tokio::test]
async fn test_build_runs_to_success() {
    let gate = Arc::new(Semaphore::new(0));
    let builder = Arc::new(ScriptedBuilder {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let service = start_service(builder.clone()).await;

    let id = service.engine.submit(registry_request()).await.unwrap();
    let (tx, rx) = mpsc::channel(64);
    service
        .bus
        .subscribe(tx, CancellationToken::new(), id)
        .await
        .unwrap();
    let events = tokio::spawn(collect(rx));
    gate.add_permits(1);

    let record = wait_finished(&service.engine, id).await;
    assert_eq!(record.state, BuildState::Success);
    assert!(!record.failed);
    assert!(record.completed_at.is_some());
    assert!(record.duration().is_some());
    assert_eq!(
        builder.calls(),
        vec!["build", "push_registry", "clean"]
    );

    let events = timeout(Duration::from_secs(5), events)
        .await
        .expect("subscription did not close")
        .unwrap();
    let last = events.last().expect("no events received");
    assert!(last.build_finished);
    assert!(last.error.is_none());
    assert!(events.iter().all(|e| e.build_id == id));

    service.shutdown.shutdown().await;
}

#[tokio::test]
async fn test_build_failure_skips_push() {
    let builder = Arc::new(ScriptedBuilder {
        fail_build: true,
        ..Default::default()
    });
    let service = start_service(builder.clone()).await;

    let id = service.engine.submit(registry_request()).await.unwrap();

    let record = wait_finished(&service.engine, id).await;
    assert_eq!(record.state, BuildState::BuildFailure);
    assert!(record.failed);
    assert!(record.completed_at.is_none());
    assert_eq!(builder.calls(), vec!["build"]);

    service.shutdown.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_builds_are_isolated() {
    let builder = Arc::new(ScriptedBuilder::default());
    let service = start_service(builder.clone()).await;

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(service.engine.submit(registry_request()).await.unwrap());
    }
    for id in &ids {
        let record = wait_finished(&service.engine, *id).await;
        assert_eq!(record.id, *id);
        assert_eq!(record.state, BuildState::Success);
    }
    assert_eq!(builder.calls().len(), 12);

    service.shutdown.shutdown().await;
}
