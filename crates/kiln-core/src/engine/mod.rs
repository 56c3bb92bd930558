//! Orchestration engine
//!
//! Admission (`submit`), status queries and the worker dispatcher. The
//! per-build state machine lives in `driver`.

mod driver;


use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::ImageBuilder;
use crate::error::{Error, Result};
use crate::event_bus::EventPublisher;
use crate::queue::{
    AdmissionQueue, EnqueueError, QueueConfig, TaskReceiver, WorkerSlots, WorkerTask,
};
use crate::shutdown::ShutdownController;
use crate::store::{BuildStore, StoreError};
use crate::types::{BuildId, BuildRecord, BuildRequest};

/// Message for requests without a usable push destination
pub const EMPTY_PUSH_MESSAGE: &str =
    "push registry and object storage configuration are both empty (at least one is required)";

/// Queue and worker occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Builds waiting for a worker
    pub pending: usize,
    /// Admission capacity
    pub capacity: usize,
    /// Builds executing
    pub running: usize,
    /// Worker limit
    pub max_concurrent: usize,
}

/// The build orchestration engine.
///
/// Collaborators are injected at construction; the engine never reaches for
/// global state.
pub struct BuildEngine {
    store: Arc<dyn BuildStore>,
    events: Arc<dyn EventPublisher>,
    builder: Arc<dyn ImageBuilder>,
    queue: AdmissionQueue,
    slots: WorkerSlots,
    shutdown: Arc<ShutdownController>,
}

impl BuildEngine {
    /// Create an engine. The returned receiver must be handed to
    /// [`BuildEngine::spawn_workers`] for admitted builds to run.
    pub fn new(
        store: Arc<dyn BuildStore>,
        events: Arc<dyn EventPublisher>,
        builder: Arc<dyn ImageBuilder>,
        config: &QueueConfig,
        shutdown: Arc<ShutdownController>,
    ) -> (Arc<Self>, TaskReceiver) {
        let (queue, receiver) = AdmissionQueue::new(config.capacity);
        let engine = Arc::new(Self {
            store,
            events,
            builder,
            queue,
            slots: WorkerSlots::new(config.max_concurrent),
            shutdown,
        });
        (engine, receiver)
    }

    /// Admit a build whose cancellation follows service shutdown.
    pub async fn submit(&self, request: BuildRequest) -> Result<BuildId> {
        let cancel = self.shutdown.token();
        self.submit_with_cancel(request, cancel).await
    }

    /// Admit a build carrying the caller's cancellation context.
    ///
    /// Returns as soon as the build is queued. A full queue rolls the record
    /// back and fails with [`Error::QueueFull`].
    pub async fn submit_with_cancel(
        &self,
        request: BuildRequest,
        cancel: CancellationToken,
    ) -> Result<BuildId> {
        validate(&request)?;

        if !self.shutdown.is_accepting_work() {
            return Err(Error::Internal("service is shutting down".to_string()));
        }

        let id = self.store.create_build(&request).await.map_err(|e| {
            error!(error = %e, "Failed to create build record");
            Error::Internal(format!("failed to create build record: {e}"))
        })?;

        let task = WorkerTask {
            id,
            request,
            cancel,
        };
        match self.queue.try_enqueue(task) {
            Ok(()) => {
                info!(build_id = %id, "Build admitted");
                Ok(id)
            }
            Err(rejected) => {
                let full = matches!(rejected, EnqueueError::Full(_));
                drop(rejected.into_task());
                if let Err(e) = self.store.delete_build(id).await {
                    error!(build_id = %id, error = %e, "Failed to roll back build record");
                }
                if full {
                    warn!(build_id = %id, capacity = self.queue.capacity(), "Build queue full");
                    Err(Error::QueueFull)
                } else {
                    Err(Error::Internal("build dispatcher is not running".to_string()))
                }
            }
        }
    }

    /// Read the persisted record of a build.
    pub async fn get_status(&self, id: BuildId) -> Result<BuildRecord> {
        match self.store.get_build(id).await {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound(id)) => Err(Error::NotFound(id)),
            Err(e) => {
                error!(build_id = %id, error = %e, "Failed to read build record");
                Err(Error::Store(e))
            }
        }
    }

    /// In-flight cancellation is not supported; returns the current record.
    pub async fn cancel(&self, id: BuildId) -> Result<BuildRecord> {
        let record = self.get_status(id).await?;
        info!(
            build_id = %id,
            state = %record.state,
            "Cancel requested; in-flight cancellation is unsupported"
        );
        Ok(record)
    }

    /// Current queue and worker occupancy
    pub fn queue_stats(&self) -> QueueStats {
        QueueStats {
            pending: self.queue.pending(),
            capacity: self.queue.capacity(),
            running: self.slots.running(),
            max_concurrent: self.slots.max_concurrent(),
        }
    }

    /// Start the dispatcher that feeds admitted builds to execution drivers.
    ///
    /// The dispatcher stops when shutdown begins; builds still queued at that
    /// point are dropped and keep their `CREATED` record.
    pub fn spawn_workers(self: &Arc<Self>, mut receiver: TaskReceiver) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let stop = self.shutdown.token();

        // Closing the slots wakes a dispatcher parked on a full set of workers.
        let slots = self.slots.clone();
        let slots_stop = stop.clone();
        tokio::spawn(async move {
            slots_stop.cancelled().await;
            slots.close();
        });

        tokio::spawn(async move {
            info!(
                max_concurrent = engine.slots.max_concurrent(),
                capacity = engine.queue.capacity(),
                "Build dispatcher started"
            );
            loop {
                let Some(permit) = engine.slots.acquire().await else {
                    break;
                };

                let task = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    task = receiver.recv() => match task {
                        Some(task) => task,
                        None => break,
                    },
                };

                let guard = engine.shutdown.register_task();
                let driver = Arc::clone(&engine);
                tokio::spawn(async move {
                    driver.run(task).await;
                    drop(permit);
                    guard.complete();
                });
            }

            receiver.close();
            let mut dropped = 0usize;
            while let Ok(task) = receiver.try_recv() {
                debug!(build_id = %task.id, "Dropping queued build");
                dropped += 1;
            }
            info!(dropped, "Build dispatcher stopped");
        })
    }
}

/// Admission validation
pub fn validate(request: &BuildRequest) -> Result<()> {
    if request.push.target().is_none() {
        return Err(Error::BadRequest(EMPTY_PUSH_MESSAGE.to_string()));
    }
    Ok(())
}
