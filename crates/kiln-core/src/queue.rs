//! Admission Queue
//!
//! A fixed-capacity channel of [`WorkerTask`]s between request handlers and
//! the execution drivers:
//! - Enqueue never waits: a full queue hands the task straight back
//! - Drivers are capped by [`WorkerSlots`], one permit per running build

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{BuildId, BuildRequest};

/// Configuration for admission and worker concurrency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of admitted builds waiting for a worker
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Maximum number of builds executing at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_capacity() -> usize {
    64
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// One admitted build, owned by the queue until a driver picks it up.
#[derive(Debug)]
pub struct WorkerTask {
    /// Build identifier
    pub id: BuildId,
    /// Request snapshot
    pub request: BuildRequest,
    /// Cancellation context carried from admission
    pub cancel: CancellationToken,
}

/// Receiving half handed to the worker dispatcher
pub type TaskReceiver = mpsc::Receiver<WorkerTask>;

/// Why a task was not admitted
#[derive(Debug)]
pub enum EnqueueError {
    /// The queue is at capacity
    Full(WorkerTask),
    /// The dispatcher is gone
    Closed(WorkerTask),
}

impl EnqueueError {
    /// Recover the rejected task
    pub fn into_task(self) -> WorkerTask {
        match self {
            Self::Full(task) | Self::Closed(task) => task,
        }
    }
}

/// Bounded non-blocking admission queue.
#[derive(Clone)]
pub struct AdmissionQueue {
    sender: mpsc::Sender<WorkerTask>,
    capacity: usize,
}

impl AdmissionQueue {
    /// Create a queue holding at most `capacity` tasks (minimum 1).
    pub fn new(capacity: usize) -> (Self, TaskReceiver) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, capacity }, receiver)
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, task: WorkerTask) -> Result<(), EnqueueError> {
        let id = task.id;
        match self.sender.try_send(task) {
            Ok(()) => {
                debug!(build_id = %id, pending = self.pending(), "Build enqueued");
                Ok(())
            }
            Err(TrySendError::Full(task)) => Err(EnqueueError::Full(task)),
            Err(TrySendError::Closed(task)) => Err(EnqueueError::Closed(task)),
        }
    }

    /// Number of tasks waiting for a worker
    pub fn pending(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Concurrency limit for execution drivers.
///
/// Clones share the same slots.
#[derive(Clone)]
pub struct WorkerSlots {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
}

impl WorkerSlots {
    /// Create `max_concurrent` slots (minimum 1).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Wait for a free slot. Returns `None` once the slots are closed.
    pub async fn acquire(&self) -> Option<QueuePermit> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        debug!(available = self.available_slots(), "Worker slot acquired");
        Some(QueuePermit { _permit: permit })
    }

    /// Stop handing out slots; pending and future `acquire` calls return `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Number of idle slots
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of builds currently executing
    pub fn running(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Configured limit
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

/// A permit that releases the worker slot when dropped.
pub struct QueuePermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests;
