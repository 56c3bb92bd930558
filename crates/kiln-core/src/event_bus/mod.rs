//! EventBus - ordered, partitioned publish/subscribe for build events.
//!
//! Events are appended to an [`EventLog`] keyed by build identifier, so all
//! events of one build land on the same partition and stay totally ordered.
//! Subscribers open a fresh cursor at the current tail and receive only the
//! events of the build they asked for; the stream ends on a finished or error
//! event, on cancellation, or when the log closes.
//!
//! The bus is split into capabilities so callers and test doubles can depend
//! on just the half they need:
//!
//! - [`EventPublisher`]: non-blocking publish
//! - [`EventSubscriber`]: filtered subscription
//! - [`EventBusManager`]: both

/// Log-backed event bus implementation.
pub mod bus;
/// Event log transport abstraction and in-memory transport.
pub mod log;
/// Redis Streams transport.
pub mod redis_log;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{BuildEvent, BuildId};

pub use bus::LogEventBus;
pub use log::{EventLog, LogConsumer, LogError, LogRecord, MemoryLog};
pub use redis_log::RedisStreamLog;

/// Event bus errors
#[derive(Debug, Error)]
pub enum BusError {
    /// Outbound path saturated; the event was not queued
    #[error("could not publish event: channel full")]
    ChannelFull,
    /// Outbound path shut down
    #[error("could not publish event: channel closed")]
    Closed,
    /// Event could not be encoded
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Transport failure
    #[error("event log error: {0}")]
    Log(#[from] LogError),
}

/// Publishes build events somewhere.
pub trait EventPublisher: Send + Sync {
    /// Queue an event for publication without blocking.
    ///
    /// Fails with [`BusError::ChannelFull`] instead of waiting when the
    /// outbound path is saturated.
    fn publish(&self, event: &BuildEvent) -> Result<(), BusError>;
}

/// Subscribes to the events of one build.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Stream events for `build_id` into `output` from a background task.
    ///
    /// Returns once the cursor is open. `output` is closed when the build
    /// finishes, an error event arrives, `cancel` fires, or the log closes.
    async fn subscribe(
        &self,
        output: mpsc::Sender<BuildEvent>,
        cancel: CancellationToken,
        build_id: BuildId,
    ) -> Result<(), BusError>;
}

/// Publisher and subscriber in one.
pub trait EventBusManager: EventPublisher + EventSubscriber {}

impl<T: EventPublisher + EventSubscriber + ?Sized> EventBusManager for T {}
