use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::log::{EventLog, LogError, LogRecord};
use super::{BusError, EventPublisher, EventSubscriber};
use crate::types::{BuildEvent, BuildId};

/// Buffered producer-side transport errors awaiting the drain task
const PRODUCER_ERROR_BUFFER: usize = 64;

/// Event bus over a partitioned [`EventLog`].
///
/// Publishing serializes the event to JSON and hands it to a bounded outbound
/// channel drained by a single producer task, which keeps per-key append order.
/// Transport failures on either side are logged by background drain tasks and
/// never returned to callers.
pub struct LogEventBus {
    log: Arc<dyn EventLog>,
    outbound: mpsc::Sender<LogRecord>,
}

impl LogEventBus {
    /// Create a bus and start its producer and error-drain tasks.
    ///
    /// `max_pending_sends` bounds events queued for the transport; publishing
    /// beyond it fails with [`BusError::ChannelFull`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(log: Arc<dyn EventLog>, max_pending_sends: usize) -> Self {
        let (outbound, mut inbound) = mpsc::channel::<LogRecord>(max_pending_sends.max(1));
        let (err_tx, mut err_rx) = mpsc::channel::<LogError>(PRODUCER_ERROR_BUFFER);

        let producer_log = log.clone();
        tokio::spawn(async move {
            while let Some(record) = inbound.recv().await {
                if let Err(e) = producer_log.append(record).await {
                    let _ = err_tx.try_send(e);
                }
            }
            debug!("Event bus producer stopped");
        });

        tokio::spawn(async move {
            while let Some(e) = err_rx.recv().await {
                warn!(error = %e, "Event log producer error");
            }
        });

        Self { log, outbound }
    }

    /// Events queued but not yet handed to the transport
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outbound.max_capacity() - self.outbound.capacity()
    }
}

impl EventPublisher for LogEventBus {
    fn publish(&self, event: &BuildEvent) -> Result<(), BusError> {
        let record = LogRecord {
            key: *event.build_id.as_bytes(),
            value: serde_json::to_vec(event)?,
        };

        self.outbound.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => BusError::Closed,
        })
    }
}

#[async_trait]
impl EventSubscriber for LogEventBus {
    async fn subscribe(
        &self,
        output: mpsc::Sender<BuildEvent>,
        cancel: CancellationToken,
        build_id: BuildId,
    ) -> Result<(), BusError> {
        // Fresh group per subscription so every subscriber reads the full log.
        let group = format!("kiln-subscriber-{}", Uuid::new_v4());
        let consumer = self.log.consume(&group).await?;
        let (messages, mut errors, guard) = consumer.into_parts();

        let drain_group = group.clone();
        tokio::spawn(async move {
            while let Some(e) = errors.recv().await {
                warn!(
                    build_id = %build_id,
                    group = %drain_group,
                    error = %e,
                    "Event log consumer error"
                );
            }
        });

        tokio::spawn(forward_matching(messages, output, cancel, build_id, guard));
        debug!(build_id = %build_id, group = %group, "Subscribed to build events");
        Ok(())
    }
}

/// Filtering loop behind a subscription. Dropping `output` on exit closes the
/// caller's stream; dropping `_guard` stops the log readers.
async fn forward_matching(
    mut messages: mpsc::Receiver<LogRecord>,
    output: mpsc::Sender<BuildEvent>,
    cancel: CancellationToken,
    build_id: BuildId,
    _guard: DropGuard,
) {
    let key = *build_id.as_bytes();

    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(build_id = %build_id, "Subscription cancelled");
                break;
            }
            next = messages.recv() => match next {
                Some(record) => record,
                None => {
                    debug!(build_id = %build_id, "Event log closed");
                    break;
                }
            },
        };

        if record.key != key {
            continue;
        }

        let event: BuildEvent = match serde_json::from_slice(&record.value) {
            Ok(event) => event,
            Err(e) => {
                warn!(build_id = %build_id, error = %e, "Failed to decode build event");
                continue;
            }
        };
        let ends_stream = event.ends_stream();

        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = output.send(event) => sent.is_ok(),
        };
        if !delivered || ends_stream {
            break;
        }
    }
}
