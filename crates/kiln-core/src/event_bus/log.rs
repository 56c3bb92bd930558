use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Buffered records per consumer before partition forwarders wait
const CONSUMER_BUFFER: usize = 256;
/// Buffered transport errors per consumer; excess errors are dropped
const ERROR_BUFFER: usize = 16;

/// A keyed log entry. The key selects the partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Partition key (build identifier bytes)
    pub key: [u8; 16],
    /// Serialized payload
    pub value: Vec<u8>,
}

/// Transport errors, reported on the side channel
#[derive(Debug, Clone, Error)]
pub enum LogError {
    /// Consumer fell behind and skipped records
    #[error("consumer lagged on partition {partition}, skipped {skipped} records")]
    Lagged {
        /// Partition index
        partition: usize,
        /// Number of records skipped
        skipped: u64,
    },
    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Stable partition for a key
#[must_use]
pub fn partition_for(key: &[u8; 16], partitions: usize) -> usize {
    (u128::from_be_bytes(*key) % partitions.max(1) as u128) as usize
}

/// Read side of a log cursor.
///
/// Dropping the consumer stops its background readers.
pub struct LogConsumer {
    messages: mpsc::Receiver<LogRecord>,
    errors: mpsc::Receiver<LogError>,
    guard: DropGuard,
}

impl LogConsumer {
    /// Open a consumer with fresh channels. Readers push into the returned
    /// senders and stop when `stop` fires.
    #[must_use]
    pub fn channel() -> (
        Self,
        mpsc::Sender<LogRecord>,
        mpsc::Sender<LogError>,
        CancellationToken,
    ) {
        let (msg_tx, messages) = mpsc::channel(CONSUMER_BUFFER);
        let (err_tx, errors) = mpsc::channel(ERROR_BUFFER);
        let stop = CancellationToken::new();
        let consumer = Self {
            messages,
            errors,
            guard: stop.clone().drop_guard(),
        };
        (consumer, msg_tx, err_tx, stop)
    }

    /// Split into records, errors and the guard that keeps readers alive
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<LogRecord>,
        mpsc::Receiver<LogError>,
        DropGuard,
    ) {
        (self.messages, self.errors, self.guard)
    }
}

/// Partitioned append-only log transport.
///
/// Implementations must deliver records sharing a key in append order.
#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Append a record to the partition selected by its key
    async fn append(&self, record: LogRecord) -> Result<(), LogError>;

    /// Open a cursor positioned at the current tail of every partition.
    /// `group` names the cursor and is unique per subscription.
    async fn consume(&self, group: &str) -> Result<LogConsumer, LogError>;

    /// Number of partitions
    fn partitions(&self) -> usize;
}

/// Send a record unless `stop` fires first. Returns false when the reader
/// should exit.
pub(crate) async fn forward(
    tx: &mpsc::Sender<LogRecord>,
    record: LogRecord,
    stop: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        sent = tx.send(record) => sent.is_ok(),
    }
}

/// Sleep for `period` unless `stop` fires first. Returns false on stop.
pub(crate) async fn pause(period: Duration, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

/// In-process partitioned log.
///
/// Each partition is a broadcast channel; consumers only see records appended
/// after they opened. Records are not retained. A consumer that falls more
/// than `capacity` records behind on any partition is closed.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    partitions: Vec<broadcast::Sender<LogRecord>>,
}

impl MemoryLog {
    /// Create a log with `partitions` partitions, each buffering up to
    /// `capacity` records per lagging consumer.
    #[must_use]
    pub fn new(partitions: usize, capacity: usize) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|_| broadcast::channel(capacity.max(1)).0)
            .collect();
        Self { partitions }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(4, 1024)
    }
}

#[async_trait]
impl EventLog for MemoryLog {
    async fn append(&self, record: LogRecord) -> Result<(), LogError> {
        let partition = partition_for(&record.key, self.partitions.len());
        // No open consumers is not an error.
        let _ = self.partitions[partition].send(record);
        Ok(())
    }

    async fn consume(&self, group: &str) -> Result<LogConsumer, LogError> {
        let (consumer, msg_tx, err_tx, stop) = LogConsumer::channel();

        for (partition, sender) in self.partitions.iter().enumerate() {
            let mut rx = sender.subscribe();
            let msg_tx = msg_tx.clone();
            let err_tx = err_tx.clone();
            let stop = stop.clone();

            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        r = rx.recv() => r,
                    };
                    match received {
                        Ok(record) => {
                            if !forward(&msg_tx, record, &stop).await {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Skipped records may include a terminal event, so
                            // the whole cursor is closed rather than resumed.
                            let _ = err_tx.try_send(LogError::Lagged { partition, skipped });
                            stop.cancel();
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        tracing::debug!(group, partitions = self.partitions.len(), "Opened memory log cursor");
        Ok(consumer)
    }

    fn partitions(&self) -> usize {
        self.partitions.len()
    }
}
