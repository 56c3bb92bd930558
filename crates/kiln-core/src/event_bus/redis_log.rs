use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamRangeReply, StreamReadReply};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::log::{forward, partition_for, pause, EventLog, LogConsumer, LogError, LogRecord};

/// Entries fetched per XREAD round trip
const READ_BATCH: usize = 100;
/// Tail position of an empty stream
const EMPTY_STREAM_ID: &str = "0-0";

/// Redis Streams transport.
///
/// Every partition is its own stream (`{topic}:{partition}`), so entries that
/// share a key are read back in append order. Cursors poll all partition
/// streams with `XREAD` starting from the tail observed when they opened.
pub struct RedisStreamLog {
    client: redis::Client,
    topic: String,
    partitions: usize,
    max_len: usize,
    poll_interval: Duration,
    producer: OnceCell<MultiplexedConnection>,
}

impl RedisStreamLog {
    /// Create a transport
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid
    pub fn new(
        redis_url: &str,
        topic: &str,
        partitions: usize,
        max_len: usize,
        poll_interval: Duration,
    ) -> Result<Self, LogError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| LogError::Transport(format!("invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            topic: topic.to_string(),
            partitions: partitions.max(1),
            max_len: max_len.max(1),
            poll_interval,
            producer: OnceCell::new(),
        })
    }

    fn stream_key(&self, partition: usize) -> String {
        format!("{}:{}", self.topic, partition)
    }

    async fn connect(&self) -> Result<MultiplexedConnection, LogError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LogError::Transport(format!("Redis connection failed: {}", e)))
    }

    async fn producer_connection(&self) -> Result<MultiplexedConnection, LogError> {
        self.producer
            .get_or_try_init(|| self.connect())
            .await
            .cloned()
    }

    async fn tail_id(conn: &mut MultiplexedConnection, key: &str) -> Result<String, LogError> {
        let reply: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| LogError::Transport(format!("Redis XREVRANGE failed: {}", e)))?;

        Ok(reply
            .ids
            .into_iter()
            .next()
            .map(|entry| entry.id)
            .unwrap_or_else(|| EMPTY_STREAM_ID.to_string()))
    }
}

fn decode_entry(entry: &redis::streams::StreamId) -> Option<LogRecord> {
    let key: Vec<u8> = entry.get("key")?;
    let value: Vec<u8> = entry.get("value")?;
    let key: [u8; 16] = key.try_into().ok()?;
    Some(LogRecord { key, value })
}

#[async_trait]
impl EventLog for RedisStreamLog {
    async fn append(&self, record: LogRecord) -> Result<(), LogError> {
        let mut conn = self.producer_connection().await?;
        let stream = self.stream_key(partition_for(&record.key, self.partitions));

        let _: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("key")
            .arg(&record.key[..])
            .arg("value")
            .arg(record.value)
            .query_async(&mut conn)
            .await
            .map_err(|e| LogError::Transport(format!("Redis XADD failed: {}", e)))?;

        Ok(())
    }

    async fn consume(&self, group: &str) -> Result<LogConsumer, LogError> {
        let mut conn = self.connect().await?;
        let keys: Vec<String> = (0..self.partitions).map(|p| self.stream_key(p)).collect();

        let mut last_ids = Vec::with_capacity(keys.len());
        for key in &keys {
            last_ids.push(Self::tail_id(&mut conn, key).await?);
        }

        let (consumer, msg_tx, err_tx, stop) = LogConsumer::channel();
        let poll_interval = self.poll_interval;
        let group = group.to_string();

        tokio::spawn(async move {
            debug!(group = %group, streams = keys.len(), "Opened Redis stream cursor");
            'poll: loop {
                if stop.is_cancelled() {
                    break;
                }

                let reply: redis::RedisResult<Option<StreamReadReply>> = redis::cmd("XREAD")
                    .arg("COUNT")
                    .arg(READ_BATCH)
                    .arg("STREAMS")
                    .arg(&keys)
                    .arg(&last_ids)
                    .query_async(&mut conn)
                    .await;

                let reply = match reply {
                    Ok(Some(reply)) => reply,
                    Ok(None) => {
                        if !pause(poll_interval, &stop).await {
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        let _ = err_tx.try_send(LogError::Transport(format!(
                            "Redis XREAD failed: {}",
                            e
                        )));
                        if !pause(poll_interval, &stop).await {
                            break;
                        }
                        continue;
                    }
                };

                for stream in reply.keys {
                    let Some(idx) = keys.iter().position(|k| *k == stream.key) else {
                        continue;
                    };
                    for entry in stream.ids {
                        last_ids[idx] = entry.id.clone();
                        match decode_entry(&entry) {
                            Some(record) => {
                                if !forward(&msg_tx, record, &stop).await {
                                    break 'poll;
                                }
                            }
                            None => {
                                warn!(
                                    group = %group,
                                    id = %entry.id,
                                    "Skipping malformed stream entry"
                                );
                                let _ = err_tx.try_send(LogError::Transport(format!(
                                    "malformed entry {} on {}",
                                    entry.id, stream.key
                                )));
                            }
                        }
                    }
                }
            }
            debug!(group = %group, "Redis stream cursor closed");
        });

        Ok(consumer)
    }

    fn partitions(&self) -> usize {
        self.partitions
    }
}
