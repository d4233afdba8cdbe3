//! Redis Streams-based message feed processors consume.
//!
//! One stream per topic, one consumer group per subscription. A message is
//! "locked" while it sits in the consumer group's pending entries list and
//! its idle time is below the lock duration; once idle longer, any consumer
//! may reclaim it, which counts as a new delivery.

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, streams::*, AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use stac_common::{StacError, StacResult};

/// A message received from the feed.
///
/// Exactly one of `ack`, `abandon` or `dead_letter` must be called for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMessage {
    /// Transport identity (stream entry id)
    pub id: String,
    /// 1 on first delivery, incremented on each redelivery
    pub delivery_count: u32,
    pub payload: Vec<u8>,
}

impl FeedMessage {
    pub fn new(id: impl Into<String>, delivery_count: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            delivery_count,
            payload: payload.into(),
        }
    }
}

/// At-least-once message feed with explicit settlement.
#[async_trait]
pub trait Feed: Send {
    /// Wait up to `max_wait` for the next message.
    async fn receive(&mut self, max_wait: Duration) -> StacResult<Option<FeedMessage>>;

    /// Settle successfully; the message is never delivered again.
    async fn ack(&mut self, message: &FeedMessage) -> StacResult<()>;

    /// Release the lock so the message is redelivered with a higher count.
    async fn abandon(&mut self, message: &FeedMessage) -> StacResult<()>;

    /// Move the message to the dead-letter destination and settle it.
    async fn dead_letter(&mut self, message: &FeedMessage, reason: &str) -> StacResult<()>;

    /// Extend the lock on a message still being processed.
    async fn renew_lock(&mut self, message: &FeedMessage) -> StacResult<()>;

    /// Append a new message to the topic.
    async fn publish(&mut self, payload: &[u8]) -> StacResult<String>;
}

/// Connection settings for [`RedisFeed`].
#[derive(Debug, Clone)]
pub struct RedisFeedConfig {
    pub url: String,
    /// Stream key
    pub topic: String,
    /// Consumer group name
    pub subscription: String,
    /// Consumer name within the group, unique per worker
    pub consumer: String,
    pub lock_duration: Duration,
}

impl RedisFeedConfig {
    pub fn dead_letter_key(&self) -> String {
        format!("{}:dead-letter", self.topic)
    }

    fn lock_ms(&self) -> u64 {
        self.lock_duration.as_millis() as u64
    }
}

/// Redis Streams feed.
pub struct RedisFeed {
    conn: MultiplexedConnection,
    config: RedisFeedConfig,
}

fn transport(what: &str, e: redis::RedisError) -> StacError {
    StacError::Transport(format!("{} failed: {}", what, e))
}

impl RedisFeed {
    /// Connect to Redis and make sure the stream and consumer group exist.
    pub async fn connect(config: RedisFeedConfig) -> StacResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| StacError::Config(format!("Invalid feed connection string: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| transport("Redis connection", e))?;

        // Create consumer group if it doesn't exist
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&config.topic)
            .arg(&config.subscription)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        if let Err(e) = created {
            if e.code() != Some("BUSYGROUP") {
                return Err(transport("XGROUP CREATE", e));
            }
        }

        Ok(Self { conn, config })
    }

    /// Claim one entry whose lock has expired, if any.
    async fn reclaim_expired(&mut self) -> StacResult<Option<FeedMessage>> {
        let lock_ms = self.config.lock_ms();

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.topic)
            .arg(&self.config.subscription)
            .arg("IDLE")
            .arg(lock_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| transport("XPENDING", e))?;

        let Some(candidate) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        // Another consumer may win the race; XCLAIM then returns nothing.
        let claimed: StreamClaimReply = self
            .conn
            .xclaim(
                &self.config.topic,
                &self.config.subscription,
                &self.config.consumer,
                lock_ms,
                &[&candidate.id],
            )
            .await
            .map_err(|e| transport("XCLAIM", e))?;

        match claimed.ids.into_iter().next() {
            Some(entry) => {
                let count = candidate.times_delivered as u32 + 1;
                debug!(id = %entry.id, delivery_count = count, "Reclaimed expired message");
                entry_to_message(entry, count).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn read_new(&mut self, max_wait: Duration) -> StacResult<Option<FeedMessage>> {
        let opts = StreamReadOptions::default()
            .group(&self.config.subscription, &self.config.consumer)
            .count(1)
            .block(max_wait.as_millis() as usize);

        let result: StreamReadReply = self
            .conn
            .xread_options(&[&self.config.topic], &[">"], &opts)
            .await
            .map_err(|e| transport("XREADGROUP", e))?;

        for stream_key in result.keys {
            if let Some(entry) = stream_key.ids.into_iter().next() {
                return entry_to_message(entry, 1).map(Some);
            }
        }

        Ok(None)
    }

    async fn settle(&mut self, id: &str) -> StacResult<()> {
        let _: i64 = self
            .conn
            .xack(&self.config.topic, &self.config.subscription, &[id])
            .await
            .map_err(|e| transport("XACK", e))?;
        let _: i64 = self
            .conn
            .xdel(&self.config.topic, &[id])
            .await
            .map_err(|e| transport("XDEL", e))?;
        Ok(())
    }
}

/// Extract the payload of a stream entry.
fn entry_to_message(entry: StreamId, delivery_count: u32) -> StacResult<FeedMessage> {
    // An entry without a payload is still delivered so the runtime can
    // settle it like any other malformed message.
    let payload: Vec<u8> = match entry.map.get("data") {
        Some(data) => redis::from_redis_value(data)
            .map_err(|e| StacError::MalformedInput(format!("Unreadable entry payload: {}", e)))?,
        None => {
            warn!(id = %entry.id, "Stream entry has no data field");
            Vec::new()
        }
    };

    Ok(FeedMessage {
        id: entry.id,
        delivery_count,
        payload,
    })
}

#[async_trait]
impl Feed for RedisFeed {
    #[instrument(skip(self), fields(topic = %self.config.topic))]
    async fn receive(&mut self, max_wait: Duration) -> StacResult<Option<FeedMessage>> {
        if let Some(message) = self.reclaim_expired().await? {
            return Ok(Some(message));
        }
        self.read_new(max_wait).await
    }

    #[instrument(skip(self, message), fields(id = %message.id))]
    async fn ack(&mut self, message: &FeedMessage) -> StacResult<()> {
        self.settle(&message.id).await
    }

    #[instrument(skip(self, message), fields(id = %message.id))]
    async fn abandon(&mut self, message: &FeedMessage) -> StacResult<()> {
        // Back-date the idle time so the entry is reclaimable right away.
        // JUSTID leaves the delivery counter alone; the reclaim bumps it.
        let _: redis::Value = redis::cmd("XCLAIM")
            .arg(&self.config.topic)
            .arg(&self.config.subscription)
            .arg(&self.config.consumer)
            .arg(0)
            .arg(&message.id)
            .arg("IDLE")
            .arg(self.config.lock_ms())
            .arg("JUSTID")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| transport("XCLAIM (abandon)", e))?;
        Ok(())
    }

    #[instrument(skip(self, message), fields(id = %message.id))]
    async fn dead_letter(&mut self, message: &FeedMessage, reason: &str) -> StacResult<()> {
        let _: String = redis::cmd("XADD")
            .arg(self.config.dead_letter_key())
            .arg("*")
            .arg("data")
            .arg(&message.payload)
            .arg("reason")
            .arg(reason)
            .arg("delivery_count")
            .arg(message.delivery_count)
            .arg("source_id")
            .arg(&message.id)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| transport("XADD (dead-letter)", e))?;

        self.settle(&message.id).await
    }

    #[instrument(skip(self, message), fields(id = %message.id))]
    async fn renew_lock(&mut self, message: &FeedMessage) -> StacResult<()> {
        let _: redis::Value = redis::cmd("XCLAIM")
            .arg(&self.config.topic)
            .arg(&self.config.subscription)
            .arg(&self.config.consumer)
            .arg(0)
            .arg(&message.id)
            .arg("JUSTID")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| transport("XCLAIM (renew)", e))?;
        Ok(())
    }

    #[instrument(skip(self, payload), fields(topic = %self.config.topic))]
    async fn publish(&mut self, payload: &[u8]) -> StacResult<String> {
        let entry_id: String = redis::cmd("XADD")
            .arg(&self.config.topic)
            .arg("*")
            .arg("data")
            .arg(payload)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| transport("XADD", e))?;

        Ok(entry_id)
    }
}
