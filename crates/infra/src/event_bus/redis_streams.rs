//! Redis Streams-backed event bus (durable, at-least-once delivery).
//!
//! This implementation uses Redis Streams (XADD/XREADGROUP) to provide:
//! - **Durable delivery**: messages persist until acknowledged
//! - **At-least-once**: pending messages are reclaimed and redelivered
//! - **Consumer groups**: one group per durable consumer name
//! - **Dead-letter handling**: messages delivered `max_deliveries` times go to the DLQ
//!
//! ## Layout
//!
//! - **Stream key**: `stockflow:warehouse` by default (one stream for all subjects)
//! - **Entry fields**: `subject`, `type`, `format`, `msg_id` headers and `payload` (the JSON body)
//! - **Consumer groups**: the durable consumer name (e.g. `stock_updater`)
//! - **Dead-letter stream**: `<stream>:dlq`
//!
//! Subject filtering happens client side: entries that do not match the
//! consumer's filter are acknowledged and skipped.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use serde_json::Value as JsonValue;
use tracing::{debug, error, instrument, warn};

use stockflow_core::MessageId;
use stockflow_events::{
    AckError, Acknowledger, ConsumerConfig, Delivery, DurableEventBus, EventBus, EventEnvelope,
    HEADER_FORMAT, HEADER_MSG_ID, HEADER_TYPE, JSON_FORMAT, SubjectFilter, Subscription,
};

/// Default stream key for stock events
pub const DEFAULT_STREAM_KEY: &str = "stockflow:warehouse";

/// Default max deliveries before a message is dead-lettered
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Pending entries idle longer than this are reclaimed and redelivered
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 30_000;

/// How long one XREAD/XREADGROUP call blocks waiting for new entries
const BLOCK_MS: u64 = 250;

/// Entries fetched per read
const BATCH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),
}

#[derive(Debug, Clone)]
pub struct RedisStreamsEventBus {
    client: Arc<redis::Client>,
    stream_key: String,
    dlq_key: String,
    /// Consumer name of this process inside every group it joins.
    consumer_name: String,
    max_deliveries: u32,
    pending_timeout_ms: u64,
}

/// Message read from the stream with its entry id.
#[derive(Debug, Clone)]
struct StreamMessage {
    entry_id: String,
    envelope: EventEnvelope<JsonValue>,
}

impl RedisStreamsEventBus {
    /// Create a new Redis Streams event bus.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `stream_key` - Redis stream key; the DLQ is `<stream_key>:dlq`
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: impl Into<String>,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        let stream_key = stream_key.into();

        Ok(Self {
            client: Arc::new(client),
            dlq_key: format!("{stream_key}:dlq"),
            stream_key,
            consumer_name: format!("consumer-{}", uuid::Uuid::now_v7()),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        })
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    pub fn with_pending_timeout_ms(mut self, pending_timeout_ms: u64) -> Self {
        self.pending_timeout_ms = pending_timeout_ms;
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn dlq_key(&self) -> &str {
        &self.dlq_key
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Round-trip a PING so connectivity problems surface at startup.
    pub fn ping(&self) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Ensure a consumer group exists (idempotent).
    ///
    /// The group starts at `0`, so a consumer created after messages were
    /// published still sees them.
    pub fn ensure_consumer_group(&self, group_name: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;

        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::ConsumerGroup(e.to_string())),
        }
    }

    /// Append an envelope to the stream.
    #[instrument(
        skip(self, message),
        fields(
            stream_key = %self.stream_key,
            subject = message.subject(),
            message_id = %message.message_id()
        ),
        err
    )]
    fn publish_sync(&self, message: EventEnvelope<JsonValue>) -> Result<(), RedisStreamsError> {
        let payload = serde_json::to_string(message.payload())
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let mut conn = self.connection()?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_key).arg("*").arg("subject").arg(message.subject());
        for (name, value) in message.headers() {
            cmd.arg(name).arg(value);
        }
        let _: String = cmd
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {}", e)))?;

        Ok(())
    }

    /// Move an exhausted message to the dead-letter stream and acknowledge it.
    fn dead_letter_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        entry_id: &str,
        deliveries: u64,
    ) -> Result<(), RedisStreamsError> {
        let entries: redis::Value = redis::cmd("XRANGE")
            .arg(&self.stream_key)
            .arg(entry_id)
            .arg(entry_id)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XRANGE failed: {}", e)))?;

        let original = entry_list(entries)
            .into_iter()
            .next()
            .and_then(|entry| parse_entry_fields(entry).ok())
            .map(|(_, fields)| fields)
            .unwrap_or_default();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.dlq_key).arg("*");
        // Original headers and body, copied as-is.
        for (name, value) in &original {
            cmd.arg(name).arg(value);
        }
        let _: String = cmd
            .arg("original_message_id")
            .arg(entry_id)
            .arg("consumer_group")
            .arg(group_name)
            .arg("delivery_count")
            .arg(deliveries.to_string())
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {}", e)))?;

        xack(conn, &self.stream_key, group_name, entry_id)?;

        warn!(
            entry_id = %entry_id,
            consumer_group = %group_name,
            delivery_count = deliveries,
            "Message sent to dead-letter queue"
        );

        Ok(())
    }

    /// Reclaim pending entries idle past the timeout.
    ///
    /// Returns the reclaimed messages with their new delivery count.
    fn reclaim_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
    ) -> Result<Vec<(StreamMessage, u32)>, RedisStreamsError> {
        // Extended XPENDING: [entry_id, consumer, idle_ms, deliveries]
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(group_name)
            .arg("IDLE")
            .arg(self.pending_timeout_ms)
            .arg("-")
            .arg("+")
            .arg(BATCH)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {}", e)))?;

        let mut reclaimed = Vec::new();
        for (entry_id, _owner, _idle, deliveries) in pending {
            if deliveries >= u64::from(self.max_deliveries) {
                self.dead_letter_sync(conn, group_name, &entry_id, deliveries)?;
                continue;
            }

            let claimed: redis::Value = redis::cmd("XCLAIM")
                .arg(&self.stream_key)
                .arg(group_name)
                .arg(&self.consumer_name)
                .arg(self.pending_timeout_ms)
                .arg(&entry_id)
                .query(conn)
                .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {}", e)))?;

            for entry in entry_list(claimed) {
                match parse_stream_entry(entry) {
                    Ok(msg) => {
                        let count = u32::try_from(deliveries + 1).unwrap_or(u32::MAX);
                        reclaimed.push((msg, count));
                    }
                    Err(e) => {
                        warn!(entry_id = %entry_id, error = %e, "dropping undecodable stream entry");
                        xack(conn, &self.stream_key, group_name, &entry_id)?;
                    }
                }
            }
        }

        Ok(reclaimed)
    }

    /// Read never-delivered entries for the group (blocking up to `BLOCK_MS`).
    fn read_new_sync(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
    ) -> Result<Vec<StreamMessage>, RedisStreamsError> {
        let result: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group_name)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(BATCH)
            .arg("BLOCK")
            .arg(BLOCK_MS)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {}", e)))?;

        let mut messages = Vec::new();
        for entry in stream_entries(result) {
            match parse_stream_entry(entry.clone()) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    // Poison entry: never decodable, so never redeliver it.
                    warn!(error = %e, "dropping undecodable stream entry");
                    if let Ok((entry_id, _)) = parse_entry_fields(entry) {
                        xack(conn, &self.stream_key, group_name, &entry_id)?;
                    }
                }
            }
        }

        Ok(messages)
    }

    /// Id of the newest entry, or `0-0` for an empty stream.
    fn last_entry_id(&self, conn: &mut redis::Connection) -> Result<String, RedisStreamsError> {
        let newest: redis::Value = redis::cmd("XREVRANGE")
            .arg(&self.stream_key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XREVRANGE failed: {}", e)))?;

        Ok(entry_list(newest)
            .into_iter()
            .next()
            .and_then(|entry| parse_entry_fields(entry).ok())
            .map(|(id, _)| id)
            .unwrap_or_else(|| "0-0".to_string()))
    }

    fn acker(&self, group_name: &str, entry_id: String) -> RedisStreamAcker {
        RedisStreamAcker {
            client: Arc::clone(&self.client),
            stream_key: self.stream_key.clone(),
            group_name: group_name.to_string(),
            consumer_name: self.consumer_name.clone(),
            entry_id,
            pending_timeout_ms: self.pending_timeout_ms,
        }
    }

    /// One poll of a consumer group: reclaimed entries first, then new ones.
    fn poll_group(
        &self,
        conn: &mut redis::Connection,
        group_name: &str,
        filter: &SubjectFilter,
    ) -> Result<Vec<Delivery<EventEnvelope<JsonValue>>>, RedisStreamsError> {
        let mut batch = self.reclaim_sync(conn, group_name)?;
        batch.extend(self.read_new_sync(conn, group_name)?.into_iter().map(|m| (m, 1)));

        let mut deliveries = Vec::with_capacity(batch.len());
        for (msg, count) in batch {
            if !filter.matches(msg.envelope.subject()) {
                debug!(subject = msg.envelope.subject(), consumer_group = %group_name, "skipping non-matching subject");
                xack(conn, &self.stream_key, group_name, &msg.entry_id)?;
                continue;
            }
            let acker = self.acker(group_name, msg.entry_id);
            deliveries.push(Delivery::new(msg.envelope, count, Box::new(acker)));
        }

        Ok(deliveries)
    }
}

fn xack(
    conn: &mut redis::Connection,
    stream_key: &str,
    group_name: &str,
    entry_id: &str,
) -> Result<(), RedisStreamsError> {
    let _: u64 = redis::cmd("XACK")
        .arg(stream_key)
        .arg(group_name)
        .arg(entry_id)
        .query(conn)
        .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {}", e)))?;
    Ok(())
}

/// Entries of an XREAD/XREADGROUP reply: `[[stream, [entry, ...]], ...]` or nil.
fn stream_entries(reply: redis::Value) -> Vec<redis::Value> {
    let redis::Value::Bulk(streams) = reply else {
        return Vec::new();
    };

    streams
        .into_iter()
        .filter_map(|stream| match stream {
            redis::Value::Bulk(mut parts) if parts.len() == 2 => parts.pop(),
            _ => None,
        })
        .flat_map(entry_list)
        .collect()
}

/// Entries of an XRANGE/XCLAIM reply; nil items (deleted entries) are dropped.
fn entry_list(reply: redis::Value) -> Vec<redis::Value> {
    match reply {
        redis::Value::Bulk(entries) => entries
            .into_iter()
            .filter(|e| !matches!(e, redis::Value::Nil))
            .collect(),
        _ => Vec::new(),
    }
}

/// Split an entry `[id, [field1, value1, ...]]` into its id and fields.
fn parse_entry_fields(
    entry: redis::Value,
) -> Result<(String, HashMap<String, String>), RedisStreamsError> {
    let redis::Value::Bulk(parts) = entry else {
        return Err(RedisStreamsError::Deserialization("Invalid entry format".to_string()));
    };

    let mut parts = parts.into_iter();
    let entry_id = match parts.next() {
        Some(redis::Value::Data(data)) => String::from_utf8_lossy(&data).to_string(),
        _ => return Err(RedisStreamsError::Deserialization("Invalid message ID format".to_string())),
    };

    let fields_vec = match parts.next() {
        Some(redis::Value::Bulk(v)) => v,
        _ => return Err(RedisStreamsError::Deserialization("Invalid fields format".to_string())),
    };

    let mut fields = HashMap::new();
    for chunk in fields_vec.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = chunk {
            fields.insert(
                String::from_utf8_lossy(key).to_string(),
                String::from_utf8_lossy(value).to_string(),
            );
        }
    }

    Ok((entry_id, fields))
}

fn required_field(
    fields: &mut HashMap<String, String>,
    name: &str,
) -> Result<String, RedisStreamsError> {
    fields
        .remove(name)
        .ok_or_else(|| RedisStreamsError::Deserialization(format!("Missing {name} field")))
}

/// Rebuild an envelope from the entry's headers and JSON body.
///
/// `format` defaults to JSON when absent; every other field is required.
fn parse_stream_entry(entry: redis::Value) -> Result<StreamMessage, RedisStreamsError> {
    let (entry_id, mut fields) = parse_entry_fields(entry)?;

    let subject = required_field(&mut fields, "subject")?;
    let event_type = required_field(&mut fields, HEADER_TYPE)?;
    let msg_id = required_field(&mut fields, HEADER_MSG_ID)?;
    let body = required_field(&mut fields, "payload")?;
    let format = fields
        .remove(HEADER_FORMAT)
        .unwrap_or_else(|| JSON_FORMAT.to_string());

    let message_id = MessageId::from_str(&msg_id).map_err(|e| {
        RedisStreamsError::Deserialization(format!("Invalid msg_id {msg_id:?}: {e}"))
    })?;
    let payload: JsonValue = serde_json::from_str(&body).map_err(|e| {
        RedisStreamsError::Deserialization(format!("Failed to deserialize payload: {}", e))
    })?;

    debug!(entry_id = %entry_id, subject = %subject, event_type = %event_type, "read stream entry");

    let envelope = EventEnvelope::new(message_id, subject, event_type, format, payload);
    Ok(StreamMessage { entry_id, envelope })
}

/// Settles one delivered stream entry.
struct RedisStreamAcker {
    client: Arc<redis::Client>,
    stream_key: String,
    group_name: String,
    consumer_name: String,
    entry_id: String,
    pending_timeout_ms: u64,
}

impl Acknowledger for RedisStreamAcker {
    fn ack(self: Box<Self>) -> Result<(), AckError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| AckError::Transport(e.to_string()))?;
        xack(&mut conn, &self.stream_key, &self.group_name, &self.entry_id)
            .map_err(|e| AckError::Transport(e.to_string()))
    }

    /// Streams have no negative ack; the entry stays pending and its idle
    /// time is pushed past the reclaim timeout so the next poll redelivers it.
    fn nak(self: Box<Self>) -> Result<(), AckError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| AckError::Transport(e.to_string()))?;
        let _: redis::Value = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group_name)
            .arg(&self.consumer_name)
            .arg(0)
            .arg(&self.entry_id)
            .arg("IDLE")
            .arg(self.pending_timeout_ms)
            .arg("JUSTID")
            .query(&mut conn)
            .map_err(|e| AckError::Transport(e.to_string()))?;
        Ok(())
    }
}

impl EventBus<EventEnvelope<JsonValue>> for RedisStreamsEventBus {
    type Error = RedisStreamsError;

    fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        self.publish_sync(message)
    }

    /// Live tail of the stream from the current end (no consumer group).
    fn subscribe(&self, filter: &SubjectFilter) -> Subscription<EventEnvelope<JsonValue>> {
        let (tx, rx) = mpsc::channel();
        let bus = self.clone();
        let filter = filter.clone();

        let start = self.connection().and_then(|mut conn| {
            let last = self.last_entry_id(&mut conn)?;
            Ok((conn, last))
        });
        let (mut conn, mut last_id) = match start {
            Ok(s) => s,
            Err(e) => {
                error!(stream_key = %self.stream_key, error = %e, "failed to start stream tail");
                return Subscription::new(rx);
            }
        };

        thread::spawn(move || {
            loop {
                let reply: redis::Value = match redis::cmd("XREAD")
                    .arg("COUNT")
                    .arg(BATCH)
                    .arg("BLOCK")
                    .arg(BLOCK_MS)
                    .arg("STREAMS")
                    .arg(&bus.stream_key)
                    .arg(&last_id)
                    .query(&mut conn)
                {
                    Ok(r) => r,
                    Err(e) => {
                        error!(stream_key = %bus.stream_key, error = %e, "stream tail stopped");
                        return;
                    }
                };

                for entry in stream_entries(reply) {
                    let Ok(msg) = parse_stream_entry(entry) else {
                        continue;
                    };
                    last_id = msg.entry_id;
                    if filter.matches(msg.envelope.subject()) && tx.send(msg.envelope).is_err() {
                        return;
                    }
                }
            }
        });

        Subscription::new(rx)
    }
}

impl DurableEventBus<EventEnvelope<JsonValue>> for RedisStreamsEventBus {
    /// Join (or create) the consumer group named after the consumer.
    ///
    /// A background thread polls the group and forwards deliveries; it stops
    /// once the returned subscription is dropped.
    fn consume(
        &self,
        config: &ConsumerConfig,
    ) -> Result<Subscription<Delivery<EventEnvelope<JsonValue>>>, Self::Error> {
        self.ensure_consumer_group(&config.name)?;
        let mut conn = self.connection()?;

        let (tx, rx) = mpsc::channel();
        let bus = self.clone();
        let group_name = config.name.clone();
        let filter = config.filter.clone();

        thread::spawn(move || {
            loop {
                match bus.poll_group(&mut conn, &group_name, &filter) {
                    Ok(deliveries) => {
                        for delivery in deliveries {
                            // Unsent deliveries stay pending and are reclaimed later.
                            if tx.send(delivery).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!(consumer_group = %group_name, error = %e, "Failed to read from stream");
                        thread::sleep(std::time::Duration::from_millis(BLOCK_MS));
                        match bus.connection() {
                            Ok(c) => conn = c,
                            Err(e) => warn!(consumer_group = %group_name, error = %e, "reconnect failed"),
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
