//! Event bus backed by Redis Streams.
//!
//! The adapter is a stateless translation between [`EventBus`] calls and
//! stream commands (`XADD`, `XGROUP CREATE`, `XREAD`, `XREADGROUP`, `XACK`).
//! It holds a shared connection handle, cloned per call; the default
//! [`ConnectionManager`] multiplexes and reconnects on its own and is safe to
//! share between tasks.
//!
//! Redis answers the commands of one connection strictly in order, so a
//! `BLOCK` read on the shared handle would hold up every publish and ack
//! queued behind it. When the bus knows its [`redis::Client`], each blocking
//! read opens a connection of its own and drops it afterwards. Non-blocking
//! calls always use the shared handle.
//!
//! Field values come back from the client as `redis::Value`, either bulk
//! (binary) or simple (text) strings. Both go through the client's own
//! `FromRedisValue` conversion to `String`, so there is a single decode path.

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use tracing::debug;

use crate::bus::{EventBus, GroupOptions, OutboundMessage, ReadOptions, StreamMessage, StreamOffsets};
use crate::codec::{decode_fields, encode_message, EVENT_FIELD};
use crate::error::MessagingError;

/// Error code Redis returns when a consumer group already exists.
const BUSY_GROUP: &str = "BUSYGROUP";

/// Event bus backed by Redis Streams.
#[derive(Clone)]
pub struct RedisEventBus<C = ConnectionManager> {
    connection: C,
    blocking_client: Option<Client>,
}

impl<C> RedisEventBus<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Wraps an existing connection handle.
    ///
    /// Without [`with_blocking_client`](Self::with_blocking_client), blocking
    /// reads share this handle and stall other calls until they return.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            blocking_client: None,
        }
    }

    /// Gives blocking reads a dedicated connection opened from `client`.
    pub fn with_blocking_client(mut self, client: Client) -> Self {
        self.blocking_client = Some(client);
        self
    }
}

impl<C> std::fmt::Debug for RedisEventBus<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEventBus").finish_non_exhaustive()
    }
}

/// Connects to Redis at `url` and returns a bus over a managed connection.
///
/// # Errors
///
/// Returns `MessagingError::Broker` if the URL is invalid or the initial
/// connection fails.
pub async fn build_redis_bus(url: &str) -> Result<RedisEventBus, MessagingError> {
    let client = Client::open(url)?;
    let manager = client.get_connection_manager().await?;
    debug!("connected event bus to redis");
    Ok(RedisEventBus::new(manager).with_blocking_client(client))
}

#[async_trait]
impl<C> EventBus for RedisEventBus<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn publish(
        &self,
        stream: &str,
        message: OutboundMessage,
    ) -> Result<String, MessagingError> {
        let encoded = encode_message(&message)?;
        let mut conn = self.connection.clone();
        let message_id: String = conn
            .xadd(stream, "*", &[(EVENT_FIELD, encoded.as_str())])
            .await?;
        debug!(stream, message_id = %message_id, "published message");
        Ok(message_id)
    }

    async fn create_consumer_group(
        &self,
        stream: &str,
        group: &str,
        options: GroupOptions,
    ) -> Result<(), MessagingError> {
        let mut conn = self.connection.clone();
        let result: RedisResult<()> = if options.mkstream {
            conn.xgroup_create_mkstream(stream, group, &options.start_id)
                .await
        } else {
            conn.xgroup_create(stream, group, &options.start_id).await
        };

        match result {
            Ok(()) => {
                debug!(stream, group, start_id = %options.start_id, "created consumer group");
                Ok(())
            }
            Err(e) if is_busy_group(&e) => {
                debug!(stream, group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(
        &self,
        streams: &StreamOffsets,
        options: ReadOptions,
    ) -> Result<Vec<StreamMessage>, MessagingError> {
        if streams.is_empty() {
            return Ok(Vec::new());
        }
        let read_options = stream_read_options(options);
        self.read_with(streams, &read_options, options.block.is_some())
            .await
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &StreamOffsets,
        options: ReadOptions,
    ) -> Result<Vec<StreamMessage>, MessagingError> {
        if streams.is_empty() {
            return Ok(Vec::new());
        }
        let read_options = stream_read_options(options).group(group, consumer);
        self.read_with(streams, &read_options, options.block.is_some())
            .await
    }

    async fn acknowledge(
        &self,
        stream: &str,
        group: &str,
        message_ids: &[String],
    ) -> Result<u64, MessagingError> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let acknowledged: u64 = conn.xack(stream, group, message_ids).await?;
        debug!(stream, group, requested = message_ids.len(), acknowledged, "acknowledged messages");
        Ok(acknowledged)
    }
}

impl<C> RedisEventBus<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn read_with(
        &self,
        streams: &StreamOffsets,
        read_options: &StreamReadOptions,
        blocking: bool,
    ) -> Result<Vec<StreamMessage>, MessagingError> {
        let keys = streams.streams();
        let ids = streams.offsets();

        // A nil reply (nothing available, or block timeout) maps to `None`.
        let reply: Option<StreamReadReply> = match self.blocking_client.as_ref() {
            Some(client) if blocking => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                debug!(streams = ?keys, "blocking read on dedicated connection");
                conn.xread_options(keys.as_slice(), ids.as_slice(), read_options)
                    .await?
            }
            _ => {
                let mut conn = self.connection.clone();
                conn.xread_options(keys.as_slice(), ids.as_slice(), read_options)
                    .await?
            }
        };

        let messages = match reply {
            Some(reply) => flatten_reply(reply)?,
            None => Vec::new(),
        };
        debug!(streams = ?keys, received = messages.len(), "read from streams");
        Ok(messages)
    }
}

fn stream_read_options(options: ReadOptions) -> StreamReadOptions {
    let mut read_options = StreamReadOptions::default();
    if options.count > 0 {
        read_options = read_options.count(options.count);
    }
    if let Some(block) = options.block {
        let millis = usize::try_from(block.as_millis()).unwrap_or(usize::MAX);
        read_options = read_options.block(millis);
    }
    read_options
}

/// Matches the "group already exists" reply by code or message marker.
pub(crate) fn is_busy_group(err: &RedisError) -> bool {
    err.code() == Some(BUSY_GROUP) || err.to_string().contains(BUSY_GROUP)
}

/// Flattens a stream reply into messages, keeping the broker's order:
/// streams in reply order, entries in reply order within each stream.
pub(crate) fn flatten_reply(reply: StreamReadReply) -> Result<Vec<StreamMessage>, MessagingError> {
    let mut messages = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            let data = decode_entry(&entry)?;
            messages.push(StreamMessage {
                stream: key.key.clone(),
                message_id: entry.id,
                data,
            });
        }
    }
    Ok(messages)
}

fn decode_entry(entry: &StreamId) -> Result<serde_json::Map<String, serde_json::Value>, MessagingError> {
    let mut fields = Vec::with_capacity(entry.map.len());
    for (key, value) in &entry.map {
        let text: String = redis::from_redis_value(value).map_err(|e| {
            MessagingError::Decode(format!("field `{key}` of entry {}: {e}", entry.id))
        })?;
        fields.push((key.clone(), text));
    }
    decode_fields(fields)
}
