//! The capability contract every bus adapter implements.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::envelope::{EventEnvelope, EventMessage};
use crate::error::{EnvelopeError, MessagingError};
use crate::event::StreamCatalog;

/// Offset that starts a consumer group (or plain read) after the newest entry.
pub const LATEST_ID: &str = "$";

/// Offset that starts from the very first entry of a stream.
pub const START_ID: &str = "0";

/// `read_group` offset asking for entries never delivered to the group.
pub const UNDELIVERED_ID: &str = ">";

/// One message as read back from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    /// Stream the message was read from.
    pub stream: String,
    /// Broker-assigned id, increasing within a stream. Otherwise opaque.
    pub message_id: String,
    /// Decoded record.
    pub data: Map<String, Value>,
}

/// Data accepted by [`EventBus::publish`].
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// A raw mapping published as-is.
    Raw(Map<String, Value>),
    /// The structural form of an [`EventEnvelope`].
    Event(EventMessage),
}

impl From<Map<String, Value>> for OutboundMessage {
    fn from(map: Map<String, Value>) -> Self {
        Self::Raw(map)
    }
}

impl From<EventMessage> for OutboundMessage {
    fn from(message: EventMessage) -> Self {
        Self::Event(message)
    }
}

impl<P: Serialize> TryFrom<&EventEnvelope<P>> for OutboundMessage {
    type Error = EnvelopeError;

    fn try_from(envelope: &EventEnvelope<P>) -> Result<Self, Self::Error> {
        envelope.as_message().map(Self::Event)
    }
}

/// Ordered `(stream, offset)` pairs for a read call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOffsets(Vec<(String, String)>);

impl StreamOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a single stream from `offset`.
    pub fn single(stream: impl Into<String>, offset: impl Into<String>) -> Self {
        Self::new().with(stream, offset)
    }

    /// Adds a stream. Order of insertion is the order sent to the broker.
    pub fn with(mut self, stream: impl Into<String>, offset: impl Into<String>) -> Self {
        self.0.push((stream.into(), offset.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(s, o)| (s.as_str(), o.as_str()))
    }

    pub fn streams(&self) -> Vec<&str> {
        self.0.iter().map(|(s, _)| s.as_str()).collect()
    }

    pub fn offsets(&self) -> Vec<&str> {
        self.0.iter().map(|(_, o)| o.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>, O: Into<String>> FromIterator<(S, O)> for StreamOffsets {
    fn from_iter<I: IntoIterator<Item = (S, O)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(s, o)| (s.into(), o.into()))
                .collect(),
        )
    }
}

/// Options for [`EventBus::read`] and [`EventBus::read_group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Maximum entries returned per stream. `0` means no limit.
    pub count: usize,
    /// How long to wait for data. `None` returns immediately; a zero
    /// duration waits indefinitely, as the broker does.
    pub block: Option<Duration>,
}

impl ReadOptions {
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn blocking(mut self, timeout: Duration) -> Self {
        self.block = Some(timeout);
        self
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            count: 1,
            block: None,
        }
    }
}

/// Options for [`EventBus::create_consumer_group`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOptions {
    /// Create the stream if it does not exist yet.
    pub mkstream: bool,
    /// First offset visible to the group. Defaults to [`LATEST_ID`].
    pub start_id: String,
}

impl GroupOptions {
    pub fn from_start(mut self) -> Self {
        self.start_id = START_ID.to_string();
        self
    }

    pub fn without_mkstream(mut self) -> Self {
        self.mkstream = false;
        self
    }
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            mkstream: true,
            start_id: LATEST_ID.to_string(),
        }
    }
}

/// Publish / consume capability set implemented by every bus adapter.
///
/// Delivery is at-least-once through consumer groups. Adapters add no
/// retry, backoff or reordering of their own.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends `message` to `stream` and returns the broker-assigned id.
    async fn publish(&self, stream: &str, message: OutboundMessage)
        -> Result<String, MessagingError>;

    /// Creates `group` on `stream`. Succeeds silently if it already exists.
    async fn create_consumer_group(
        &self,
        stream: &str,
        group: &str,
        options: GroupOptions,
    ) -> Result<(), MessagingError>;

    /// Plain read from one or more streams. Empty when nothing is available.
    async fn read(
        &self,
        streams: &StreamOffsets,
        options: ReadOptions,
    ) -> Result<Vec<StreamMessage>, MessagingError>;

    /// Consumer-group read; the broker tracks the group's delivery cursor.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &StreamOffsets,
        options: ReadOptions,
    ) -> Result<Vec<StreamMessage>, MessagingError>;

    /// Marks ids as processed for `group`. Already acknowledged ids count as 0.
    async fn acknowledge(
        &self,
        stream: &str,
        group: &str,
        message_ids: &[String],
    ) -> Result<u64, MessagingError>;
}

/// Envelope-aware helpers available on every [`EventBus`].
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Publishes an envelope. Conversion errors surface before any broker call.
    async fn publish_envelope<P>(
        &self,
        stream: &str,
        envelope: &EventEnvelope<P>,
    ) -> Result<String, MessagingError>
    where
        P: Serialize + Sync,
    {
        let message = OutboundMessage::try_from(envelope)?;
        self.publish(stream, message).await
    }

    /// Publishes an envelope on the stream its event name maps to.
    async fn publish_event<P>(
        &self,
        catalog: &StreamCatalog,
        envelope: &EventEnvelope<P>,
    ) -> Result<String, MessagingError>
    where
        P: Serialize + Sync,
    {
        let stream = catalog.resolve_stream_name(envelope.name());
        self.publish_envelope(stream, envelope).await
    }
}

impl<B: EventBus + ?Sized> EventBusExt for B {}
