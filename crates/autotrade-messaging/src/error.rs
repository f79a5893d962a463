//! Error types for the messaging layer.

use crate::event::EventName;

/// An envelope could not be turned into a wire message.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload serialised to something other than a JSON object.
    #[error("payload of type {type_name} cannot be represented as a mapping")]
    PayloadNotMapping {
        /// Rust type name of the payload.
        type_name: &'static str,
    },

    /// The payload's `Serialize` implementation produced a value JSON cannot hold.
    #[error("unsupported type {type_name} for JSON serialization: {source}")]
    Unserializable {
        /// Rust type name of the payload.
        type_name: &'static str,
        /// The underlying serializer error.
        source: serde_json::Error,
    },
}

/// Errors that can occur on the event bus.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Building the wire form of an envelope failed.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Data handed to the encoder is not representable as a JSON object.
    #[error("unsupported type {type_name} for JSON serialization: {reason}")]
    UnsupportedType {
        /// Rust type name of the rejected value.
        type_name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// JSON encoding of an outbound message failed.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A record read from the broker could not be decoded.
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// An event has no stream definition. This is a configuration defect.
    #[error("event {0} has no stream definition")]
    UnmappedEvent(EventName),

    /// A stream id or offset is malformed.
    #[error("invalid stream id: {0}")]
    InvalidStreamId(String),

    /// The stream does not exist and was not allowed to be created.
    #[error("no such stream: {0}")]
    NoSuchStream(String),

    /// The consumer group does not exist on the stream.
    #[error("no such consumer group '{group}' on stream '{stream}'")]
    NoSuchGroup {
        /// Stream name.
        stream: String,
        /// Consumer group name.
        group: String,
    },

    /// Any failure reported by the Redis client, passed through unchanged.
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),
}
