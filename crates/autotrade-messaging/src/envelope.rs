//! Metadata wrapper attached to every published event.
//!
//! An [`EventEnvelope`] is built once by the producing component and never
//! mutated. Publishing converts it into an [`EventMessage`], a plain
//! structural form with the event name as its wire string, both timestamps
//! still typed, and the payload flattened to a JSON object. Rendering
//! timestamps as ISO-8601 text is left to the transport encoder.

use autotrade_types::TimeSnapshot;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EnvelopeError;
use crate::finite::check_finite;
use crate::event::EventName;

/// Envelope schema version stamped on new events.
pub const DEFAULT_EVENT_VERSION: &str = "1.0.0";

/// Standard metadata wrapper around an event payload.
///
/// `P` is any payload that serialises to a JSON object: a typed schema
/// such as `CandlePayload`, or a plain `serde_json::Map`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope<P> {
    name: EventName,
    version: String,
    producer: String,
    produced_at_utc: DateTime<Utc>,
    produced_at_kst: DateTime<FixedOffset>,
    payload: P,
    correlation_id: Option<String>,
    causation_id: Option<String>,
}

impl<P> EventEnvelope<P> {
    /// Creates an envelope stamped with a clock snapshot.
    pub fn new(
        name: EventName,
        producer: impl Into<String>,
        produced_at: TimeSnapshot,
        payload: P,
    ) -> Self {
        Self::from_parts(name, producer, produced_at.utc, produced_at.kst, payload)
    }

    /// Creates an envelope from explicit timestamps.
    ///
    /// Callers are responsible for both timestamps denoting the same instant;
    /// prefer [`EventEnvelope::new`] with a clock snapshot.
    pub fn from_parts(
        name: EventName,
        producer: impl Into<String>,
        produced_at_utc: DateTime<Utc>,
        produced_at_kst: DateTime<FixedOffset>,
        payload: P,
    ) -> Self {
        Self {
            name,
            version: DEFAULT_EVENT_VERSION.to_string(),
            producer: producer.into(),
            produced_at_utc,
            produced_at_kst,
            payload,
            correlation_id: None,
            causation_id: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Starts a new causality chain with a random correlation id.
    pub fn with_new_correlation_id(self) -> Self {
        self.with_correlation_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    pub fn name(&self) -> EventName {
        self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn produced_at_utc(&self) -> DateTime<Utc> {
        self.produced_at_utc
    }

    pub fn produced_at_kst(&self) -> DateTime<FixedOffset> {
        self.produced_at_kst
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }
}

impl<P: Serialize> EventEnvelope<P> {
    /// Returns the payload as a JSON object.
    ///
    /// # Errors
    ///
    /// `EnvelopeError::PayloadNotMapping` if the payload serialises to
    /// anything but an object; `EnvelopeError::Unserializable` if its
    /// `Serialize` implementation fails or it holds a NaN or infinite float.
    pub fn payload_dict(&self) -> Result<Map<String, Value>, EnvelopeError> {
        let type_name = std::any::type_name::<P>();
        check_finite(&self.payload)
            .map_err(|source| EnvelopeError::Unserializable { type_name, source })?;
        match serde_json::to_value(&self.payload) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(EnvelopeError::PayloadNotMapping { type_name }),
            Err(source) => Err(EnvelopeError::Unserializable { type_name, source }),
        }
    }

    /// Returns the structural message form of this envelope.
    ///
    /// # Errors
    ///
    /// Propagates [`EventEnvelope::payload_dict`] failures.
    pub fn as_message(&self) -> Result<EventMessage, EnvelopeError> {
        Ok(EventMessage {
            name: self.name.as_str().to_string(),
            version: self.version.clone(),
            producer: self.producer.clone(),
            produced_at_utc: self.produced_at_utc,
            produced_at_kst: self.produced_at_kst,
            payload: self.payload_dict()?,
            correlation_id: self.correlation_id.clone(),
            causation_id: self.causation_id.clone(),
        })
    }
}

/// Serializable form of an envelope, as written under the `event` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Wire value of the event name.
    pub name: String,
    pub version: String,
    pub producer: String,
    pub produced_at_utc: DateTime<Utc>,
    pub produced_at_kst: DateTime<FixedOffset>,
    pub payload: Map<String, Value>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
}
