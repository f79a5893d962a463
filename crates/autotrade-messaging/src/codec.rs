//! Wire encoding for stream records.
//!
//! Every record carries a single field, [`EVENT_FIELD`], holding the JSON
//! text of the message. Timestamps become ISO-8601 strings through chrono's
//! serde support.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::bus::OutboundMessage;
use crate::error::MessagingError;
use crate::finite::check_finite;

/// Name of the record field that holds the JSON-encoded message.
pub const EVENT_FIELD: &str = "event";

/// Encodes an outbound message as the JSON text stored under [`EVENT_FIELD`].
///
/// # Errors
///
/// Returns `MessagingError::Encode` if serialisation fails.
pub fn encode_message(message: &OutboundMessage) -> Result<String, MessagingError> {
    match message {
        OutboundMessage::Raw(map) => serde_json::to_string(map),
        OutboundMessage::Event(event) => serde_json::to_string(event),
    }
    .map_err(MessagingError::Encode)
}

/// Converts arbitrary serialisable data into a raw publishable mapping.
///
/// # Errors
///
/// Returns `MessagingError::UnsupportedType` naming `T` if the value cannot
/// be represented in JSON, holds a non-finite float, or is not an object.
pub fn to_json_map<T: Serialize + ?Sized>(data: &T) -> Result<Map<String, Value>, MessagingError> {
    let type_name = std::any::type_name::<T>();
    check_finite(data).map_err(|e| MessagingError::UnsupportedType {
        type_name,
        reason: e.to_string(),
    })?;
    match serde_json::to_value(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(MessagingError::UnsupportedType {
            type_name,
            reason: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(MessagingError::UnsupportedType {
            type_name,
            reason: e.to_string(),
        }),
    }
}

/// Decodes the text fields of a stream record.
///
/// If the record has an [`EVENT_FIELD`], its JSON object is returned.
/// Otherwise every field is returned as a flat string mapping so that
/// legacy or hand-written records stay readable.
///
/// # Errors
///
/// Returns `MessagingError::Decode` if the event field is not a JSON object.
pub fn decode_fields<I>(fields: I) -> Result<Map<String, Value>, MessagingError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let fields: Vec<(String, String)> = fields.into_iter().collect();

    if let Some((_, raw)) = fields.iter().find(|(key, _)| key == EVENT_FIELD) {
        return match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(MessagingError::Decode(format!(
                "`{EVENT_FIELD}` field holds {} instead of an object",
                json_kind(&other)
            ))),
            Err(e) => Err(MessagingError::Decode(e.to_string())),
        };
    }

    Ok(fields
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
