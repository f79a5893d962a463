//! Event messaging core for the trading platform.
//!
//! Components talk to each other only through events published on
//! append-only streams. This crate owns the shared vocabulary for that
//! traffic and the transport that carries it.
//!
//! # Streams
//!
//! | Logical stream | Events |
//! |----------------|--------|
//! | `market.candles` | `market.candle.ingested` |
//! | `strategy.signals` | `strategy.signal.created` |
//! | `positions.lifecycle` | `position.open.*`, `position.close.*` |
//! | `risk.alerts` | `risk.limit.breached` |
//! | `ai.parameter_updates` | `ai.param.update.*` |
//!
//! Physical stream names are the logical names prefixed with a deployment
//! namespace (see [`StreamCatalog`]).
//!
//! # Usage
//!
//! ```rust,ignore
//! use autotrade_messaging::{build_redis_bus, EventBusExt, EventEnvelope, EventName, StreamCatalog};
//!
//! let bus = build_redis_bus("redis://localhost:6379").await?;
//! let catalog = StreamCatalog::new("autotrade")?;
//! let envelope = EventEnvelope::new(EventName::MarketCandleIngested, "collector", clock.now(), candle);
//! let id = bus.publish_event(&catalog, &envelope).await?;
//! ```

mod bus;
mod codec;
mod envelope;
mod error;
mod event;
mod finite;
mod memory;
mod redis;

pub use bus::{
    EventBus, EventBusExt, GroupOptions, OutboundMessage, ReadOptions, StreamMessage,
    StreamOffsets, LATEST_ID, START_ID, UNDELIVERED_ID,
};
pub use codec::{decode_fields, encode_message, to_json_map, EVENT_FIELD};
pub use envelope::{EventEnvelope, EventMessage, DEFAULT_EVENT_VERSION};
pub use error::{EnvelopeError, MessagingError};
pub use event::{
    check_stream_definitions, namespaced, stream_definitions, EventName, ParseEventNameError,
    StreamCatalog,
};
pub use memory::InMemoryEventBus;
pub use redis::{build_redis_bus, RedisEventBus};
