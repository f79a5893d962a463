//! Canonical event names and the streams they are published on.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::MessagingError;

/// Canonical event identifiers for the platform.
///
/// Serialises as its dotted wire value (e.g. `market.candle.ingested`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    // ── Market data ──────────────────────────────────────────────────
    #[serde(rename = "market.candle.ingested")]
    MarketCandleIngested,

    // ── Strategy ─────────────────────────────────────────────────────
    #[serde(rename = "strategy.signal.created")]
    StrategySignalCreated,

    // ── Position lifecycle ───────────────────────────────────────────
    #[serde(rename = "position.open.requested")]
    PositionOpenRequested,
    #[serde(rename = "position.open.filled")]
    PositionOpenFilled,
    #[serde(rename = "position.open.failed")]
    PositionOpenFailed,
    #[serde(rename = "position.close.requested")]
    PositionCloseRequested,
    #[serde(rename = "position.close.filled")]
    PositionCloseFilled,
    #[serde(rename = "position.close.failed")]
    PositionCloseFailed,

    // ── Risk ─────────────────────────────────────────────────────────
    #[serde(rename = "risk.limit.breached")]
    RiskLimitBreached,

    // ── AI parameter tuning ──────────────────────────────────────────
    #[serde(rename = "ai.param.update.proposed")]
    AiParamUpdateProposed,
    #[serde(rename = "ai.param.update.applied")]
    AiParamUpdateApplied,
}

impl EventName {
    /// Every event name, in declaration order.
    pub const ALL: [EventName; 11] = [
        Self::MarketCandleIngested,
        Self::StrategySignalCreated,
        Self::PositionOpenRequested,
        Self::PositionOpenFilled,
        Self::PositionOpenFailed,
        Self::PositionCloseRequested,
        Self::PositionCloseFilled,
        Self::PositionCloseFailed,
        Self::RiskLimitBreached,
        Self::AiParamUpdateProposed,
        Self::AiParamUpdateApplied,
    ];

    /// Returns the wire value of this event name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketCandleIngested => "market.candle.ingested",
            Self::StrategySignalCreated => "strategy.signal.created",
            Self::PositionOpenRequested => "position.open.requested",
            Self::PositionOpenFilled => "position.open.filled",
            Self::PositionOpenFailed => "position.open.failed",
            Self::PositionCloseRequested => "position.close.requested",
            Self::PositionCloseFilled => "position.close.filled",
            Self::PositionCloseFailed => "position.close.failed",
            Self::RiskLimitBreached => "risk.limit.breached",
            Self::AiParamUpdateProposed => "ai.param.update.proposed",
            Self::AiParamUpdateApplied => "ai.param.update.applied",
        }
    }

    /// Looks up the logical (un-namespaced) stream for this event.
    ///
    /// `None` only if the enum and the stream table have drifted apart.
    pub fn logical_stream(self) -> Option<&'static str> {
        stream_definitions().get(&self).copied()
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventName {
    type Err = ParseEventNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ParseEventNameError(s.to_string()))
    }
}

/// Error returned when parsing an unknown event name string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name: {0}")]
pub struct ParseEventNameError(pub String);

/// Event → logical stream. Several related events share one stream.
const STREAM_DEFINITIONS: &[(EventName, &str)] = &[
    (EventName::MarketCandleIngested, "market.candles"),
    (EventName::StrategySignalCreated, "strategy.signals"),
    (EventName::PositionOpenRequested, "positions.lifecycle"),
    (EventName::PositionOpenFilled, "positions.lifecycle"),
    (EventName::PositionOpenFailed, "positions.lifecycle"),
    (EventName::PositionCloseRequested, "positions.lifecycle"),
    (EventName::PositionCloseFilled, "positions.lifecycle"),
    (EventName::PositionCloseFailed, "positions.lifecycle"),
    (EventName::RiskLimitBreached, "risk.alerts"),
    (EventName::AiParamUpdateProposed, "ai.parameter_updates"),
    (EventName::AiParamUpdateApplied, "ai.parameter_updates"),
];

/// The immutable event → logical stream lookup table.
pub fn stream_definitions() -> &'static HashMap<EventName, &'static str> {
    static TABLE: OnceLock<HashMap<EventName, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| STREAM_DEFINITIONS.iter().copied().collect())
}

/// Verifies every [`EventName`] has a stream definition.
///
/// # Errors
///
/// Returns `MessagingError::UnmappedEvent` naming the first event without one.
pub fn check_stream_definitions() -> Result<(), MessagingError> {
    for name in EventName::ALL {
        if name.logical_stream().is_none() {
            return Err(MessagingError::UnmappedEvent(name));
        }
    }
    Ok(())
}

/// Qualifies a logical stream name with a namespace prefix.
///
/// An empty namespace leaves the name unchanged.
pub fn namespaced(namespace: &str, logical: &str) -> String {
    let namespace = namespace.trim().trim_end_matches('.');
    if namespace.is_empty() {
        logical.to_string()
    } else {
        format!("{namespace}.{logical}")
    }
}

/// Resolves event names to fully-qualified stream names.
///
/// Built once at start-up from explicit configuration; construction fails
/// if any event lacks a stream, so resolution afterwards cannot.
#[derive(Debug, Clone)]
pub struct StreamCatalog {
    namespace: String,
    resolved: HashMap<EventName, String>,
}

impl StreamCatalog {
    /// Builds a catalog for the given namespace (may be empty).
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::UnmappedEvent` if the stream table is incomplete.
    pub fn new(namespace: impl Into<String>) -> Result<Self, MessagingError> {
        check_stream_definitions()?;
        let namespace = namespace.into();

        let mut resolved = HashMap::with_capacity(EventName::ALL.len());
        for name in EventName::ALL {
            let logical = name
                .logical_stream()
                .ok_or(MessagingError::UnmappedEvent(name))?;
            resolved.insert(name, namespaced(&namespace, logical));
        }

        Ok(Self {
            namespace,
            resolved,
        })
    }

    /// The configured namespace prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the fully-qualified stream for `event`.
    pub fn resolve_stream_name(&self, event: EventName) -> &str {
        // Every variant was inserted by `new`.
        self.resolved.get(&event).map(String::as_str).unwrap_or_default()
    }

    /// Distinct fully-qualified stream names, sorted.
    pub fn streams(&self) -> Vec<&str> {
        let mut streams: Vec<&str> = self.resolved.values().map(String::as_str).collect();
        streams.sort_unstable();
        streams.dedup();
        streams
    }
}
