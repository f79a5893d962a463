//! Canonical payloads carried inside event envelopes.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// A payload field violated its schema constraint.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// A numeric field is outside its allowed range or not finite.
    #[error("field `{field}` out of range: {value} (expected {expected})")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
        /// Human readable constraint.
        expected: &'static str,
    },

    /// A required text field is empty.
    #[error("field `{0}` must not be empty")]
    Empty(&'static str),
}

fn non_negative(field: &'static str, value: f64) -> Result<(), SchemaError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SchemaError::OutOfRange {
            field,
            value,
            expected: ">= 0",
        })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), SchemaError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SchemaError::OutOfRange {
            field,
            value,
            expected: "> 0",
        })
    }
}

fn not_empty(field: &'static str, value: &str) -> Result<(), SchemaError> {
    if value.trim().is_empty() {
        Err(SchemaError::Empty(field))
    } else {
        Ok(())
    }
}

/// Market data vendor a candle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandleSource {
    /// Upbit exchange REST/WebSocket feed.
    #[default]
    Upbit,
}

/// Payload for `market.candle.ingested` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandlePayload {
    pub symbol: String,
    pub interval: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp_utc: DateTime<Utc>,
    pub timestamp_kst: DateTime<FixedOffset>,
    #[serde(default)]
    pub source: CandleSource,
}

impl CandlePayload {
    /// Checks prices and volume are finite and non-negative.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), SchemaError> {
        not_empty("symbol", &self.symbol)?;
        not_empty("interval", &self.interval)?;
        non_negative("open", self.open)?;
        non_negative("high", self.high)?;
        non_negative("low", self.low)?;
        non_negative("close", self.close)?;
        non_negative("volume", self.volume)
    }
}

/// Direction of a strategy signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Buy,
    Sell,
}

impl SignalSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for SignalSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignalSide {
    type Err = ParseSignalSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            _ => Err(ParseSignalSideError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown signal side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown signal side: {0}")]
pub struct ParseSignalSideError(pub String);

/// Payload emitted by the strategy service (`strategy.signal.created`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySignal {
    pub strategy_id: String,
    pub symbol: String,
    pub side: SignalSide,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub created_at_utc: DateTime<Utc>,
    pub created_at_kst: DateTime<FixedOffset>,
}

impl StrategySignal {
    /// Checks price levels are positive and confidence lies in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), SchemaError> {
        not_empty("strategy_id", &self.strategy_id)?;
        not_empty("symbol", &self.symbol)?;
        positive("entry_price", self.entry_price)?;
        positive("take_profit", self.take_profit)?;
        positive("stop_loss", self.stop_loss)?;
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SchemaError::OutOfRange {
                field: "confidence",
                value: self.confidence,
                expected: "0 <= confidence <= 1",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Clock;

    fn candle() -> CandlePayload {
        let now = Clock::default().now();
        CandlePayload {
            symbol: "KRW-BTC".to_string(),
            interval: "1m".to_string(),
            open: 1.0,
            high: 1.5,
            low: 0.8,
            close: 1.2,
            volume: 5.0,
            timestamp_utc: now.utc,
            timestamp_kst: now.kst,
            source: CandleSource::default(),
        }
    }

    fn signal() -> StrategySignal {
        let now = Clock::default().now();
        StrategySignal {
            strategy_id: "mean-reversion".to_string(),
            symbol: "KRW-ETH".to_string(),
            side: SignalSide::Buy,
            entry_price: 100.0,
            take_profit: 110.0,
            stop_loss: 95.0,
            confidence: 0.7,
            parameters: serde_json::Map::new(),
            created_at_utc: now.utc,
            created_at_kst: now.kst,
        }
    }

    #[test]
    fn valid_candle_passes() {
        assert_eq!(candle().validate(), Ok(()));
    }

    #[test]
    fn negative_price_is_rejected() {
        let mut c = candle();
        c.low = -0.1;
        match c.validate() {
            Err(SchemaError::OutOfRange { field, .. }) => assert_eq!(field, "low"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn nan_volume_is_rejected() {
        let mut c = candle();
        c.volume = f64::NAN;
        assert!(c.validate().is_err());
    }

    #[test]
    fn candle_source_defaults_to_upbit() {
        let mut value = serde_json::to_value(candle()).unwrap();
        assert_eq!(value["source"], "upbit");

        value.as_object_mut().unwrap().remove("source");
        let restored: CandlePayload = serde_json::from_value(value).unwrap();
        assert_eq!(restored.source, CandleSource::Upbit);
    }

    #[test]
    fn signal_confidence_must_be_bounded() {
        let mut s = signal();
        assert_eq!(s.validate(), Ok(()));

        s.confidence = 1.01;
        assert!(s.validate().is_err());
    }

    #[test]
    fn signal_stop_loss_must_be_positive() {
        let mut s = signal();
        s.stop_loss = 0.0;
        match s.validate() {
            Err(SchemaError::OutOfRange { field, .. }) => assert_eq!(field, "stop_loss"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn signal_side_is_lowercase_on_the_wire() {
        let value = serde_json::to_value(signal()).unwrap();
        assert_eq!(value["side"], "buy");
    }

    #[test]
    fn signal_side_parses_its_wire_value() {
        assert_eq!("sell".parse::<SignalSide>(), Ok(SignalSide::Sell));
        assert_eq!(SignalSide::Buy.to_string(), "buy");
        assert!("hold".parse::<SignalSide>().is_err());
    }
}
