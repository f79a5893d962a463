//! Shared types for the AutoTrade platform.
//!
//! This crate holds the pieces every other crate agrees on: the deployment
//! [`Environment`], the dual-timezone [`Clock`], and the canonical event
//! payload schemas published on the message bus.
//!
//! Nothing here performs I/O. Payload schemas own their own field
//! constraints (non-negative prices, bounded confidence); the envelope that
//! carries them does not re-validate.

use serde::{Deserialize, Serialize};

mod clock;
mod schemas;

pub use clock::{Clock, ClockError, TimeSnapshot, DEFAULT_TIMEZONE};
pub use schemas::{
    CandlePayload, CandleSource, ParseSignalSideError, SchemaError, SignalSide, StrategySignal,
};

/// Deployment environment identifier.
///
/// Determines the default logging level and enables environment specific
/// switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// A developer machine.
    #[default]
    Local,
    /// Shared development deployment.
    Development,
    /// Pre-production deployment.
    Staging,
    /// Live trading.
    Production,
}

impl Environment {
    /// Returns the canonical string label for this environment.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Staging and production default to quieter logs.
    pub fn default_log_level(self) -> &'static str {
        match self {
            Self::Staging | Self::Production => "info",
            Self::Local | Self::Development => "debug",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            _ => Err(ParseEnvironmentError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown environment label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown environment: {0}")]
pub struct ParseEnvironmentError(pub String);
