//! Shared clock producing paired UTC and exchange-local timestamps.

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;

/// Canonical timezone of the exchange the platform trades on.
pub const DEFAULT_TIMEZONE: &str = "Asia/Seoul";

/// Errors raised when building a [`Clock`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// The configured timezone is not a known IANA zone name.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// The same instant rendered in UTC and in the canonical timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSnapshot {
    /// The instant in UTC.
    pub utc: DateTime<Utc>,
    /// The instant in the canonical exchange timezone (KST by default).
    pub kst: DateTime<FixedOffset>,
}

/// Reference clock bound to a canonical timezone.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    zone: Tz,
}

impl Clock {
    /// Creates a clock for the given IANA timezone name.
    ///
    /// # Errors
    ///
    /// Returns `ClockError::UnknownTimezone` if the name cannot be resolved.
    pub fn new(timezone: &str) -> Result<Self, ClockError> {
        timezone
            .parse::<Tz>()
            .map(|zone| Self { zone })
            .map_err(|_| ClockError::UnknownTimezone(timezone.to_string()))
    }

    /// The configured timezone name.
    pub fn timezone(&self) -> &'static str {
        self.zone.name()
    }

    /// Returns the current time in both UTC and the canonical timezone.
    ///
    /// UTC is read once and converted, so both fields are the same instant.
    pub fn now(&self) -> TimeSnapshot {
        self.snapshot_at(Utc::now())
    }

    /// Builds a snapshot for a fixed UTC instant.
    pub fn snapshot_at(&self, utc: DateTime<Utc>) -> TimeSnapshot {
        TimeSnapshot {
            utc,
            kst: utc.with_timezone(&self.zone).fixed_offset(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            zone: chrono_tz::Asia::Seoul,
        }
    }
}
