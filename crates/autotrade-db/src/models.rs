//! Column enums shared by the trading tables.
//!
//! Each enum stores as its lowercase string, matching the `CHECK`
//! constraints in the migrations, and binds directly as a query parameter.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;

pub use autotrade_types::SignalSide;

/// Tables every fully migrated database contains.
pub const TABLES: &[&str] = &[
    "candles",
    "ticks",
    "strategies",
    "signals",
    "positions",
    "orders",
    "risk_snapshots",
    "risk_limit_breaches",
    "experiments",
];

/// Error returned when a stored or supplied label matches no variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseColumnError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected label.
    pub value: String,
}

macro_rules! column_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Every variant, in lifecycle order.
            pub const ALL: &'static [$name] = &[$(Self::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseColumnError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(Self::$variant),)+
                    _ => Err(ParseColumnError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

column_enum! {
    /// Lifecycle stage of a trading position.
    PositionStatus, "position status" {
        New => "new",
        Open => "open",
        /// Partially filled or partially closed.
        Partial => "partial",
        Closed => "closed",
        Failed => "failed",
    }
}

column_enum! {
    /// Execution state of an exchange order.
    OrderStatus, "order status" {
        Pending => "pending",
        Filled => "filled",
        Partial => "partial",
        Cancelled => "cancelled",
        Failed => "failed",
    }
}

column_enum! {
    /// Side of a position relative to the base currency.
    PositionSide, "position side" {
        Long => "long",
        Short => "short",
    }
}

/// Lists user tables in `conn`, sorted, excluding SQLite and tracking tables.
///
/// # Errors
///
/// Returns any error from querying `sqlite_master`.
pub fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '\\_%' ESCAPE '\\'
         ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tables)
}
