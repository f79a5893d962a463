//! Persistence layer for the trading platform.
//!
//! SQLite behind an `r2d2` pool with foreign keys on. File databases run in
//! WAL mode; an in-memory database is shared by all connections of its pool.
//! The schema (market data, strategies and signals, positions and orders,
//! risk records, tuning experiments) is created by embedded migrations
//! that ship inside the binary.

mod migrations;
mod models;
mod pool;

pub use migrations::{migration_count, run_migrations, MigrationError};
pub use models::{
    list_tables, OrderStatus, ParseColumnError, PositionSide, PositionStatus, SignalSide, TABLES,
};
pub use pool::{create_pool, DbPool, DbSettings, PoolError, IN_MEMORY};
