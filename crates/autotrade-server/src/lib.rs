//! AutoTrade HTTP shell.
//!
//! Serves the health endpoint and the live chart demo. Everything a
//! handler needs lives in [`AppState`], built once by the binary.

pub mod api;
pub mod api_chart;
pub mod config;
pub mod logging;

use std::sync::Arc;
use std::time::Duration;

use autotrade_db::DbPool;
use autotrade_messaging::{build_redis_bus, EventBus, StreamCatalog};
use autotrade_types::{Clock, Environment};
use axum::{extract::Extension, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::config::RedisConfig;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Clock used for every timestamp the server hands out.
    pub clock: Clock,
    /// Resolved event stream names.
    pub catalog: StreamCatalog,
    /// Event bus, if the broker was reachable at start-up.
    pub broker: Option<Arc<dyn EventBus>>,
    pub environment: Environment,
    /// Wrap every request in a tracing span.
    pub enable_tracing: bool,
}

/// Connects the event bus described by `redis`, giving up after `timeout`.
///
/// A broker that is down or slow is logged and reported as `None`; the HTTP
/// surface does not depend on it.
pub async fn connect_broker(redis: &RedisConfig, timeout: Duration) -> Option<Arc<dyn EventBus>> {
    let broker = redis.redacted_url();
    match tokio::time::timeout(timeout, build_redis_bus(&redis.connection_url())).await {
        Ok(Ok(bus)) => {
            tracing::info!(%broker, "connected event bus");
            Some(Arc::new(bus))
        }
        Ok(Err(e)) => {
            tracing::warn!(%broker, error = %e, "event bus unavailable");
            None
        }
        Err(_) => {
            tracing::warn!(%broker, ?timeout, "timed out connecting event bus");
            None
        }
    }
}

fn check_database(pool: &DbPool) -> Result<(), String> {
    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Handler for `GET /health`.
///
/// Always `200 OK` while the process is serving; the `database` field
/// reports whether a pooled connection could be checked out.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.clock.now();

    let pool = state.pool.clone();
    let database = match tokio::task::spawn_blocking(move || check_database(&pool)).await {
        Ok(Ok(())) => "ok",
        Ok(Err(e)) => {
            tracing::warn!("database check failed: {}", e);
            "unavailable"
        }
        Err(e) => {
            tracing::warn!("database check task failed: {}", e);
            "unavailable"
        }
    };

    let broker = if state.broker.is_some() {
        "connected"
    } else {
        "unavailable"
    };

    Json(json!({
        "status": "ok",
        "environment": state.environment.as_str(),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamps": {
            "utc": snapshot.utc.to_rfc3339(),
            "kst": snapshot.kst.to_rfc3339(),
        },
        "database": database,
        "messaging": {
            "namespace": state.catalog.namespace(),
            "streams": state.catalog.streams(),
            "broker": broker,
        },
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let enable_tracing = state.enable_tracing;

    let router = Router::new()
        .route("/health", get(health))
        .route("/chart", get(api_chart::chart_page_handler))
        .route("/chart/stream", get(api_chart::chart_stream_handler))
        .layer(Extension(Arc::new(state)));

    if enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}
