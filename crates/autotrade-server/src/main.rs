//! AutoTrade server binary.
//!
//! Loads configuration, sets up logging, opens and migrates the database,
//! resolves the event stream catalog, connects the event bus when the broker
//! is reachable, then serves HTTP until SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::time::Duration;

use autotrade_messaging::StreamCatalog;
use autotrade_server::{app, config, connect_broker, logging, AppState};
use autotrade_types::Clock;
use tokio::net::TcpListener;

const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("AUTOTRADE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    logging::init_tracing(&config);

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        environment = %config.app.environment,
        region = %config.app.service_region,
        "resolved startup configuration"
    );

    let clock = Clock::new(&config.app.timezone)
        .expect("invalid app.timezone; expected an IANA zone name such as Asia/Seoul");

    let pool = autotrade_db::create_pool(&config.database.pool_settings())
        .expect("failed to create database pool; check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            autotrade_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let catalog = StreamCatalog::new(config.messaging.namespace.clone())
        .expect("event stream definitions are incomplete");
    tracing::info!(
        namespace = catalog.namespace(),
        streams = ?catalog.streams(),
        "event streams resolved"
    );

    let broker = connect_broker(&config.redis, BROKER_CONNECT_TIMEOUT).await;

    let state = AppState {
        pool,
        clock,
        catalog,
        broker,
        environment: config.app.environment,
        enable_tracing: config.app.enable_tracing,
    };
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, name = %config.app.name, "starting autotrade server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("autotrade server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
