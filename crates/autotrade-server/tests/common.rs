#![allow(dead_code)]

use std::sync::Arc;

use autotrade_db::{create_pool, run_migrations, DbSettings};
use autotrade_messaging::{EventBus, InMemoryEventBus, StreamCatalog};
use autotrade_server::AppState;
use autotrade_types::{Clock, Environment};

pub fn build_test_state(namespace: &str) -> AppState {
    let pool = create_pool(&DbSettings::in_memory()).unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }

    AppState {
        pool,
        clock: Clock::default(),
        catalog: StreamCatalog::new(namespace).unwrap(),
        broker: None,
        environment: Environment::Development,
        enable_tracing: false,
    }
}

pub fn with_in_memory_broker(state: AppState) -> AppState {
    let broker: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
    AppState {
        broker: Some(broker),
        ..state
    }
}

/// Extracts the JSON payloads of every `data:` line in an SSE body.
pub fn sse_payloads(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}
