mod common;

use std::time::Duration;

use autotrade_server::config::RedisConfig;
use autotrade_server::{app, connect_broker};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::DateTime;
use serde_json::Value;
use tower::ServiceExt;

async fn get_health(namespace: &str) -> Value {
    get_health_for(common::build_test_state(namespace)).await
}

async fn get_health_for(state: autotrade_server::AppState) -> Value {
    let response = app(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let json = get_health("").await;

    assert_eq!(json["status"], "ok");
    assert_eq!(json["environment"], "development");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn health_timestamps_are_the_same_instant() {
    let json = get_health("").await;

    let utc = json["timestamps"]["utc"].as_str().unwrap();
    let kst = json["timestamps"]["kst"].as_str().unwrap();
    assert!(kst.ends_with("+09:00"), "kst was {kst}");
    assert_eq!(
        DateTime::parse_from_rfc3339(utc).unwrap(),
        DateTime::parse_from_rfc3339(kst).unwrap()
    );
}

#[tokio::test]
async fn health_lists_namespaced_streams() {
    let json = get_health("autotrade.test").await;

    assert_eq!(json["messaging"]["namespace"], "autotrade.test");
    let streams: Vec<&str> = json["messaging"]["streams"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap())
        .collect();
    assert_eq!(streams.len(), 5);
    assert!(streams.contains(&"autotrade.test.market.candles"));
    assert!(streams.iter().all(|s| s.starts_with("autotrade.test.")));
}

#[tokio::test]
async fn health_reports_broker_connection() {
    let json = get_health("").await;
    assert_eq!(json["messaging"]["broker"], "unavailable");

    let json = get_health_for(common::with_in_memory_broker(common::build_test_state(""))).await;
    assert_eq!(json["messaging"]["broker"], "connected");
}

#[tokio::test]
async fn unreachable_broker_is_reported_not_fatal() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let redis = RedisConfig {
        url: Some(format!("redis://127.0.0.1:{port}")),
        ..RedisConfig::default()
    };

    let started = std::time::Instant::now();
    let broker = connect_broker(&redis, Duration::from_millis(500)).await;
    assert!(broker.is_none());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let response = app(common::build_test_state(""))
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
