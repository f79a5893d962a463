//! Live chart page and its demo price stream.
//!
//! - `GET /chart`: HTML page that draws a line chart from the stream.
//! - `GET /chart/stream`: SSE stream of synthetic prices.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use autotrade_types::Clock;
use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    response::{
        sse::{Event, KeepAlive},
        Html, Sse,
    },
};
use futures_util::Stream;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::api::ApiError;
use crate::AppState;

/// Number of recent prices carried in every event.
pub const PRICE_WINDOW: usize = 120;

const MAX_SYMBOL_LEN: usize = 32;
const MIN_INTERVAL_SECS: f64 = 0.2;
const MAX_INTERVAL_SECS: f64 = 60.0;
const MAX_LIMIT: usize = 1000;

const CHART_PAGE: &str = include_str!("chart.html");

/// Query parameters for `GET /chart/stream`.
#[derive(Debug, Deserialize)]
pub struct ChartStreamQuery {
    /// Symbol label, upper-cased on output. Defaults to `BTC`.
    pub symbol: Option<String>,
    /// Seconds between events. Defaults to 1.
    pub interval: Option<f64>,
    /// Stop after this many events. Unbounded when absent.
    pub limit: Option<usize>,
}

/// Validated stream parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub symbol: String,
    pub interval: Duration,
    pub limit: Option<usize>,
}

impl ChartStreamQuery {
    /// Applies defaults and checks bounds.
    ///
    /// # Errors
    ///
    /// `ApiError::BadRequest` naming the first out-of-range parameter.
    pub fn validate(self) -> Result<StreamParams, ApiError> {
        let symbol = self.symbol.unwrap_or_else(|| "BTC".to_string());
        let symbol_len = symbol.chars().count();
        if symbol_len == 0 || symbol_len > MAX_SYMBOL_LEN {
            return Err(ApiError::BadRequest(format!(
                "symbol must be 1 to {MAX_SYMBOL_LEN} characters"
            )));
        }

        let interval = self.interval.unwrap_or(1.0);
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval) {
            return Err(ApiError::BadRequest(format!(
                "interval must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS} seconds"
            )));
        }

        if let Some(limit) = self.limit {
            if !(1..=MAX_LIMIT).contains(&limit) {
                return Err(ApiError::BadRequest(format!(
                    "limit must be between 1 and {MAX_LIMIT}"
                )));
            }
        }

        Ok(StreamParams {
            symbol: symbol.to_uppercase(),
            interval: Duration::from_secs_f64(interval),
            limit: self.limit,
        })
    }
}

/// One SSE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    /// UTC, RFC 3339.
    pub timestamp: String,
    pub price: f64,
    /// Up to [`PRICE_WINDOW`] most recent prices, oldest first, ending with `price`.
    pub window: Vec<f64>,
}

/// Synthetic price generator: a slow sine wave around a random base, plus noise.
pub struct PriceFeed {
    symbol: String,
    clock: Clock,
    rng: StdRng,
    base: f64,
    step: u64,
    history: VecDeque<f64>,
}

impl PriceFeed {
    pub fn new(symbol: impl Into<String>, clock: Clock, mut rng: StdRng) -> Self {
        let base = rng.gen_range(25_000.0..35_000.0);
        Self {
            symbol: symbol.into(),
            clock,
            rng,
            base,
            step: 0,
            history: VecDeque::with_capacity(PRICE_WINDOW),
        }
    }

    /// Produces the next point and advances the feed.
    pub fn next_point(&mut self) -> PricePoint {
        let seasonal = (self.step as f64 / 12.0).sin() * 250.0;
        let noise = self.rng.gen_range(-40.0..40.0);
        let price = ((self.base + seasonal + noise) * 100.0).round() / 100.0;
        self.step += 1;

        if self.history.len() == PRICE_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(price);

        PricePoint {
            symbol: self.symbol.clone(),
            timestamp: self.clock.now().utc.to_rfc3339(),
            price,
            window: self.history.iter().copied().collect(),
        }
    }
}

/// Stream of SSE events, one per tick. The first event is immediate.
pub fn price_events(
    params: StreamParams,
    clock: Clock,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let mut feed = PriceFeed::new(params.symbol, clock, StdRng::from_entropy());

    let mut ticker = tokio::time::interval(params.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    IntervalStream::new(ticker)
        .take(params.limit.unwrap_or(usize::MAX))
        .filter_map(move |_| {
            let point = feed.next_point();
            match serde_json::to_string(&point) {
                Ok(data) => Some(Ok(Event::default().data(data))),
                Err(e) => {
                    tracing::error!("failed to serialize price point: {}", e);
                    None
                }
            }
        })
}

/// Handler for `GET /chart`.
pub async fn chart_page_handler() -> Html<&'static str> {
    Html(CHART_PAGE)
}

/// Handler for `GET /chart/stream`.
pub async fn chart_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<ChartStreamQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let params = query.validate()?;

    tracing::debug!(
        symbol = %params.symbol,
        interval_ms = params.interval.as_millis() as u64,
        limit = ?params.limit,
        "opening chart stream"
    );

    Ok(Sse::new(price_events(params, state.clock)).keep_alive(KeepAlive::default()))
}
