//! Health and Price Read API Integration Tests

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tower::ServiceExt;

use price_feed_engine::{
    ConnectionState, EngineOptions, HealthServer, HealthServerState, PairQuote, PriceFeedEngine,
    PriceUpdate, QuoteSource, QuoteSourceError, ResolvedPair, StreamingTransport, Symbol,
    SymbolClass, TokenRequest, UpdateSender, init_metrics,
};

struct ScriptedStream {
    sender: Mutex<Option<UpdateSender>>,
    state: watch::Sender<ConnectionState>,
}

impl StreamingTransport for ScriptedStream {
    fn attach(&self, _handle: &Handle, updates: UpdateSender) {
        *self.sender.lock() = Some(updates);
    }
    fn subscribe(&self, _symbols: &[Symbol]) {}
    fn unsubscribe(&self, _symbols: &[Symbol]) {}
    fn disconnect(&self) {}
    fn reconnect(&self) {}
    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

struct NoQuotes;

#[async_trait]
impl QuoteSource for NoQuotes {
    async fn search(&self, _symbol: &Symbol) -> Result<Option<PairQuote>, QuoteSourceError> {
        Ok(None)
    }

    async fn pair(&self, _pair: &ResolvedPair) -> Result<Option<PairQuote>, QuoteSourceError> {
        Ok(None)
    }
}

struct Fixture {
    engine: PriceFeedEngine,
    stream: Arc<ScriptedStream>,
    app: Router,
}

fn fixture() -> Fixture {
    let stream = Arc::new(ScriptedStream {
        sender: Mutex::new(None),
        state: watch::channel(ConnectionState::Disconnected).0,
    });
    let engine = PriceFeedEngine::new(
        Arc::clone(&stream) as Arc<dyn StreamingTransport>,
        Arc::new(NoQuotes),
        EngineOptions::default(),
    );
    engine.start().unwrap();

    let state = Arc::new(HealthServerState::new("test-0.0.1".to_string(), engine.clone()));
    Fixture {
        engine,
        stream,
        app: HealthServer::router(state),
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn emit(stream: &ScriptedStream, symbol: &str, price: f64) {
    let sender = stream.sender.lock().clone().unwrap();
    let update =
        PriceUpdate::new(Symbol::new(symbol).unwrap(), price, Some(1.5), SymbolClass::Major)
            .unwrap();
    sender.send(update).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn liveness_is_always_ok() {
    let f = fixture();
    let (status, body) = get(&f.app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn cached_price_is_served() {
    let f = fixture();
    let _sub = f.engine.subscribe(&[TokenRequest::new("btc")], |_| {}).unwrap();
    emit(&f.stream, "btc", 65000.12).await;

    let (status, body) = get_json(&f.app, "/prices/BTC").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["symbol"], "btc");
    assert_eq!(body["price"], 65000.12);
    assert_eq!(body["change_24h"], 1.5);

    let (status, body) = get_json(&f.app, "/prices").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_price_is_not_found() {
    let f = fixture();
    let (status, body) = get_json(&f.app, "/prices/shitcoinxyz").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("shitcoinxyz"));
}

#[tokio::test]
async fn health_reports_streaming_state() {
    let f = fixture();
    let _sub = f.engine.subscribe(&[TokenRequest::new("eth")], |_| {}).unwrap();

    f.stream.state.send_replace(ConnectionState::Reconnecting { attempt: 2 });
    let (status, body) = get_json(&f.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["streaming"]["state"], "reconnecting");
    assert_eq!(body["streaming"]["attempt"], 2);
    assert_eq!(body["subscriptions"]["streaming_symbols"], 1);
    assert_eq!(body["version"], "test-0.0.1");

    f.stream.state.send_replace(ConnectionState::Exhausted);
    let (status, body) = get_json(&f.app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");

    let (status, _) = get(&f.app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    f.stream.state.send_replace(ConnectionState::Connected);
    let (status, _) = get(&f.app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn stopped_engine_is_not_ready() {
    let f = fixture();
    f.engine.stop();

    let (status, body) = get(&f.app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, b"NOT READY");
}

#[tokio::test]
async fn metrics_are_rendered() {
    init_metrics().unwrap();
    let f = fixture();
    let _sub = f.engine.subscribe(&[TokenRequest::new("sol")], |_| {}).unwrap();
    emit(&f.stream, "sol", 150.0).await;

    let (status, body) = get(&f.app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("price_feed_updates_received_total"));
}
