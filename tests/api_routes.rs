//! HTTP routes served from a published snapshot.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceExt;

use common::{connection, falling, rising, series, spike_volumes, MockExchange};
use volscan_backend::api::{create_router, AppState};
use volscan_backend::chart::ChartService;
use volscan_backend::config::ScannerConfig;
use volscan_backend::registry::ExchangeRegistry;
use volscan_backend::scanner::Scanner;
use volscan_backend::scheduler::ScanScheduler;

/// Router over one scanned cycle: BTC (strong long), ETH (short), SOL (weak).
/// HOLE has no candles and FLAT never trades, so neither is ranked.
async fn app() -> Router {
    let primary = MockExchange::new("binance")
        .with_market("BTC", series(rising, &spike_volumes(100.0)))
        .with_market("ETH", series(falling, &spike_volumes(40.0)))
        .with_market("HOLE", Vec::new());
    let secondary = MockExchange::new("okx")
        .with_market("SOL", series(falling, &spike_volumes(12.0)))
        .with_market("FLAT", series(rising, &[0.0; 40]));
    let registry = Arc::new(ExchangeRegistry::from_connections(vec![
        connection(primary, 1),
        connection(secondary, 2),
    ]));

    let config = ScannerConfig::default();
    let scanner = Arc::new(Scanner::new(registry.clone(), &config));
    let scheduler = ScanScheduler::new(scanner.clone(), &config);
    let snapshots = scheduler.reader();
    let (_tx, rx) = watch::channel(false);
    scheduler.run_once(&rx).await;

    let charts = Arc::new(ChartService::new(registry, snapshots.clone(), &config));
    create_router(AppState {
        snapshots,
        scanner,
        charts,
    })
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn symbols(body: &Value) -> Vec<String> {
    body["opportunities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["symbol"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let (status, body) = get(app().await, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_opportunities_default_order() {
    let (status, body) = get(app().await, "/api/opportunities").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cycle"], 1);
    assert_eq!(body["sort_by"], "volume_ratio");
    assert_eq!(symbols(&body), vec!["BTC/USDT", "ETH/USDT", "SOL/USDT"]);
    assert_eq!(body["opportunities"][0]["signal"], "long");
    assert_eq!(body["opportunities"][1]["signal"], "short");
}

#[tokio::test]
async fn test_opportunities_filters_and_limit() {
    let app = app().await;

    let (_, body) = get(app.clone(), "/api/opportunities?exchange=OKX").await;
    assert_eq!(symbols(&body), vec!["SOL/USDT"]);
    assert_eq!(body["opportunities"][0]["exchange"], "okx");

    let (_, body) = get(app.clone(), "/api/opportunities?recommended_only=true").await;
    assert_eq!(symbols(&body), vec!["BTC/USDT"]);

    let (_, body) = get(app.clone(), "/api/opportunities?limit=0").await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["total"], 3);

    let (_, body) = get(app, "/api/opportunities?sort_by=current_price&limit=2").await;
    assert_eq!(body["sort_by"], "current_price");
    assert_eq!(symbols(&body), vec!["ETH/USDT", "SOL/USDT"]);
}

#[tokio::test]
async fn test_unknown_sort_key_falls_back() {
    let (status, body) = get(app().await, "/api/opportunities?sort_by=bogus").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sort_by"], "volume_ratio");
}

#[tokio::test]
async fn test_exchanges_and_status() {
    let app = app().await;

    let (status, body) = get(app.clone(), "/api/exchanges").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statistics"]["total_exchanges"], 2);
    assert_eq!(body["statistics"]["connected_exchanges"], 2);
    assert_eq!(body["statistics"]["exchange_symbol_counts"]["binance"], 3);
    assert_eq!(body["exchanges"][0]["exchange"], "binance");

    let (status, body) = get(app, "/api/scan/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["universe_size"], 5);
    assert_eq!(body["opportunity_count"], 3);
    assert_eq!(body["skipped"]["empty_data"], 1);
    assert_eq!(body["skipped"]["zero_volume"], 1);
    assert_eq!(body["last_cycle_failed"], false);
}

#[tokio::test]
async fn test_chart_series() {
    let (status, body) = get(app().await, "/api/chart?symbol=btc%2Fusdt&limit=50").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["symbol"], "BTC/USDT");
    assert_eq!(body["exchange"], "binance");
    assert_eq!(body["timeframe"], "1h");
    assert_eq!(body["closes"].as_array().unwrap().len(), 35);
    assert!(body["ma5"][3].is_null());
    assert!(body["ma5"][4].is_number());
}

#[tokio::test]
async fn test_chart_errors() {
    let app = app().await;

    let (status, body) = get(app.clone(), "/api/chart?symbol=HOLE%2FUSDT").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("HOLE/USDT"));

    // Candles exist but nothing ever traded
    let (status, body) = get(app.clone(), "/api/chart?symbol=FLAT%2FUSDT").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("FLAT/USDT"));

    // Unowned symbols go to the first active exchange, which does not list it
    let (status, _) = get(app.clone(), "/api/chart?symbol=NOPE%2FUSDT").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, _) = get(app, "/api/chart?symbol=%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
