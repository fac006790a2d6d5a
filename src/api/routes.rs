use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::chart::{ChartError, ChartService};
use crate::models::{ChartSeries, ExchangeStatistics, ExchangeStatus, Opportunity};
use crate::scanner::{ScanPhase, Scanner};
use crate::scheduler::SnapshotReader;
use crate::scoring::{top_n, SortKey};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 500;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub snapshots: SnapshotReader,
    pub scanner: Arc<Scanner>,
    pub charts: Arc<ChartService>,
}

/// Create the API router. Every route reads the last published snapshot.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/opportunities", get(get_opportunities))
        .route("/api/exchanges", get(get_exchanges))
        .route("/api/scan/status", get(get_scan_status))
        .route("/api/chart", get(get_chart))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Ranked opportunities, re-sorted by the requested key
async fn get_opportunities(
    State(state): State<AppState>,
    Query(params): Query<OpportunityQuery>,
) -> Json<OpportunitiesResponse> {
    let snapshot = state.snapshots.load();
    let sort_key = params
        .sort_by
        .as_deref()
        .map(SortKey::parse_lenient)
        .unwrap_or(snapshot.sort_key);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let filtered: Vec<Opportunity> = snapshot
        .opportunities
        .iter()
        .filter(|o| {
            params
                .exchange
                .as_deref()
                .map_or(true, |ex| o.exchange.eq_ignore_ascii_case(ex))
        })
        .filter(|o| !params.recommended_only.unwrap_or(false) || o.is_recommended)
        .cloned()
        .collect();
    let total = filtered.len();
    let opportunities = top_n(filtered, sort_key, limit);

    Json(OpportunitiesResponse {
        count: opportunities.len(),
        total,
        sort_by: sort_key,
        cycle: snapshot.cycle,
        updated_at: snapshot.updated_at,
        last_cycle_failed: snapshot.last_cycle_failed,
        opportunities,
    })
}

async fn get_exchanges(State(state): State<AppState>) -> Json<ExchangesResponse> {
    let snapshot = state.snapshots.load();
    Json(ExchangesResponse {
        updated_at: snapshot.updated_at,
        statistics: snapshot.statistics.clone(),
        exchanges: snapshot.exchange_status.clone(),
    })
}

async fn get_scan_status(State(state): State<AppState>) -> Json<ScanStatusResponse> {
    let snapshot = state.snapshots.load();
    Json(ScanStatusResponse {
        phase: state.scanner.phase(),
        cycle: snapshot.cycle,
        updated_at: snapshot.updated_at,
        duration_ms: snapshot.duration_ms,
        universe_size: snapshot.universe_size,
        opportunity_count: snapshot.opportunities.len(),
        skipped: snapshot.skipped.clone(),
        last_cycle_failed: snapshot.last_cycle_failed,
    })
}

async fn get_chart(
    State(state): State<AppState>,
    Query(params): Query<ChartQuery>,
) -> Result<Json<ChartSeries>, ApiError> {
    let symbol = params.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(ApiError::BadRequest("symbol is required".to_string()));
    }
    let series = state
        .charts
        .series(&symbol, params.timeframe.as_deref(), params.limit)
        .await?;
    Ok(Json(series.as_ref().clone()))
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
pub struct OpportunityQuery {
    /// volume_ratio | composite_score | current_volume | price_change_24h | current_price
    pub sort_by: Option<String>,
    pub limit: Option<usize>,
    /// Only opportunities owned by this exchange
    pub exchange: Option<String>,
    pub recommended_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    pub symbol: String,
    pub timeframe: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct OpportunitiesResponse {
    count: usize,
    total: usize,
    sort_by: SortKey,
    cycle: u64,
    updated_at: Option<DateTime<Utc>>,
    last_cycle_failed: bool,
    opportunities: Vec<Opportunity>,
}

#[derive(Serialize)]
struct ExchangesResponse {
    updated_at: Option<DateTime<Utc>>,
    statistics: ExchangeStatistics,
    exchanges: Vec<ExchangeStatus>,
}

#[derive(Serialize)]
struct ScanStatusResponse {
    phase: ScanPhase,
    cycle: u64,
    updated_at: Option<DateTime<Utc>>,
    duration_ms: u64,
    universe_size: usize,
    opportunity_count: usize,
    skipped: BTreeMap<String, usize>,
    last_cycle_failed: bool,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Chart(ChartError),
    BadRequest(String),
}

impl From<ChartError> for ApiError {
    fn from(err: ChartError) -> Self {
        ApiError::Chart(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Chart(err @ ChartError::NoExchange) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            ApiError::Chart(err @ ChartError::NoData { .. }) => (StatusCode::NOT_FOUND, err.to_string()),
            ApiError::Chart(err @ ChartError::Fetch { .. }) => {
                tracing::warn!(error = %err, "Chart fetch failed");
                (StatusCode::BAD_GATEWAY, err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
