use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::AppState;
use price_sync::{CachedCoin, CycleReport, PriceSyncError, SchedulerState, SourceHealth};

type ApiError = (StatusCode, String);

fn into_api_error(e: PriceSyncError) -> ApiError {
    let status = match e {
        PriceSyncError::CoinNotFound(_) => StatusCode::NOT_FOUND,
        PriceSyncError::AlreadyInPortfolio(_) => StatusCode::CONFLICT,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, e.to_string())
}

#[derive(Debug, serde::Deserialize)]
pub struct SearchQuery {
    symbol: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct PriceQuery {
    #[serde(default = "default_currency")]
    currency: String,
}

fn default_currency() -> String {
    "usd".to_string()
}

/// GET /coins/search?symbol= - Cached coins sharing a ticker
pub async fn search_coins(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<CachedCoin>>, ApiError> {
    let coins = state
        .lookup
        .search_symbol(&query.symbol)
        .await
        .map_err(into_api_error)?;

    if coins.is_empty() {
        return Err((StatusCode::NOT_FOUND, "Coin not found".to_string()));
    }
    Ok(Json(coins))
}

/// GET /coins/:id - Cached metadata for one coin
pub async fn get_coin(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CachedCoin>, ApiError> {
    state
        .lookup
        .coin(&id)
        .await
        .map_err(into_api_error)?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Coin data not found".to_string()))
}

/// GET /coins/:id/price?currency= - Live price, `{}` when unknown
pub async fn get_coin_price(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PriceQuery>,
) -> Json<HashMap<String, HashMap<String, Decimal>>> {
    let prices = state.lookup.current_price(&id, &query.currency).await;
    if prices.is_empty() {
        warn!("No {} price for {}", query.currency, id);
        return Json(HashMap::new());
    }
    Json(HashMap::from([(id, prices)]))
}

/// POST /refresh - Run one refresh cycle now
pub async fn trigger_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CycleReport>, ApiError> {
    info!("On-demand refresh requested");
    match state.scheduler.run_cycle().await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            error!("On-demand refresh failed: {}", e);
            Err(into_api_error(e))
        }
    }
}

/// GET /health - Service health check
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let source = state.source.health();

    Json(HealthResponse {
        status: if source.is_healthy { "healthy".to_string() } else { "degraded".to_string() },
        refresher: state.scheduler.state(),
        sources: vec![source],
    })
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub refresher: SchedulerState,
    pub sources: Vec<SourceHealth>,
}
