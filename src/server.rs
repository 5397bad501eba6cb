//! HTTP API
//!
//! axum router exposing the backtest variants, the live signal, and a health
//! probe. Handlers stay thin: parse the request, run the pipeline, map the
//! engine error taxonomy onto HTTP statuses. No panic reaches the transport
//! layer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::data::CandleProvider;
use crate::engine::{Backtester, Variant};
use crate::execution::ExecutionClient;
use crate::live::LiveEngine;
use crate::state::SqliteStateStore;
use crate::EngineError;

/// Yahoo serves 5-minute bars for at most this many days back.
const MAX_RANGE_DAYS: u32 = 59;
const DEFAULT_RANGE_DAYS: u32 = 30;

/// Unified error type for API responses.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Upstream(String),
    Unprocessable(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad_request: {msg}"),
            Self::Upstream(msg) => write!(f, "upstream_error: {msg}"),
            Self::Unprocessable(msg) => write!(f, "unprocessable: {msg}"),
            Self::Internal(msg) => write!(f, "internal_error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_str) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            Self::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = json!({ "error": error_str });
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::DataUnavailable { .. } => Self::Upstream(e.to_string()),
            EngineError::Provider(_) => Self::Upstream(e.to_string()),
            EngineError::InsufficientData { .. } => Self::Unprocessable(e.to_string()),
            EngineError::State(_) | EngineError::Execution(_) => Self::Internal(e.to_string()),
        }
    }
}

/// Everything a handler needs, shared across requests.
pub struct AppState {
    pub config: Config,
    pub provider: CandleProvider,
    pub backtester: Backtester,
    pub store: SqliteStateStore,
    pub execution: Option<ExecutionClient>,
}

impl AppState {
    pub fn new(config: Config, store: SqliteStateStore) -> Self {
        let provider = CandleProvider::new(config.data.clone(), config.session.clone());
        let execution = match (&config.live.webhook_url, &config.live.webhook_secret) {
            (Some(url), Some(secret)) => {
                Some(ExecutionClient::new(url.clone(), secret.clone()))
            }
            _ => None,
        };
        let backtester = Backtester::new(config.clone());
        AppState {
            config,
            provider,
            backtester,
            store,
            execution,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    /// Days of 5-minute history to analyze.
    pub days: Option<u32>,
}

impl RangeParams {
    fn days(&self) -> Result<u32, ApiError> {
        let days = self.days.unwrap_or(DEFAULT_RANGE_DAYS);
        if days == 0 || days > MAX_RANGE_DAYS {
            return Err(ApiError::BadRequest(format!(
                "days must be between 1 and {MAX_RANGE_DAYS}, got {days}"
            )));
        }
        Ok(days)
    }
}

/// Assemble the API router.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/backtest/{variant}", get(run_backtest))
        .route("/api/signal/live", get(live_signal))
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on {}", addr);
    axum::serve(listener, api_router().with_state(state)).await?;
    Ok(())
}

/// GET /health: liveness probe with the configured symbols.
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "primary_symbol": state.config.data.primary_symbol,
        "fallback_symbol": state.config.data.fallback_symbol,
        "interval": state.config.data.interval,
    }))
}

/// GET /api/backtest/{variant}?days=N runs one backtest variant.
async fn run_backtest(
    State(state): State<Arc<AppState>>,
    Path(variant): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<crate::engine::BacktestReport>, ApiError> {
    let variant: Variant = variant
        .parse()
        .map_err(ApiError::BadRequest)?;
    let days = params.days()?;

    let candles = state.provider.fetch(days).await?;
    let report = state.backtester.run(&candles, variant)?;
    Ok(Json(report))
}

/// GET /api/signal/live evaluates the latest closed bar.
async fn live_signal(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::live::LiveReport>, ApiError> {
    let days = state.config.live.lookback_days.min(MAX_RANGE_DAYS);
    let candles = state.provider.fetch(days).await?;

    let engine = LiveEngine::new(&state.config, &state.store, state.execution.as_ref());
    let report = engine.evaluate(&candles).await?;
    Ok(Json(report))
}
