use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analytics::AnalyticsResult;
use crate::api::health::HealthState;
use crate::api::latency::{LatencySummary, PipelineLatency};
use crate::config::ChainKey;
use crate::error::{AppError, Result};
use crate::fetcher::{filter_index_rows, ContractInfo, NseClient};
use crate::refresh::{ControlMsg, RefreshHandle};
use crate::state::{ChainStatus, ChainStore};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<ChainStore>,
    pub client: Arc<NseClient>,
    pub refreshers: Arc<HashMap<ChainKey, RefreshHandle>>,
    pub latency: Arc<PipelineLatency>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/chains", get(get_chains))
        .route("/api/chains/:symbol/analytics", get(get_analytics))
        .route("/api/chains/:symbol/interpretations", get(get_interpretations))
        .route("/api/chains/:symbol/levels", get(get_levels))
        .route("/api/chains/:symbol/bias", get(get_bias))
        .route("/api/chains/:symbol/trap", get(get_trap))
        .route("/api/chains/:symbol/targets", get(get_targets))
        .route("/api/chains/:symbol/velocity", get(get_velocity))
        .route("/api/chains/:symbol/heatmap", get(get_heatmap))
        .route("/api/chains/:symbol/scalping", get(get_scalping))
        .route("/api/chains/:symbol/expiry-risk", get(get_expiry_risk))
        .route("/api/chains/:symbol/basis", get(get_basis))
        .route("/api/chains/:symbol/expiries", get(get_expiries))
        .route("/api/chains/:symbol/refresh", post(post_refresh))
        .route("/api/chains/:symbol/stop", post(post_stop))
        .route("/api/chains/:symbol/resume", post(post_resume))
        .route("/api/index-data", get(get_index_data))
        .route("/api/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ChainQuery {
    pub expiry: Option<String>,
}

#[derive(Deserialize)]
pub struct IndexQuery {
    /// Comma-separated index names, e.g. `NIFTY 50,INDIA VIX`.
    pub names: Option<String>,
}

impl ChainQuery {
    fn key(&self, symbol: &str) -> ChainKey {
        ChainKey::new(symbol, self.expiry.clone())
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Envelope for every per-chain read: freshness flags plus the requested section,
/// which is null until the chain's first pass lands (or when the section itself is
/// unavailable, such as velocity with no prior observation).
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainResponse {
    pub symbol: String,
    pub expiry: Option<String>,
    pub stale: bool,
    pub last_error: Option<String>,
    pub fetched_at_ms: Option<i64>,
    pub data: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub chains: usize,
    pub ready: usize,
    pub stale: usize,
    pub nse_reachable: bool,
    pub unreachable_chains: Vec<String>,
    pub max_consecutive_failures: u64,
    pub fetches_in_flight: u64,
    pub last_pass_at_ms: Option<i64>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub fetch: LatencySummary,
    pub compute: LatencySummary,
}

#[derive(Serialize)]
pub struct ControlResponse {
    pub chain: String,
    pub command: &'static str,
    pub queued: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let chains = state.store.chain_count();
    let ready = state.store.ready_count();
    let stale = state.store.stale_count();
    let status = if ready == chains && stale == 0 { "ok" } else { "degraded" };
    Json(HealthResponse {
        status,
        chains,
        ready,
        stale,
        nse_reachable: state.health.nse_reachable(),
        unreachable_chains: state.health.unreachable_chains(),
        max_consecutive_failures: state.health.max_consecutive_failures(),
        fetches_in_flight: state.health.fetches_in_flight(),
        last_pass_at_ms: state.health.last_pass_at_ms(),
    })
}

async fn get_chains(State(state): State<ApiState>) -> Json<Vec<ChainStatus>> {
    Json(state.store.all_status())
}

/// Look up a tracked chain and project one section of its latest result.
fn chain_section(
    state: &ApiState,
    symbol: &str,
    query: &ChainQuery,
    section: impl FnOnce(&AnalyticsResult) -> serde_json::Result<Value>,
) -> Result<Json<ChainResponse>> {
    let key = query.key(symbol);
    let status = state
        .store
        .status(&key)
        .ok_or_else(|| AppError::NotFound(format!("chain {key} is not tracked")))?;
    let data = match status.latest.as_deref() {
        Some(result) => section(result)?,
        None => Value::Null,
    };
    Ok(Json(ChainResponse {
        symbol: status.symbol,
        expiry: status.expiry,
        stale: status.stale,
        last_error: status.last_error,
        fetched_at_ms: status.fetched_at_ms,
        data,
    }))
}

async fn get_analytics(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(r))
}

async fn get_interpretations(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(&r.interpretations))
}

async fn get_levels(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| {
        Ok(serde_json::json!({
            "keyLevels": r.key_levels,
            "totals": r.totals,
            "levelShift": r.level_shift,
        }))
    })
}

async fn get_bias(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(&r.bias))
}

async fn get_trap(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(&r.trap))
}

async fn get_targets(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(&r.targets))
}

async fn get_velocity(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(&r.velocity))
}

async fn get_heatmap(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(&r.heatmap))
}

async fn get_scalping(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(&r.scalping))
}

async fn get_expiry_risk(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(&r.expiry_risk))
}

async fn get_basis(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<Json<ChainResponse>> {
    chain_section(&state, &symbol, &q, |r| serde_json::to_value(&r.basis))
}

async fn get_expiries(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
) -> Result<Json<ContractInfo>> {
    Ok(Json(state.client.fetch_contract_info(&symbol).await?))
}

async fn get_index_data(
    State(state): State<ApiState>,
    Query(q): Query<IndexQuery>,
) -> Result<Json<Value>> {
    let rows = state.client.fetch_index_data().await?;
    Ok(Json(serde_json::json!({ "data": filter_index_rows(rows, q.names.as_deref()) })))
}

/// Queue a control message for a tracked chain's refresher: 202 when queued, 503 when
/// the refresher is gone or busy.
fn send_control(
    state: &ApiState,
    symbol: &str,
    query: &ChainQuery,
    msg: ControlMsg,
    command: &'static str,
) -> Result<(StatusCode, Json<ControlResponse>)> {
    let key = query.key(symbol);
    let handle = state
        .refreshers
        .get(&key)
        .ok_or_else(|| AppError::NotFound(format!("chain {key} is not tracked")))?;
    let queued = handle.send(msg);
    let status = if queued { StatusCode::ACCEPTED } else { StatusCode::SERVICE_UNAVAILABLE };
    Ok((status, Json(ControlResponse { chain: key.to_string(), command, queued })))
}

async fn post_refresh(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<(StatusCode, Json<ControlResponse>)> {
    send_control(&state, &symbol, &q, ControlMsg::RefreshNow, "refresh")
}

async fn post_stop(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<(StatusCode, Json<ControlResponse>)> {
    send_control(&state, &symbol, &q, ControlMsg::Stop, "stop")
}

async fn post_resume(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(q): Query<ChainQuery>,
) -> Result<(StatusCode, Json<ControlResponse>)> {
    send_control(&state, &symbol, &q, ControlMsg::Resume, "resume")
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    Json(LatencyResponse {
        fetch: state.latency.fetch.summary(),
        compute: state.latency.compute.summary(),
    })
}
