//! Read-side API and control endpoints.
//!
//! `/data` composes the whole dashboard snapshot in one round trip; the
//! per-stream endpoints mirror the same tails with a `limit` parameter.

use crate::{
    api::{error::ApiError, AppState},
    ingest::normalize::{as_i64, string_field},
    models::{Candle, ControlRecord, Death, EquityPoint, Event, Heartbeat, Pet, Tick, Trade},
    ohlc,
    store::Stream,
};
use axum::extract::{rejection::JsonRejection, Json, Path, Query, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_LIMIT: usize = 200;
const MAX_LIMIT: usize = 1_000;

const DATA_EQUITY_LIMIT: usize = 200;
const DATA_TRADES_LIMIT: usize = 80;
const DATA_TICKS_LIMIT: usize = 800;
const DATA_EVENTS_LIMIT: usize = 250;
const DATA_DEATHS_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

fn clamp_limit(limit: Option<i64>, default: usize) -> usize {
    match limit {
        Some(n) => n.clamp(1, MAX_LIMIT as i64) as usize,
        None => default,
    }
}

// ---- meta ---------------------------------------------------------------

pub async fn get_root() -> Json<Value> {
    Json(json!({
        "name": "paperbot-backend",
        "version": env!("CARGO_PKG_VERSION"),
        "time": Utc::now().to_rfc3339(),
        "endpoints": [
            "/health", "/data", "/ohlc", "/heartbeat", "/pet", "/events",
            "/equity", "/trades", "/prices", "/deaths", "/control",
            "/control/pause", "/control/cryo", "/control/revive",
            "/ingest/*", "/reset/*", "/history",
        ],
    }))
}

pub async fn get_health() -> Json<Value> {
    Json(json!({ "status": "ok", "time": Utc::now().to_rfc3339() }))
}

// ---- composite snapshot -------------------------------------------------

#[derive(Debug, Serialize)]
pub struct Stats {
    pub state: String,
    pub paused: bool,
    pub pause_until: String,
    pub cryo_until: String,
    pub total_trades_loaded: i64,
}

#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub control: ControlRecord,
    pub state: String,
    pub heartbeat: Option<Heartbeat>,
    pub pet: Option<Pet>,
    pub equity: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub ticks: Vec<Tick>,
    pub prices: Value,
    pub events: Vec<Event>,
    pub deaths: Vec<Death>,
    pub stats: Stats,
}

pub async fn get_data(State(state): State<AppState>) -> Result<Json<DataResponse>, ApiError> {
    let control = state.control.current()?;
    let store = &state.store;

    let heartbeat = store.latest_heartbeat()?;
    let pet = store.latest_pet()?;
    let equity = store.tail_equity(DATA_EQUITY_LIMIT)?;
    let trades = store.tail_trades(DATA_TRADES_LIMIT)?;
    let ticks = store.tail_ticks(DATA_TICKS_LIMIT)?;
    let events = store.tail_events(DATA_EVENTS_LIMIT)?;
    let deaths = store.tail_deaths(DATA_DEATHS_LIMIT)?;
    let prices = match store.latest_prices()? {
        Some(snapshot) => serde_json::to_value(snapshot).unwrap_or(Value::Null),
        None => Value::Null,
    };
    let total_trades_loaded = store.count_trades()?;

    let state_name = control.state.as_str().to_string();
    let stats = Stats {
        paused: !matches!(control.state, crate::models::ControlState::Active),
        pause_until: control.pause_until.clone(),
        cryo_until: control.cryo_until.clone(),
        state: state_name.clone(),
        total_trades_loaded,
    };

    Ok(Json(DataResponse {
        state: state_name,
        control,
        heartbeat,
        pet,
        equity,
        trades,
        ticks,
        prices,
        events,
        deaths,
        stats,
    }))
}

// ---- per-stream views ---------------------------------------------------

pub async fn get_control(State(state): State<AppState>) -> Result<Json<ControlRecord>, ApiError> {
    Ok(Json(state.control.current()?))
}

pub async fn get_heartbeat(
    State(state): State<AppState>,
) -> Result<Json<Option<Heartbeat>>, ApiError> {
    Ok(Json(state.store.latest_heartbeat()?))
}

pub async fn get_pet(State(state): State<AppState>) -> Result<Json<Option<Pet>>, ApiError> {
    Ok(Json(state.store.latest_pet()?))
}

pub async fn get_equity(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<EquityPoint>>, ApiError> {
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT);
    Ok(Json(state.store.tail_equity(limit)?))
}

pub async fn get_trades(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Trade>>, ApiError> {
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT);
    Ok(Json(state.store.tail_trades(limit)?))
}

pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT);
    Ok(Json(state.store.tail_events(limit)?))
}

pub async fn get_deaths(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Death>>, ApiError> {
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT);
    Ok(Json(state.store.tail_deaths(limit)?))
}

#[derive(Debug, Deserialize)]
pub struct PricesQuery {
    /// Comma-separated markets switch this endpoint to the upstream
    /// pass-through; without it the stored snapshot is served.
    pub markets: Option<String>,
}

pub async fn get_prices(
    State(state): State<AppState>,
    Query(query): Query<PricesQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(markets) = query.markets.as_deref() {
        let requested: Vec<String> = markets
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if requested.is_empty() {
            return Err(ApiError::BadRequest("markets list is empty".to_string()));
        }
        let prices = state.market.spot_prices(&requested).await;
        return Ok(Json(json!({
            "at": Utc::now().to_rfc3339(),
            "prices": prices,
        })));
    }

    match state.store.latest_prices()? {
        Some(snapshot) => Ok(Json(serde_json::to_value(snapshot).unwrap_or(Value::Null))),
        None => Ok(Json(Value::Null)),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub market: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let market = query
        .market
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("market is required".to_string()))?;
    let limit = clamp_limit(query.limit, 100);
    let candles = state.market.history(&market, limit).await;
    Ok(Json(json!({ "market": market, "candles": candles })))
}

// ---- OHLC ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OhlcQuery {
    pub market: Option<String>,
    pub interval: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OhlcResponse {
    pub market: String,
    pub interval_sec: i64,
    pub candles: Vec<Candle>,
}

pub async fn get_ohlc(
    State(state): State<AppState>,
    Query(query): Query<OhlcQuery>,
) -> Result<Json<OhlcResponse>, ApiError> {
    let market = query
        .market
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("market is required".to_string()))?;
    let interval_sec = ohlc::clamp_interval(query.interval.unwrap_or(60));
    let limit = clamp_limit(query.limit, DEFAULT_LIMIT);

    let ticks = state.store.recent_ticks(&market, ohlc::TICK_FETCH_CAP)?;
    let candles = ohlc::aggregate(&ticks, interval_sec, limit);

    Ok(Json(OhlcResponse {
        market,
        interval_sec,
        candles,
    }))
}

// ---- control transitions ------------------------------------------------

fn optional_body(payload: Result<Json<Value>, JsonRejection>) -> Value {
    match payload {
        Ok(Json(value)) if value.is_object() => value,
        _ => Value::Object(Default::default()),
    }
}

fn freeze_seconds(body: &Value) -> Result<i64, ApiError> {
    let seconds = body
        .get("seconds")
        .and_then(as_i64)
        .ok_or_else(|| ApiError::BadRequest("seconds is required".to_string()))?;
    if seconds <= 0 {
        return Err(ApiError::BadRequest(format!(
            "seconds must be positive, got {}",
            seconds
        )));
    }
    Ok(seconds)
}

pub async fn post_pause(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = optional_body(payload);
    let seconds = freeze_seconds(&body)?;
    let reason = string_field(&body, "reason", "manual");
    let t = state.control.pause(seconds, &reason)?;
    Ok(Json(json!({
        "ok": true,
        "state": t.record.state.as_str(),
        "pause_until": t.record.pause_until,
        "reason": t.record.pause_reason,
    })))
}

pub async fn post_cryo(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = optional_body(payload);
    let seconds = freeze_seconds(&body)?;
    let reason = string_field(&body, "reason", "manual");
    let t = state.control.cryo(seconds, &reason)?;
    Ok(Json(json!({
        "ok": true,
        "state": t.record.state.as_str(),
        "cryo_until": t.record.cryo_until,
        "reason": t.record.cryo_reason,
    })))
}

pub async fn post_revive(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let body = optional_body(payload);
    let reason = string_field(&body, "reason", "manual");
    let t = state.control.revive(&reason)?;
    Ok(Json(json!({
        "ok": true,
        "state": t.record.state.as_str(),
        "updated_at": t.record.updated_at,
    })))
}

// ---- resets -------------------------------------------------------------

pub async fn delete_reset(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if target == "all" {
        state.store.truncate_all()?;
    } else {
        let stream = Stream::from_name(&target)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown stream {:?}", target)))?;
        state.store.truncate(stream)?;
    }
    Ok(Json(json!({ "ok": true, "reset": target })))
}
