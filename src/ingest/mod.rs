//! Telemetry ingestion.
//!
//! One handler per stream under `/ingest/*`. Payloads are normalized at
//! this boundary (see [`normalize`]) and then written through the store;
//! nothing stringly-typed reaches a typed column.

pub mod normalize;

use crate::{
    api::{error::ApiError, AppState},
    models::{Heartbeat, Pet, Trade, TradeSide},
};
use axum::extract::{rejection::JsonRejection, Json, State};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use normalize::{
    as_f64, at_field, bool_field, clamp, event_type_field, f64_field, i64_field, string_field,
    string_list_field,
};

#[derive(Debug, Serialize)]
pub struct IngestAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl IngestAck {
    fn id(id: i64) -> Json<Self> {
        Json(Self {
            ok: true,
            id: Some(id),
            count: None,
        })
    }

    fn count(count: usize) -> Json<Self> {
        Json(Self {
            ok: true,
            id: None,
            count: Some(count),
        })
    }

    fn ok() -> Json<Self> {
        Json(Self {
            ok: true,
            id: None,
            count: None,
        })
    }
}

/// Absent or malformed JSON is the caller's problem, reported with the
/// standard error body rather than axum's plain-text rejection.
fn require_body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    match payload {
        Ok(Json(value)) if value.is_object() => Ok(value),
        Ok(Json(other)) => Err(ApiError::BadRequest(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
        Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub async fn ingest_heartbeat(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestAck>, ApiError> {
    let body = require_body(payload)?;
    let (at, at_epoch) = at_field(&body, Utc::now());

    let hb = Heartbeat {
        at,
        status: string_field(&body, "status", ""),
        survival_mode: string_field(&body, "survival_mode", "NORMAL"),
        equity_usd: f64_field(&body, "equity_usd", 0.0),
        open_positions: i64_field(&body, "open_positions", 0),
        prices_ok: bool_field(&body, "prices_ok"),
        markets: string_list_field(&body, "markets"),
        wins: i64_field(&body, "wins", 0),
        losses: i64_field(&body, "losses", 0),
        total_trades: i64_field(&body, "total_trades", 0),
        total_pnl_usd: f64_field(&body, "total_pnl_usd", 0.0),
    };
    state.store.upsert_heartbeat(&hb, at_epoch)?;
    debug!(status = %hb.status, equity = hb.equity_usd, "heartbeat ingested");
    Ok(IngestAck::ok())
}

pub async fn ingest_pet(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestAck>, ApiError> {
    let body = require_body(payload)?;
    let now = Utc::now();
    let (at, _) = at_field(&body, now);

    let base = Pet::initial(now);
    let pet = Pet {
        at,
        stage: string_field(&body, "stage", &base.stage),
        mood: string_field(&body, "mood", &base.mood),
        health: clamp(f64_field(&body, "health", base.health), 0.0, 100.0),
        hunger: clamp(f64_field(&body, "hunger", base.hunger), 0.0, 100.0),
        growth: f64_field(&body, "growth", 0.0),
        fainted_until: string_field(&body, "fainted_until", ""),
        sex: string_field(&body, "sex", ""),
        survival_mode: string_field(&body, "survival_mode", "NORMAL"),
    };
    state.store.upsert_pet(&pet)?;
    Ok(IngestAck::ok())
}

pub async fn ingest_equity(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestAck>, ApiError> {
    let body = require_body(payload)?;
    let (at, at_epoch) = at_field(&body, Utc::now());
    let equity_usd = f64_field(&body, "equity_usd", 0.0);
    let id = state.store.append_equity(&at, at_epoch, equity_usd)?;
    Ok(IngestAck::id(id))
}

pub async fn ingest_trade(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestAck>, ApiError> {
    let body = require_body(payload)?;
    let (at, at_epoch) = at_field(&body, Utc::now());

    let side_raw = string_field(&body, "side", "");
    let side = TradeSide::parse(&side_raw)
        .ok_or_else(|| ApiError::BadRequest(format!("side must be buy or sell, got {:?}", side_raw)))?;

    let trade = Trade {
        id: None,
        at,
        market: string_field(&body, "market", ""),
        side,
        size_usd: f64_field(&body, "size_usd", 0.0),
        price: f64_field(&body, "price", 0.0),
        pnl_usd: f64_field(&body, "pnl_usd", 0.0),
        confidence: clamp(f64_field(&body, "confidence", 0.0), 0.0, 1.0),
        reason: string_field(&body, "reason", ""),
    };
    let id = state.store.append_trade(&trade, at_epoch)?;
    Ok(IngestAck::id(id))
}

/// Accepts `{ "prices": { MARKET: price } }` or the flat map form. Every
/// entry becomes one tick; the snapshot upsert rides the same transaction.
pub async fn ingest_prices(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestAck>, ApiError> {
    let body = require_body(payload)?;
    let (at, at_epoch) = at_field(&body, Utc::now());

    let map = match body.get("prices") {
        Some(Value::Object(nested)) => nested,
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "prices must be an object, got {}",
                type_name(other)
            )))
        }
        // Flat form: every non-timestamp key is a market.
        None => body
            .as_object()
            .ok_or_else(|| ApiError::BadRequest("expected a JSON object".to_string()))?,
    };

    let mut entries: BTreeMap<String, f64> = BTreeMap::new();
    for (market, raw) in map {
        if matches!(market.as_str(), "at" | "time_utc") {
            continue;
        }
        let price = as_f64(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("price for {} is not numeric", market))
        })?;
        entries.insert(market.clone(), price);
    }

    let count = state.store.append_price_ticks(&at, at_epoch, &entries)?;
    Ok(IngestAck::count(count))
}

pub async fn ingest_event(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestAck>, ApiError> {
    let body = require_body(payload)?;
    let (at, at_epoch) = at_field(&body, Utc::now());

    let event_type = event_type_field(&body, "type");
    let message = string_field(&body, "message", "");
    let details = body.get("details").cloned().unwrap_or_else(empty_object);

    let id = state
        .store
        .append_event(&at, at_epoch, &event_type, &message, &details)?;
    Ok(IngestAck::id(id))
}

/// A death also leaves an `error` event behind so the dashboard timeline
/// shows it without joining streams.
pub async fn ingest_death(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestAck>, ApiError> {
    let body = require_body(payload)?;
    let (at, at_epoch) = at_field(&body, Utc::now());

    let source = string_field(&body, "source", "");
    let reason = string_field(&body, "reason", "");
    let details = body.get("details").cloned().unwrap_or_else(empty_object);

    let id = state
        .store
        .append_death(&at, at_epoch, &source, &reason, &details)?;
    state.store.append_event(
        &at,
        at_epoch,
        "error",
        &format!("death: {} ({})", source, reason),
        &details,
    )?;
    Ok(IngestAck::id(id))
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}
