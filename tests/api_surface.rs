//! End-to-end tests for the HTTP surface.
//!
//! Each test composes the real router over a throwaway SQLite file and
//! drives it with `tower::ServiceExt::oneshot`. The upstream base URL
//! points at a closed port so pass-through paths exercise their
//! degrade-to-empty behavior instead of the network.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use paperbot_backend::{router, AppState, Config};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_config(dir: &TempDir) -> Config {
    Config {
        db_path: dir
            .path()
            .join("paperbot.db")
            .to_str()
            .unwrap()
            .to_string(),
        port: 0,
        cors_origins: "*".to_string(),
        ingest_token: None,
        spot_cache_ttl_secs: 20,
        history_cache_ttl_secs: 120,
        upstream_timeout_secs: 2,
        // Closed port: upstream calls fail fast
        upstream_base_url: "http://127.0.0.1:9".to_string(),
    }
}

fn test_app(dir: &TempDir) -> Router {
    router(AppState::new(test_config(dir)).expect("state"))
}

async fn send(
    app: &Router,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::from(value.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn get(app: &Router, path: &str) -> (StatusCode, Value) {
    send(app, Method::GET, path, None).await
}

async fn post(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, path, Some(body)).await
}

async fn ingest_tick(app: &Router, at_epoch: i64, market: &str, price: f64) {
    let (status, body) = post(
        app,
        "/ingest/prices",
        json!({ "at": at_epoch, "prices": { market: price } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "tick ingest failed: {}", body);
}

#[tokio::test]
async fn meta_and_health_respond() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "paperbot-backend");

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn ticks_aggregate_into_candles() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    ingest_tick(&app, 1_700_000_000, "BTCUSDT", 100.0).await;
    ingest_tick(&app, 1_700_000_030, "BTCUSDT", 110.0).await;
    ingest_tick(&app, 1_700_000_059, "BTCUSDT", 105.0).await;
    ingest_tick(&app, 1_700_000_061, "BTCUSDT", 120.0).await;

    let (status, body) = get(&app, "/ohlc?market=BTCUSDT&interval=60&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["market"], "BTCUSDT");
    assert_eq!(body["interval_sec"], 60);

    let candles = body["candles"].as_array().unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(
        candles[0],
        json!({ "t": 1_700_000_000i64, "o": 100.0, "h": 110.0, "l": 100.0, "c": 105.0 })
    );
    assert_eq!(
        candles[1],
        json!({ "t": 1_700_000_060i64, "o": 120.0, "h": 120.0, "l": 120.0, "c": 120.0 })
    );
}

#[tokio::test]
async fn ohlc_unknown_market_is_empty_not_an_error() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = get(&app, "/ohlc?market=DOGEUSDT&interval=60").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["candles"], json!([]));
}

#[tokio::test]
async fn pause_lifecycle_thaws_after_deadline() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = post(&app, "/control/pause", json!({ "seconds": 1, "reason": "x" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["state"], "PAUSED");
    assert_eq!(body["reason"], "x");

    let (_, body) = get(&app, "/control").await;
    assert_eq!(body["state"], "PAUSED");

    tokio::time::sleep(std::time::Duration::from_millis(1_300)).await;

    let (_, body) = get(&app, "/control").await;
    assert_eq!(body["state"], "ACTIVE");
    assert_eq!(body["pause_until"], "");
    assert_eq!(body["pause_reason"], "");
}

#[tokio::test]
async fn prices_fanout_updates_snapshot_and_ticks_together() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = post(
        &app,
        "/ingest/prices",
        json!({ "time_utc": "2025-01-15T12:00:00Z", "prices": { "BTCUSDT": 1.0, "ETHUSDT": 2.0 } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "count": 2 }));

    let (_, data) = get(&app, "/data").await;
    assert_eq!(data["prices"]["prices"]["BTCUSDT"], 1.0);
    assert_eq!(data["prices"]["prices"]["ETHUSDT"], 2.0);

    let ticks = data["ticks"].as_array().unwrap();
    assert_eq!(ticks.len(), 2);
    assert_eq!(ticks[0]["at"], ticks[1]["at"]);
}

#[tokio::test]
async fn flat_prices_payload_is_accepted() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = post(
        &app,
        "/ingest/prices",
        json!({ "BTCUSDT": "42000.5", "ETHUSDT": 2200.25 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (_, snapshot) = get(&app, "/prices").await;
    assert_eq!(snapshot["prices"]["BTCUSDT"], 42000.5);
}

#[tokio::test]
async fn trade_pnl_sums_to_zero_and_stats_count_is_authoritative() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    for pnl in [3.0, -1.0, 2.0, -4.0] {
        let (status, _) = post(
            &app,
            "/ingest/trade",
            json!({
                "market": "BTCUSDT",
                "side": if pnl > 0.0 { "buy" } else { "sell" },
                "size_usd": 100,
                "price": 42000,
                "pnl_usd": pnl,
                "confidence": 0.9,
                "reason": "test",
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, data) = get(&app, "/data").await;
    assert_eq!(data["stats"]["total_trades_loaded"], 4);

    let sum: f64 = data["trades"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["pnl_usd"].as_f64().unwrap())
        .sum();
    assert_eq!(sum, 0.0);
}

#[tokio::test]
async fn trades_are_newest_first_and_equity_oldest_first() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    for i in 0..3 {
        post(
            &app,
            "/ingest/trade",
            json!({ "market": "BTCUSDT", "side": "buy", "pnl_usd": i }),
        )
        .await;
        post(&app, "/ingest/equity", json!({ "equity_usd": 100 + i })).await;
    }

    let (_, trades) = get(&app, "/trades").await;
    let trades = trades.as_array().unwrap().clone();
    assert_eq!(trades[0]["pnl_usd"], 2.0);
    assert_eq!(trades[2]["pnl_usd"], 0.0);

    let (_, equity) = get(&app, "/equity").await;
    let equity = equity.as_array().unwrap().clone();
    assert_eq!(equity[0]["equity_usd"], 100.0);
    assert_eq!(equity[2]["equity_usd"], 102.0);
}

#[tokio::test]
async fn reset_trades_leaves_other_streams_alone() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    post(
        &app,
        "/ingest/trade",
        json!({ "market": "BTCUSDT", "side": "buy", "pnl_usd": 1 }),
    )
    .await;
    post(&app, "/ingest/equity", json!({ "equity_usd": 100 })).await;
    post(
        &app,
        "/ingest/event",
        json!({ "type": "info", "message": "hello" }),
    )
    .await;
    ingest_tick(&app, 1_700_000_000, "BTCUSDT", 1.0).await;
    post(&app, "/control/pause", json!({ "seconds": 600 })).await;

    let (status, body) = send(&app, Method::DELETE, "/reset/trades", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (_, trades) = get(&app, "/trades").await;
    assert_eq!(trades, json!([]));

    let (_, equity) = get(&app, "/equity").await;
    assert_eq!(equity.as_array().unwrap().len(), 1);
    let (_, events) = get(&app, "/events").await;
    assert!(!events.as_array().unwrap().is_empty());
    let (_, control) = get(&app, "/control").await;
    assert_eq!(control["state"], "PAUSED");
}

#[tokio::test]
async fn reset_unknown_stream_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = send(&app, Method::DELETE, "/reset/control", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");
    assert!(body["detail"].as_str().unwrap().contains("control"));
}

#[tokio::test]
async fn revive_resets_pet_to_initial_values() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, _) = post(
        &app,
        "/ingest/pet",
        json!({ "stage": "adult", "health": 10, "hunger": 90, "sex": "F", "mood": "tired" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&app, "/control/revive", json!({ "reason": "operator" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ACTIVE");

    let (_, pet) = get(&app, "/pet").await;
    assert_eq!(pet["stage"], "egg");
    assert_eq!(pet["mood"], "focused");
    assert_eq!(pet["health"], 100.0);
    assert_eq!(pet["hunger"], 50.0);
    assert_eq!(pet["growth"], 0.0);
    assert_eq!(pet["fainted_until"], "");
    assert_eq!(pet["survival_mode"], "NORMAL");
    assert_eq!(pet["sex"], "F");
}

#[tokio::test]
async fn pet_bounds_clamp_and_strings_coerce() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    post(
        &app,
        "/ingest/pet",
        json!({ "health": "250", "hunger": -10, "stage": "child" }),
    )
    .await;

    let (_, pet) = get(&app, "/pet").await;
    assert_eq!(pet["health"], 100.0);
    assert_eq!(pet["hunger"], 0.0);
    assert_eq!(pet["stage"], "child");
}

#[tokio::test]
async fn heartbeat_upserts_latest_row() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    post(
        &app,
        "/ingest/heartbeat",
        json!({ "status": "alive", "equity_usd": "1000.5", "prices_ok": 1, "markets": ["BTCUSDT"] }),
    )
    .await;
    post(
        &app,
        "/ingest/heartbeat",
        json!({ "status": "degraded", "equity_usd": 990, "prices_ok": 0 }),
    )
    .await;

    let (_, hb) = get(&app, "/heartbeat").await;
    assert_eq!(hb["status"], "degraded");
    assert_eq!(hb["equity_usd"], 990.0);
    assert_eq!(hb["prices_ok"], false);
}

#[tokio::test]
async fn death_ingest_also_logs_an_event() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, _) = post(
        &app,
        "/ingest/death",
        json!({ "source": "worker", "reason": "oom", "details": { "rss_mb": 4096 } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, deaths) = get(&app, "/deaths").await;
    let deaths = deaths.as_array().unwrap().clone();
    assert_eq!(deaths.len(), 1);
    assert_eq!(deaths[0]["details"]["rss_mb"], 4096);

    let (_, events) = get(&app, "/events").await;
    let events = events.as_array().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert!(events[0]["message"].as_str().unwrap().contains("worker"));
}

#[tokio::test]
async fn trade_without_side_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = post(&app, "/ingest/trade", json!({ "market": "BTCUSDT" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadRequest");
}

#[tokio::test]
async fn malformed_json_is_bad_request_with_error_body() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/ingest/event")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "BadRequest");
}

#[tokio::test]
async fn ingest_token_gates_writes_but_not_reads() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.ingest_token = Some("hunter2".to_string());
    let app = router(AppState::new(config).unwrap());

    let (status, body) = post(&app, "/ingest/equity", json!({ "equity_usd": 1 })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/ingest/equity")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-INGEST-TOKEN", "hunter2")
        .body(Body::from(json!({ "equity_usd": 1 }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Reads stay open
    let (status, _) = get(&app, "/data").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn preflight_returns_no_content() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/data")
        .header(header::ORIGIN, "http://localhost:5173")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn empty_streams_serialize_as_empty_arrays() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (_, data) = get(&app, "/data").await;
    for key in ["equity", "trades", "ticks", "events", "deaths"] {
        assert_eq!(data[key], json!([]), "{} should be []", key);
    }
    assert_eq!(data["state"], "ACTIVE");
    assert_eq!(data["stats"]["paused"], false);
}

#[tokio::test]
async fn unknown_endpoint_gets_json_not_found() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = get(&app, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
    assert!(body["detail"].as_str().unwrap().contains("/nope"));
}

#[tokio::test]
async fn limit_parameter_clamps() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    for i in 0..5 {
        post(&app, "/ingest/equity", json!({ "equity_usd": i })).await;
    }

    let (_, equity) = get(&app, "/equity?limit=2").await;
    assert_eq!(equity.as_array().unwrap().len(), 2);

    // Out-of-range limits clamp instead of erroring
    let (status, equity) = get(&app, "/equity?limit=999999").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(equity.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn upstream_passthrough_degrades_to_empty() {
    let dir = TempDir::new().unwrap();
    let app = test_app(&dir);

    let (status, body) = get(&app, "/history?market=BTCUSDT&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["candles"], json!([]));

    let (status, body) = get(&app, "/prices?markets=BTCUSDT,ETHUSDT").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prices"], json!({}));
}
