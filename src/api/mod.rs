//! HTTP surface: shared state, router assembly, error taxonomy.

pub mod error;
pub mod routes;

use crate::{
    control::ControlFsm, ingest, market::MarketDataClient, middleware as mw, models::Config,
    store::TelemetryStore,
};
use axum::{
    extract::Request,
    http::{HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

/// Everything a handler needs, constructed once at startup and passed
/// explicitly. No process-wide singletons beyond this container.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TelemetryStore>,
    pub control: Arc<ControlFsm>,
    pub market: Arc<MarketDataClient>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(TelemetryStore::open(&config.db_path)?);
        let control = Arc::new(ControlFsm::new(store.clone()));
        let market = Arc::new(MarketDataClient::new(&config)?);
        Ok(Self {
            store,
            control,
            market,
            config: Arc::new(config),
        })
    }
}

/// Build the full application router. Layer order matters: CORS stamps
/// headers, the preflight rewrite normalizes OPTIONS to 204, logging sits
/// outermost so it sees final statuses.
pub fn router(state: AppState) -> Router {
    let ingest_routes = Router::new()
        .route("/ingest/heartbeat", post(ingest::ingest_heartbeat))
        .route("/ingest/pet", post(ingest::ingest_pet))
        .route("/ingest/equity", post(ingest::ingest_equity))
        .route("/ingest/trade", post(ingest::ingest_trade))
        .route("/ingest/prices", post(ingest::ingest_prices))
        .route("/ingest/event", post(ingest::ingest_event))
        .route("/ingest/death", post(ingest::ingest_death))
        .route_layer(from_fn_with_state(state.clone(), mw::auth::require_ingest_token));

    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/", get(routes::get_root))
        .route("/health", get(routes::get_health))
        .route("/data", get(routes::get_data))
        .route("/ohlc", get(routes::get_ohlc))
        .route("/heartbeat", get(routes::get_heartbeat))
        .route("/pet", get(routes::get_pet))
        .route("/events", get(routes::get_events))
        .route("/equity", get(routes::get_equity))
        .route("/trades", get(routes::get_trades))
        .route("/prices", get(routes::get_prices))
        .route("/deaths", get(routes::get_deaths))
        .route("/control", get(routes::get_control))
        .route("/control/pause", post(routes::post_pause))
        .route("/control/cryo", post(routes::post_cryo))
        .route("/control/revive", post(routes::post_revive))
        .route("/reset/:stream", delete(routes::delete_reset))
        .route("/history", get(routes::get_history))
        .merge(ingest_routes)
        .fallback(unknown_endpoint)
        .layer(cors)
        .layer(from_fn(preflight_no_content))
        .layer(from_fn(mw::logging::request_logging))
        .with_state(state)
}

fn cors_layer(origins: &str) -> CorsLayer {
    if origins.trim() == "*" {
        return CorsLayer::permissive();
    }
    let list: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|o| {
            let o = o.trim();
            match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = o, "Ignoring unparseable CORS origin");
                    None
                }
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(list)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Unknown paths still get the standard `{error, detail}` body.
async fn unknown_endpoint(request: Request) -> error::ApiError {
    error::ApiError::NotFound(format!("no such endpoint: {}", request.uri().path()))
}

/// The CORS layer answers pre-flights with 200; clients expect 204.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}
