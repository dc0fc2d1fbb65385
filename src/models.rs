use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Control states for the trading worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlState {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "CRYO")]
    Cryo,
}

impl ControlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlState::Active => "ACTIVE",
            ControlState::Paused => "PAUSED",
            ControlState::Cryo => "CRYO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ControlState::Active),
            "PAUSED" => Some(ControlState::Paused),
            "CRYO" => Some(ControlState::Cryo),
            _ => None,
        }
    }
}

/// The control singleton. `updated_at_ms` orders transitions totally;
/// `pause_until`/`cryo_until` are absolute RFC-3339 deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRecord {
    pub state: ControlState,
    pub pause_reason: String,
    pub pause_until: String,
    pub cryo_reason: String,
    pub cryo_until: String,
    pub updated_at: String,
    #[serde(skip_serializing, default)]
    pub updated_at_ms: i64,
}

impl ControlRecord {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            state: ControlState::Active,
            pause_reason: String::new(),
            pause_until: String::new(),
            cryo_reason: String::new(),
            cryo_until: String::new(),
            updated_at: now.to_rfc3339(),
            updated_at_ms: now.timestamp_millis(),
        }
    }

    /// Deadline (epoch milliseconds) for the current non-ACTIVE state, if
    /// any.
    pub fn deadline_ms(&self) -> Option<i64> {
        let raw = match self.state {
            ControlState::Paused => &self.pause_until,
            ControlState::Cryo => &self.cryo_until,
            ControlState::Active => return None,
        };
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.timestamp_millis())
    }
}

/// Latest worker heartbeat. Counters here are advisory telemetry from the
/// worker; `/data.stats` recomputes the authoritative numbers server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub at: String,
    pub status: String,
    pub survival_mode: String,
    pub equity_usd: f64,
    pub open_positions: i64,
    pub prices_ok: bool,
    pub markets: Vec<String>,
    pub wins: i64,
    pub losses: i64,
    pub total_trades: i64,
    pub total_pnl_usd: f64,
}

/// Latest pet/survival state. `health` and `hunger` are clamped to [0, 100]
/// at the ingest boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pet {
    pub at: String,
    pub stage: String,
    pub mood: String,
    pub health: f64,
    pub hunger: f64,
    pub growth: f64,
    pub fainted_until: String,
    pub sex: String,
    pub survival_mode: String,
}

impl Pet {
    /// The values a revive resets the pet to. `sex` is worker-assigned
    /// identity and is carried over by the caller.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            at: now.to_rfc3339(),
            stage: "egg".to_string(),
            mood: "focused".to_string(),
            health: 100.0,
            hunger: 50.0,
            growth: 0.0,
            fainted_until: String::new(),
            sex: String::new(),
            survival_mode: "NORMAL".to_string(),
        }
    }
}

/// One equity curve point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub at: String,
    pub equity_usd: f64,
}

/// One raw price observation; input to the OHLC aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub at: String,
    pub at_epoch: i64,
    pub market: String,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Some(TradeSide::Buy),
            "sell" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// One executed paper trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub at: String,
    pub market: String,
    pub side: TradeSide,
    pub size_usd: f64,
    pub price: f64,
    pub pnl_usd: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Worker/dashboard event. `details` is an opaque JSON payload; clients
/// must tolerate missing keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub at: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub message: String,
    pub details: serde_json::Value,
}

pub const EVENT_TYPES: &[&str] = &["info", "warning", "error", "status", "sound", "thought"];

/// Worker death report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Death {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub at: String,
    pub source: String,
    pub reason: String,
    pub details: serde_json::Value,
}

/// Last-writer-wins snapshot of the most recent price per market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricesSnapshot {
    pub at: String,
    pub prices: BTreeMap<String, f64>,
}

/// One OHLC candle; `t` is the bucket start in epoch seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub port: u16,
    pub cors_origins: String,
    pub ingest_token: Option<String>,
    pub spot_cache_ttl_secs: u64,
    pub history_cache_ttl_secs: u64,
    pub upstream_timeout_secs: u64,
    pub upstream_base_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let db_path =
            std::env::var("DB_PATH").unwrap_or_else(|_| "./data/paperbot.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let cors_origins = std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());

        let ingest_token = std::env::var("INGEST_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let spot_cache_ttl_secs = env_u64("SPOT_CACHE_TTL_SECS", 20);
        let history_cache_ttl_secs = env_u64("HISTORY_CACHE_TTL_SECS", 120);
        let upstream_timeout_secs = env_u64("UPSTREAM_TIMEOUT_SECS", 12);

        let upstream_base_url = std::env::var("BINANCE_BASE_URL")
            .unwrap_or_else(|_| "https://api.binance.com".to_string());

        Self {
            db_path,
            port,
            cors_origins,
            ingest_token,
            spot_cache_ttl_secs,
            history_cache_ttl_secs,
            upstream_timeout_secs,
            upstream_base_url,
        }
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}
