//! Upstream market-data pass-through.
//!
//! Binance public REST, fronted by an in-process TTL cache so a dashboard
//! refresh storm costs one upstream call per market. Upstream failures
//! degrade to empty results under a short negative TTL; they never 5xx.

use crate::models::{Candle, Config};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

const NEGATIVE_TTL: Duration = Duration::from_secs(5);

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

pub struct MarketDataClient {
    client: Client,
    base_url: String,
    spot_ttl: Duration,
    history_ttl: Duration,
    // Option is the negative-cache marker: a recent upstream miss.
    spot_cache: RwLock<HashMap<String, CacheEntry<Option<f64>>>>,
    history_cache: RwLock<HashMap<String, CacheEntry<Arc<Vec<Candle>>>>>,
}

#[derive(Debug, Deserialize)]
struct SpotTicker {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

impl MarketDataClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build market data client")?;

        Ok(Self {
            client,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            spot_ttl: Duration::from_secs(config.spot_cache_ttl_secs),
            history_ttl: Duration::from_secs(config.history_cache_ttl_secs),
            spot_cache: RwLock::new(HashMap::new()),
            history_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Spot prices for the requested markets. Markets the upstream does not
    /// know (or failed for) are simply absent from the result.
    pub async fn spot_prices(&self, markets: &[String]) -> BTreeMap<String, f64> {
        let mut result = BTreeMap::new();
        for market in markets {
            if let Some(price) = self.spot_price(market).await {
                result.insert(market.clone(), price);
            }
        }
        result
    }

    async fn spot_price(&self, market: &str) -> Option<f64> {
        {
            let cache = self.spot_cache.read();
            if let Some(entry) = cache.get(market) {
                if entry.fresh() {
                    return entry.value;
                }
            }
        }

        let fetched = self.fetch_spot(market).await;
        let (value, ttl) = match fetched {
            Ok(price) => (Some(price), self.spot_ttl),
            Err(e) => {
                warn!(market, error = %format!("{:#}", e), "Spot fetch failed");
                (None, NEGATIVE_TTL)
            }
        };
        self.spot_cache.write().insert(
            market.to_string(),
            CacheEntry {
                value,
                fetched_at: Instant::now(),
                ttl,
            },
        );
        value
    }

    async fn fetch_spot(&self, market: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let resp = self
            .client
            .get(url)
            .query(&[("symbol", market)])
            .send()
            .await
            .context("GET /api/v3/ticker/price failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(anyhow::anyhow!("upstream returned {}", status));
        }

        let ticker: SpotTicker = resp.json().await.context("parse ticker response")?;
        ticker
            .price
            .parse::<f64>()
            .context("non-numeric upstream price")
    }

    /// Recent 1-minute candles for one market. Empty on upstream failure.
    pub async fn history(&self, market: &str, limit: usize) -> Vec<Candle> {
        let key = format!("{}:{}", market, limit);
        {
            let cache = self.history_cache.read();
            if let Some(entry) = cache.get(&key) {
                if entry.fresh() {
                    return entry.value.as_ref().clone();
                }
            }
        }

        let (candles, ttl) = match self.fetch_history(market, limit).await {
            Ok(candles) => {
                debug!(market, count = candles.len(), "History fetched");
                (candles, self.history_ttl)
            }
            Err(e) => {
                warn!(market, error = %format!("{:#}", e), "History fetch failed");
                (Vec::new(), NEGATIVE_TTL)
            }
        };
        let shared = Arc::new(candles);
        self.history_cache.write().insert(
            key,
            CacheEntry {
                value: shared.clone(),
                fetched_at: Instant::now(),
                ttl,
            },
        );
        shared.as_ref().clone()
    }

    async fn fetch_history(&self, market: &str, limit: usize) -> Result<Vec<Candle>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let resp = self
            .client
            .get(url)
            .query(&[
                ("symbol", market),
                ("interval", "1m"),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .context("GET /api/v3/klines failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(anyhow::anyhow!("upstream returned {}", status));
        }

        // Kline rows: [open_time_ms, open, high, low, close, ...]
        let rows: Vec<Vec<serde_json::Value>> =
            resp.json().await.context("parse klines response")?;

        let candles = rows
            .iter()
            .filter_map(|row| {
                let t = row.first()?.as_i64()? / 1000;
                let o = kline_price(row.get(1)?)?;
                let h = kline_price(row.get(2)?)?;
                let l = kline_price(row.get(3)?)?;
                let c = kline_price(row.get(4)?)?;
                Some(Candle { t, o, h, l, c })
            })
            .collect();
        Ok(candles)
    }
}

/// Binance serializes kline prices as strings.
fn kline_price(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_entry_expires() {
        let entry = CacheEntry {
            value: 1.0,
            fetched_at: Instant::now(),
            ttl: Duration::from_secs(0),
        };
        assert!(!entry.fresh());

        let entry = CacheEntry {
            value: 1.0,
            fetched_at: Instant::now(),
            ttl: Duration::from_secs(20),
        };
        assert!(entry.fresh());
    }

    #[test]
    fn kline_prices_parse_both_forms() {
        assert_eq!(kline_price(&serde_json::json!("42000.5")), Some(42000.5));
        assert_eq!(kline_price(&serde_json::json!(42000.5)), Some(42000.5));
        assert_eq!(kline_price(&serde_json::json!(null)), None);
    }
}
