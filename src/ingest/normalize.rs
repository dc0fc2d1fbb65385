//! Tolerant boundary coercions.
//!
//! Workers in the field send numerics as strings, booleans as 0/1, and
//! timestamps as either RFC-3339 or epoch seconds. Everything is
//! normalized here, before persistence; typed columns never see the
//! stringly input.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Accept a JSON number or a numeric string.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let t = s.trim();
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

/// Accept true/false, 0/1, and their string forms.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Some(true),
            "false" | "0" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Typed field getters over the request object, with defaults.

pub fn f64_field(body: &Value, key: &str, default: f64) -> f64 {
    body.get(key).and_then(as_f64).unwrap_or(default)
}

pub fn i64_field(body: &Value, key: &str, default: i64) -> i64 {
    body.get(key).and_then(as_i64).unwrap_or(default)
}

pub fn bool_field(body: &Value, key: &str) -> bool {
    body.get(key).and_then(as_bool).unwrap_or(false)
}

pub fn string_field(body: &Value, key: &str, default: &str) -> String {
    body.get(key)
        .and_then(as_string)
        .unwrap_or_else(|| default.to_string())
}

pub fn string_list_field(body: &Value, key: &str) -> Vec<String> {
    body.get(key)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(as_string).collect())
        .unwrap_or_default()
}

pub fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    value.clamp(lo, hi)
}

/// Record timestamp: `at` or the legacy `time_utc` key, as RFC-3339 or
/// epoch seconds; missing or unparseable stamps the server's now.
/// Returns the normalized RFC-3339 string and epoch seconds.
pub fn at_field(body: &Value, now: DateTime<Utc>) -> (String, i64) {
    let raw = body.get("at").or_else(|| body.get("time_utc"));
    let parsed = raw.and_then(parse_timestamp);
    let ts = parsed.unwrap_or(now);
    (ts.to_rfc3339(), ts.timestamp())
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc))
            .or_else(|| {
                // Epoch seconds sent as a string
                s.trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(|e| DateTime::from_timestamp(e, 0))
            }),
        Value::Number(n) => n.as_i64().and_then(|e| DateTime::from_timestamp(e, 0)),
        _ => None,
    }
}

/// Event types outside the known set degrade to `info` instead of being
/// rejected; the stream is diagnostics, not a contract.
pub fn event_type_field(body: &Value, key: &str) -> String {
    let raw = string_field(body, key, "info").to_ascii_lowercase();
    if crate::models::EVENT_TYPES.contains(&raw.as_str()) {
        raw
    } else {
        "info".to_string()
    }
}
