//! Paperbot Backend Library
//!
//! Control & telemetry plane for the paper-trading worker: persistent
//! store, ingestion + query API, the pause/cryo/revive state machine, and
//! the on-the-fly OHLC aggregator. Exposed as a library so integration
//! tests can drive the composed router.

pub mod api;
pub mod control;
pub mod ingest;
pub mod market;
pub mod middleware;
pub mod models;
pub mod ohlc;
pub mod store;

pub use api::{router, AppState};
pub use models::Config;
