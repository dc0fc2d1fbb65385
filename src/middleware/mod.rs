//! Middleware for observability and ingest authentication.

pub mod auth;
pub mod logging;

pub use auth::require_ingest_token;
pub use logging::request_logging;
