// crates/backend-lib/src/middleware/mod.rs

//! Middleware for the REST API.

pub mod auth;
pub mod rate_limit;

pub use auth::{bearer_token, require_auth};
pub use rate_limit::{rate_limit, RateLimiter};
