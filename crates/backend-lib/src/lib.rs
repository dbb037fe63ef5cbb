// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core backend functionality for the `StageScout` realtime server:
//! presence, live message relay and durable direct messaging.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod presence;
pub mod storage;
pub mod validation;
pub mod ws_router;

use std::sync::Arc;
use std::time::Duration;
use crate::auth::{AuthService, JwtAuth};
use crate::config::Settings;
use crate::error::AppError;
use crate::middleware::RateLimiter;
use crate::presence::{spawn_presence_actor, PresenceHandle};
use crate::storage::FlatFileStorage;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState<S> {
    /// Bearer token verification
    pub auth: Arc<dyn AuthService>,
    /// Settings the server was started with
    pub settings: Arc<Settings>,
    /// Durable message storage
    pub storage: S,
    /// Presence actor
    pub presence: PresenceHandle,
    /// REST rate limiter
    pub rate_limiter: Arc<RateLimiter>,
}

impl<S> AppState<S> {
    /// Create a new application state.
    ///
    /// Spawns the presence actor, so it must be called inside a Tokio runtime.
    pub fn new(storage: S, config: &Settings) -> Result<Self, AppError> {
        config.validate()?;

        let auth = Arc::new(JwtAuth::new(
            &config.auth.jwt_secret,
            Duration::from_secs(config.auth.token_ttl_secs),
        ));
        let presence = spawn_presence_actor(config.presence.duplicate_policy);
        let rate_limiter = Arc::new(RateLimiter::new(
            Duration::from_secs(config.rate_limit.window_secs),
            config.rate_limit.max_requests,
        ));
        RateLimiter::spawn_cleanup(&rate_limiter);

        Ok(Self {
            auth,
            settings: Arc::new(config.clone()),
            storage,
            presence,
            rate_limiter,
        })
    }
}

impl AppState<FlatFileStorage> {
    /// Create application state backed by flat files under `config.data_dir`
    pub fn with_flat_files(config: &Settings) -> Result<Self, AppError> {
        let storage = FlatFileStorage::new(&config.data_dir)?;
        Self::new(storage, config)
    }
}
