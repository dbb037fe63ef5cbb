//! Fixed-window request limiter keyed by client address.
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use crate::{AppState, error::AppError, storage::Storage};

/// Rate limit entry for a client
#[derive(Debug)]
struct RateLimitEntry {
    requests: u32,
    window_start: Instant,
}

/// Per-client fixed-window counter
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            entries: DashMap::new(),
            window,
            max_requests,
        }
    }

    /// Count one request for `key`; false once the window's budget is spent
    pub fn check(&self, key: &str) -> bool {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            RateLimitEntry {
                requests: 0,
                window_start: Instant::now(),
            }
        });

        if entry.window_start.elapsed() > self.window {
            entry.requests = 0;
            entry.window_start = Instant::now();
        }

        if entry.requests >= self.max_requests {
            return false;
        }
        entry.requests += 1;
        true
    }

    /// Drop clients whose window has run out
    pub fn cleanup(&self) {
        let window = self.window;
        self.entries
            .retain(|_, entry| entry.window_start.elapsed() <= window);
    }

    /// Number of clients currently tracked
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    /// Run [`cleanup`](Self::cleanup) once per window until the limiter is dropped
    pub fn spawn_cleanup(limiter: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(limiter);
        let period = limiter.window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                limiter.cleanup();
            }
        });
    }
}

/// Rate limiter middleware
pub async fn rate_limit<S: Storage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client_ip = request
        .headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    if !state.rate_limiter.check(&client_ip) {
        tracing::warn!(%client_ip, "rate limit exceeded");
        return Err(AppError::RateLimitExceeded);
    }

    Ok(next.run(request).await)
}
