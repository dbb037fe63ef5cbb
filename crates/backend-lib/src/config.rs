// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `STAGESCOUT_`-prefixed environment variables (`__` separates nested keys,
//! e.g. `STAGESCOUT_AUTH__JWT_SECRET`).
use crate::error::AppError;
use crate::presence::DuplicatePolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory path
    pub data_dir: PathBuf,
    /// Log level, overridden by `RUST_LOG`
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Origins allowed by CORS; empty allows any
    pub allowed_origins: Vec<String>,
    /// Token verification
    pub auth: AuthSettings,
    /// Realtime presence
    pub presence: PresenceSettings,
    /// REST rate limiting
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HS256 signing secret for bearer tokens
    pub jwt_secret: String,
    /// Only let a realtime connection identify (and send) as its token's user
    pub enforce_identity: bool,
    /// Lifetime of issued tokens
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSettings {
    /// How a user identifying on a second connection is recorded
    pub duplicate_policy: DuplicatePolicy,
    /// Per-connection outbound queue length
    pub outbound_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            allowed_origins: Vec::new(),
            auth: AuthSettings::default(),
            presence: PresenceSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            enforce_identity: true,
            token_ttl_secs: 60 * 60 * 24 * 30, // 30 days
        }
    }
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::default(),
            outbound_buffer: 64,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 300,
        }
    }
}

impl Settings {
    fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("STAGESCOUT_").split("__"))
    }

    /// Load settings from `config.toml` and the environment
    pub fn load() -> Result<Self, AppError> {
        Self::load_from("config.toml")
    }

    /// Load settings from the given TOML file and the environment.
    /// A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(AppError::Config("auth.jwt_secret must be set".to_string()));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(AppError::Config(
                "auth.token_ttl_secs must be positive".to_string(),
            ));
        }
        if self.presence.outbound_buffer == 0 {
            return Err(AppError::Config(
                "presence.outbound_buffer must be positive".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(AppError::Config(
                "rate_limit values must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
