use std::path::PathBuf;

use crate::core::error::{CoreError, CoreResult};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 60;

/// Runtime configuration, read once from the environment at boot.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token required on every API call.
    pub api_key: String,
    /// Exact-match CORS origin allowlist.
    pub allowed_origins: Vec<String>,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    /// Home of the sqlite database and key material.
    pub data_dir: PathBuf,
    /// HMAC secret for the Linear webhook. Ingest rejects everything when unset.
    pub linear_webhook_secret: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> CoreResult<Self> {
        let api_key = std::env::var("DASHBOARD_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CoreError::Validation("DASHBOARD_API_KEY must be set".into()))?;

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let rate_limit_window_ms = env_parse("RATE_LIMIT_WINDOW_MS", DEFAULT_RATE_LIMIT_WINDOW_MS)?;
        let rate_limit_max_requests =
            env_parse("RATE_LIMIT_MAX_REQUESTS", DEFAULT_RATE_LIMIT_MAX_REQUESTS)?;

        let data_dir = match std::env::var("DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => default_data_dir(),
        };

        let linear_webhook_secret = std::env::var("LINEAR_WEBHOOK_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let host = std::env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = env_parse("PORT", DEFAULT_PORT)?;

        Ok(Self {
            api_key,
            allowed_origins,
            rate_limit_window_ms,
            rate_limit_max_requests,
            data_dir,
            linear_webhook_secret,
            host,
            port,
        })
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".opencode-dashboard")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> CoreResult<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} is not a valid value: {raw}"))),
        _ => Ok(default),
    }
}
