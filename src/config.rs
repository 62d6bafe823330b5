//! Chat client configuration parsed from environment variables.

use std::time::Duration;

use crate::session::draft::DEFAULT_DRAFT_LIMIT;
use crate::session::policy::{Backoff, DEFAULT_RECONNECT_DELAY, ReconnectPolicy};

pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REFRESH_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid { var: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for RefreshTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REFRESH_TIMEOUT_SECS, connect_secs: DEFAULT_REFRESH_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// REST base, e.g. `https://league.example/api`. No trailing slash.
    pub api_url: String,
    /// WebSocket base, e.g. `wss://league.example/ws/chat`. No trailing slash.
    pub ws_url: String,
    pub reconnect: ReconnectPolicy,
    pub draft_limit: usize,
    pub refresh_timeouts: RefreshTimeouts,
}

impl ChatConfig {
    /// Build typed chat config from environment variables.
    ///
    /// Required:
    /// - `CHAT_API_URL`
    /// - `CHAT_WS_URL`
    ///
    /// Optional:
    /// - `CHAT_RECONNECT_DELAY_MS`: default 5000
    /// - `CHAT_RECONNECT_MAX_ATTEMPTS`: unlimited when absent
    /// - `CHAT_RECONNECT_BACKOFF`: `fixed` (default) or `exponential`
    /// - `CHAT_RECONNECT_MAX_DELAY_MS`: exponential cap, default 60000
    /// - `CHAT_DRAFT_LIMIT`: default 100
    /// - `CHAT_REFRESH_TIMEOUT_SECS`: default 10
    /// - `CHAT_CONNECT_TIMEOUT_SECS`: default 5
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required var is missing or a value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ChatConfig::from_env`] but reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required var is missing or a value does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = required_url(&lookup, "CHAT_API_URL")?;
        let ws_url = required_url(&lookup, "CHAT_WS_URL")?;

        let base_delay_ms = parse_or(&lookup, "CHAT_RECONNECT_DELAY_MS", duration_ms(DEFAULT_RECONNECT_DELAY))?;
        let max_attempts = parse_opt::<u32, _>(&lookup, "CHAT_RECONNECT_MAX_ATTEMPTS")?;
        let max_delay_ms = parse_or(&lookup, "CHAT_RECONNECT_MAX_DELAY_MS", DEFAULT_MAX_RECONNECT_DELAY_MS)?;
        let backoff = parse_backoff(
            lookup("CHAT_RECONNECT_BACKOFF").as_deref(),
            Duration::from_millis(max_delay_ms),
        )?;

        let draft_limit = parse_or(&lookup, "CHAT_DRAFT_LIMIT", DEFAULT_DRAFT_LIMIT)?;
        let refresh_timeouts = RefreshTimeouts {
            request_secs: parse_or(&lookup, "CHAT_REFRESH_TIMEOUT_SECS", DEFAULT_REFRESH_TIMEOUT_SECS)?,
            connect_secs: parse_or(&lookup, "CHAT_CONNECT_TIMEOUT_SECS", DEFAULT_REFRESH_CONNECT_TIMEOUT_SECS)?,
        };

        Ok(Self {
            api_url,
            ws_url,
            reconnect: ReconnectPolicy { base_delay: Duration::from_millis(base_delay_ms), max_attempts, backoff },
            draft_limit,
            refresh_timeouts,
        })
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn required_url<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { var })?;
    Ok(raw.trim().trim_end_matches('/').to_owned())
}

fn parse_opt<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid { var, value, reason: e.to_string() }),
    }
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, var)?.unwrap_or(default))
}

fn parse_backoff(raw: Option<&str>, max_delay: Duration) -> Result<Backoff, ConfigError> {
    match raw.map(str::trim).unwrap_or("fixed") {
        "" | "fixed" => Ok(Backoff::Fixed),
        "exponential" => Ok(Backoff::Exponential { max_delay }),
        other => Err(ConfigError::Invalid {
            var: "CHAT_RECONNECT_BACKOFF",
            value: other.to_owned(),
            reason: "expected 'fixed' or 'exponential'".to_owned(),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
