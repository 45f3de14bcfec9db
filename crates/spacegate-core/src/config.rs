//! Configuration management for spacegate.
//!
//! All configuration is driven by environment variables. [`GatewayConfig::from_lookup`]
//! takes an arbitrary lookup function so the parsing rules can be exercised
//! without touching the process environment.

use std::fmt;

use tracing::warn;

use crate::error::{SpaceGateError, SpaceGateResult};
use crate::types::Environment;

/// Minimum length accepted for the service-to-service token.
const MIN_SERVICE_TOKEN_LEN: usize = 32;

/// Upper bound for the rate limit window and the sweep interval (one week).
const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Origins allowed when `ALLOWED_ORIGINS` is unset.
const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://localhost:5174",
    "http://localhost:3000",
    "https://telegram.org",
];

/// Global configuration for the gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Bind address.
    pub gateway_listen: String,
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Bot token: the HMAC shared secret and the membership API credential.
    pub bot_token: String,
    /// Static token for service-to-service endpoints.
    pub service_token: String,
    /// Group whose membership is required; `0` means not configured.
    pub required_group_id: i64,
    /// Deployment environment.
    pub environment: Environment,
    /// Origins allowed for CORS and referer checks.
    pub allowed_origins: Vec<String>,
    /// Freshness window for app-embedded credentials, in seconds.
    pub miniapp_max_age_secs: i64,
    /// Freshness window for widget-redirect credentials, in seconds.
    pub login_widget_max_age_secs: i64,
    /// Admitted requests per window and client.
    pub rate_limit_requests: usize,
    /// Rate limit window, in seconds.
    pub rate_limit_window_secs: u64,
    /// Whether to take the client address from forwarding headers.
    pub trust_forwarded_for: bool,
    /// Membership cache sweep interval, in seconds.
    pub membership_sweep_secs: u64,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("gateway_listen", &self.gateway_listen)
            .field("log_level", &self.log_level)
            .field("bot_token", &"<redacted>")
            .field("service_token", &"<redacted>")
            .field("required_group_id", &self.required_group_id)
            .field("environment", &self.environment)
            .field("allowed_origins", &self.allowed_origins)
            .field("miniapp_max_age_secs", &self.miniapp_max_age_secs)
            .field("login_widget_max_age_secs", &self.login_widget_max_age_secs)
            .field("rate_limit_requests", &self.rate_limit_requests)
            .field("rate_limit_window_secs", &self.rate_limit_window_secs)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("membership_sweep_secs", &self.membership_sweep_secs)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_listen: "0.0.0.0:8080".to_owned(),
            log_level: "info".to_owned(),
            bot_token: String::new(),
            service_token: String::new(),
            required_group_id: 0,
            environment: Environment::Development,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            miniapp_max_age_secs: 3600,
            login_widget_max_age_secs: 604_800,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            trust_forwarded_for: false,
            membership_sweep_secs: 12 * 60 * 60,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GATEWAY_LISTEN` | `0.0.0.0:8080` |
    /// | `LOG_LEVEL` | `info` |
    /// | `TELEGRAM_BOT_TOKEN` | *(required)* |
    /// | `BOT_API_TOKEN` | *(required, at least 32 chars)* |
    /// | `ALLOWED_CHAT_ID` | `0` |
    /// | `ENVIRONMENT` | `development` |
    /// | `ALLOWED_ORIGINS` | local dev origins + `https://telegram.org` |
    /// | `AUTH_DATE_TTL_MINIAPP` | `3600` |
    /// | `AUTH_DATE_TTL_LOGIN_WIDGET` | `604800` |
    /// | `RATE_LIMIT_REQUESTS` | `100` |
    /// | `RATE_LIMIT_WINDOW_SECS` | `60` |
    /// | `TRUST_FORWARDED_FOR` | `false` |
    /// | `MEMBERSHIP_CACHE_SWEEP_SECS` | `43200` |
    pub fn from_env() -> SpaceGateResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, then validate it.
    ///
    /// Empty values are treated as unset. Unparseable numeric values fall back
    /// to their defaults.
    pub fn from_lookup<F>(lookup: F) -> SpaceGateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(v) = get("GATEWAY_LISTEN") {
            config.gateway_listen = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            config.bot_token = v;
        }
        if let Some(v) = get("BOT_API_TOKEN") {
            config.service_token = v;
        }
        config.required_group_id =
            parse_or("ALLOWED_CHAT_ID", get("ALLOWED_CHAT_ID"), config.required_group_id);
        if let Some(v) = get("ENVIRONMENT") {
            config.environment = Environment::from_name(&v);
        }
        if let Some(v) = get("ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&v);
        }
        config.miniapp_max_age_secs = parse_or(
            "AUTH_DATE_TTL_MINIAPP",
            get("AUTH_DATE_TTL_MINIAPP"),
            config.miniapp_max_age_secs,
        );
        config.login_widget_max_age_secs = parse_or(
            "AUTH_DATE_TTL_LOGIN_WIDGET",
            get("AUTH_DATE_TTL_LOGIN_WIDGET"),
            config.login_widget_max_age_secs,
        );
        config.rate_limit_requests = parse_or(
            "RATE_LIMIT_REQUESTS",
            get("RATE_LIMIT_REQUESTS"),
            config.rate_limit_requests,
        );
        config.rate_limit_window_secs = parse_or(
            "RATE_LIMIT_WINDOW_SECS",
            get("RATE_LIMIT_WINDOW_SECS"),
            config.rate_limit_window_secs,
        );
        if let Some(v) = get("TRUST_FORWARDED_FOR") {
            config.trust_forwarded_for = parse_bool(&v);
        }
        config.membership_sweep_secs = parse_or(
            "MEMBERSHIP_CACHE_SWEEP_SECS",
            get("MEMBERSHIP_CACHE_SWEEP_SECS"),
            config.membership_sweep_secs,
        );

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the rest of the gateway relies on.
    pub fn validate(&self) -> SpaceGateResult<()> {
        if self.bot_token.is_empty() {
            return Err(SpaceGateError::Config(
                "TELEGRAM_BOT_TOKEN is required".to_owned(),
            ));
        }
        if self.service_token.is_empty() {
            return Err(SpaceGateError::Config(
                "BOT_API_TOKEN is required for service authentication".to_owned(),
            ));
        }
        if self.service_token.len() < MIN_SERVICE_TOKEN_LEN {
            return Err(SpaceGateError::Config(format!(
                "BOT_API_TOKEN must be at least {MIN_SERVICE_TOKEN_LEN} characters long"
            )));
        }
        if self.rate_limit_requests == 0 || self.rate_limit_window_secs == 0 {
            return Err(SpaceGateError::Config(
                "rate limit requests and window must be non-zero".to_owned(),
            ));
        }
        if self.rate_limit_window_secs > MAX_INTERVAL_SECS {
            return Err(SpaceGateError::Config(format!(
                "RATE_LIMIT_WINDOW_SECS must be at most {MAX_INTERVAL_SECS}"
            )));
        }
        if self.membership_sweep_secs == 0 {
            return Err(SpaceGateError::Config(
                "MEMBERSHIP_CACHE_SWEEP_SECS must be non-zero".to_owned(),
            ));
        }
        if self.membership_sweep_secs > MAX_INTERVAL_SECS {
            return Err(SpaceGateError::Config(format!(
                "MEMBERSHIP_CACHE_SWEEP_SECS must be at most {MAX_INTERVAL_SECS}"
            )));
        }
        Ok(())
    }
}

/// Parse `value`, keeping `default` when it is unset or unparseable.
fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> T {
    let Some(raw) = value else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        warn!(key, value = %raw, "unparseable configuration value, using default");
        default
    })
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Split a comma-separated origin list, trimming whitespace and dropping empties.
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
