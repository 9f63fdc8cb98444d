//! Configuration loading for the creditsync service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `CREDITSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "CREDITSYNC_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `CREDITSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_stripe_secret: Option<String>,
    #[serde(default = "default_webhook_stripe_tolerance_seconds")]
    pub webhook_stripe_tolerance_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_square_signature_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_square_notification_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_backend_secret: Option<String>,
    #[serde(default = "default_webhook_max_body_kb")]
    pub webhook_max_body_kb: usize,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub sse: SseConfig,
}

/// Retention and credit conversion settings for the reconciliation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BillingConfig {
    /// Lifetime of an idempotency record before it is purged (default: 24)
    ///
    /// Environment variable: `CREDITSYNC_IDEMPOTENCY_TTL_HOURS`
    #[serde(default = "default_idempotency_ttl_hours")]
    pub idempotency_ttl_hours: u64,

    /// How long processed webhook events are kept for inspection (default: 30)
    ///
    /// Environment variable: `CREDITSYNC_WEBHOOK_EVENT_RETENTION_DAYS`
    #[serde(default = "default_webhook_event_retention_days")]
    pub webhook_event_retention_days: u64,

    /// Credits granted per whole currency unit of a completed Square payment (default: 100)
    ///
    /// Environment variable: `CREDITSYNC_SQUARE_CREDITS_PER_DOLLAR`
    #[serde(default = "default_square_credits_per_dollar")]
    pub square_credits_per_dollar: i64,

    /// Interval between expired-record purges (default: 300)
    ///
    /// Environment variable: `CREDITSYNC_MAINTENANCE_INTERVAL_SECONDS`
    #[serde(default = "default_maintenance_interval_seconds")]
    pub maintenance_interval_seconds: u64,
}

/// Server-sent event fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SseConfig {
    /// Environment variable: `CREDITSYNC_SSE_HEARTBEAT_INTERVAL_SECONDS`
    #[serde(default = "default_sse_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    /// Connections without a heartbeat for longer than this are evicted.
    ///
    /// Environment variable: `CREDITSYNC_SSE_STALE_AFTER_SECONDS`
    #[serde(default = "default_sse_stale_after_seconds")]
    pub stale_after_seconds: u64,

    /// Absolute lifetime of a stream; clients are expected to reconnect.
    ///
    /// Environment variable: `CREDITSYNC_SSE_MAX_CONNECTION_AGE_SECONDS`
    #[serde(default = "default_sse_max_connection_age_seconds")]
    pub max_connection_age_seconds: u64,

    /// Environment variable: `CREDITSYNC_SSE_CONNECT_RATE_LIMIT_PER_MINUTE`
    #[serde(default = "default_sse_connect_rate_limit_per_minute")]
    pub connect_rate_limit_per_minute: u32,

    /// Environment variable: `CREDITSYNC_SSE_CHANNEL_CAPACITY`
    #[serde(default = "default_sse_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            webhook_stripe_secret: None,
            webhook_stripe_tolerance_seconds: default_webhook_stripe_tolerance_seconds(),
            webhook_square_signature_key: None,
            webhook_square_notification_url: None,
            webhook_backend_secret: None,
            webhook_max_body_kb: default_webhook_max_body_kb(),
            billing: BillingConfig::default(),
            sse: SseConfig::default(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_hours: default_idempotency_ttl_hours(),
            webhook_event_retention_days: default_webhook_event_retention_days(),
            square_credits_per_dollar: default_square_credits_per_dollar(),
            maintenance_interval_seconds: default_maintenance_interval_seconds(),
        }
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_sse_heartbeat_interval_seconds(),
            stale_after_seconds: default_sse_stale_after_seconds(),
            max_connection_age_seconds: default_sse_max_connection_age_seconds(),
            connect_rate_limit_per_minute: default_sse_connect_rate_limit_per_minute(),
            channel_capacity: default_sse_channel_capacity(),
        }
    }
}

impl BillingConfig {
    /// Validate retention and conversion bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idempotency_ttl_hours == 0 || self.idempotency_ttl_hours > 24 * 30 {
            return Err(ConfigError::InvalidIdempotencyTtl {
                value: self.idempotency_ttl_hours,
            });
        }

        if self.webhook_event_retention_days == 0 || self.webhook_event_retention_days > 365 {
            return Err(ConfigError::InvalidWebhookEventRetention {
                value: self.webhook_event_retention_days,
            });
        }

        if self.square_credits_per_dollar <= 0 {
            return Err(ConfigError::InvalidSquareCreditsPerDollar {
                value: self.square_credits_per_dollar,
            });
        }

        if self.maintenance_interval_seconds < 10 {
            return Err(ConfigError::InvalidMaintenanceInterval {
                value: self.maintenance_interval_seconds,
            });
        }

        Ok(())
    }
}

impl SseConfig {
    /// Validate heartbeat and eviction timings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_seconds == 0
            || self.heartbeat_interval_seconds >= self.stale_after_seconds
        {
            return Err(ConfigError::InvalidSseHeartbeat {
                heartbeat: self.heartbeat_interval_seconds,
                stale_after: self.stale_after_seconds,
            });
        }

        if self.max_connection_age_seconds < self.heartbeat_interval_seconds {
            return Err(ConfigError::InvalidSseMaxAge {
                value: self.max_connection_age_seconds,
            });
        }

        if self.connect_rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidSseRateLimit);
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidSseChannelCapacity);
        }

        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Whether the profile relaxes production-only requirements.
    pub fn is_development(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Maximum accepted webhook body in bytes.
    pub fn webhook_max_body_bytes(&self) -> usize {
        self.webhook_max_body_kb * 1024
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec![REDACTED.to_string()];
        }
        for secret in [
            &mut config.webhook_stripe_secret,
            &mut config.webhook_square_signature_key,
            &mut config.webhook_backend_secret,
        ] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_string());
            }
        }
        if let Some(url) = config.database_url.split_once('@').map(|(_, host)| host) {
            config.database_url = format!("{REDACTED}@{url}");
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_development() && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if !self.is_development()
            && self.webhook_stripe_secret.is_none()
            && self.webhook_square_signature_key.is_none()
            && self.webhook_backend_secret.is_none()
        {
            return Err(ConfigError::NoWebhookSecrets);
        }

        if self.webhook_square_signature_key.is_some() {
            let Some(raw) = self.webhook_square_notification_url.as_deref() else {
                return Err(ConfigError::MissingSquareNotificationUrl);
            };
            Url::parse(raw).map_err(|source| ConfigError::InvalidSquareNotificationUrl {
                value: raw.to_string(),
                source,
            })?;
        }

        if self.webhook_stripe_tolerance_seconds == 0 {
            return Err(ConfigError::InvalidStripeTolerance {
                value: self.webhook_stripe_tolerance_seconds,
            });
        }

        if self.webhook_max_body_kb == 0 {
            return Err(ConfigError::InvalidWebhookMaxBody);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        self.billing.validate()?;
        self.sse.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/creditsync".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_webhook_stripe_tolerance_seconds() -> u64 {
    300 // 5 minutes
}

fn default_webhook_max_body_kb() -> usize {
    256
}

fn default_idempotency_ttl_hours() -> u64 {
    24
}

fn default_webhook_event_retention_days() -> u64 {
    30
}

fn default_square_credits_per_dollar() -> i64 {
    100
}

fn default_maintenance_interval_seconds() -> u64 {
    300 // 5 minutes
}

fn default_sse_heartbeat_interval_seconds() -> u64 {
    30
}

fn default_sse_stale_after_seconds() -> u64 {
    120 // 2 minutes
}

fn default_sse_max_connection_age_seconds() -> u64 {
    300 // 5 minutes
}

fn default_sse_connect_rate_limit_per_minute() -> u32 {
    10
}

fn default_sse_channel_capacity() -> usize {
    32
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error(
        "no operator tokens configured; set CREDITSYNC_OPERATOR_TOKEN or CREDITSYNC_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("no webhook secrets configured; at least one provider must be verifiable")]
    NoWebhookSecrets,
    #[error("Square signature key requires CREDITSYNC_WEBHOOK_SQUARE_NOTIFICATION_URL")]
    MissingSquareNotificationUrl,
    #[error("invalid Square notification url '{value}': {source}")]
    InvalidSquareNotificationUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("Stripe signature tolerance must be positive, got {value}")]
    InvalidStripeTolerance { value: u64 },
    #[error("webhook max body size must be positive")]
    InvalidWebhookMaxBody,
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("idempotency TTL must be between 1 and 720 hours, got {value}")]
    InvalidIdempotencyTtl { value: u64 },
    #[error("webhook event retention must be between 1 and 365 days, got {value}")]
    InvalidWebhookEventRetention { value: u64 },
    #[error("Square credits per dollar must be positive, got {value}")]
    InvalidSquareCreditsPerDollar { value: i64 },
    #[error("maintenance interval must be at least 10 seconds, got {value}")]
    InvalidMaintenanceInterval { value: u64 },
    #[error(
        "SSE heartbeat interval ({heartbeat}s) must be positive and shorter than the stale window ({stale_after}s)"
    )]
    InvalidSseHeartbeat { heartbeat: u64, stale_after: u64 },
    #[error("SSE max connection age must be at least one heartbeat interval, got {value}")]
    InvalidSseMaxAge { value: u64 },
    #[error("SSE connect rate limit must be positive")]
    InvalidSseRateLimit,
    #[error("SSE channel capacity must be positive")]
    InvalidSseChannelCapacity,
}

/// Loads configuration using layered `.env` files and `CREDITSYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration, letting process environment override env files.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = parse_or(&mut layered, "DB_MAX_CONNECTIONS", default_db_max_connections);
        let db_acquire_timeout_ms =
            parse_or(&mut layered, "DB_ACQUIRE_TIMEOUT_MS", default_db_acquire_timeout_ms);

        // Support both single token and comma-separated list
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = layered.remove("OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let webhook_stripe_secret = take_secret(&mut layered, "WEBHOOK_STRIPE_SECRET");
        let webhook_square_signature_key = take_secret(&mut layered, "WEBHOOK_SQUARE_SIGNATURE_KEY");
        let webhook_square_notification_url =
            take_secret(&mut layered, "WEBHOOK_SQUARE_NOTIFICATION_URL");
        let webhook_backend_secret = take_secret(&mut layered, "WEBHOOK_BACKEND_SECRET");
        let webhook_stripe_tolerance_seconds = parse_or(
            &mut layered,
            "WEBHOOK_STRIPE_TOLERANCE_SECONDS",
            default_webhook_stripe_tolerance_seconds,
        );
        let webhook_max_body_kb =
            parse_or(&mut layered, "WEBHOOK_MAX_BODY_KB", default_webhook_max_body_kb);

        let billing = BillingConfig {
            idempotency_ttl_hours: parse_or(
                &mut layered,
                "IDEMPOTENCY_TTL_HOURS",
                default_idempotency_ttl_hours,
            ),
            webhook_event_retention_days: parse_or(
                &mut layered,
                "WEBHOOK_EVENT_RETENTION_DAYS",
                default_webhook_event_retention_days,
            ),
            square_credits_per_dollar: parse_or(
                &mut layered,
                "SQUARE_CREDITS_PER_DOLLAR",
                default_square_credits_per_dollar,
            ),
            maintenance_interval_seconds: parse_or(
                &mut layered,
                "MAINTENANCE_INTERVAL_SECONDS",
                default_maintenance_interval_seconds,
            ),
        };

        let sse = SseConfig {
            heartbeat_interval_seconds: parse_or(
                &mut layered,
                "SSE_HEARTBEAT_INTERVAL_SECONDS",
                default_sse_heartbeat_interval_seconds,
            ),
            stale_after_seconds: parse_or(
                &mut layered,
                "SSE_STALE_AFTER_SECONDS",
                default_sse_stale_after_seconds,
            ),
            max_connection_age_seconds: parse_or(
                &mut layered,
                "SSE_MAX_CONNECTION_AGE_SECONDS",
                default_sse_max_connection_age_seconds,
            ),
            connect_rate_limit_per_minute: parse_or(
                &mut layered,
                "SSE_CONNECT_RATE_LIMIT_PER_MINUTE",
                default_sse_connect_rate_limit_per_minute,
            ),
            channel_capacity: parse_or(
                &mut layered,
                "SSE_CHANNEL_CAPACITY",
                default_sse_channel_capacity,
            ),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            webhook_stripe_secret,
            webhook_stripe_tolerance_seconds,
            webhook_square_signature_key,
            webhook_square_notification_url,
            webhook_backend_secret,
            webhook_max_body_kb,
            billing,
            sse,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_or<T, F>(layered: &mut BTreeMap<String, String>, key: &str, default: F) -> T
where
    T: std::str::FromStr,
    F: FnOnce() -> T,
{
    layered
        .remove(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(default)
}

fn take_secret(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered.remove(key).and_then(|val| {
        let trimmed = val.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_for_local_profile() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.bind_addr().is_ok());
    }

    #[test]
    fn production_profile_requires_operator_tokens_and_secrets() {
        let mut config = AppConfig {
            profile: "production".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingOperatorTokens)
        ));

        config.operator_tokens = vec!["op".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::NoWebhookSecrets)));

        config.webhook_stripe_secret = Some("whsec_test".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn square_key_requires_a_parseable_notification_url() {
        let mut config = AppConfig {
            webhook_square_signature_key: Some("sq-key".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSquareNotificationUrl)
        ));

        config.webhook_square_notification_url = Some("not a url".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSquareNotificationUrl { .. })
        ));

        config.webhook_square_notification_url =
            Some("https://billing.example.com/webhooks/square".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sse_heartbeat_must_be_shorter_than_stale_window() {
        let sse = SseConfig {
            heartbeat_interval_seconds: 120,
            stale_after_seconds: 120,
            ..Default::default()
        };
        assert!(matches!(
            sse.validate(),
            Err(ConfigError::InvalidSseHeartbeat { .. })
        ));
        assert!(SseConfig::default().validate().is_ok());
    }

    #[test]
    fn billing_bounds_are_enforced() {
        let billing = BillingConfig {
            square_credits_per_dollar: 0,
            ..Default::default()
        };
        assert!(billing.validate().is_err());

        let billing = BillingConfig {
            idempotency_ttl_hours: 0,
            ..Default::default()
        };
        assert!(billing.validate().is_err());
    }

    #[test]
    fn redacted_json_hides_secrets() {
        let config = AppConfig {
            operator_tokens: vec!["super-secret-token".to_string()],
            webhook_stripe_secret: Some("whsec_live".to_string()),
            webhook_backend_secret: Some("backend-secret".to_string()),
            database_url: "postgresql://user:pass@db:5432/creditsync".to_string(),
            ..Default::default()
        };

        let json = config.redacted_json().unwrap();
        assert!(!json.contains("super-secret-token"));
        assert!(!json.contains("whsec_live"));
        assert!(!json.contains("backend-secret"));
        assert!(!json.contains("user:pass"));
        assert!(json.contains("db:5432/creditsync"));
    }
}
