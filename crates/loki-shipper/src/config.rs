// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::errors::ConfigError;
use crate::filter::LevelFilter;
use crate::labels::{is_valid_label_key, LabelSet};
use crate::record::Level;
use crate::template::{OutputTemplate, DEFAULT_OUTPUT_TEMPLATE};

pub const PUSH_PATH: &str = "/loki/api/v1/push";

const DEFAULT_URL: &str = "http://localhost:3100";

/// What `emit` does when the event buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, derive_more::Display)]
pub enum OverflowPolicy {
    /// Wait for space up to `block_timeout`, then fail with `Overflow`.
    #[display("block")]
    Block,
    /// Evict the oldest buffered record.
    #[default]
    #[display("drop_oldest")]
    DropOldest,
    /// Discard the incoming record.
    #[display("drop_newest")]
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "block" => Ok(OverflowPolicy::Block),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            other => Err(ConfigError::Invalid(format!(
                "unknown overflow policy {other:?}, expected block, drop_oldest or drop_newest"
            ))),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// Shipper configuration.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Base URL of the Loki server; the push path is appended when missing.
    pub endpoint_url: String,
    /// Labels attached to every stream.
    pub labels: LabelSet,
    pub credentials: Credentials,
    /// Sent as `X-Scope-OrgID` for multi-tenant deployments.
    pub tenant_id: Option<String>,
    pub output_template: String,
    pub max_batch_size: usize,
    pub max_batch_age: Duration,
    pub flush_interval: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub overflow_policy: OverflowPolicy,
    pub buffer_capacity: usize,
    /// Occupancy at which the dispatcher is woken early.
    pub high_water_mark: usize,
    pub block_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_backoff_base: Duration,
    pub max_backoff: Duration,
    pub drain_deadline: Duration,
    pub use_gzip: bool,
    pub minimum_level: Level,
    pub level_overrides: Vec<(String, Level)>,
    /// Record properties promoted to stream labels.
    pub properties_as_labels: Vec<String>,
    pub enrich_thread_id: bool,
    pub https_proxy: Option<String>,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_URL.to_string(),
            labels: LabelSet::new(),
            credentials: Credentials::None,
            tenant_id: None,
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            max_batch_size: 1000,
            max_batch_age: Duration::from_secs(2),
            flush_interval: Duration::from_secs(2),
            max_retries: 3,
            overflow_policy: OverflowPolicy::DropOldest,
            buffer_capacity: 100_000,
            high_water_mark: 75_000,
            block_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            retry_backoff_base: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            drain_deadline: Duration::from_secs(5),
            use_gzip: false,
            minimum_level: Level::Verbose,
            level_overrides: Vec::new(),
            properties_as_labels: Vec::new(),
            enrich_thread_id: true,
            https_proxy: None,
        }
    }
}

impl ShipperConfig {
    /// Create configuration from `LOKI_*` environment variables.
    ///
    /// Unset variables keep their default. Values that fail to parse are
    /// logged and replaced by the default; structurally invalid settings are
    /// then rejected by [`ShipperConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let endpoint_url = env::var("LOKI_URL").unwrap_or(defaults.endpoint_url);
        let labels = match env::var("LOKI_LABELS") {
            Ok(value) => LabelSet::parse(&value)?,
            Err(_) => defaults.labels,
        };

        let credentials = match (
            non_empty_var("LOKI_USERNAME"),
            non_empty_var("LOKI_BEARER_TOKEN"),
        ) {
            (Some(username), _) => Credentials::Basic {
                username,
                password: env::var("LOKI_PASSWORD").unwrap_or_default(),
            },
            (None, Some(token)) => Credentials::Bearer(token),
            (None, None) => Credentials::None,
        };

        let level_overrides = match env::var("LOKI_LEVEL_OVERRIDES") {
            Ok(value) => LevelFilter::default()
                .parse_overrides(&value)?
                .overrides()
                .map(|(prefix, level)| (prefix.to_string(), level))
                .collect(),
            Err(_) => defaults.level_overrides,
        };

        let properties_as_labels = env::var("LOKI_PROPERTIES_AS_LABELS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.properties_as_labels);

        let buffer_capacity = parse_env("LOKI_BUFFER_CAPACITY", defaults.buffer_capacity);
        // Keep the high-water mark proportional unless it is set explicitly.
        let high_water_mark = parse_env(
            "LOKI_HIGH_WATER_MARK",
            buffer_capacity.saturating_mul(3) / 4,
        );

        let config = Self {
            endpoint_url,
            labels,
            credentials,
            tenant_id: non_empty_var("LOKI_TENANT_ID"),
            output_template: env::var("LOKI_OUTPUT_TEMPLATE").unwrap_or(defaults.output_template),
            max_batch_size: parse_env("LOKI_BATCH_SIZE", defaults.max_batch_size),
            max_batch_age: parse_env_ms("LOKI_BATCH_AGE_MS", defaults.max_batch_age),
            flush_interval: parse_env_ms("LOKI_FLUSH_INTERVAL_MS", defaults.flush_interval),
            max_retries: parse_env("LOKI_MAX_RETRIES", defaults.max_retries),
            overflow_policy: parse_env("LOKI_OVERFLOW_POLICY", defaults.overflow_policy),
            buffer_capacity,
            high_water_mark,
            block_timeout: parse_env_ms("LOKI_BLOCK_TIMEOUT_MS", defaults.block_timeout),
            request_timeout: parse_env_ms("LOKI_TIMEOUT_MS", defaults.request_timeout),
            retry_backoff_base: parse_env_ms("LOKI_RETRY_BACKOFF_MS", defaults.retry_backoff_base),
            max_backoff: parse_env_ms("LOKI_MAX_BACKOFF_MS", defaults.max_backoff),
            drain_deadline: parse_env_ms("LOKI_DRAIN_DEADLINE_MS", defaults.drain_deadline),
            use_gzip: env::var("LOKI_USE_GZIP")
                .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(defaults.use_gzip),
            minimum_level: parse_env("LOKI_MIN_LEVEL", defaults.minimum_level),
            level_overrides,
            properties_as_labels,
            enrich_thread_id: env::var("LOKI_ENRICH_THREAD_ID")
                .map(|val| val.to_lowercase() != "false")
                .unwrap_or(defaults.enrich_thread_id),
            https_proxy: env::var("LOKI_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.endpoint_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Invalid("LOKI_URL cannot be empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "endpoint URL {url:?} must start with http:// or https://"
            )));
        }

        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "max_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffer_capacity must be greater than 0".to_string(),
            ));
        }
        if self.high_water_mark == 0 || self.high_water_mark > self.buffer_capacity {
            return Err(ConfigError::Invalid(format!(
                "high_water_mark must be between 1 and buffer_capacity ({}), got {}",
                self.buffer_capacity, self.high_water_mark
            )));
        }
        if self.max_batch_age.is_zero() || self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "max_batch_age and flush_interval must be greater than 0".to_string(),
            ));
        }

        if let Credentials::Basic { username, .. } = &self.credentials {
            if username.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "basic auth username cannot be empty".to_string(),
                ));
            }
        }

        if let Some(key) = self
            .properties_as_labels
            .iter()
            .find(|key| !is_valid_label_key(key))
        {
            return Err(ConfigError::Invalid(format!(
                "property {key:?} cannot be used as a label key"
            )));
        }

        OutputTemplate::parse(&self.output_template)?;
        Ok(())
    }

    /// Full push URL.
    ///
    /// ```
    /// use loki_shipper::ShipperConfig;
    ///
    /// let config = ShipperConfig {
    ///     endpoint_url: "http://loki:3100/".to_string(),
    ///     ..Default::default()
    /// };
    /// assert_eq!(config.push_url(), "http://loki:3100/loki/api/v1/push");
    /// ```
    pub fn push_url(&self) -> String {
        let base = self.endpoint_url.trim().trim_end_matches('/');
        if base.ends_with(PUSH_PATH) {
            base.to_string()
        } else {
            format!("{base}{PUSH_PATH}")
        }
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.level_overrides
            .iter()
            .fold(LevelFilter::new(self.minimum_level), |filter, (prefix, level)| {
                filter.with_override(prefix.clone(), *level)
            })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    match env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("LOKI | Invalid value {value:?} for {name}, using default");
            default
        }),
        Err(_) => default,
    }
}

fn parse_env_ms(name: &str, default: Duration) -> Duration {
    Duration::from_millis(parse_env(
        name,
        u64::try_from(default.as_millis()).unwrap_or(u64::MAX),
    ))
}
