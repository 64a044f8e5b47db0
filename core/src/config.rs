//! Client-level configuration and per-call overrides.
//!
//! `ApiConfig` is fixed once handed to an `ApiClient`. `RequestOptions`
//! overrides it for a single call; the two are merged into `Settings` by the
//! client, with per-call values taking precedence.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);

/// Header names are stored lowercased so overrides replace regardless of case.
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub headers: Headers,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new("")
    }
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Self {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            headers,
        }
    }

    /// Read the configuration from `API_BASE_URL`, `API_TIMEOUT_MS`,
    /// `API_RETRIES` and `API_RETRY_DELAY_MS`. Unset variables keep their
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::new(&lookup("API_BASE_URL").unwrap_or_default());
        if let Some(ms) = parse_number(&lookup, "API_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_number(&lookup, "API_RETRIES")? {
            config.retries = u32::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                name: "API_RETRIES",
                value: n.to_string(),
            })?;
        }
        if let Some(ms) = parse_number(&lookup, "API_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }
}

fn parse_number(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
    }
}

/// Per-call overrides. Unset fields fall back to the client's `ApiConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub headers: Headers,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub cache_key: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }
}

/// Effective settings for one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub headers: Headers,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub cache_key: Option<String>,
}

impl Settings {
    pub fn merge(config: &ApiConfig, options: RequestOptions) -> Self {
        let mut headers = config.headers.clone();
        headers.extend(options.headers);
        Self {
            headers,
            timeout: options.timeout.unwrap_or(config.timeout),
            retries: options.retries.unwrap_or(config.retries),
            retry_delay: config.retry_delay,
            cache_key: options.cache_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let config = ApiConfig::new("https://api.test/");
        assert_eq!(config.base_url, "https://api.test");
        assert_eq!(config.timeout, Duration::from_millis(10_000));
        assert_eq!(config.retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1_000));
        assert_eq!(config.headers.get("content-type").map(String::as_str), Some("application/json"));
    }

    #[test]
    fn call_options_override_without_mutating_config() {
        let config = ApiConfig::new("https://api.test")
            .header("Authorization", "Bearer a")
            .retries(1);
        let options = RequestOptions::new()
            .header("AUTHORIZATION", "Bearer b")
            .timeout(Duration::from_millis(50))
            .cache_key("users");

        let settings = Settings::merge(&config, options);
        assert_eq!(settings.headers["authorization"], "Bearer b");
        assert_eq!(settings.headers["content-type"], "application/json");
        assert_eq!(settings.timeout, Duration::from_millis(50));
        assert_eq!(settings.retries, 1);
        assert_eq!(settings.cache_key.as_deref(), Some("users"));
        assert_eq!(config.headers["authorization"], "Bearer a");
    }

    #[test]
    fn env_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("API_BASE_URL", "http://localhost:3000"),
            ("API_TIMEOUT_MS", "2500"),
            ("API_RETRIES", "0"),
        ]
        .into_iter()
        .collect();
        let config = ApiConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.retries, 0);
        assert_eq!(config.retry_delay, DEFAULT_RETRY_DELAY);
    }

    #[test]
    fn env_lookup_rejects_malformed_numbers() {
        let err = ApiConfig::from_lookup(|k| (k == "API_RETRIES").then(|| "three".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { name: "API_RETRIES", .. }));
    }
}
