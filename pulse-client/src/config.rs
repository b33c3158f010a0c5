//! Configuration for the diagnostic server client.

use std::time::Duration;

use thiserror::Error;

/// Default server base URL.
const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Default path of the synchronous query endpoint.
const DEFAULT_QUERY_PATH: &str = "/query";

/// Default path of the streaming explanation endpoint.
const DEFAULT_STREAM_PATH: &str = "/fullQuery";

/// Default TCP connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from loading configuration.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Connection settings for [`DiagnosisClient`](crate::DiagnosisClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server base URL, without a trailing slash.
    pub base_url: String,
    /// Path of the synchronous endpoint.
    pub query_path: String,
    /// Path of the streaming endpoint.
    pub stream_path: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Overall request timeout.
    ///
    /// `None` by default: explanation streams stay open for as long as the
    /// model keeps producing records.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            query_path: DEFAULT_QUERY_PATH.into(),
            stream_path: DEFAULT_STREAM_PATH.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `PULSE_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `PULSE_BASE_URL` | `base_url` |
    /// | `PULSE_QUERY_PATH` | `query_path` |
    /// | `PULSE_STREAM_PATH` | `stream_path` |
    /// | `PULSE_CONNECT_TIMEOUT_SECS` | `connect_timeout` |
    /// | `PULSE_REQUEST_TIMEOUT_SECS` | `request_timeout` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("PULSE_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(path) = lookup("PULSE_QUERY_PATH") {
            config.query_path = path;
        }
        if let Some(path) = lookup("PULSE_STREAM_PATH") {
            config.stream_path = path;
        }
        if let Some(secs) = lookup("PULSE_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = parse_secs("PULSE_CONNECT_TIMEOUT_SECS", secs)?;
        }
        if let Some(secs) = lookup("PULSE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Some(parse_secs("PULSE_REQUEST_TIMEOUT_SECS", secs)?);
        }

        Ok(config)
    }

    /// Full URL of the synchronous endpoint.
    #[must_use]
    pub fn query_url(&self) -> String {
        format!("{}{}", self.base_url, self.query_path)
    }

    /// Full URL of the streaming endpoint.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, self.stream_path)
    }
}

fn parse_secs(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => Err(ConfigError::InvalidValue { var, value }),
    }
}
