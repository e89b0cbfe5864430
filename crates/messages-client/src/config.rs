use std::time::Duration;

use messages_core::ClientError;
use messages_core::sse::DEFAULT_MAX_LINE_LEN;
use messages_core::executor::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT, ExecutorConfig};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";

/// Configuration for [`crate::Client`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Sent as `x-api-key`.
    pub api_key: String,
    /// Scheme and host of the API. Useful for proxies or local test servers.
    pub base_url: String,
    /// Default per-attempt deadline.
    pub timeout: Duration,
    /// Default retries after the first attempt.
    pub max_retries: u32,
    /// Sent as `anthropic-version`.
    pub api_version: String,
    /// Appends the serialized request to `invalid_request_error` messages.
    pub include_request_json_on_invalid_request: bool,
    /// Longest SSE line accepted from a streaming body.
    pub max_line_len: usize,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            api_version: DEFAULT_API_VERSION.to_string(),
            include_request_json_on_invalid_request: false,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    /// Builds a config from `ANTHROPIC_API_KEY`, honoring `ANTHROPIC_BASE_URL`
    /// when set.
    pub fn from_env() -> Result<Self, ClientError> {
        let api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(ClientError::Config(format!(
                "missing {API_KEY_ENV} for messages client"
            )));
        }
        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var(BASE_URL_ENV)
            && !base_url.trim().is_empty()
        {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn include_request_json_on_invalid_request(mut self, include: bool) -> Self {
        self.include_request_json_on_invalid_request = include;
        self
    }

    pub fn max_line_len(mut self, max_line_len: usize) -> Self {
        self.max_line_len = max_line_len;
        self
    }

    pub(crate) fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            timeout: self.timeout,
            max_retries: self.max_retries,
        }
    }
}
