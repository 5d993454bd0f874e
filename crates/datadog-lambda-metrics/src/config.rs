// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::client::RetryStrategy;
use crate::constants::{
    API_KEY_ENV_VAR, BATCH_INTERVAL_ENV_VAR, DD_URL_ENV_VAR, DEFAULT_BATCH_INTERVAL,
    DEFAULT_FLUSH_TIMEOUT, DEFAULT_SITE, FLUSH_TIMEOUT_ENV_VAR, KMS_API_KEY_ENV_VAR,
    LOG_LEVEL_ENV_VAR, RETRY_ON_FAILURE_ENV_VAR, SITE_ENV_VAR,
};
use crate::errors::MetricsError;
use crate::processor::ProcessorConfig;
use std::env;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Configuration for metrics delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Plaintext Datadog API key, preferred over `kms_api_key`
    pub api_key: Option<String>,
    /// Base64 KMS ciphertext of the API key
    pub kms_api_key: Option<String>,
    /// Datadog site (e.g., datadoghq.com, datadoghq.eu)
    pub site: String,
    /// Replaces `https://api.<site>/api/v1` when set
    pub api_url_override: Option<String>,
    pub should_retry_on_failure: bool,
    pub batch_interval: Duration,
    pub retry_strategy: RetryStrategy,
    /// Per attempt HTTP timeout
    pub timeout: Duration,
    pub https_proxy: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            kms_api_key: None,
            site: DEFAULT_SITE.to_string(),
            api_url_override: None,
            should_retry_on_failure: false,
            batch_interval: DEFAULT_BATCH_INTERVAL,
            retry_strategy: RetryStrategy::default(),
            timeout: DEFAULT_FLUSH_TIMEOUT,
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, MetricsError> {
        let non_empty = |name: &str| env::var(name).ok().filter(|val| !val.trim().is_empty());
        let seconds = |name: &str| {
            non_empty(name)
                .and_then(|val| val.trim().parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        };

        let config = Self {
            api_key: non_empty(API_KEY_ENV_VAR),
            kms_api_key: non_empty(KMS_API_KEY_ENV_VAR),
            site: non_empty(SITE_ENV_VAR).unwrap_or_else(|| DEFAULT_SITE.to_string()),
            api_url_override: non_empty(DD_URL_ENV_VAR),
            should_retry_on_failure: non_empty(RETRY_ON_FAILURE_ENV_VAR)
                .map(|val| matches!(val.to_lowercase().as_str(), "true" | "1"))
                .unwrap_or(false),
            batch_interval: seconds(BATCH_INTERVAL_ENV_VAR).unwrap_or(DEFAULT_BATCH_INTERVAL),
            retry_strategy: RetryStrategy::default(),
            timeout: seconds(FLUSH_TIMEOUT_ENV_VAR).unwrap_or(DEFAULT_FLUSH_TIMEOUT),
            https_proxy: non_empty("DD_PROXY_HTTPS").or_else(|| non_empty("HTTPS_PROXY")),
            log_level: non_empty(LOG_LEVEL_ENV_VAR)
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.site.trim().is_empty() {
            return Err(MetricsError::InvalidConfig(
                "DD_SITE cannot be empty".to_string(),
            ));
        }

        if self.timeout.is_zero() {
            return Err(MetricsError::InvalidConfig(
                "flush timeout must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(MetricsError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error, off",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn base_url(&self) -> String {
        match &self.api_url_override {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://api.{}/api/v1", self.site.trim()),
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig::new(self.batch_interval, self.should_retry_on_failure)
    }
}
