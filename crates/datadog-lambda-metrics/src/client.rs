// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of metric batches to the Datadog API.

use crate::api_key::ApiKeyFactory;
use crate::constants::{
    API_KEY_HEADER, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_INITIAL_DELAY_MS,
    DEFAULT_RETRY_MAX_DELAY_MS, DISTRIBUTION_POINTS_ENDPOINT,
};
use crate::errors::MetricsError;
use crate::metric::{DistributionPayload, MetricPoint};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How many times a submission is attempted and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Attempts, no delay.
    Immediate(u64),
    /// Attempts, delay in ms multiplied by the attempt number.
    LinearBackoff(u64, u64),
    /// Delay doubles after every attempt, capped at `max_delay_ms`.
    ExponentialBackoff {
        attempts: u64,
        initial_delay_ms: u64,
        max_delay_ms: u64,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryStrategy {
    pub fn max_attempts(&self) -> u64 {
        let attempts = match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                *attempts
            }
            RetryStrategy::ExponentialBackoff { attempts, .. } => *attempts,
        };
        attempts.max(1)
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u64) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Duration::from_millis(delay_ms.saturating_mul(attempt))
            }
            RetryStrategy::ExponentialBackoff {
                initial_delay_ms,
                max_delay_ms,
                ..
            } => {
                let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                let factor = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
                Duration::from_millis(initial_delay_ms.saturating_mul(factor).min(*max_delay_ms))
            }
        }
    }
}

/// Something that can take a batch of points off the processor's hands.
#[async_trait]
pub trait MetricsShipper: Send + Sync {
    /// Ships `points`, applying the retry policy when `retry` is set.
    async fn ship(&self, points: &[MetricPoint], retry: bool) -> Result<(), MetricsError>;
}

pub struct ApiClientConfig {
    /// e.g. `https://api.datadoghq.com/api/v1`
    pub base_url: String,
    pub api_key_factory: Arc<ApiKeyFactory>,
    pub https_proxy: Option<String>,
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
}

/// HTTP client for the distribution points endpoint.
///
/// Cloning is cheap. Each invocation gets its own copy bound to that invocation's
/// cancellation token, while the API key cache is shared by all copies.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key_factory: Arc<ApiKeyFactory>,
    retry_strategy: RetryStrategy,
    cancel: CancellationToken,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self, MetricsError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(https_proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(https_proxy)
                .map_err(|e| MetricsError::InvalidConfig(format!("invalid HTTPS proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| MetricsError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/{}",
                config.base_url.trim_end_matches('/'),
                DISTRIBUTION_POINTS_ENDPOINT
            ),
            api_key_factory: config.api_key_factory,
            retry_strategy: config.retry_strategy,
            cancel: CancellationToken::new(),
        })
    }

    /// Returns a copy whose requests abort when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_key_factory(&self) -> &Arc<ApiKeyFactory> {
        &self.api_key_factory
    }

    /// Single attempt.
    pub async fn send(&self, points: &[MetricPoint]) -> Result<(), MetricsError> {
        self.send_attempts(points, 1).await
    }

    /// Attempts up to the retry strategy's bound, backing off in between.
    pub async fn send_with_retry(&self, points: &[MetricPoint]) -> Result<(), MetricsError> {
        self.send_attempts(points, self.retry_strategy.max_attempts())
            .await
    }

    async fn send_attempts(
        &self,
        points: &[MetricPoint],
        max_attempts: u64,
    ) -> Result<(), MetricsError> {
        if points.is_empty() {
            return Ok(());
        }
        // Serialized once so that every attempt carries the same bytes.
        let body = DistributionPayload::from_points(points)?.to_json()?;
        let api_key = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(MetricsError::DeliveryCancelled),
            api_key = self.api_key_factory.get_api_key() => api_key?,
        };

        let start = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self.attempt(&body, api_key).await;
            match result {
                Ok(()) => {
                    debug!(
                        "Shipped {} metric points in {} ms after {attempts} attempt(s)",
                        points.len(),
                        start.elapsed().as_millis()
                    );
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempts >= max_attempts => {
                    if max_attempts > 1 {
                        error!("Failed to send metrics after {attempts} attempts: {e}");
                    }
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry_strategy.backoff(attempts);
                    warn!(
                        "Attempt {attempts} to send metrics failed, retrying in {} ms: {e}",
                        delay.as_millis()
                    );
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(MetricsError::DeliveryCancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(&self, body: &[u8], api_key: &str) -> Result<(), MetricsError> {
        let request = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());

        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| MetricsError::DeliveryNetworkFailure(e.to_string()))?;
            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            Err(MetricsError::DeliveryRejected {
                status: status.as_u16(),
                body,
            })
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(MetricsError::DeliveryCancelled),
            result = exchange => result,
        }
    }
}

#[async_trait]
impl MetricsShipper for ApiClient {
    async fn ship(&self, points: &[MetricPoint], retry: bool) -> Result<(), MetricsError> {
        if retry {
            self.send_with_retry(points).await
        } else {
            self.send(points).await
        }
    }
}
