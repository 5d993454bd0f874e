// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the metrics pipeline.
///
/// Every kind is distinct so retry and drop decisions can be made per kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricsError {
    #[error("Datadog API key isn't set, won't be able to send metrics")]
    ConfigurationMissing,

    #[error("Failed to decrypt KMS API key: {0}")]
    DecryptionFailed(String),

    #[error("Failed to serialize metrics payload: {0}")]
    SerializationFailed(String),

    #[error("Network failure while shipping metrics: {0}")]
    DeliveryNetworkFailure(String),

    #[error("Metrics intake rejected payload with status {status}: {body}")]
    DeliveryRejected { status: u16, body: String },

    #[error("Metrics delivery cancelled, invocation is ending")]
    DeliveryCancelled,

    #[error("Malformed metric point: {0}")]
    MalformedPoint(String),

    #[error("Processor is draining or stopped")]
    ProcessorStopped,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MetricsError {
    /// Only transport and intake failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MetricsError::DeliveryNetworkFailure(_) | MetricsError::DeliveryRejected { .. }
        )
    }
}
