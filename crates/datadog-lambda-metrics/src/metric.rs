// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::DISTRIBUTION_METRIC_TYPE;
use crate::errors::MetricsError;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single value emitted by application code.
///
/// Points are immutable; the processor buffers them as-is and ships each one
/// exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    name: String,
    value: f64,
    timestamp: SystemTime,
    tags: Vec<String>,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: f64, timestamp: SystemTime, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
            tags,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Checks the point can be represented on the wire.
    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.name.trim().is_empty() {
            return Err(MetricsError::MalformedPoint(
                "metric name is empty".to_string(),
            ));
        }
        if !self.value.is_finite() {
            return Err(MetricsError::MalformedPoint(format!(
                "value of '{}' is not finite: {}",
                self.name, self.value
            )));
        }
        self.unix_seconds()?;
        Ok(())
    }

    fn unix_seconds(&self) -> Result<i64, MetricsError> {
        let since_epoch = self.timestamp.duration_since(UNIX_EPOCH).map_err(|_| {
            MetricsError::MalformedPoint(format!(
                "timestamp of '{}' precedes the Unix epoch",
                self.name
            ))
        })?;
        i64::try_from(since_epoch.as_secs()).map_err(|_| {
            MetricsError::MalformedPoint(format!("timestamp of '{}' is out of range", self.name))
        })
    }
}

/// Body of a `distribution_points` submission.
///
/// Each point becomes its own series entry so the payload keeps insertion order.
#[derive(Debug, Serialize)]
pub struct DistributionPayload<'a> {
    series: Vec<DistributionSeries<'a>>,
}

#[derive(Debug, Serialize)]
struct DistributionSeries<'a> {
    metric: &'a str,
    tags: &'a [String],
    #[serde(rename = "type")]
    metric_type: &'static str,
    points: [(i64, [f64; 1]); 1],
}

impl<'a> DistributionPayload<'a> {
    pub fn from_points(points: &'a [MetricPoint]) -> Result<Self, MetricsError> {
        let series = points
            .iter()
            .map(|point| {
                let timestamp = point
                    .unix_seconds()
                    .map_err(|e| MetricsError::SerializationFailed(e.to_string()))?;
                Ok(DistributionSeries {
                    metric: point.name(),
                    tags: point.tags(),
                    metric_type: DISTRIBUTION_METRIC_TYPE,
                    points: [(timestamp, [point.value()])],
                })
            })
            .collect::<Result<Vec<_>, MetricsError>>()?;
        Ok(Self { series })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, MetricsError> {
        serde_json::to_vec(self).map_err(|e| MetricsError::SerializationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let point = MetricPoint::new("  ", 1.0, at(10), vec![]);
        assert!(matches!(
            point.validate(),
            Err(MetricsError::MalformedPoint(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_finite_value() {
        let point = MetricPoint::new("latency", f64::NAN, at(10), vec![]);
        assert!(point.validate().is_err());
        let point = MetricPoint::new("latency", f64::INFINITY, at(10), vec![]);
        assert!(point.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_pre_epoch_timestamp() {
        let point = MetricPoint::new("latency", 1.0, UNIX_EPOCH - Duration::from_secs(1), vec![]);
        assert!(point.validate().is_err());
    }

    #[test]
    fn test_payload_shape() {
        let points = vec![
            MetricPoint::new("orders", 2.0, at(1_700_000_000), vec!["env:prod".into()]),
            MetricPoint::new("latency", 12.5, at(1_700_000_001), vec![]),
        ];
        let payload = DistributionPayload::from_points(&points).expect("payload");

        let json: serde_json::Value =
            serde_json::from_slice(&payload.to_json().expect("json")).expect("valid json");
        assert_eq!(
            json,
            serde_json::json!({
                "series": [
                    {
                        "metric": "orders",
                        "tags": ["env:prod"],
                        "type": "distribution",
                        "points": [[1_700_000_000, [2.0]]]
                    },
                    {
                        "metric": "latency",
                        "tags": [],
                        "type": "distribution",
                        "points": [[1_700_000_001, [12.5]]]
                    }
                ]
            })
        );
    }

    #[test]
    fn test_payload_is_stable() {
        let points = vec![MetricPoint::new("orders", 1.0, at(5), vec!["a:b".into()])];
        let payload = DistributionPayload::from_points(&points).expect("payload");
        assert_eq!(payload.to_json().unwrap(), payload.to_json().unwrap());
    }
}
