// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::MetricsError;
use crate::metric::MetricPoint;
use crate::processor::Processor;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per invocation state handed from the lifecycle hooks to application code.
///
/// The start hook attaches the invocation's processor here; application code and the
/// end hook reach the same processor through it. The cancellation token fires when
/// the host gives up on the invocation and aborts in-flight metric submissions.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    request_id: String,
    cancel: CancellationToken,
    processor: Option<Processor>,
}

impl InvocationContext {
    pub fn new(request_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            request_id: request_id.into(),
            cancel,
            processor: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Attaches `processor`, returning the one it replaces, if any.
    pub fn attach_processor(&mut self, processor: Processor) -> Option<Processor> {
        let previous = self.processor.replace(processor);
        if previous.is_some() {
            debug!(
                "Replaced metrics processor for invocation {}",
                self.request_id
            );
        }
        previous
    }

    pub fn processor(&self) -> Option<&Processor> {
        self.processor.as_ref()
    }

    pub fn take_processor(&mut self) -> Option<Processor> {
        self.processor.take()
    }

    /// Convenience for application code: buffers a metric on the attached processor.
    ///
    /// Without a processor the metric is discarded, which happens when metrics are
    /// disabled for this invocation.
    pub fn distribution(
        &self,
        name: &str,
        value: f64,
        tags: Vec<String>,
    ) -> Result<(), MetricsError> {
        match &self.processor {
            Some(processor) => processor.add_metric(name, value, tags),
            None => {
                debug!("No metrics processor for invocation, discarding metric '{name}'");
                Ok(())
            }
        }
    }

    pub fn add_point(&self, point: MetricPoint) -> Result<(), MetricsError> {
        match &self.processor {
            Some(processor) => processor.add_point(point),
            None => {
                debug!(
                    "No metrics processor for invocation, discarding metric '{}'",
                    point.name()
                );
                Ok(())
            }
        }
    }
}
