// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Glue between the invocation lifecycle and the batch processor.

use crate::api_key::ApiKeyFactory;
use crate::client::{ApiClient, ApiClientConfig};
use crate::config::Config;
use crate::context::InvocationContext;
use crate::errors::MetricsError;
use crate::kms::{Decrypter, KmsDecrypter};
use crate::processor::Processor;
use crate::time::TimeSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Builds a processor when an invocation starts and drains it when it ends.
///
/// One listener lives for the whole process. Its API client, and with it the
/// decrypted API key, is shared by every invocation the process serves.
#[derive(Debug)]
pub struct Listener {
    config: Config,
    api_client: ApiClient,
    time_source: TimeSource,
    missing_key_reported: AtomicBool,
}

impl Listener {
    pub fn new(config: Config) -> Result<Self, MetricsError> {
        Self::with_decrypter(config, Arc::new(KmsDecrypter::new()))
    }

    pub fn with_decrypter(
        config: Config,
        decrypter: Arc<dyn Decrypter>,
    ) -> Result<Self, MetricsError> {
        config.validate()?;

        let api_key_factory = ApiKeyFactory::from_keys(
            config.api_key.as_deref(),
            config.kms_api_key.as_deref(),
            decrypter,
        );
        let api_client = ApiClient::new(ApiClientConfig {
            base_url: config.base_url(),
            api_key_factory: Arc::new(api_key_factory),
            https_proxy: config.https_proxy.clone(),
            timeout: config.timeout,
            retry_strategy: config.retry_strategy.clone(),
        })?;

        Ok(Self {
            config,
            api_client,
            time_source: TimeSource::System,
            missing_key_reported: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn with_time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts a processor for the invocation and attaches it to `ctx`.
    ///
    /// Never fails the invocation: if the processor cannot start, the context is
    /// returned without one and metrics for this invocation are discarded.
    pub fn handler_started(&self, mut ctx: InvocationContext) -> InvocationContext {
        if self.api_client.api_key_factory().is_missing()
            && !self.missing_key_reported.swap(true, Ordering::Relaxed)
        {
            warn!("{}", MetricsError::ConfigurationMissing);
        }

        let client = self
            .api_client
            .with_cancellation(ctx.cancellation_token().clone());
        let processor = Processor::new(
            self.config.processor_config(),
            Arc::new(client),
            self.time_source.clone(),
        );

        match processor.start() {
            Ok(()) => {
                debug!(
                    "Attached metrics processor to invocation {}",
                    ctx.request_id()
                );
                ctx.attach_processor(processor);
            }
            Err(e) => error!("Failed to start metrics processor: {e}"),
        }
        ctx
    }

    /// Drains the invocation's processor before control returns to the host.
    ///
    /// Without a processor this is a no-op.
    pub async fn handler_finished(&self, ctx: &mut InvocationContext) -> Result<(), MetricsError> {
        let Some(processor) = ctx.take_processor() else {
            debug!(
                "No metrics processor attached to invocation {}",
                ctx.request_id()
            );
            return Ok(());
        };
        processor.finish().await
    }
}
