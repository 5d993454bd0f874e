// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_SITE: &str = "datadoghq.com";

/// How often buffered points are flushed while an invocation is running.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(15);

/// Per attempt HTTP timeout.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_RETRY_ATTEMPTS: u64 = 3;
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 250;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 2_000;

pub const DISTRIBUTION_POINTS_ENDPOINT: &str = "distribution_points";
pub const DISTRIBUTION_METRIC_TYPE: &str = "distribution";
pub const API_KEY_HEADER: &str = "DD-API-KEY";

pub const ENCRYPTION_CONTEXT_KEY: &str = "LambdaFunctionName";
pub const FUNCTION_NAME_ENV_VAR: &str = "AWS_LAMBDA_FUNCTION_NAME";

pub const API_KEY_ENV_VAR: &str = "DD_API_KEY";
pub const KMS_API_KEY_ENV_VAR: &str = "DD_KMS_API_KEY";
pub const SITE_ENV_VAR: &str = "DD_SITE";
pub const DD_URL_ENV_VAR: &str = "DD_DD_URL";
pub const RETRY_ON_FAILURE_ENV_VAR: &str = "DD_RETRY_ON_FAILURE";
pub const BATCH_INTERVAL_ENV_VAR: &str = "DD_BATCH_INTERVAL";
pub const FLUSH_TIMEOUT_ENV_VAR: &str = "DD_FLUSH_TIMEOUT";
pub const LOG_LEVEL_ENV_VAR: &str = "DD_LOG_LEVEL";
