// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Custom metrics for short-lived serverless invocations.
//!
//! A [`listener::Listener`] hooks into the invocation lifecycle. When an invocation
//! starts it builds a [`processor::Processor`], starts its periodic flush loop and
//! attaches it to the [`context::InvocationContext`]. Application code adds metric
//! points to that processor. When the invocation ends the listener drains the
//! processor so nothing buffered is lost when the host freezes or kills the process.
//!
//! Delivery goes through [`client::ApiClient`], which resolves the API key through
//! [`api_key::ApiKeyFactory`] (decrypting a KMS encrypted key at most once per
//! process) and posts distribution points to the Datadog API.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod api_key;
pub mod client;
pub mod config;
pub mod constants;
pub mod context;
pub mod errors;
pub mod kms;
pub mod listener;
pub mod logger;
pub mod metric;
pub mod processor;
pub mod time;

pub use context::InvocationContext;
pub use errors::MetricsError;
pub use listener::Listener;
pub use metric::MetricPoint;
pub use processor::{Processor, ProcessorConfig};
