// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for metrics diagnostics.
//!
//! Lines are prefixed with `DD_METRICS` so they can be told apart from the function's
//! own output in the invocation log stream:
//!
//! ```text
//! DD_METRICS | ERROR | Dropped 12 metric points: Network failure while shipping metrics: ...
//! DD_METRICS | DEBUG | invocation{request_id=abc}: Draining 3 metric points
//! ```

use crate::errors::MetricsError;
use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "DD_METRICS";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "{LOG_PREFIX} | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Builds the filter used by [`init`]; HTTP stack internals are silenced.
pub fn env_filter(log_level: &str) -> Result<EnvFilter, MetricsError> {
    EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,{log_level}"))
        .map_err(|e| MetricsError::InvalidConfig(format!("could not parse log level: {e}")))
}

/// Installs a global subscriber writing through [`Formatter`].
pub fn init(log_level: &str) -> Result<(), MetricsError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(log_level)?)
        .with_ansi(false)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        MetricsError::InvalidConfig(format!("setting default subscriber failed: {e}"))
    })
}
