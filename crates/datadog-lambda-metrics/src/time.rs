// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wall clock used to stamp metric points.
//!
//! [`TimeSource::System`] in production. Tests swap in one of the
//! `metrique_timesource::fakes` clocks through [`TimeSource::custom`].

use std::time::SystemTime;

pub use metrique_timesource::TimeSource;

/// Current wall clock reading of `time_source`.
pub fn now(time_source: &TimeSource) -> SystemTime {
    time_source.system_time().as_std()
}
