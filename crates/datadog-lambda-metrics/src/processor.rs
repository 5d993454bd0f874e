// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffering and flushing of metric points for a single invocation.
//!
//! Points are appended to an in-memory batch. A background task swaps the batch for
//! an empty one every `batch_interval` and ships it. [`Processor::finish`] stops that
//! task, waits for it to exit, then ships whatever is left. Only one flush is ever in
//! flight, so batches leave in the order they were assembled.

use crate::client::MetricsShipper;
use crate::constants::DEFAULT_BATCH_INTERVAL;
use crate::errors::MetricsError;
use crate::metric::MetricPoint;
use crate::time::{self, TimeSource};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Built but the periodic flush is not running yet.
    Created,
    Running,
    /// `finish` was called; the terminal flush has not taken the batch yet.
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    batch_interval: Duration,
    should_retry_on_failure: bool,
}

impl ProcessorConfig {
    /// A zero interval falls back to the default.
    pub fn new(batch_interval: Duration, should_retry_on_failure: bool) -> Self {
        let batch_interval = if batch_interval.is_zero() {
            DEFAULT_BATCH_INTERVAL
        } else {
            batch_interval
        };
        Self {
            batch_interval,
            should_retry_on_failure,
        }
    }

    /// Never zero.
    pub fn batch_interval(&self) -> Duration {
        self.batch_interval
    }

    pub fn should_retry_on_failure(&self) -> bool {
        self.should_retry_on_failure
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_INTERVAL, false)
    }
}

/// Counters describing what happened to the points handed to a processor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    pub flushed_points: u64,
    /// Accepted, then lost to a failed flush or an early stop.
    pub dropped_points: u64,
    /// Never accepted: malformed, or added after the processor stopped.
    pub rejected_points: u64,
}

struct Buffer {
    state: ProcessorState,
    points: Vec<MetricPoint>,
}

struct Shared {
    buffer: Mutex<Buffer>,
    shipper: Arc<dyn MetricsShipper>,
    time_source: TimeSource,
    config: ProcessorConfig,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    flushed_points: AtomicU64,
    dropped_points: AtomicU64,
    rejected_points: AtomicU64,
    /// Cancellation ends every later flush too; only the first is worth a warning.
    cancellation_reported: AtomicBool,
}

impl Shared {
    fn lock_buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_batch(&self) -> Vec<MetricPoint> {
        std::mem::take(&mut self.lock_buffer().points)
    }

    async fn flush(&self) -> Result<(), MetricsError> {
        let batch = self.take_batch();
        self.ship(batch).await
    }

    async fn ship(&self, batch: Vec<MetricPoint>) -> Result<(), MetricsError> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        debug!("Flushing {count} metric points");

        match self
            .shipper
            .ship(&batch, self.config.should_retry_on_failure)
            .await
        {
            Ok(()) => {
                self.flushed_points
                    .fetch_add(as_u64(count), Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.dropped_points
                    .fetch_add(as_u64(count), Ordering::Relaxed);
                if e == MetricsError::DeliveryCancelled {
                    if self.cancellation_reported.swap(true, Ordering::Relaxed) {
                        debug!("Dropped {count} metric points: {e}");
                    } else {
                        warn!("Dropped {count} metric points: {e}");
                    }
                } else {
                    error!("Dropped {count} metric points: {e}");
                }
                Err(e)
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.stop.cancel();
        let pending = self
            .buffer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .points
            .len();
        if pending > 0 {
            warn!("Processor dropped without finishing, {pending} metric points were not sent");
        }
    }
}

fn as_u64(count: usize) -> u64 {
    u64::try_from(count).unwrap_or(u64::MAX)
}

/// Handle to the batch processor of one invocation.
///
/// Clones refer to the same processor.
#[derive(Clone)]
pub struct Processor {
    shared: Arc<Shared>,
}

impl Processor {
    pub fn new(
        config: ProcessorConfig,
        shipper: Arc<dyn MetricsShipper>,
        time_source: TimeSource,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(Buffer {
                    state: ProcessorState::Created,
                    points: Vec::new(),
                }),
                shipper,
                time_source,
                config,
                stop: CancellationToken::new(),
                task: Mutex::new(None),
                flushed_points: AtomicU64::new(0),
                dropped_points: AtomicU64::new(0),
                rejected_points: AtomicU64::new(0),
                cancellation_reported: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> ProcessorConfig {
        self.shared.config
    }

    pub fn state(&self) -> ProcessorState {
        self.shared.lock_buffer().state
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            flushed_points: self.shared.flushed_points.load(Ordering::Relaxed),
            dropped_points: self.shared.dropped_points.load(Ordering::Relaxed),
            rejected_points: self.shared.rejected_points.load(Ordering::Relaxed),
        }
    }

    /// Spawns the periodic flush on the current Tokio runtime.
    ///
    /// Starting a running processor is a no-op.
    pub fn start(&self) -> Result<(), MetricsError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            MetricsError::InvalidConfig(
                "metrics processor must be started from within a Tokio runtime".to_string(),
            )
        })?;

        let mut buffer = self.shared.lock_buffer();
        match buffer.state {
            ProcessorState::Created => buffer.state = ProcessorState::Running,
            ProcessorState::Running => return Ok(()),
            ProcessorState::Draining | ProcessorState::Stopped => {
                return Err(MetricsError::ProcessorStopped)
            }
        }

        let task = runtime.spawn(run(
            Arc::downgrade(&self.shared),
            self.shared.stop.clone(),
            self.shared.config.batch_interval,
        ));
        *self.shared.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        debug!(
            "Started metrics processor, flushing every {} ms",
            self.shared.config.batch_interval.as_millis()
        );
        Ok(())
    }

    /// Buffers a point for the next flush. Never waits on the network.
    pub fn add_point(&self, point: MetricPoint) -> Result<(), MetricsError> {
        if let Err(e) = point.validate() {
            self.shared.rejected_points.fetch_add(1, Ordering::Relaxed);
            warn!("Rejected metric point: {e}");
            return Err(e);
        }

        let mut buffer = self.shared.lock_buffer();
        if buffer.state == ProcessorState::Stopped {
            drop(buffer);
            self.shared.rejected_points.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Metric '{}' was added after the processor stopped and will not be sent",
                point.name()
            );
            return Err(MetricsError::ProcessorStopped);
        }
        buffer.points.push(point);
        Ok(())
    }

    /// Buffers a point stamped with the processor's clock.
    pub fn add_metric(
        &self,
        name: impl Into<String>,
        value: f64,
        tags: Vec<String>,
    ) -> Result<(), MetricsError> {
        let timestamp = time::now(&self.shared.time_source);
        self.add_point(MetricPoint::new(name, value, timestamp, tags))
    }

    /// Stops the periodic flush and ships the remaining points.
    ///
    /// Returns once the terminal flush has succeeded or definitively failed. The
    /// periodic task has exited before the batch is taken, so the two never ship
    /// concurrently.
    pub async fn finish(&self) -> Result<(), MetricsError> {
        {
            let mut buffer = self.shared.lock_buffer();
            match buffer.state {
                ProcessorState::Draining | ProcessorState::Stopped => {
                    return Err(MetricsError::ProcessorStopped)
                }
                ProcessorState::Created | ProcessorState::Running => {
                    buffer.state = ProcessorState::Draining;
                }
            }
        }

        self.stop_periodic_task().await;

        let batch = {
            let mut buffer = self.shared.lock_buffer();
            buffer.state = ProcessorState::Stopped;
            std::mem::take(&mut buffer.points)
        };
        debug!("Draining {} metric points", batch.len());
        self.shared.ship(batch).await
    }

    /// Stops the periodic flush without a final flush. Buffered points are dropped.
    pub async fn stop(&self) -> Result<(), MetricsError> {
        let pending = {
            let mut buffer = self.shared.lock_buffer();
            match buffer.state {
                ProcessorState::Draining | ProcessorState::Stopped => {
                    return Err(MetricsError::ProcessorStopped)
                }
                ProcessorState::Created | ProcessorState::Running => {
                    buffer.state = ProcessorState::Stopped;
                }
            }
            std::mem::take(&mut buffer.points)
        };

        self.stop_periodic_task().await;

        if !pending.is_empty() {
            self.shared
                .dropped_points
                .fetch_add(as_u64(pending.len()), Ordering::Relaxed);
            warn!(
                "Processor stopped before flushing, dropped {} metric points",
                pending.len()
            );
        }
        Ok(())
    }

    async fn stop_periodic_task(&self) {
        self.shared.stop.cancel();
        let task = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Periodic metrics flush task failed: {e}");
            }
        }
    }
}

impl Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

async fn run(shared: Weak<Shared>, stop: CancellationToken, batch_interval: Duration) {
    let mut ticker = interval_at(Instant::now() + batch_interval, batch_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                // failures are logged and counted by ship()
                let _ = shared.flush().await;
            }
        }
    }
    debug!("Periodic metrics flush stopped");
}
