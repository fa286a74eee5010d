//! Tracing integration for observability.
//!
//! With the `tracing` feature enabled, workers open a `worker` span, every
//! job runs in a `job_execution` span, and park/shrink/completion events are
//! emitted through [`metrics`].
//!
//! # Example
//!
//! ```rust,ignore
//! use rust_dispatcher::prelude::*;
//! use rust_dispatcher::tracing::TracedJob;
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env()
//!         .add_directive("rust_dispatcher=debug".parse().unwrap()))
//!     .init();
//!
//! let dispatcher = Dispatcher::with_standard_queue(4)?;
//! dispatcher.add_job(QueueId::STANDARD, TracedJob::new(MyJob::new()))?;
//! ```

use crate::core::{FaultResult, Job, JobError};
use crate::queue::WorkQueue;
use std::time::Duration;

/// A job wrapper that carries the submitter's tracing span to the worker.
///
/// The span current at construction is entered around every action of the
/// wrapped job.
pub struct TracedJob<J: Job> {
    inner: J,
    #[cfg(feature = "tracing")]
    span: tracing::Span,
}

impl<J: Job> TracedJob<J> {
    /// Wrap `job`, capturing the current span
    pub fn new(job: J) -> Self {
        Self {
            inner: job,
            #[cfg(feature = "tracing")]
            span: tracing::Span::current(),
        }
    }

    /// Wrap `job` with a specific span
    #[cfg(feature = "tracing")]
    pub fn with_span(job: J, span: tracing::Span) -> Self {
        Self { inner: job, span }
    }

    /// The wrapped job
    pub fn inner(&self) -> &J {
        &self.inner
    }
}

impl<J: Job> Job for TracedJob<J> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn work(&mut self) -> FaultResult {
        #[cfg(feature = "tracing")]
        let _guard = self.span.enter();
        self.inner.work()
    }

    fn handle_error(&mut self, error: &JobError) -> FaultResult {
        #[cfg(feature = "tracing")]
        let _guard = self.span.enter();
        self.inner.handle_error(error)
    }

    fn cleanup(&mut self, queue: &WorkQueue) -> FaultResult {
        #[cfg(feature = "tracing")]
        let _guard = self.span.enter();
        self.inner.cleanup(queue)
    }

    fn mark_queue_exit_time(&mut self, waited: Duration) {
        #[cfg(feature = "tracing")]
        tracing::trace!(
            histogram.queue_wait_us = waited.as_micros() as u64,
            job = self.inner.name(),
            "job left queue"
        );
        self.inner.mark_queue_exit_time(waited);
    }

    fn cancel(&mut self) {
        self.inner.cancel();
    }
}

/// Metrics recording functions for observability.
///
/// These functions emit tracing events that can be consumed by
/// metrics collection systems like Prometheus via tracing-opentelemetry.
#[cfg(feature = "tracing")]
pub mod metrics {
    use super::*;

    /// Records job completion with timing.
    #[inline]
    pub fn record_completion(duration: Duration, success: bool) {
        let duration_ms = duration.as_millis() as u64;
        if success {
            tracing::trace!(
                counter.jobs_completed = 1,
                histogram.job_duration_ms = duration_ms,
                "job completed successfully"
            );
        } else {
            tracing::trace!(
                counter.jobs_failed = 1,
                histogram.job_duration_ms = duration_ms,
                "job failed"
            );
        }
    }

    /// Records worker becoming busy.
    #[inline]
    pub fn record_worker_busy(worker_id: u64) {
        tracing::trace!(gauge.workers_busy = 1, worker_id = worker_id, "worker busy");
    }

    /// Records worker becoming idle.
    #[inline]
    pub fn record_worker_idle(worker_id: u64) {
        tracing::trace!(
            gauge.workers_busy = -1i64,
            worker_id = worker_id,
            "worker idle"
        );
    }

    /// Records a worker parking.
    #[inline]
    pub fn record_park(worker_id: u64, timeout: Duration) {
        tracing::trace!(
            counter.parks = 1,
            worker_id = worker_id,
            timeout_ms = timeout.as_millis() as u64,
            "worker parking"
        );
    }

    /// Records a worker shrinking away.
    #[inline]
    pub fn record_shrink(worker_id: u64) {
        tracing::debug!(counter.shrinks = 1, worker_id = worker_id, "worker shrinking");
    }

    /// Records queue startup.
    #[inline]
    pub fn record_pool_start(queue: u64, num_workers: usize) {
        tracing::info!(queue = queue, workers = num_workers, "queue started");
    }

    /// Records queue shutdown.
    #[inline]
    pub fn record_pool_shutdown(queue: u64, still_running: usize) {
        tracing::info!(
            queue = queue,
            still_running = still_running,
            "queue shutdown complete"
        );
    }
}
