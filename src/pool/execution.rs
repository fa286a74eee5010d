//! Failure-contained job execution.
//!
//! [`handle_job`] runs one job so that nothing it does can take down the
//! worker thread. Every fault from `work` is turned into a [`JobError`] and
//! routed to the job's `handle_error`; a failing error handler is logged
//! and swallowed; `cleanup` always runs, and its failures are logged and
//! swallowed too. The single exception is shutdown: an unrecognized fault
//! (or any cleanup failure) seen while the queue is stopping becomes a
//! [`Cancellation`] and is returned to the caller, which unwinds its loop.

use crate::core::fault::panic_message;
use crate::core::{Cancellation, ErrorKind, Fault, FaultResult, Job, JobError, JobPhase};
use crate::queue::{QueuedJob, WorkQueue};
use log::{debug, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

#[cfg(feature = "tracing")]
use tracing::{span, Level};

/// Execute a popped job with full failure containment.
///
/// # Errors
///
/// Returns a [`Cancellation`] only when the queue is shutting down and the
/// job failed in a way the taxonomy does not recognize (a panic or a
/// [`Fault::Unrecognized`] from `work`, or any failure of `cleanup`).
/// Cleanup has not run when the cancellation comes from `work`.
pub fn handle_job(queue: &WorkQueue, queued: QueuedJob) -> Result<(), Cancellation> {
    let waited = queued.waited();
    let id = queued.id();
    let mut job = queued.into_job();
    let name = job.name().to_string();

    #[cfg(feature = "tracing")]
    let job_span = span!(Level::DEBUG, "job_execution", job = %name);
    #[cfg(feature = "tracing")]
    let _job_guard = job_span.enter();
    #[cfg(feature = "tracing")]
    let start = std::time::Instant::now();

    debug!("starting to run job {} ({})", name, id);

    job.mark_queue_exit_time(waited);
    let outcome = catch_unwind(AssertUnwindSafe(|| job.work()));

    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(Fault::Domain(err))) => Some(JobError::Domain(err)),
        Ok(Err(Fault::ResourceExhausted(message))) => Some(JobError::out_of_memory(&message)),
        Ok(Err(Fault::Runtime(err))) => Some(JobError::internal(&err.to_string())),
        Ok(Err(Fault::Unrecognized(message))) => {
            Some(unrecognized(queue, &name, JobPhase::Work, message)?)
        }
        Err(payload) => Some(unrecognized(
            queue,
            &name,
            JobPhase::Work,
            panic_message(payload.as_ref()),
        )?),
    };

    #[cfg(feature = "tracing")]
    crate::tracing::metrics::record_completion(start.elapsed(), error.is_none());

    if let Some(error) = error {
        warn!(
            "caught {} error in work() of job '{}': {}",
            error.kind(),
            name,
            error
        );
        report_error(job.as_mut(), &name, &error);
    }

    let cleanup = catch_unwind(AssertUnwindSafe(|| job.cleanup(queue)));
    if let Some((kind, message)) = cleanup_failure(cleanup) {
        if queue.is_stopping() {
            warn!(
                "caught cancellation during cleanup of job '{}' ({} error): {}",
                name, kind, message
            );
            return Err(Cancellation {
                job: name,
                phase: JobPhase::Cleanup,
                message,
            });
        }
        warn!(
            "caught {} error while cleaning up job '{}': {}",
            kind, name, message
        );
    }

    Ok(())
}

/// Kind and message of a failed cleanup; a panic counts as internal
fn cleanup_failure(outcome: thread::Result<FaultResult>) -> Option<(ErrorKind, String)> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(fault)) => Some((fault.kind(), fault.to_string())),
        Err(payload) => Some((ErrorKind::Internal, panic_message(payload.as_ref()))),
    }
}

/// Classify an unrecognized fault: cancellation while stopping, otherwise a
/// generic internal error.
fn unrecognized(
    queue: &WorkQueue,
    name: &str,
    phase: JobPhase,
    message: String,
) -> Result<JobError, Cancellation> {
    if queue.is_stopping() {
        warn!("caught cancellation during {} of job '{}'", phase, name);
        return Err(Cancellation {
            job: name.to_string(),
            phase,
            message,
        });
    }
    warn!("caught unknown fault in {} of job '{}': {}", phase, name, message);
    Ok(JobError::unknown())
}

/// Hand `error` to the job's error hook. Whatever the hook does, the
/// worker carries on.
fn report_error(job: &mut dyn Job, name: &str, error: &JobError) {
    match catch_unwind(AssertUnwindSafe(|| job.handle_error(error))) {
        Ok(Ok(())) => {}
        Ok(Err(fault)) => warn!(
            "caught error while handling error of job '{}': {}",
            name, fault
        ),
        Err(payload) => warn!(
            "caught unknown error while handling error of job '{}': {}",
            name,
            panic_message(payload.as_ref())
        ),
    }
}
