//! Job trait and related types

use crate::core::fault::{Fault, FaultResult, JobError};
use crate::queue::WorkQueue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// A unit of work executed by a dispatcher worker thread.
///
/// The queue owns a job until a worker pops it; from then on the worker owns
/// it exclusively until the end of its execution pass, after which it is
/// dropped. Every action may fail independently, see
/// [`crate::core::fault`] for how each failure is contained.
pub trait Job: Send {
    /// Diagnostic name used in logs
    fn name(&self) -> &str {
        "Job"
    }

    /// Do the actual work
    ///
    /// # Errors
    ///
    /// Returns a [`Fault`] describing why the work failed
    fn work(&mut self) -> FaultResult;

    /// Report or recover from a failed [`Job::work`].
    ///
    /// A failing handler is logged and otherwise ignored.
    fn handle_error(&mut self, error: &JobError) -> FaultResult {
        let _ = error;
        Ok(())
    }

    /// Finalize the job. Runs exactly once per execution, whatever the
    /// outcome of [`Job::work`].
    fn cleanup(&mut self, queue: &WorkQueue) -> FaultResult {
        let _ = queue;
        Ok(())
    }

    /// Called right before [`Job::work`] with the time the job spent queued
    fn mark_queue_exit_time(&mut self, waited: Duration) {
        let _ = waited;
    }

    /// Called when the queue shuts down before the job could run
    fn cancel(&mut self) {}
}

impl fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job({})", self.name())
    }
}

/// A boxed job that can be sent across threads
pub type BoxedJob = Box<dyn Job>;

/// Identifier assigned to a job when it is enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a fresh random id
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type ErrorCallback = Box<dyn FnMut(&JobError) -> FaultResult + Send>;

/// Helper to create a job from a closure
pub struct ClosureJob<F>
where
    F: FnOnce() -> FaultResult + Send,
{
    closure: Option<F>,
    name: String,
    on_error: Option<ErrorCallback>,
}

impl<F> ClosureJob<F>
where
    F: FnOnce() -> FaultResult + Send,
{
    /// Create a new closure job
    pub fn new(closure: F) -> Self {
        Self::with_name(closure, "ClosureJob")
    }

    /// Create a new closure job with a custom name
    pub fn with_name<S: Into<String>>(closure: F, name: S) -> Self {
        Self {
            closure: Some(closure),
            name: name.into(),
            on_error: None,
        }
    }

    /// Route errors from the closure to `callback`
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn on_error<C>(mut self, callback: C) -> Self
    where
        C: FnMut(&JobError) -> FaultResult + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }
}

impl<F> Job for ClosureJob<F>
where
    F: FnOnce() -> FaultResult + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn work(&mut self) -> FaultResult {
        match self.closure.take() {
            Some(closure) => closure(),
            None => Err(Fault::runtime(
                "ClosureJob already executed - cannot execute twice",
            )),
        }
    }

    fn handle_error(&mut self, error: &JobError) -> FaultResult {
        match self.on_error.as_mut() {
            Some(callback) => callback(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_job() {
        let mut job = ClosureJob::new(|| Ok(()));

        assert_eq!(job.name(), "ClosureJob");
        assert!(job.work().is_ok());
    }

    #[test]
    fn test_closure_job_runs_once() {
        let mut job = ClosureJob::with_name(|| Ok(()), "once");
        assert!(job.work().is_ok());
        assert!(matches!(job.work(), Err(Fault::Runtime(_))));
    }

    #[test]
    fn test_closure_job_error_callback() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);

        let mut job = ClosureJob::with_name(|| Err(Fault::domain(3, "nope")), "failing")
            .on_error(move |err| {
                *seen_clone.lock().unwrap() = Some(err.clone());
                Ok(())
            });

        assert_eq!(job.name(), "failing");
        assert!(job.work().is_err());
        let err = JobError::internal("x");
        job.handle_error(&err).unwrap();
        assert_eq!(seen.lock().unwrap().as_ref(), Some(&err));
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }
}
