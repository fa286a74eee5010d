//! Convenient re-exports for common types and traits

pub use crate::core::{
    BoxedJob, Cancellation, ClosureJob, DispatchError, DomainError, ErrorKind, Fault,
    FaultResult, Job, JobError, JobId, Result,
};
pub use crate::pool::{current_worker, is_worker_thread, Dispatcher, WorkerContext, WorkerId};
pub use crate::queue::{QueueConfig, QueueId, QueueStatus, WorkQueue};
