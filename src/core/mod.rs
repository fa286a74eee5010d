//! Core types and traits for the dispatcher

pub mod error;
pub mod fault;
pub mod job;

pub use error::{DispatchError, Result};
pub use fault::{Cancellation, DomainError, ErrorKind, Fault, FaultResult, JobError, JobPhase};
pub use job::{BoxedJob, ClosureJob, Job, JobId};
