//! Failure taxonomy for job actions.
//!
//! Job actions report failures as a [`Fault`]. The execution wrapper turns
//! every fault it contains into a [`JobError`] and hands it to the job's own
//! error hook. The only failure that is never contained is a
//! [`Cancellation`]: an unrecognized fault observed while the queue is
//! shutting down.
//!
//! | Fault                        | Delivered to `handle_error` as |
//! |------------------------------|--------------------------------|
//! | [`Fault::Domain`]            | [`JobError::Domain`] (unchanged) |
//! | [`Fault::ResourceExhausted`] | [`JobError::OutOfMemory`]      |
//! | [`Fault::Runtime`]           | [`JobError::Internal`]         |
//! | [`Fault::Unrecognized`] / panic | [`JobError::Internal`], or [`Cancellation`] when stopping |

use std::any::Any;
use std::collections::TryReserveError;
use std::fmt;

/// Result returned by every fallible job action
pub type FaultResult = std::result::Result<(), Fault>;

/// An expected business-logic failure raised by job code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct DomainError {
    /// Application specific error code
    pub code: i32,
    /// Human readable message
    pub message: String,
}

impl DomainError {
    /// Create a domain error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A failure reported by `work`, `handle_error` or `cleanup`
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    /// Expected business-logic failure
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Resource exhaustion, e.g. a failed allocation
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Generic runtime fault wrapping any error value
    #[error("runtime fault: {0}")]
    Runtime(Box<dyn std::error::Error + Send + Sync>),

    /// A fault the job cannot describe any further
    #[error("unrecognized fault: {0}")]
    Unrecognized(String),
}

impl Fault {
    /// Create a domain fault
    pub fn domain(code: i32, message: impl Into<String>) -> Self {
        Fault::Domain(DomainError::new(code, message))
    }

    /// Create a resource exhaustion fault
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Fault::ResourceExhausted(message.into())
    }

    /// Create a runtime fault from any error or message
    pub fn runtime(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Fault::Runtime(error.into())
    }

    /// Create an unrecognized fault
    pub fn unrecognized(message: impl Into<String>) -> Self {
        Fault::Unrecognized(message.into())
    }

    /// The kind this fault is reported as
    pub fn kind(&self) -> ErrorKind {
        match self {
            Fault::Domain(_) => ErrorKind::Domain,
            Fault::ResourceExhausted(_) => ErrorKind::OutOfMemory,
            Fault::Runtime(_) | Fault::Unrecognized(_) => ErrorKind::Internal,
        }
    }
}

impl From<TryReserveError> for Fault {
    fn from(err: TryReserveError) -> Self {
        Fault::ResourceExhausted(err.to_string())
    }
}

/// The four failure kinds a job execution can end in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Business-logic failure
    Domain,
    /// Resource exhaustion
    OutOfMemory,
    /// Unexpected runtime fault
    Internal,
    /// Shutdown-driven unwind
    Cancellation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Domain => "domain",
            ErrorKind::OutOfMemory => "out-of-memory",
            ErrorKind::Internal => "internal",
            ErrorKind::Cancellation => "cancellation",
        };
        f.write_str(name)
    }
}

/// The error a job's `handle_error` hook receives
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The domain error raised by `work`, passed through unchanged
    #[error(transparent)]
    Domain(DomainError),

    /// Resource exhaustion during `work`
    #[error("out of memory: {message}")]
    OutOfMemory {
        /// Wrapped original message
        message: String,
    },

    /// Any other fault during `work`
    #[error("internal error: {message}")]
    Internal {
        /// Wrapped original message
        message: String,
    },
}

impl JobError {
    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Domain(_) => ErrorKind::Domain,
            JobError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            JobError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Message carried by this error
    pub fn message(&self) -> &str {
        match self {
            JobError::Domain(err) => &err.message,
            JobError::OutOfMemory { message } | JobError::Internal { message } => message,
        }
    }

    pub(crate) fn out_of_memory(original: &str) -> Self {
        JobError::OutOfMemory {
            message: format!("job failed with resource exhaustion: {}", original),
        }
    }

    pub(crate) fn internal(original: &str) -> Self {
        JobError::Internal {
            message: format!("job failed with error: {}", original),
        }
    }

    pub(crate) fn unknown() -> Self {
        JobError::Internal {
            message: "job failed with unknown error".to_string(),
        }
    }
}

/// Which job action was running when a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// `work`
    Work,
    /// `cleanup`
    Cleanup,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Work => f.write_str("work"),
            JobPhase::Cleanup => f.write_str("cleanup"),
        }
    }
}

/// Shutdown-driven unwind signal. Always propagated, never contained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job '{job}' cancelled during {phase}: {message}")]
pub struct Cancellation {
    /// Name of the job that was executing
    pub job: String,
    /// Action that observed the fault
    pub phase: JobPhase,
    /// Message of the fault that triggered the unwind
    pub message: String,
}

impl Cancellation {
    /// Kind of this signal, always [`ErrorKind::Cancellation`]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Cancellation
    }
}

/// Extracts a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
