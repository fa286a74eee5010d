//! # Rust Dispatcher
//!
//! An elastic worker-pool job dispatcher. Long-lived threads pull jobs from
//! a shared lock-free queue, run them with strict failure containment, and
//! grow or shrink the pool with load and blocking behavior.
//!
//! ## Features
//!
//! - **Two-tier idling**: micro-sleeps right after work, staggered
//!   condition-variable parking once idle
//! - **Failure containment**: job faults go to the job's own error hook;
//!   nothing a job does can kill its worker, except the shutdown
//!   cancellation path
//! - **Elastic sizing**: blocked threads are compensated, surplus threads
//!   shrink away after parking
//! - **Status snapshots**: JSON-ready counters per queue and per worker
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_dispatcher::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let dispatcher = Dispatcher::with_standard_queue(4)?;
//!
//! for i in 0..10 {
//!     dispatcher.execute(QueueId::STANDARD, format!("job-{}", i), move || {
//!         println!("Job {} executing", i);
//!         Ok(())
//!     })?;
//! }
//!
//! dispatcher.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Jobs
//!
//! ```rust
//! use rust_dispatcher::prelude::*;
//!
//! struct Import {
//!     rows: Vec<String>,
//! }
//!
//! impl Job for Import {
//!     fn name(&self) -> &str {
//!         "Import"
//!     }
//!
//!     fn work(&mut self) -> FaultResult {
//!         if self.rows.is_empty() {
//!             return Err(Fault::domain(400, "nothing to import"));
//!         }
//!         Ok(())
//!     }
//!
//!     fn handle_error(&mut self, error: &JobError) -> FaultResult {
//!         eprintln!("import failed: {}", error);
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let dispatcher = Dispatcher::with_standard_queue(2)?;
//! dispatcher.add_job(QueueId::STANDARD, Import { rows: Vec::new() })?;
//! dispatcher.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Status
//!
//! ```rust
//! use rust_dispatcher::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let dispatcher = Dispatcher::with_standard_queue(2)?;
//! let status = dispatcher.status();
//! println!("{}", status.to_json()?);
//! # dispatcher.shutdown();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod pool;
pub mod prelude;
pub mod queue;
pub mod tracing;

pub use core::{
    BoxedJob, Cancellation, ClosureJob, DispatchError, DomainError, ErrorKind, Fault,
    FaultResult, Job, JobError, JobId, Result,
};
pub use pool::{current_worker, Dispatcher, WorkerContext, WorkerExit, WorkerId, WorkerThread};
pub use queue::{QueueConfig, QueueId, QueueStatus, WorkQueue};
