//! Worker threads, failure-contained execution, and the dispatcher

pub mod context;
pub mod dispatcher;
pub mod execution;
pub mod worker;

pub use context::{
    block_current, current_worker, is_worker_thread, with_current, BlockingGuard, WorkerContext,
};
pub use dispatcher::Dispatcher;
pub use execution::handle_job;
pub use worker::{park_timeout_for, Backoff, WorkerExit, WorkerId, WorkerThread};
