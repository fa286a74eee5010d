//! The "current worker" of a thread.
//!
//! Every dispatcher thread installs a [`WorkerContext`] when it starts and
//! removes it when its loop ends. Code running on that thread, job code
//! included, can look it up with [`current_worker`] to find out which pool
//! it runs in, without the context being passed down explicitly. On any
//! other thread the lookup returns `None`.

use crate::pool::worker::{worker_status, WorkerId, WorkerThread};
use crate::queue::{QueueId, WorkQueue, WorkerStatus};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

thread_local! {
    static CURRENT_WORKER: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Handle to the worker executing on the current thread
#[derive(Clone)]
pub struct WorkerContext {
    identity: WorkerId,
    name: Arc<str>,
    started_at: DateTime<Utc>,
    queue: Arc<WorkQueue>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("identity", &self.identity)
            .field("name", &self.name)
            .field("queue", &self.queue.id())
            .finish()
    }
}

impl WorkerContext {
    pub(crate) fn new(worker: &WorkerThread) -> Self {
        Self {
            identity: worker.identity(),
            name: Arc::from(worker.name()),
            started_at: worker.started_at(),
            queue: Arc::clone(worker.queue()),
        }
    }

    /// Identity of the worker
    pub fn identity(&self) -> WorkerId {
        self.identity
    }

    /// Thread name of the worker
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the pool the worker belongs to
    pub fn queue_id(&self) -> QueueId {
        self.queue.id()
    }

    /// Queue the worker serves
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Announce a blocking operation until the returned guard is dropped.
    ///
    /// While blocked threads are announced, the default capacity policy lets
    /// the pool start compensating threads.
    pub fn block(&self) -> BlockingGuard {
        self.queue.block_thread();
        BlockingGuard {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Status of the worker including its queue's counters
    pub fn status(&self) -> WorkerStatus {
        worker_status(
            &self.name,
            self.identity,
            self.started_at,
            self.queue.status(),
        )
    }
}

/// Keeps a blocking announcement alive; unblocks on drop
#[must_use = "the thread is unblocked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct BlockingGuard {
    queue: Arc<WorkQueue>,
}

impl Drop for BlockingGuard {
    fn drop(&mut self) {
        self.queue.unblock_thread();
    }
}

/// Restores the previous context of the thread on drop
pub(crate) struct ContextGuard {
    previous: Option<WorkerContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_WORKER.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Install `context` as the current worker of this thread
pub(crate) fn enter(context: WorkerContext) -> ContextGuard {
    let previous = CURRENT_WORKER.with(|slot| slot.borrow_mut().replace(context));
    ContextGuard { previous }
}

/// The worker running on this thread, if any
pub fn current_worker() -> Option<WorkerContext> {
    CURRENT_WORKER.with(|slot| slot.borrow().clone())
}

/// Run `f` with the current worker, if this is a dispatcher thread
pub fn with_current<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&WorkerContext) -> R,
{
    CURRENT_WORKER.with(|slot| slot.borrow().as_ref().map(f))
}

/// Whether the calling thread is a dispatcher thread
pub fn is_worker_thread() -> bool {
    CURRENT_WORKER.with(|slot| slot.borrow().is_some())
}

/// Announce a blocking operation if called on a dispatcher thread.
///
/// Returns `None` (and does nothing) anywhere else.
pub fn block_current() -> Option<BlockingGuard> {
    with_current(WorkerContext::block)
}
