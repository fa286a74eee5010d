//! Worker thread implementation: the scheduling loop and its idle backoff.
//!
//! A worker alternates between draining its queue and idling. Idling is
//! two-tiered:
//!
//! - right after a job (within `idle_grace` of the last pop) the worker
//!   only micro-sleeps for a few randomized microseconds and polls again,
//!   which keeps latency low for bursty load without a hot spin;
//! - past the grace window it parks on the queue's condition variable with
//!   a timeout derived from its identity. Threads fall into different
//!   timeout buckets on purpose, so idle threads do not all wake at the
//!   same instant and stampede the queue.
//!
//! The worker only considers shrinking right after a park. A worker that is
//! kept busy enough never to park never shrinks, even if the pool is
//! over-provisioned.

use crate::core::Cancellation;
use crate::pool::context::{self, WorkerContext};
use crate::pool::execution::handle_job;
use crate::queue::{Park, QueueConfig, QueueStatus, WorkQueue, WorkerStatus};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::{span, Level};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a worker thread, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
    fn next() -> Self {
        WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw identity
    pub fn from_raw(raw: u64) -> Self {
        WorkerId(raw)
    }

    /// Raw identity
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a worker thread ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue shut down
    Stopped,
    /// The pool had more threads than it needed
    Shrunk,
    /// An unrecognized fault during shutdown unwound the loop
    Cancelled(Cancellation),
}

/// Park timeout of the thread with identity `identity`: `unit * (1 + identity % buckets)`.
///
/// Deliberately non-uniform across threads so that parked threads do not
/// time out in lockstep.
pub fn park_timeout_for(identity: WorkerId, unit: Duration, buckets: u64) -> Duration {
    let bucket = 1 + identity.get() % buckets.max(1);
    unit.saturating_mul(u32::try_from(bucket).unwrap_or(u32::MAX))
}

/// Idle backoff of a single worker
#[derive(Debug)]
pub struct Backoff {
    park_timeout: Duration,
    max_micro_sleep_us: u64,
    rng: fastrand::Rng,
}

impl Backoff {
    /// Backoff for the worker `identity` under `config`
    pub fn new(identity: WorkerId, config: &QueueConfig) -> Self {
        Self {
            park_timeout: park_timeout_for(
                identity,
                config.park_timeout_unit,
                config.park_buckets,
            ),
            max_micro_sleep_us: (config.max_micro_sleep.as_micros() as u64).max(1),
            rng: fastrand::Rng::with_seed(identity.get()),
        }
    }

    /// How long this worker parks at most
    pub fn park_timeout(&self) -> Duration {
        self.park_timeout
    }

    /// Next micro-sleep, between 1µs and the configured bound
    pub fn micro_sleep(&mut self) -> Duration {
        Duration::from_micros(self.rng.u64(1..=self.max_micro_sleep_us))
    }
}

/// One scheduling loop instance serving a [`WorkQueue`]
pub struct WorkerThread {
    identity: WorkerId,
    name: String,
    started_at: DateTime<Utc>,
    queue: Arc<WorkQueue>,
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("identity", &self.identity)
            .field("name", &self.name)
            .field("queue", &self.queue.id())
            .finish()
    }
}

impl WorkerThread {
    pub(crate) fn new(queue: Arc<WorkQueue>) -> Self {
        let identity = WorkerId::next();
        let name = format!(
            "{}-{}-{}",
            queue.config().thread_name_prefix,
            queue.id(),
            identity
        );
        Self {
            identity,
            name,
            started_at: Utc::now(),
            queue,
        }
    }

    /// Worker identity
    pub fn identity(&self) -> WorkerId {
        self.identity
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the worker was created
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Queue this worker serves
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Status of this worker including its queue's counters
    pub fn status(&self) -> WorkerStatus {
        worker_status(&self.name, self.identity, self.started_at, self.queue.status())
    }

    /// Thread body: run the loop, then hand this worker back to its queue.
    pub(crate) fn run(self) -> WorkerExit {
        let exit = {
            let _context = context::enter(WorkerContext::new(&self));
            self.schedule()
        };

        match &exit {
            WorkerExit::Cancelled(cancel) => debug!("worker {} unwinding: {}", self.name, cancel),
            _ => trace!("dispatcher thread {} has finished: {:?}", self.name, exit),
        }

        let queue = Arc::clone(&self.queue);
        queue.remove_started_thread(self);
        exit
    }

    fn schedule(&self) -> WorkerExit {
        #[cfg(feature = "tracing")]
        let worker_span = span!(Level::DEBUG, "worker", id = self.identity.get());
        #[cfg(feature = "tracing")]
        let _guard = worker_span.enter();

        let queue = &self.queue;
        let grace = queue.config().idle_grace;
        let mut backoff = Backoff::new(self.identity, queue.config());
        let mut last_worked: Option<Instant> = None;

        while !queue.is_stopping() {
            while !queue.is_stopping() {
                let Some(job) = queue.try_pop() else {
                    break;
                };
                last_worked = Some(Instant::now());

                #[cfg(feature = "tracing")]
                crate::tracing::metrics::record_worker_busy(self.identity.get());

                if let Err(cancel) = handle_job(queue, job) {
                    return WorkerExit::Cancelled(cancel);
                }

                #[cfg(feature = "tracing")]
                crate::tracing::metrics::record_worker_idle(self.identity.get());
            }

            match last_worked.map(|at| at.elapsed()) {
                Some(idle) if idle < grace => {
                    if !idle.is_zero() {
                        thread::sleep(backoff.micro_sleep());
                    }
                }
                _ => {
                    let timeout = backoff.park_timeout();
                    #[cfg(feature = "tracing")]
                    crate::tracing::metrics::record_park(self.identity.get(), timeout);

                    match queue.park(timeout) {
                        Park::Aborted => continue,
                        Park::Woken | Park::TimedOut => {
                            if queue.is_stopping() {
                                break;
                            }
                            // counters are read without synchronization, so
                            // more than one thread may shrink at once
                            if queue.too_many_threads() {
                                trace!("worker {} shrinking away", self.name);
                                #[cfg(feature = "tracing")]
                                crate::tracing::metrics::record_shrink(self.identity.get());
                                return WorkerExit::Shrunk;
                            }
                        }
                    }
                }
            }
        }

        WorkerExit::Stopped
    }
}

pub(crate) fn worker_status(
    name: &str,
    identity: WorkerId,
    started_at: DateTime<Utc>,
    queue: QueueStatus,
) -> WorkerStatus {
    WorkerStatus {
        name: name.to_string(),
        identity,
        started_at,
        queue,
    }
}
