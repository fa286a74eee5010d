//! Shared queue state for one pool of dispatcher threads.
//!
//! A [`WorkQueue`] couples a lock-free multi-producer/multi-consumer job
//! container with the counters the pool runs on (queued, running, parked,
//! blocked), a park mutex/condition variable pair, and a [`CapacityPolicy`]
//! that decides when the pool grows or shrinks.
//!
//! # Counter consistency
//!
//! Each counter is independently atomic. No operation updates two of them
//! in one step, so a snapshot may briefly over- or under-count (a thread
//! can show up as parked while a job it is about to pick up is still
//! counted as queued). The counters feed monitoring and the capacity
//! policy only; no correctness property depends on them agreeing.
//!
//! # Lost wakeups
//!
//! A producer bumps the queued count, pushes, then reads the parked count;
//! a parking thread bumps the parked count, takes the park mutex, then
//! re-checks for queued jobs. With sequentially consistent counters at
//! least one side sees the other, and a producer that sees a parked thread
//! signals under the same mutex, so a job pushed during a drain-to-park
//! transition is never stranded.

mod config;
mod policy;
mod status;

pub use config::QueueConfig;
pub use policy::{CapacityPolicy, QueueLoad, ThreadCountPolicy};
pub use status::{DispatcherStatus, QueueStatus, WorkerStatus};

use crate::core::{BoxedJob, DispatchError, JobId, Result};
use crate::pool::{WorkerExit, WorkerId, WorkerThread};
use crossbeam_channel::{Receiver, Sender};
use crossbeam_queue::SegQueue;
use crossbeam_utils::CachePadded;
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Identity of a logical pool
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct QueueId(u64);

impl QueueId {
    /// The standard queue
    pub const STANDARD: QueueId = QueueId(1);

    /// Create a queue id
    pub const fn new(id: u64) -> Self {
        QueueId(id)
    }

    /// Raw numeric id
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Default for QueueId {
    fn default() -> Self {
        QueueId::STANDARD
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == QueueId::STANDARD {
            f.write_str("std")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A job waiting in a [`WorkQueue`]
pub struct QueuedJob {
    id: JobId,
    enqueued_at: Instant,
    job: BoxedJob,
}

impl QueuedJob {
    fn new(id: JobId, job: BoxedJob) -> Self {
        Self {
            id,
            enqueued_at: Instant::now(),
            job,
        }
    }

    /// Id assigned at submission
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Name of the wrapped job
    pub fn name(&self) -> &str {
        self.job.name()
    }

    /// Time spent in the queue so far
    pub fn waited(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Take the job out of its envelope
    pub fn into_job(self) -> BoxedJob {
        self.job
    }
}

impl fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedJob")
            .field("id", &self.id)
            .field("name", &self.job.name())
            .finish()
    }
}

/// Outcome of [`WorkQueue::park`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Park {
    /// Work arrived or shutdown began before the thread could sleep
    Aborted,
    /// Woken by a producer or by shutdown
    Woken,
    /// The timeout elapsed
    TimedOut,
}

struct StartedThread {
    name: String,
    handle: JoinHandle<WorkerExit>,
}

/// Shared state coordinating a pool of worker threads against one job queue
pub struct WorkQueue {
    config: QueueConfig,
    stopping: AtomicBool,
    ready_jobs: SegQueue<QueuedJob>,
    number_jobs: CachePadded<AtomicUsize>,
    nr_running: CachePadded<AtomicUsize>,
    nr_waiting: CachePadded<AtomicUsize>,
    nr_blocked: CachePadded<AtomicIsize>,
    wait_lock: Mutex<()>,
    wait_cond: Condvar,
    policy: Box<dyn CapacityPolicy>,
    created: Instant,
    last_changed_us: AtomicU64,
    started_threads: Mutex<HashMap<WorkerId, StartedThread>>,
    stopped_tx: Sender<StartedThread>,
    stopped_rx: Receiver<StartedThread>,
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("id", &self.config.id)
            .field("status", &self.status())
            .finish()
    }
}

impl WorkQueue {
    /// Create a queue with the default [`ThreadCountPolicy`]. No thread is
    /// started yet.
    pub fn new(config: QueueConfig) -> Result<Arc<Self>> {
        let policy = ThreadCountPolicy::from_config(&config);
        Self::with_policy(config, policy)
    }

    /// Create a queue with a custom capacity policy
    pub fn with_policy<P>(config: QueueConfig, policy: P) -> Result<Arc<Self>>
    where
        P: CapacityPolicy + 'static,
    {
        config.validate()?;
        let (stopped_tx, stopped_rx) = crossbeam_channel::unbounded();

        Ok(Arc::new(Self {
            config,
            stopping: AtomicBool::new(false),
            ready_jobs: SegQueue::new(),
            number_jobs: CachePadded::new(AtomicUsize::new(0)),
            nr_running: CachePadded::new(AtomicUsize::new(0)),
            nr_waiting: CachePadded::new(AtomicUsize::new(0)),
            nr_blocked: CachePadded::new(AtomicIsize::new(0)),
            wait_lock: Mutex::new(()),
            wait_cond: Condvar::new(),
            policy: Box::new(policy),
            created: Instant::now(),
            last_changed_us: AtomicU64::new(0),
            started_threads: Mutex::new(HashMap::new()),
            stopped_tx,
            stopped_rx,
        }))
    }

    /// Pool id
    pub fn id(&self) -> QueueId {
        self.config.id
    }

    /// Configuration this queue was built with
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Whether shutdown has begun
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Number of jobs currently enqueued
    pub fn len(&self) -> usize {
        self.number_jobs.load(Ordering::SeqCst)
    }

    /// Whether no job is enqueued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Threads started and not yet deregistered
    pub fn nr_running(&self) -> usize {
        self.nr_running.load(Ordering::SeqCst)
    }

    /// Threads currently parked
    pub fn nr_waiting(&self) -> usize {
        self.nr_waiting.load(Ordering::SeqCst)
    }

    /// Threads inside an announced blocking operation
    pub fn nr_blocked(&self) -> isize {
        self.nr_blocked.load(Ordering::SeqCst)
    }

    /// Enqueue a job and make sure some thread will run it.
    ///
    /// Wakes one parked thread if there is any; otherwise starts an extra
    /// thread when the capacity policy says the pool is short.
    pub fn add_job(self: &Arc<Self>, job: BoxedJob) -> Result<JobId> {
        if self.is_stopping() {
            return Err(DispatchError::shutting_down(self.id()));
        }

        let max = self.config.max_queue_size;
        if max > 0 {
            let current = self.len();
            if current >= max {
                return Err(DispatchError::queue_full(current, max));
            }
        }

        let id = JobId::new();
        trace!("queue {}: adding job {} ({})", self.id(), id, job.name());

        self.number_jobs.fetch_add(1, Ordering::SeqCst);
        self.ready_jobs.push(QueuedJob::new(id, job));

        if self.nr_waiting.load(Ordering::SeqCst) > 0 {
            let _guard = self.wait_lock.lock();
            self.wait_cond.notify_one();
        } else if self.not_enough_threads() {
            if let Err(e) = self.start_queue_thread() {
                warn!("queue {}: cannot start additional thread: {}", self.id(), e);
            }
        }

        Ok(id)
    }

    /// Pop a job without blocking
    pub fn try_pop(&self) -> Option<QueuedJob> {
        let job = self.ready_jobs.pop()?;
        self.number_jobs.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }

    /// Announce that the calling thread enters a blocking operation that
    /// does no pool work
    pub fn block_thread(&self) {
        self.nr_blocked.fetch_add(1, Ordering::SeqCst);
    }

    /// Announce the end of a blocking operation. Unmatched calls are logged
    /// but not corrected.
    pub fn unblock_thread(&self) {
        let previous = self.nr_blocked.fetch_sub(1, Ordering::SeqCst);
        if previous <= 0 {
            error!(
                "queue {}: internal error, unblocking too many threads",
                self.id()
            );
        }
    }

    /// Whether the pool judges itself over-provisioned. Granting a shrink
    /// restarts the shrink grace period.
    pub fn too_many_threads(&self) -> bool {
        if self.policy.too_many_threads(&self.load()) {
            self.mark_changed();
            true
        } else {
            false
        }
    }

    /// Whether the pool should start another thread
    pub fn not_enough_threads(&self) -> bool {
        self.policy.not_enough_threads(&self.load())
    }

    /// Current counter readings
    pub fn load(&self) -> QueueLoad {
        QueueLoad {
            queued: self.len(),
            running: self.nr_running(),
            waiting: self.nr_waiting(),
            blocked: self.nr_blocked(),
            since_last_change: self.since_last_change(),
        }
    }

    /// Point-in-time snapshot of the queue counters
    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queue: self.id(),
            stopping: self.is_stopping(),
            waiting_jobs: self.len(),
            number_running: self.nr_running(),
            number_waiting: self.nr_waiting(),
            number_blocked: self.nr_blocked(),
        }
    }

    /// Park the calling thread for at most `timeout`.
    ///
    /// The parked count is raised before the park mutex is taken, and the
    /// queue is checked again under the mutex: if work arrived in between,
    /// or shutdown began, the park is aborted.
    pub fn park(&self, timeout: Duration) -> Park {
        self.nr_waiting.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.wait_lock.lock();

        if self.has_ready_jobs() || self.is_stopping() {
            self.nr_waiting.fetch_sub(1, Ordering::SeqCst);
            return Park::Aborted;
        }

        let result = self.wait_cond.wait_for(&mut guard, timeout);
        drop(guard);
        self.nr_waiting.fetch_sub(1, Ordering::SeqCst);

        if result.timed_out() {
            Park::TimedOut
        } else {
            Park::Woken
        }
    }

    /// Wake every parked thread
    pub fn wake_all(&self) {
        let _guard = self.wait_lock.lock();
        self.wait_cond.notify_all();
    }

    /// Start one more worker thread for this queue
    pub fn start_queue_thread(self: &Arc<Self>) -> Result<WorkerId> {
        if self.is_stopping() {
            return Err(DispatchError::shutting_down(self.id()));
        }
        self.reap_stopped_threads();

        let worker = WorkerThread::new(Arc::clone(self));
        let identity = worker.identity();
        let name = worker.name().to_string();

        // held until the handle is recorded, so the thread cannot
        // deregister before it is registered
        let mut started = self.started_threads.lock();
        self.nr_running.fetch_add(1, Ordering::SeqCst);
        self.mark_changed();

        match thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                started.insert(identity, StartedThread { name, handle });
                debug!("queue {}: started worker {}", self.id(), identity);
                Ok(identity)
            }
            Err(e) => {
                self.nr_running.fetch_sub(1, Ordering::SeqCst);
                error!("queue {}: failed to spawn '{}': {}", self.id(), name, e);
                Err(DispatchError::spawn_with_source(
                    name,
                    "could not spawn dispatcher thread",
                    e,
                ))
            }
        }
    }

    /// Deregister a worker at the end of its life. The worker object is
    /// handed back and dropped here; its join handle moves to the stopped
    /// list until [`WorkQueue::reap_stopped_threads`] joins it.
    pub fn remove_started_thread(&self, worker: WorkerThread) {
        let identity = worker.identity();
        let started = self.started_threads.lock().remove(&identity);

        // hand the join handle over before the running count drops
        match started {
            Some(thread) => {
                // receiver lives as long as self
                let _ = self.stopped_tx.send(thread);
            }
            None => error!(
                "queue {}: worker {} was never registered",
                self.id(),
                identity
            ),
        }

        self.nr_running.fetch_sub(1, Ordering::SeqCst);
        self.mark_changed();
        drop(worker);
    }

    /// Join every thread that has deregistered. Returns how many were
    /// joined.
    pub fn reap_stopped_threads(&self) -> usize {
        let mut reaped = 0;
        for thread in self.stopped_rx.try_iter() {
            match thread.handle.join() {
                Ok(WorkerExit::Cancelled(cancel)) => {
                    warn!("thread '{}' unwound by cancellation: {}", thread.name, cancel)
                }
                Ok(exit) => trace!("thread '{}' finished: {:?}", thread.name, exit),
                Err(_) => error!(
                    "{}",
                    DispatchError::join(thread.name, "worker thread panicked")
                ),
            }
            reaped += 1;
        }
        reaped
    }

    /// Stop the pool.
    ///
    /// Sets the shutdown flag (only the first call does anything), keeps
    /// waking parked threads until all have deregistered or the configured
    /// wait is used up, joins the stopped threads, and cancels whatever is
    /// still queued. Returns `false` if shutdown had already begun.
    pub fn begin_shutdown(&self) -> bool {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("queue {}: beginning shutdown", self.id());

        for _ in 0..self.config.shutdown_iterations {
            self.wake_all();
            if self.nr_running() == 0 {
                break;
            }
            thread::sleep(self.config.shutdown_poll);
        }

        let remaining = self.nr_running();
        if remaining > 0 {
            warn!(
                "queue {}: {} threads still running after shutdown wait",
                self.id(),
                remaining
            );
        }
        self.reap_stopped_threads();

        let mut cancelled = 0;
        while let Some(queued) = self.try_pop() {
            let mut job = queued.into_job();
            job.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            info!(
                "queue {}: cancelled {} queued jobs at shutdown",
                self.id(),
                cancelled
            );
        }
        true
    }

    fn has_ready_jobs(&self) -> bool {
        self.number_jobs.load(Ordering::SeqCst) > 0 || !self.ready_jobs.is_empty()
    }

    fn mark_changed(&self) {
        let elapsed = self.created.elapsed().as_micros() as u64;
        self.last_changed_us.store(elapsed, Ordering::Relaxed);
    }

    fn since_last_change(&self) -> Duration {
        let now = self.created.elapsed();
        let changed = Duration::from_micros(self.last_changed_us.load(Ordering::Relaxed));
        now.saturating_sub(changed)
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        while let Some(queued) = self.ready_jobs.pop() {
            let mut job = queued.into_job();
            job.cancel();
        }
    }
}
