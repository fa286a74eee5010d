//! Dispatcher: owns the queues and their worker threads

use crate::core::{ClosureJob, DispatchError, FaultResult, Job, JobId, Result};
use crate::queue::{CapacityPolicy, DispatcherStatus, QueueConfig, QueueId, WorkQueue};
use log::info;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owner of every [`WorkQueue`] in the process, at most one per queue id.
///
/// The dispatcher starts each queue's initial threads; from then on a queue
/// grows itself when jobs arrive and blocked threads leave it short, and
/// its threads shrink themselves when idle.
///
/// # Example
///
/// ```rust
/// use rust_dispatcher::prelude::*;
///
/// # fn main() -> Result<()> {
/// let dispatcher = Dispatcher::new();
/// dispatcher.add_queue(QueueConfig::new(QueueId::STANDARD).with_threads(2))?;
/// dispatcher.start()?;
///
/// dispatcher.execute(QueueId::STANDARD, "hello", || {
///     println!("hello from the pool");
///     Ok(())
/// })?;
///
/// dispatcher.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher {
    queues: RwLock<BTreeMap<QueueId, Arc<WorkQueue>>>,
    stopping: AtomicBool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queues", &self.queues.read().keys().collect::<Vec<_>>())
            .field("stopping", &self.stopping.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create a dispatcher without queues
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(BTreeMap::new()),
            stopping: AtomicBool::new(false),
        }
    }

    /// Create a started dispatcher with only the standard queue
    pub fn with_standard_queue(nr_threads: usize) -> Result<Self> {
        let dispatcher = Self::new();
        dispatcher.add_queue(QueueConfig::new(QueueId::STANDARD).with_threads(nr_threads))?;
        dispatcher.start()?;
        Ok(dispatcher)
    }

    /// Register a queue with the default capacity policy
    pub fn add_queue(&self, config: QueueConfig) -> Result<Arc<WorkQueue>> {
        self.insert_queue(config.id, || WorkQueue::new(config))
    }

    /// Register a queue with a custom capacity policy
    pub fn add_queue_with_policy<P>(&self, config: QueueConfig, policy: P) -> Result<Arc<WorkQueue>>
    where
        P: CapacityPolicy + 'static,
    {
        self.insert_queue(config.id, || WorkQueue::with_policy(config, policy))
    }

    fn insert_queue<F>(&self, id: QueueId, build: F) -> Result<Arc<WorkQueue>>
    where
        F: FnOnce() -> Result<Arc<WorkQueue>>,
    {
        if self.is_stopping() {
            return Err(DispatchError::shutting_down(id));
        }
        let mut queues = self.queues.write();
        if queues.contains_key(&id) {
            return Err(DispatchError::queue_exists(id));
        }
        let queue = build()?;
        queues.insert(id, Arc::clone(&queue));
        Ok(queue)
    }

    /// Look up a queue
    pub fn queue(&self, id: QueueId) -> Option<Arc<WorkQueue>> {
        self.queues.read().get(&id).cloned()
    }

    /// Start the configured number of threads on every queue that is short
    /// of them
    pub fn start(&self) -> Result<()> {
        if self.is_stopping() {
            return Err(DispatchError::other("Dispatcher has been shut down"));
        }
        for queue in self.queues.read().values() {
            let wanted = queue.config().nr_threads;
            for _ in queue.nr_running()..wanted {
                queue.start_queue_thread()?;
            }
            info!("queue {}: started with {} threads", queue.id(), wanted);

            #[cfg(feature = "tracing")]
            crate::tracing::metrics::record_pool_start(queue.id().get(), wanted);
        }
        Ok(())
    }

    /// Submit a job to the queue `id`
    pub fn add_job<J: Job + 'static>(&self, id: QueueId, job: J) -> Result<JobId> {
        let queue = self
            .queue(id)
            .ok_or_else(|| DispatchError::unknown_queue(id))?;
        queue.add_job(Box::new(job))
    }

    /// Submit a closure to the queue `id`
    pub fn execute<F, S>(&self, id: QueueId, name: S, f: F) -> Result<JobId>
    where
        F: FnOnce() -> FaultResult + Send + 'static,
        S: Into<String>,
    {
        self.add_job(id, ClosureJob::with_name(f, name))
    }

    /// Snapshot of every queue
    pub fn status(&self) -> DispatcherStatus {
        DispatcherStatus {
            queues: self.queues.read().values().map(|q| q.status()).collect(),
        }
    }

    /// Whether shutdown has begun
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Shut every queue down. Idempotent.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        let queues: Vec<_> = self.queues.read().values().cloned().collect();
        for queue in queues {
            queue.begin_shutdown();

            #[cfg(feature = "tracing")]
            crate::tracing::metrics::record_pool_shutdown(queue.id().get(), queue.nr_running());
        }
        info!("dispatcher shut down");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueLoad;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::{Duration, Instant};

    fn config(id: u64, threads: usize) -> QueueConfig {
        QueueConfig::new(QueueId::new(id))
            .with_threads(threads)
            .with_idle_grace(Duration::from_millis(5))
            .with_park_timeout(Duration::from_millis(10), 3)
            .with_shutdown_wait(200, Duration::from_millis(5))
    }

    #[test]
    fn test_one_queue_per_id() {
        let dispatcher = Dispatcher::new();
        dispatcher.add_queue(config(1, 1)).unwrap();
        let err = dispatcher.add_queue(config(1, 2)).unwrap_err();
        assert!(matches!(err, DispatchError::QueueExists { .. }));
    }

    #[test]
    fn test_unknown_queue() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .execute(QueueId::new(9), "lost", || Ok(()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownQueue { .. }));
    }

    #[test]
    fn test_start_spawns_configured_threads() {
        let dispatcher = Dispatcher::new();
        let queue = dispatcher
            .add_queue_with_policy(config(2, 3), |_: &QueueLoad| false)
            .unwrap();
        dispatcher.start().unwrap();
        assert_eq!(queue.nr_running(), 3);

        // second start does not add threads
        dispatcher.start().unwrap();
        assert_eq!(queue.nr_running(), 3);

        dispatcher.shutdown();
        assert_eq!(queue.nr_running(), 0);
    }

    #[test]
    fn test_jobs_routed_to_their_queue() {
        let dispatcher = Dispatcher::new();
        dispatcher.add_queue(config(3, 1)).unwrap();
        dispatcher.add_queue(config(4, 1)).unwrap();
        dispatcher.start().unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for id in [3, 4] {
            let seen = Arc::clone(&seen);
            dispatcher
                .execute(QueueId::new(id), "where-am-i", move || {
                    let queue = crate::pool::current_worker().map(|ctx| ctx.queue_id());
                    seen.lock().push((id, queue));
                    Ok(())
                })
                .unwrap();
        }

        let start = Instant::now();
        while seen.lock().len() < 2 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        dispatcher.shutdown();

        let mut seen = seen.lock().clone();
        seen.sort();
        assert_eq!(
            seen,
            vec![(3, Some(QueueId::new(3))), (4, Some(QueueId::new(4)))]
        );
    }

    #[test]
    fn test_status_lists_queues_in_id_order() {
        let dispatcher = Dispatcher::new();
        dispatcher.add_queue(config(12, 1)).unwrap();
        dispatcher.add_queue(config(11, 1)).unwrap();

        let status = dispatcher.status();
        let ids: Vec<_> = status.queues.iter().map(|q| q.queue).collect();
        assert_eq!(ids, vec![QueueId::new(11), QueueId::new(12)]);
        assert!(status.queues.iter().all(|q| !q.stopping));
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let dispatcher = Dispatcher::with_standard_queue(1).unwrap();
        dispatcher.shutdown();
        dispatcher.shutdown();

        let err = dispatcher
            .execute(QueueId::STANDARD, "late", || Ok(()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::ShuttingDown { .. }));
        assert!(matches!(
            dispatcher.add_queue(config(30, 1)),
            Err(DispatchError::ShuttingDown { .. })
        ));
        assert!(dispatcher.status().queues[0].stopping);
    }

    #[test]
    fn test_blocked_threads_get_compensated() {
        let dispatcher = Dispatcher::new();
        let queue = dispatcher
            .add_queue(config(40, 1).with_max_threads(2))
            .unwrap();
        dispatcher.start().unwrap();

        let release = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let release_clone = Arc::clone(&release);
        let done_clone = Arc::clone(&done);
        dispatcher
            .execute(QueueId::new(40), "blocker", move || {
                let _blocked = crate::pool::block_current();
                while release_clone.load(Ordering::SeqCst) == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
                done_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let start = Instant::now();
        while queue.nr_blocked() == 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }

        // the only thread is blocked; the next job starts a second one
        let done_clone = Arc::clone(&done);
        dispatcher
            .execute(QueueId::new(40), "follower", move || {
                done_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let start = Instant::now();
        while done.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(queue.nr_running(), 2);

        release.store(1, Ordering::SeqCst);
        dispatcher.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(queue.nr_blocked(), 0);
    }
}
