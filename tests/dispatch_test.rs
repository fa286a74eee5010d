//! End-to-end scheduling and failure-containment scenarios

use parking_lot::Mutex;
use rust_dispatcher::prelude::*;
use rust_dispatcher::queue::QueueLoad;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_config(id: u64, threads: usize) -> QueueConfig {
    QueueConfig::new(QueueId::new(id))
        .with_threads(threads)
        .with_idle_grace(Duration::from_millis(5))
        .with_park_timeout(Duration::from_millis(10), 5)
        .with_shutdown_wait(300, Duration::from_millis(5))
}

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Default)]
struct Counters {
    work: AtomicUsize,
    cleanup: AtomicUsize,
    errors: Mutex<Vec<JobError>>,
}

/// A job that records every action and fails as instructed
struct Recorded {
    name: String,
    counters: Arc<Counters>,
    work: fn() -> FaultResult,
    handler: fn() -> FaultResult,
    cleanup: fn() -> FaultResult,
}

fn ok() -> FaultResult {
    Ok(())
}

impl Recorded {
    fn new(name: &str, counters: &Arc<Counters>) -> Self {
        Self {
            name: name.to_string(),
            counters: Arc::clone(counters),
            work: ok,
            handler: ok,
            cleanup: ok,
        }
    }

    fn failing_work(mut self, f: fn() -> FaultResult) -> Self {
        self.work = f;
        self
    }

    fn failing_handler(mut self, f: fn() -> FaultResult) -> Self {
        self.handler = f;
        self
    }

    fn failing_cleanup(mut self, f: fn() -> FaultResult) -> Self {
        self.cleanup = f;
        self
    }
}

impl Job for Recorded {
    fn name(&self) -> &str {
        &self.name
    }

    fn work(&mut self) -> FaultResult {
        self.counters.work.fetch_add(1, Ordering::SeqCst);
        (self.work)()
    }

    fn handle_error(&mut self, error: &JobError) -> FaultResult {
        self.counters.errors.lock().push(error.clone());
        (self.handler)()
    }

    fn cleanup(&mut self, _queue: &WorkQueue) -> FaultResult {
        self.counters.cleanup.fetch_add(1, Ordering::SeqCst);
        (self.cleanup)()
    }
}

#[test]
fn test_five_jobs_two_threads() {
    init_logging();
    let dispatcher = Dispatcher::new();
    let queue = dispatcher.add_queue(fast_config(1, 2)).unwrap();
    dispatcher.start().unwrap();

    let counters = Arc::new(Counters::default());
    for i in 0..5 {
        dispatcher
            .add_job(queue.id(), Recorded::new(&format!("job-{}", i), &counters))
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        counters.cleanup.load(Ordering::SeqCst) == 5
    }));
    assert_eq!(counters.work.load(Ordering::SeqCst), 5);
    assert!(counters.errors.lock().is_empty());
    assert_eq!(queue.len(), 0);

    dispatcher.shutdown();
    assert_eq!(queue.nr_running(), 0);
    assert_eq!(queue.nr_waiting(), 0);
    assert_eq!(counters.work.load(Ordering::SeqCst), 5);
}

#[test]
fn test_domain_error_reaches_handler() {
    init_logging();
    let dispatcher = Dispatcher::new();
    let queue = dispatcher.add_queue(fast_config(2, 1)).unwrap();
    dispatcher.start().unwrap();

    let counters = Arc::new(Counters::default());
    dispatcher
        .add_job(
            queue.id(),
            Recorded::new("domain", &counters).failing_work(|| Err(Fault::domain(1203, "collection not found"))),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        counters.cleanup.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(
        *counters.errors.lock(),
        vec![JobError::Domain(DomainError::new(1203, "collection not found"))]
    );
    dispatcher.shutdown();
}

#[test]
fn test_unrecognized_fault_is_contained_while_running() {
    init_logging();
    let dispatcher = Dispatcher::new();
    let queue = dispatcher
        .add_queue_with_policy(fast_config(3, 1), |_: &QueueLoad| false)
        .unwrap();
    dispatcher.start().unwrap();

    let counters = Arc::new(Counters::default());
    dispatcher
        .add_job(
            queue.id(),
            Recorded::new("panics", &counters).failing_work(|| panic!("segfault-ish")),
        )
        .unwrap();
    dispatcher
        .add_job(
            queue.id(),
            Recorded::new("unknown", &counters).failing_work(|| Err(Fault::unrecognized("???"))),
        )
        .unwrap();
    dispatcher
        .add_job(queue.id(), Recorded::new("after", &counters))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        counters.cleanup.load(Ordering::SeqCst) == 3
    }));
    let errors = counters.errors.lock().clone();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.kind() == ErrorKind::Internal));
    // the same single thread survived both faults
    assert_eq!(queue.nr_running(), 1);
    dispatcher.shutdown();
}

#[test]
fn test_failing_handler_and_cleanup_do_not_stop_the_pool() {
    init_logging();
    let dispatcher = Dispatcher::new();
    let queue = dispatcher
        .add_queue_with_policy(fast_config(4, 1), |_: &QueueLoad| false)
        .unwrap();
    dispatcher.start().unwrap();

    let counters = Arc::new(Counters::default());
    dispatcher
        .add_job(
            queue.id(),
            Recorded::new("bad-handler", &counters)
                .failing_work(|| Err(Fault::runtime("first")))
                .failing_handler(|| panic!("handler exploded")),
        )
        .unwrap();
    dispatcher
        .add_job(
            queue.id(),
            Recorded::new("bad-cleanup", &counters).failing_cleanup(|| Err(Fault::resource_exhausted("oom"))),
        )
        .unwrap();
    dispatcher
        .add_job(queue.id(), Recorded::new("fine", &counters))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        counters.cleanup.load(Ordering::SeqCst) == 3
    }));
    assert_eq!(counters.work.load(Ordering::SeqCst), 3);
    assert_eq!(queue.nr_running(), 1);
    dispatcher.shutdown();
}

#[test]
fn test_no_job_started_after_shutdown() {
    init_logging();
    let dispatcher = Dispatcher::new();
    let queue = dispatcher
        .add_queue_with_policy(fast_config(5, 1), |_: &QueueLoad| false)
        .unwrap();
    dispatcher.start().unwrap();

    let in_flight = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let in_flight_clone = Arc::clone(&in_flight);
    let finished_clone = Arc::clone(&finished);
    dispatcher
        .execute(queue.id(), "slow", move || {
            in_flight_clone.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            finished_clone.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || in_flight.load(Ordering::SeqCst)));

    let counters = Arc::new(Counters::default());
    for i in 0..3 {
        dispatcher
            .add_job(queue.id(), Recorded::new(&format!("late-{}", i), &counters))
            .unwrap();
    }

    dispatcher.shutdown();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(counters.work.load(Ordering::SeqCst), 0);
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.nr_running(), 0);
}

#[test]
fn test_unrecognized_fault_during_shutdown_unwinds() {
    init_logging();
    let dispatcher = Dispatcher::new();
    let queue = dispatcher
        .add_queue_with_policy(fast_config(6, 1), |_: &QueueLoad| false)
        .unwrap();
    dispatcher.start().unwrap();

    let counters = Arc::new(Counters::default());
    let started = Arc::new(AtomicBool::new(false));
    let started_clone = Arc::clone(&started);

    struct UntilStopped {
        started: Arc<AtomicBool>,
        inner: Recorded,
    }

    impl Job for UntilStopped {
        fn name(&self) -> &str {
            "until-stopped"
        }

        fn work(&mut self) -> FaultResult {
            self.inner.counters.work.fetch_add(1, Ordering::SeqCst);
            self.started.store(true, Ordering::SeqCst);
            let ctx = current_worker().expect("runs on a worker");
            while !ctx.queue().is_stopping() {
                thread::sleep(Duration::from_millis(1));
            }
            Err(Fault::unrecognized("thread cancelled"))
        }

        fn handle_error(&mut self, error: &JobError) -> FaultResult {
            self.inner.handle_error(error)
        }

        fn cleanup(&mut self, queue: &WorkQueue) -> FaultResult {
            self.inner.cleanup(queue)
        }
    }

    dispatcher
        .add_job(
            queue.id(),
            UntilStopped {
                started: started_clone,
                inner: Recorded::new("inner", &counters),
            },
        )
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst)));

    dispatcher.shutdown();

    assert_eq!(queue.nr_running(), 0);
    assert_eq!(counters.work.load(Ordering::SeqCst), 1);
    assert!(counters.errors.lock().is_empty());
    assert_eq!(counters.cleanup.load(Ordering::SeqCst), 0);
}

#[test]
fn test_parked_thread_exits_on_shutdown() {
    init_logging();
    let config = fast_config(7, 2).with_park_timeout(Duration::from_millis(500), 2);
    let dispatcher = Dispatcher::new();
    let queue = dispatcher
        .add_queue_with_policy(config, |_: &QueueLoad| false)
        .unwrap();
    dispatcher.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || queue.nr_waiting() == 2));

    let start = Instant::now();
    dispatcher.shutdown();
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(queue.nr_running(), 0);
    assert_eq!(queue.nr_waiting(), 0);
    assert!(queue.status().stopping);
}

#[test]
fn test_no_lost_wakeups() {
    init_logging();
    // a missed signal would cost a full ten second park
    let config = fast_config(8, 1)
        .with_idle_grace(Duration::from_micros(200))
        .with_park_timeout(Duration::from_secs(10), 1);
    let dispatcher = Dispatcher::new();
    let queue = dispatcher
        .add_queue_with_policy(config, |_: &QueueLoad| false)
        .unwrap();
    dispatcher.start().unwrap();

    let done = Arc::new(AtomicUsize::new(0));
    for round in 0..200 {
        let done_clone = Arc::clone(&done);
        dispatcher
            .execute(queue.id(), "ping", move || {
                done_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || done.load(Ordering::SeqCst) == round + 1),
            "job {} stranded",
            round
        );
        // vary the phase at which the next job lands
        if round % 3 == 0 {
            thread::sleep(Duration::from_micros(150 + (round as u64 % 7) * 20));
        }
    }

    dispatcher.shutdown();
}

#[test]
fn test_shrink_removes_exactly_one_thread() {
    init_logging();
    let grant = Arc::new(AtomicBool::new(true));
    let grant_clone = Arc::clone(&grant);
    let dispatcher = Dispatcher::new();
    let queue = dispatcher
        .add_queue_with_policy(fast_config(9, 3), move |_: &QueueLoad| {
            grant_clone.swap(false, Ordering::SeqCst)
        })
        .unwrap();
    dispatcher.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || queue.nr_running() == 2));
    thread::sleep(Duration::from_millis(100));
    let status = queue.status();
    assert_eq!(status.number_running, 2);
    assert!(status.number_waiting <= 2);

    dispatcher.shutdown();
    assert_eq!(queue.nr_running(), 0);
}

#[test]
fn test_status_json_field_names() {
    init_logging();
    let dispatcher = Dispatcher::new();
    let queue = dispatcher.add_queue(fast_config(10, 1)).unwrap();

    let value = queue.status().to_json().unwrap();
    for field in [
        "queue",
        "stopping",
        "waitingJobs",
        "numberRunning",
        "numberWaiting",
        "numberBlocked",
    ] {
        assert!(value.get(field).is_some(), "missing {}", field);
    }
    assert_eq!(value["queue"], 10);
}

#[test]
fn test_worker_status_from_inside_a_job() {
    init_logging();
    let dispatcher = Dispatcher::new();
    let queue = dispatcher.add_queue(fast_config(11, 1)).unwrap();
    dispatcher.start().unwrap();

    let captured = Arc::new(Mutex::new(None));
    let captured_clone = Arc::clone(&captured);
    dispatcher
        .execute(queue.id(), "introspect", move || {
            let status = current_worker().map(|ctx| ctx.status());
            *captured_clone.lock() = status;
            Ok(())
        })
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || captured.lock().is_some()));
    let status = captured.lock().clone().unwrap();
    assert!(status.name.starts_with("dispatcher-11-"));
    assert_eq!(status.queue.queue, QueueId::new(11));
    assert_eq!(status.queue.number_running, 1);

    dispatcher.shutdown();
    assert!(current_worker().is_none());
}
