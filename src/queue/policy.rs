//! Capacity policies: when a pool should shrink, when it should grow.
//!
//! Both predicates read independently updated atomic counters, so their
//! input may be momentarily skewed (a thread can be counted as waiting
//! before its running state settles). They are capacity signals, not
//! correctness gates: two threads that both see `too_many_threads() == true`
//! will both exit, and the next demand spike spawns replacements.

use crate::queue::QueueConfig;
use std::time::Duration;

/// Counter readings handed to a [`CapacityPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLoad {
    /// Jobs currently queued
    pub queued: usize,
    /// Threads started and not yet deregistered
    pub running: usize,
    /// Threads currently parked
    pub waiting: usize,
    /// Threads that announced a blocking sub-operation
    pub blocked: isize,
    /// Time since the thread count last changed or a shrink was granted
    pub since_last_change: Duration,
}

/// Decides when a pool has too many or too few threads.
///
/// Any `Fn(&QueueLoad) -> bool` closure is a policy whose
/// `too_many_threads` is the closure and which never asks for more threads.
pub trait CapacityPolicy: Send + Sync {
    /// Whether a worker that just woke from parking should exit
    fn too_many_threads(&self, load: &QueueLoad) -> bool;

    /// Whether submitting a job should start an additional thread
    fn not_enough_threads(&self, load: &QueueLoad) -> bool {
        let _ = load;
        false
    }
}

impl<F> CapacityPolicy for F
where
    F: Fn(&QueueLoad) -> bool + Send + Sync,
{
    fn too_many_threads(&self, load: &QueueLoad) -> bool {
        self(load)
    }
}

/// Default policy: keep `nr_threads` threads plus one per blocked thread,
/// never exceeding `max_threads`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadCountPolicy {
    nr_threads: usize,
    max_threads: usize,
    grace_period: Duration,
}

impl ThreadCountPolicy {
    /// Create a policy
    pub fn new(nr_threads: usize, max_threads: usize, grace_period: Duration) -> Self {
        Self {
            nr_threads,
            max_threads,
            grace_period,
        }
    }

    /// Create the policy described by a queue configuration
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.nr_threads,
            config.resolved_max_threads(),
            config.shrink_grace_period,
        )
    }
}

impl CapacityPolicy for ThreadCountPolicy {
    fn too_many_threads(&self, load: &QueueLoad) -> bool {
        let wanted = self.nr_threads + load.blocked.max(0) as usize;
        wanted < load.running && load.since_last_change >= self.grace_period
    }

    fn not_enough_threads(&self, load: &QueueLoad) -> bool {
        if load.running >= self.max_threads {
            return false;
        }
        load.running < self.nr_threads || load.running as isize <= load.blocked
    }
}
