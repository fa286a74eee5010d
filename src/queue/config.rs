//! Queue configuration

use crate::core::{DispatchError, Result};
use crate::queue::QueueId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one dispatcher queue and the threads serving it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pool identity, used for display and thread naming
    pub id: QueueId,
    /// Steady-state number of worker threads (0 = number of CPUs)
    pub nr_threads: usize,
    /// Hard cap on running threads, including compensating ones
    /// (0 = four times `nr_threads`)
    pub max_threads: usize,
    /// Maximum number of queued jobs (0 = unbounded)
    pub max_queue_size: usize,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// How long a worker stays hot after its last job before it parks.
    /// Default: 200ms
    pub idle_grace: Duration,
    /// Base unit of the staggered park timeout. Default: 100ms
    pub park_timeout_unit: Duration,
    /// Number of distinct park timeouts threads are spread over. Default: 9
    pub park_buckets: u64,
    /// Upper bound of the randomized micro-sleep. Default: 19µs
    pub max_micro_sleep: Duration,
    /// Minimum time between two thread-count changes before a worker is
    /// allowed to shrink away. Default: 5s
    pub shrink_grace_period: Duration,
    /// How many times shutdown wakes parked threads and checks whether all
    /// of them are gone. Default: 100
    pub shutdown_iterations: usize,
    /// Pause between two shutdown checks. Default: 10ms
    pub shutdown_poll: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            id: QueueId::STANDARD,
            nr_threads: num_cpus::get(),
            max_threads: 0,
            max_queue_size: 0,
            thread_name_prefix: "dispatcher".to_string(),
            idle_grace: Duration::from_millis(200),
            park_timeout_unit: Duration::from_millis(100),
            park_buckets: 9,
            max_micro_sleep: Duration::from_micros(19),
            shrink_grace_period: Duration::from_secs(5),
            shutdown_iterations: 100,
            shutdown_poll: Duration::from_millis(10),
        }
    }
}

impl QueueConfig {
    /// Create a configuration for the queue `id` with default settings
    #[must_use]
    pub fn new(id: QueueId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        if config.nr_threads == 0 {
            config.nr_threads = num_cpus::get();
        }
        config.validate()?;
        Ok(config)
    }

    /// Serialize this configuration to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set the steady-state thread count (0 = number of CPUs)
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_threads(mut self, nr_threads: usize) -> Self {
        self.nr_threads = if nr_threads == 0 {
            num_cpus::get()
        } else {
            nr_threads
        };
        self
    }

    /// Set the hard cap on running threads
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set maximum queue size
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the idle grace window
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }

    /// Set the park timeout unit and the number of stagger buckets.
    ///
    /// A thread with identity `n` parks for `unit * (1 + n % buckets)`.
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_park_timeout(mut self, unit: Duration, buckets: u64) -> Self {
        self.park_timeout_unit = unit;
        self.park_buckets = buckets;
        self
    }

    /// Set the upper bound of the micro-sleep
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_max_micro_sleep(mut self, max: Duration) -> Self {
        self.max_micro_sleep = max;
        self
    }

    /// Set the shrink grace period
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_shrink_grace_period(mut self, period: Duration) -> Self {
        self.shrink_grace_period = period;
        self
    }

    /// Set how long shutdown waits for threads: `iterations` checks,
    /// `poll` apart
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_shutdown_wait(mut self, iterations: usize, poll: Duration) -> Self {
        self.shutdown_iterations = iterations;
        self.shutdown_poll = poll;
        self
    }

    /// Effective cap on running threads
    pub fn resolved_max_threads(&self) -> usize {
        if self.max_threads == 0 {
            self.nr_threads.saturating_mul(4)
        } else {
            self.max_threads
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.nr_threads == 0 {
            return Err(DispatchError::invalid_config(
                "nr_threads",
                "Number of threads must be greater than 0",
            ));
        }
        if self.resolved_max_threads() < self.nr_threads {
            return Err(DispatchError::invalid_config(
                "max_threads",
                format!(
                    "max_threads ({}) must not be below nr_threads ({})",
                    self.max_threads, self.nr_threads
                ),
            ));
        }
        if self.park_buckets == 0 {
            return Err(DispatchError::invalid_config(
                "park_buckets",
                "At least one park timeout bucket is required",
            ));
        }
        if self.park_timeout_unit.is_zero() {
            return Err(DispatchError::invalid_config(
                "park_timeout_unit",
                "Park timeout unit must be non-zero",
            ));
        }
        if self.shutdown_iterations == 0 {
            return Err(DispatchError::invalid_config(
                "shutdown_iterations",
                "Shutdown must wake parked threads at least once",
            ));
        }
        if self.max_micro_sleep.is_zero() {
            return Err(DispatchError::invalid_config(
                "max_micro_sleep",
                "Micro-sleep bound must be non-zero",
            ));
        }
        Ok(())
    }
}
