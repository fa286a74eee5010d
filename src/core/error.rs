//! Error types for the dispatcher

/// Result type for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur while configuring or driving the dispatcher.
///
/// Failures of the jobs themselves are never reported through this type;
/// see [`crate::core::fault`] for the job failure taxonomy.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// A queue with this id is already registered
    #[error("Queue '{queue}' already exists")]
    QueueExists {
        /// Display form of the queue id
        queue: String,
    },

    /// No queue with this id is registered
    #[error("Queue '{queue}' is not known to the dispatcher")]
    UnknownQueue {
        /// Display form of the queue id
        queue: String,
    },

    /// Queue is full with capacity details
    #[error("Job queue is full: {current}/{max} jobs queued")]
    QueueFull {
        /// Current queue size
        current: usize,
        /// Maximum queue size
        max: usize,
    },

    /// Queue is shutting down and accepts no more jobs
    #[error("Queue '{queue}' is shutting down")]
    ShuttingDown {
        /// Display form of the queue id
        queue: String,
    },

    /// Failed to spawn a worker thread with details
    #[error("Failed to spawn worker thread '{thread_name}': {message}")]
    SpawnError {
        /// Name the thread would have carried
        thread_name: String,
        /// Error message
        message: String,
        /// Source IO error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Failed to join a stopped worker thread
    #[error("Failed to join worker thread '{thread_name}': {message}")]
    JoinError {
        /// Name of the thread
        thread_name: String,
        /// Error message
        message: String,
    },

    /// Invalid configuration with parameter
    #[error("Invalid configuration for '{parameter}': {message}")]
    InvalidConfig {
        /// Configuration parameter name
        parameter: String,
        /// Error message
        message: String,
    },

    /// Config or status (de)serialization failed
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error
    #[error("{0}")]
    Other(String),
}

impl DispatchError {
    /// Create a queue exists error
    pub fn queue_exists(queue: impl ToString) -> Self {
        DispatchError::QueueExists {
            queue: queue.to_string(),
        }
    }

    /// Create an unknown queue error
    pub fn unknown_queue(queue: impl ToString) -> Self {
        DispatchError::UnknownQueue {
            queue: queue.to_string(),
        }
    }

    /// Create a queue full error
    pub fn queue_full(current: usize, max: usize) -> Self {
        DispatchError::QueueFull { current, max }
    }

    /// Create a shutting down error
    pub fn shutting_down(queue: impl ToString) -> Self {
        DispatchError::ShuttingDown {
            queue: queue.to_string(),
        }
    }

    /// Create a spawn error with source
    pub fn spawn_with_source(
        thread_name: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        DispatchError::SpawnError {
            thread_name: thread_name.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a join error
    pub fn join(thread_name: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::JoinError {
            thread_name: thread_name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::InvalidConfig {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DispatchError::Other(msg.into())
    }
}
