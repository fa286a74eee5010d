//! Point-in-time status snapshots for monitoring and administration.
//!
//! Snapshots read the queue's atomic counters one by one; each value may be
//! stale by the time it is looked at, and the values need not be consistent
//! with each other.

use crate::core::Result;
use crate::pool::WorkerId;
use crate::queue::QueueId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one queue's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Pool id
    pub queue: QueueId,
    /// Whether shutdown has begun
    pub stopping: bool,
    /// Jobs currently enqueued
    pub waiting_jobs: usize,
    /// Threads started and not yet deregistered
    pub number_running: usize,
    /// Threads currently parked
    pub number_waiting: usize,
    /// Threads inside an announced blocking operation
    pub number_blocked: isize,
}

impl QueueStatus {
    /// Render as a JSON object with the fixed monitoring field names
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Status of one worker thread, with its queue's counters inlined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    /// Thread name
    pub name: String,
    /// Worker identity
    pub identity: WorkerId,
    /// When the worker thread was created
    pub started_at: DateTime<Utc>,
    /// Counters of the queue the worker serves
    #[serde(flatten)]
    pub queue: QueueStatus,
}

impl WorkerStatus {
    /// Render as a JSON object
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Status of every queue owned by a dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStatus {
    /// One entry per queue, ordered by queue id
    pub queues: Vec<QueueStatus>,
}

impl DispatcherStatus {
    /// Render as a JSON object
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Total jobs waiting across all queues
    pub fn total_waiting_jobs(&self) -> usize {
        self.queues.iter().map(|q| q.waiting_jobs).sum()
    }
}
