//! Two-lane in-memory job queue.
//!
//! Jobs enter the standard lane and may be promoted to the express lane.
//! Express is always drained first; both lanes are FIFO. A job key appears
//! at most once across both lanes.

use autotest_core::JobKey;
use autotest_core::grading::ContainerInput;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Standard,
    Express,
}

/// A job waiting for a free container slot.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub key: JobKey,
    pub input: ContainerInput,
    pub enqueued_at: DateTime<Utc>,
    pub lane: Lane,
}

impl QueueEntry {
    pub fn new(input: ContainerInput) -> Self {
        Self {
            key: input.job_key(),
            input,
            enqueued_at: Utc::now(),
            lane: Lane::Standard,
        }
    }
}

#[derive(Debug, Default)]
pub struct JobQueue {
    express: VecDeque<QueueEntry>,
    standard: VecDeque<QueueEntry>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the standard lane. Returns false if the key is already queued.
    pub fn enqueue(&mut self, mut entry: QueueEntry) -> bool {
        if self.contains(&entry.key) {
            return false;
        }
        entry.lane = Lane::Standard;
        self.standard.push_back(entry);
        true
    }

    /// Move a standard-lane job to the back of the express lane.
    /// Returns false if the key is not on the standard lane.
    pub fn promote(&mut self, key: &JobKey) -> bool {
        let Some(pos) = self.standard.iter().position(|e| &e.key == key) else {
            return false;
        };
        let Some(mut entry) = self.standard.remove(pos) else {
            return false;
        };
        entry.lane = Lane::Express;
        self.express.push_back(entry);
        true
    }

    /// Take the next job, express before standard.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.express
            .pop_front()
            .or_else(|| self.standard.pop_front())
    }

    pub fn lane_of(&self, key: &JobKey) -> Option<Lane> {
        if self.express.iter().any(|e| &e.key == key) {
            Some(Lane::Express)
        } else if self.standard.iter().any(|e| &e.key == key) {
            Some(Lane::Standard)
        } else {
            None
        }
    }

    pub fn contains(&self, key: &JobKey) -> bool {
        self.lane_of(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.express.len() + self.standard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn express_keys(&self) -> Vec<JobKey> {
        self.express.iter().map(|e| e.key.clone()).collect()
    }

    pub fn standard_keys(&self) -> Vec<JobKey> {
        self.standard.iter().map(|e| e.key.clone()).collect()
    }
}
