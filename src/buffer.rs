// ===============================
// src/buffer.rs
// ===============================
//
// Batas executor TERMINATED yang masih disimpan di memori sebelum di-store.
// Kapasitas memakai konstanta tetap, bukan `closed_executor_buffer_size`
// (field itu milik storage layer).
//
use std::cmp::Reverse;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{Action, ExecutorInfo};
use crate::error::ControllerError;

/// Terminated executors kept pending before disposal.
pub const EXECUTORS_BUFFER: usize = 5;

/// Which executors get disposed once the buffer overflows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BufferPolicy {
    /// Overflow is decided on the terminated count, but disposal slices the raw
    /// snapshot from index `capacity` on (every status, snapshot order).
    #[default]
    SnapshotIndex,
    /// Keep the `capacity` most recently closed terminated executors and dispose
    /// of the older ones, most recent first.
    OldestClosed,
}

impl FromStr for BufferPolicy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snapshot-index" | "snapshot_index" => Ok(BufferPolicy::SnapshotIndex),
            "oldest-closed" | "oldest_closed" => Ok(BufferPolicy::OldestClosed),
            other => Err(ControllerError::Validation(format!("unknown buffer policy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorBuffer {
    capacity: usize,
    policy: BufferPolicy,
}

impl Default for ExecutorBuffer {
    fn default() -> Self { Self::new(BufferPolicy::default()) }
}

impl ExecutorBuffer {
    pub fn new(policy: BufferPolicy) -> Self { Self { capacity: EXECUTORS_BUFFER, policy } }

    pub fn with_capacity(capacity: usize, policy: BufferPolicy) -> Self { Self { capacity, policy } }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn policy(&self) -> BufferPolicy { self.policy }

    /// Stop actions for executors that fall out of the buffer.
    pub fn store_actions(&self, executors: &[ExecutorInfo]) -> Vec<Action> {
        let mut terminated: Vec<&ExecutorInfo> = executors.iter().filter(|e| e.is_terminated()).collect();
        // stable sort: ties keep snapshot order
        terminated.sort_by_key(|e| Reverse(e.closed_at_ms));

        if terminated.len() <= self.capacity {
            return Vec::new();
        }
        match self.policy {
            BufferPolicy::SnapshotIndex => executors[self.capacity..].iter().map(|e| Action::stop(&e.id)).collect(),
            BufferPolicy::OldestClosed => terminated[self.capacity..].iter().map(|e| Action::stop(&e.id)).collect(),
        }
    }
}
