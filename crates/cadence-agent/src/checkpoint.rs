//! Checkpoints for suspended runs.
//!
//! A run that reaches the human node is saved here under its thread id and
//! picked up again by `Engine::resume`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::state::RunState;

/// A suspended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: RunState,
    pub config: RunConfig,
    pub suspended_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(state: RunState, config: RunConfig) -> Self {
        Self {
            state,
            config,
            suspended_at: Utc::now(),
        }
    }
}

/// Concurrent thread id → checkpoint map.  Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    inner: Arc<DashMap<String, Checkpoint>>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save a checkpoint, replacing any earlier one for the thread.
    pub fn save(&self, thread_id: impl Into<String>, checkpoint: Checkpoint) {
        let thread_id = thread_id.into();
        tracing::debug!(thread_id = %thread_id, "checkpoint saved");
        self.inner.insert(thread_id, checkpoint);
    }

    /// Remove and return the checkpoint for a thread.
    pub fn take(&self, thread_id: &str) -> Option<Checkpoint> {
        self.inner.remove(thread_id).map(|(_, checkpoint)| checkpoint)
    }

    /// Copy of the checkpoint for a thread, leaving it in place.
    pub fn get(&self, thread_id: &str) -> Option<Checkpoint> {
        self.inner.get(thread_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.inner.contains_key(thread_id)
    }

    /// Thread ids with a suspended run, sorted.
    pub fn thread_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
