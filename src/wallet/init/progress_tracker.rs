//! Progress tracking for batch wallet initialization.
//!
//! This module provides the `InitializationTracker`, which owns the per-agent state of one
//! initialization batch. Every agent starts out pending and moves exactly once, to either
//! initialized or failed; snapshots taken at any point satisfy
//! `initialized + pending + failed == total`.

use serde::Serialize;
use tracing::{info, warn};

/// Snapshot of a batch initialization
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializationProgress {
    /// Agents with a resolved wallet, in settlement order
    pub initialized: Vec<String>,
    /// Agents still resolving
    pub pending: Vec<String>,
    /// Agents whose resolution did not complete
    pub failed: Vec<String>,
    /// Agents that were already cached when the batch started (subset of `initialized`)
    pub cached: Vec<String>,
    /// `round(initialized / total * 100)`; 100 for an empty batch
    pub percent: u8,
    pub total: usize,
}

impl InitializationProgress {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Check the partition invariant.
    pub fn is_consistent(&self) -> bool {
        self.initialized.len() + self.pending.len() + self.failed.len() == self.total
            && self.cached.iter().all(|id| self.initialized.contains(id))
    }
}

/// Tracks one batch
#[derive(Debug, Clone)]
pub struct InitializationTracker {
    progress: InitializationProgress,
}

impl InitializationTracker {
    /// Create a tracker with every agent pending.
    pub fn new(agent_ids: Vec<String>) -> Self {
        let total = agent_ids.len();
        let mut tracker = Self {
            progress: InitializationProgress {
                pending: agent_ids,
                total,
                ..Default::default()
            },
        };
        tracker.recompute_percent();
        tracker
    }

    /// Record an agent whose wallet was already cached
    pub fn record_cached(&mut self, agent_id: &str) {
        if self.record_initialized(agent_id) {
            self.progress.cached.push(agent_id.to_string());
        }
    }

    /// Move an agent from pending to initialized. Returns false if it was not pending.
    pub fn record_initialized(&mut self, agent_id: &str) -> bool {
        if !self.take_pending(agent_id) {
            return false;
        }
        self.progress.initialized.push(agent_id.to_string());
        self.recompute_percent();
        true
    }

    /// Move an agent from pending to failed. Returns false if it was not pending.
    pub fn record_failed(&mut self, agent_id: &str) -> bool {
        if !self.take_pending(agent_id) {
            return false;
        }
        self.progress.failed.push(agent_id.to_string());
        self.recompute_percent();
        true
    }

    fn take_pending(&mut self, agent_id: &str) -> bool {
        match self.progress.pending.iter().position(|id| id == agent_id) {
            Some(index) => {
                self.progress.pending.remove(index);
                true
            }
            None => {
                warn!("Ignoring settlement for {}: not pending", agent_id);
                false
            }
        }
    }

    fn recompute_percent(&mut self) {
        let total = self.progress.total;
        self.progress.percent = if total == 0 {
            100
        } else {
            ((self.progress.initialized.len() as f64 / total as f64) * 100.0).round() as u8
        };
    }

    pub fn snapshot(&self) -> InitializationProgress {
        self.progress.clone()
    }

    pub fn log_progress(&self) {
        info!(
            "Wallet initialization: {}/{} initialized ({} cached), {} pending, {} failed ({}%)",
            self.progress.initialized.len(),
            self.progress.total,
            self.progress.cached.len(),
            self.progress.pending.len(),
            self.progress.failed.len(),
            self.progress.percent
        );
    }
}
