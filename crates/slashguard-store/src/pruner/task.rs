//! Periodic pruning task.
//!
//! The task wakes on a fixed interval, runs one pruning pass, and goes
//! back to sleep. Shutdown is cooperative through an `Arc<AtomicBool>`
//! handle; correctness never depends on which task or thread runs a pass,
//! since every pass is built from the same short transactions as the rest
//! of the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use super::prune_all;
use crate::engine::SlashingProtection;

/// Retention settings for the periodic pruner.
#[derive(Debug, Clone, Copy)]
pub struct PrunerConfig {
    /// Attestation entries retained per validator; block retention is this
    /// multiplied by `slots_per_epoch`.
    pub epochs_to_keep: u64,

    /// Slots per epoch on the target network.
    pub slots_per_epoch: u64,

    /// Time between pruning passes.
    pub interval: Duration,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            epochs_to_keep: 10_000,
            slots_per_epoch: 32,
            interval: Duration::from_secs(60 * 60 * 12),
        }
    }
}

impl PrunerConfig {
    /// Sets the number of epochs to keep.
    #[must_use]
    pub const fn with_epochs_to_keep(mut self, epochs_to_keep: u64) -> Self {
        self.epochs_to_keep = epochs_to_keep;
        self
    }

    /// Sets the slots-per-epoch multiple.
    #[must_use]
    pub const fn with_slots_per_epoch(mut self, slots_per_epoch: u64) -> Self {
        self.slots_per_epoch = slots_per_epoch;
        self
    }

    /// Sets the interval between pruning passes.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// The periodic pruning task.
pub struct PrunerTask {
    protection: Arc<SlashingProtection>,
    config: PrunerConfig,
    shutdown: Arc<AtomicBool>,
}

impl PrunerTask {
    /// Creates a task over a shared engine handle.
    #[must_use]
    pub fn new(protection: Arc<SlashingProtection>, config: PrunerConfig) -> Self {
        Self {
            protection,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle for requesting shutdown; the task stops before its next
    /// pass once the flag is set.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs pruning passes until shutdown is requested.
    ///
    /// A failed pass is logged and the task keeps running; a transient
    /// storage failure must not end retention for the life of the process.
    pub async fn run(self) {
        info!(
            epochs_to_keep = self.config.epochs_to_keep,
            slots_per_epoch = self.config.slots_per_epoch,
            interval_secs = self.config.interval.as_secs(),
            "pruner task started"
        );
        loop {
            tokio::time::sleep(self.config.interval).await;
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let protection = Arc::clone(&self.protection);
            let config = self.config;
            let result = tokio::task::spawn_blocking(move || {
                prune_all(&protection, config.epochs_to_keep, config.slots_per_epoch)
            })
            .await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => error!(error = %err, "pruning pass failed"),
                Err(err) => error!(error = %err, "pruning pass panicked"),
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
        }
        info!("pruner task stopped");
    }
}
