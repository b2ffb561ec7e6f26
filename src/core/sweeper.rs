//! Background retention sweep.
//!
//! A tokio task that calls [`TaskLedger::cleanup`] on a fixed interval.
//! The first sweep runs as soon as the sweeper starts.

use super::TaskLedger;
use crate::config::RetentionConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::store::PurgeStats;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Periodically purges old terminal records from a ledger
pub struct RetentionSweeper {
    ledger: Arc<TaskLedger>,
    config: RetentionConfig,
    is_running: Arc<AtomicBool>,
    is_shutting_down: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RetentionSweeper {
    /// Create a sweeper using the ledger's own retention settings
    pub fn new(ledger: Arc<TaskLedger>) -> Self {
        let config = ledger.config().retention.clone();
        Self::with_config(ledger, config)
    }

    /// Create a sweeper with explicit retention settings
    pub fn with_config(ledger: Arc<TaskLedger>, config: RetentionConfig) -> Self {
        Self {
            ledger,
            config,
            is_running: Arc::new(AtomicBool::new(false)),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Spawn the sweep loop on the current tokio runtime
    pub fn start(&mut self) -> LedgerResult<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Err(LedgerError::AlreadyRunning);
        }
        if self.config.cleanup_interval_secs == 0 {
            return Err(LedgerError::config("Cleanup interval must be greater than 0"));
        }

        let ledger = Arc::clone(&self.ledger);
        let is_shutting_down = Arc::clone(&self.is_shutting_down);
        let max_age = self.config.max_age();
        let period = self.config.interval();

        self.is_shutting_down.store(false, Ordering::Relaxed);
        self.handle = Some(tokio::spawn(async move {
            tracing::info!(?period, ?max_age, "Retention sweeper started");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if is_shutting_down.load(Ordering::Relaxed) {
                    break;
                }

                if let Err(e) = ledger.cleanup(max_age).await {
                    tracing::error!(error = %e, "Retention sweep failed");
                }
            }

            tracing::info!("Retention sweeper stopped");
        }));
        self.is_running.store(true, Ordering::Relaxed);

        Ok(())
    }

    /// Stop the sweep loop
    pub async fn shutdown(&mut self) -> LedgerResult<()> {
        if !self.is_running.load(Ordering::Relaxed) {
            return Err(LedgerError::NotRunning);
        }

        self.is_shutting_down.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            // Cancellation is the expected outcome here
            let _ = handle.await;
        }

        self.is_running.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Run one sweep immediately
    pub async fn sweep_once(&self) -> LedgerResult<PurgeStats> {
        self.ledger.cleanup(self.config.max_age()).await
    }

    /// Check if the sweep loop is running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
