//! Periodic price refresh loop.
//!
//! A cycle is a staleness scan followed by a batched refresh. The loop runs a
//! cycle immediately, then waits the full interval after each cycle finishes,
//! so cycles never overlap. On-demand triggers take the same cycle lock.

use crate::scanner::StalenessScanner;
use crate::updater::{BatchPriceUpdater, RefreshReport};
use crate::types::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub stale: usize,
    pub refresh: RefreshReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct PriceRefreshScheduler {
    scanner: StalenessScanner,
    updater: BatchPriceUpdater,
    currency: String,
    stale_after: Duration,
    interval: Duration,
    cycle_lock: Mutex<()>,
}

impl PriceRefreshScheduler {
    pub fn new(scanner: StalenessScanner, updater: BatchPriceUpdater, currency: &str) -> Self {
        Self {
            scanner,
            updater,
            currency: currency.to_lowercase(),
            stale_after: DEFAULT_STALE_AFTER,
            interval: DEFAULT_INTERVAL,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn state(&self) -> SchedulerState {
        match self.cycle_lock.try_lock() {
            Ok(_) => SchedulerState::Idle,
            Err(_) => SchedulerState::Running,
        }
    }

    /// Run one scan + refresh cycle, waiting for any cycle already running
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _running = self.cycle_lock.lock().await;
        let started_at = Utc::now();

        let threshold = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        let stale = self.scanner.find_stale(threshold).await?;

        let refresh = if stale.is_empty() {
            info!("No coins older than {:?}", self.stale_after);
            RefreshReport::default()
        } else {
            info!("Refreshing {} stale coins", stale.len());
            self.updater.refresh(&stale, &self.currency).await?
        };

        Ok(CycleReport {
            stale: stale.len(),
            refresh,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Run cycles forever.
    ///
    /// Returns only when the store becomes unreachable; the process is
    /// expected to exit and be restarted by its supervisor. Other cycle
    /// errors are logged and the loop waits for the next interval.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Price refresher started (interval {:?}, stale after {:?})",
            self.interval, self.stale_after
        );

        loop {
            match self.run_cycle().await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!("Refresh cycle aborted: {}", e);
                    return Err(e);
                }
                Err(e) => error!("Refresh cycle failed, retrying next interval: {}", e),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
