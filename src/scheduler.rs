//! Background scan loop
//!
//! The scheduler is the only writer of the published [`ScanSnapshot`]; it
//! swaps in a whole new snapshot at the end of each cycle. Readers hold a
//! [`SnapshotReader`] and get an immutable `Arc` to whatever was current when
//! they asked.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregator::SymbolUniverse;
use crate::config::ScannerConfig;
use crate::models::{ExchangeStatistics, ExchangeStatus, Opportunity};
use crate::scanner::{ScanOutcome, Scanner};
use crate::scoring::SortKey;

/// Everything the query surfaces serve, as of the last completed cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSnapshot {
    /// Completed cycles so far; 0 until the first one publishes
    pub cycle: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub opportunities: Vec<Opportunity>,
    pub sort_key: SortKey,
    #[serde(skip)]
    pub universe: SymbolUniverse,
    pub universe_size: usize,
    pub exchange_status: Vec<ExchangeStatus>,
    pub statistics: ExchangeStatistics,
    pub skipped: BTreeMap<String, usize>,
    pub duration_ms: u64,
    /// Set when the last cycle reached no exchange. Its (empty) result is
    /// still what readers see.
    pub last_cycle_failed: bool,
}

/// Cheap cloneable read handle onto the published snapshot
#[derive(Clone)]
pub struct SnapshotReader {
    inner: Arc<ArcSwap<ScanSnapshot>>,
}

impl SnapshotReader {
    pub fn load(&self) -> Arc<ScanSnapshot> {
        self.inner.load_full()
    }
}

impl Default for SnapshotReader {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(ScanSnapshot::default())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    Published { failed: bool },
    Cancelled,
}

pub struct ScanScheduler {
    scanner: Arc<Scanner>,
    snapshot: Arc<ArcSwap<ScanSnapshot>>,
    update_interval: Duration,
    retry_interval: Duration,
    top_n: usize,
    sort_key: SortKey,
    status_sample_size: usize,
}

impl ScanScheduler {
    pub fn new(scanner: Arc<Scanner>, config: &ScannerConfig) -> Self {
        Self {
            scanner,
            snapshot: Arc::new(ArcSwap::from_pointee(ScanSnapshot::default())),
            update_interval: Duration::from_secs(config.data.update_interval_secs),
            retry_interval: Duration::from_secs(config.data.retry_interval_secs),
            top_n: config.data.top_n,
            sort_key: SortKey::parse_lenient(&config.data.default_sort),
            status_sample_size: config.data.status_sample_size,
        }
    }

    pub fn with_intervals(mut self, update: Duration, retry: Duration) -> Self {
        self.update_interval = update;
        self.retry_interval = retry;
        self
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            inner: self.snapshot.clone(),
        }
    }

    pub fn scanner(&self) -> &Arc<Scanner> {
        &self.scanner
    }

    /// Run one cycle and publish it unless it was abandoned.
    pub async fn run_once(&self, shutdown: &watch::Receiver<bool>) -> CycleResult {
        let outcome = self.scanner.run_cycle(self.top_n, self.sort_key, shutdown).await;
        if outcome.cancelled {
            self.scanner.mark_idle();
            return CycleResult::Cancelled;
        }

        let failed = outcome.failed;
        let statuses = self
            .scanner
            .registry()
            .sample_status(self.status_sample_size)
            .await;
        self.publish(outcome, statuses);
        self.scanner.mark_idle();
        CycleResult::Published { failed }
    }

    fn publish(&self, outcome: ScanOutcome, exchange_status: Vec<ExchangeStatus>) {
        let previous = self.snapshot.load_full();
        let statistics = ExchangeStatistics::summarize(&exchange_status, outcome.universe.symbol_counts());

        let next = ScanSnapshot {
            cycle: previous.cycle + 1,
            updated_at: Some(Utc::now()),
            opportunities: outcome.opportunities,
            sort_key: outcome.sort_key,
            universe: outcome.universe,
            universe_size: outcome.universe_size,
            exchange_status,
            statistics,
            skipped: outcome.skipped,
            duration_ms: outcome.duration_ms,
            last_cycle_failed: outcome.failed,
        };
        self.snapshot.store(Arc::new(next));
    }

    /// Loop until `shutdown` flips to true (or its sender is dropped).
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                update_secs = self.update_interval.as_secs(),
                retry_secs = self.retry_interval.as_secs(),
                "🔄 Scan scheduler started"
            );
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let delay = match self.run_once(&shutdown).await {
                    CycleResult::Published { failed: false } => self.update_interval,
                    CycleResult::Published { failed: true } => {
                        warn!(retry_secs = self.retry_interval.as_secs(), "Scan cycle failed, retrying sooner");
                        self.retry_interval
                    }
                    CycleResult::Cancelled => break,
                };

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Scan scheduler stopped");
        })
    }
}
