//! Scan Orchestrator
//!
//! One cycle: aggregate the universe, analyze every symbol with bounded
//! concurrency, score, rank, truncate. Per-symbol failures become
//! [`SkipReason`]s and are counted, never propagated. A shutdown request is
//! honored between symbols.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate, ExchangeContribution, SymbolUniverse};
use crate::classifier::{classify, SkipReason};
use crate::config::{IndicatorConfig, ScannerConfig};
use crate::exchanges::ExchangeConnection;
use crate::indicators::compute;
use crate::models::{Candle, Opportunity};
use crate::registry::ExchangeRegistry;
use crate::scoring::{composite_score, top_n, SortKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Idle = 0,
    Aggregating = 1,
    Analyzing = 2,
    Ranking = 3,
    Done = 4,
}

impl ScanPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ScanPhase::Aggregating,
            2 => ScanPhase::Analyzing,
            3 => ScanPhase::Ranking,
            4 => ScanPhase::Done,
            _ => ScanPhase::Idle,
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Aggregating => "aggregating",
            ScanPhase::Analyzing => "analyzing",
            ScanPhase::Ranking => "ranking",
            ScanPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Result of one scan cycle
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    /// Ranked and truncated
    pub opportunities: Vec<Opportunity>,
    #[serde(skip)]
    pub universe: SymbolUniverse,
    pub contributions: Vec<ExchangeContribution>,
    pub universe_size: usize,
    pub analyzed: usize,
    /// Opportunities emitted before truncation
    pub emitted: usize,
    pub skipped: BTreeMap<String, usize>,
    pub sort_key: SortKey,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// No exchange could be reached this cycle, either at aggregation or
    /// for every candle fetch
    pub failed: bool,
    /// Abandoned on shutdown; results are partial and should not be published
    pub cancelled: bool,
}

pub struct Scanner {
    registry: Arc<ExchangeRegistry>,
    indicators: IndicatorConfig,
    timeframe: String,
    candle_limit: usize,
    concurrency: usize,
    phase: AtomicU8,
}

impl Scanner {
    pub fn new(registry: Arc<ExchangeRegistry>, config: &ScannerConfig) -> Self {
        Self {
            registry,
            indicators: config.indicators.clone(),
            timeframe: config.data.timeframe.clone(),
            candle_limit: config.data.candle_limit,
            concurrency: config.network.max_concurrency.max(1),
            phase: AtomicU8::new(ScanPhase::Idle as u8),
        }
    }

    pub fn registry(&self) -> &Arc<ExchangeRegistry> {
        &self.registry
    }

    pub fn indicator_config(&self) -> &IndicatorConfig {
        &self.indicators
    }

    pub fn phase(&self) -> ScanPhase {
        ScanPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: ScanPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Return to idle once a finished cycle has been consumed.
    pub fn mark_idle(&self) {
        self.set_phase(ScanPhase::Idle);
    }

    /// Run one full cycle. Never fails: every error path degrades to fewer
    /// (possibly zero) opportunities.
    pub async fn run_cycle(&self, limit: usize, sort_key: SortKey, shutdown: &watch::Receiver<bool>) -> ScanOutcome {
        let started_at = Utc::now();
        let timer = Instant::now();

        self.set_phase(ScanPhase::Aggregating);
        let active = self.registry.active();
        let report = aggregate(active, self.concurrency).await;
        let unreachable = active.is_empty() || report.all_failed();
        if unreachable {
            warn!(exchanges = active.len(), "No exchange reachable this cycle");
        }

        self.set_phase(ScanPhase::Analyzing);
        let symbols: Vec<(String, String)> = report
            .universe
            .iter()
            .map(|(s, e)| (s.to_string(), e.to_string()))
            .collect();

        // Owned items keep the stream future free of higher-ranked borrows,
        // which tokio::spawn cannot accept
        let mut results: Vec<(usize, Result<Opportunity, SkipReason>)> =
            stream::iter(symbols.clone().into_iter().enumerate())
                .map(|(idx, (symbol, exchange))| async move {
                    if *shutdown.borrow() {
                        return (idx, Err(SkipReason::Cancelled));
                    }
                    (idx, self.analyze(&exchange, &symbol).await)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        // Back to universe order so ranking ties are deterministic
        results.sort_by_key(|(idx, _)| *idx);

        let mut skipped: BTreeMap<String, usize> = BTreeMap::new();
        let mut opportunities = Vec::with_capacity(results.len());
        let mut fetch_failures = 0usize;
        for (idx, result) in results {
            match result {
                Ok(opp) => opportunities.push(opp),
                Err(reason) => {
                    if matches!(reason, SkipReason::FetchFailed(_)) {
                        fetch_failures += 1;
                    }
                    log_skip(&symbols[idx].0, &reason);
                    *skipped.entry(reason.kind().to_string()).or_insert(0) += 1;
                }
            }
        }

        let cancelled = skipped.contains_key(SkipReason::Cancelled.kind());
        let analyzed = symbols.len();
        let emitted = opportunities.len();

        // Universe built but no candle fetch got through
        let fetches_failed = analyzed > 0 && fetch_failures == analyzed;
        if fetches_failed {
            warn!(analyzed, "Every candle fetch failed this cycle");
        }
        let failed = unreachable || fetches_failed;

        self.set_phase(ScanPhase::Ranking);
        let opportunities = if cancelled {
            info!(analyzed, "🛑 Scan cycle abandoned on shutdown");
            Vec::new()
        } else {
            top_n(opportunities, sort_key, limit)
        };

        if opportunities.is_empty() && !cancelled {
            warn!(universe = analyzed, "Scan produced no opportunities");
        }

        let duration_ms = timer.elapsed().as_millis() as u64;
        info!(
            universe = analyzed,
            emitted,
            returned = opportunities.len(),
            skipped = ?skipped,
            duration_ms,
            "🔍 Scan cycle complete"
        );

        self.set_phase(ScanPhase::Done);
        ScanOutcome {
            opportunities,
            universe_size: report.universe.len(),
            universe: report.universe,
            contributions: report.contributions,
            analyzed,
            emitted,
            skipped,
            sort_key,
            started_at,
            duration_ms,
            failed,
            cancelled,
        }
    }

    /// Fetch, gate, compute, classify and score one symbol on its owner.
    pub async fn analyze(&self, exchange: &str, symbol: &str) -> Result<Opportunity, SkipReason> {
        let conn = self
            .registry
            .get(exchange)
            .ok_or_else(|| SkipReason::FetchFailed(format!("exchange {} not active", exchange)))?;
        let candles = self.fetch_candles(conn, symbol, &self.timeframe, self.candle_limit).await?;

        let series = compute(&candles, &self.indicators);
        let mut opp = classify(symbol, exchange, &candles, &series, &self.indicators)?;
        opp.composite_score = composite_score(&opp);
        Ok(opp)
    }

    /// Candle fetch with the data-quality gate applied.
    pub async fn fetch_candles(
        &self,
        conn: &ExchangeConnection,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, SkipReason> {
        let candles = conn
            .fetch_ohlcv(symbol, timeframe, limit)
            .await
            .map_err(|e| SkipReason::FetchFailed(format!("{:#}", e)))?;
        quality_gate(&candles)?;
        Ok(candles)
    }
}

/// Reject candle sets that are empty or carry no volume at all.
pub fn quality_gate(candles: &[Candle]) -> Result<(), SkipReason> {
    if candles.is_empty() {
        return Err(SkipReason::EmptyData);
    }
    let total: f64 = candles.iter().map(|c| c.volume).sum();
    if !(total > 0.0) {
        return Err(SkipReason::ZeroVolume);
    }
    Ok(())
}

fn log_skip(symbol: &str, reason: &SkipReason) {
    match reason {
        SkipReason::Computation(_) => warn!(symbol = %symbol, reason = %reason, "Symbol analysis failed"),
        SkipReason::Cancelled => {}
        _ => debug!(symbol = %symbol, reason = %reason, "Symbol skipped"),
    }
}
