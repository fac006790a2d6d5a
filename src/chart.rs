//! Chart series query
//!
//! Candles plus indicator overlays for a single symbol. The owning exchange
//! comes from the latest published universe. Results are cached per
//! (symbol, timeframe, limit) for a fixed TTL. Never triggers a scan.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{IndicatorConfig, ScannerConfig};
use crate::exchanges::ExchangeConnection;
use crate::indicators::compute;
use crate::models::{Candle, ChartSeries};
use crate::registry::ExchangeRegistry;
use crate::scanner::quality_gate;
use crate::scheduler::SnapshotReader;

const LABEL_FORMAT: &str = "%Y-%m-%d %H:%M";
const MAX_CHART_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum ChartError {
    /// No active exchange to ask
    NoExchange,
    /// Exchange returned nothing usable
    NoData { symbol: String },
    Fetch { symbol: String, error: String },
}

impl fmt::Display for ChartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartError::NoExchange => write!(f, "no exchange connection available"),
            ChartError::NoData { symbol } => write!(f, "no candle data for {}", symbol),
            ChartError::Fetch { symbol, error } => write!(f, "candle fetch for {} failed: {}", symbol, error),
        }
    }
}

impl std::error::Error for ChartError {}

type CacheKey = (String, String, usize);

pub struct ChartService {
    registry: Arc<ExchangeRegistry>,
    snapshots: SnapshotReader,
    indicators: IndicatorConfig,
    default_timeframe: String,
    default_limit: usize,
    ttl: Duration,
    cache: Mutex<HashMap<CacheKey, (Instant, Arc<ChartSeries>)>>,
}

impl ChartService {
    pub fn new(registry: Arc<ExchangeRegistry>, snapshots: SnapshotReader, config: &ScannerConfig) -> Self {
        Self {
            registry,
            snapshots,
            indicators: config.indicators.clone(),
            default_timeframe: config.data.timeframe.clone(),
            default_limit: config.data.chart_limit,
            ttl: Duration::from_secs(config.data.chart_cache_ttl_secs),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Owner from the latest universe, else the highest-priority active exchange.
    pub fn resolve_exchange(&self, symbol: &str) -> Option<&Arc<ExchangeConnection>> {
        let snapshot = self.snapshots.load();
        let owner = snapshot.universe.owner(symbol).and_then(|id| self.registry.get(id));
        owner.or_else(|| self.registry.active().first())
    }

    pub async fn series(
        &self,
        symbol: &str,
        timeframe: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Arc<ChartSeries>, ChartError> {
        let timeframe = timeframe.unwrap_or(&self.default_timeframe).to_string();
        let limit = limit.unwrap_or(self.default_limit).clamp(1, MAX_CHART_LIMIT);
        let key: CacheKey = (symbol.to_string(), timeframe.clone(), limit);

        if let Some(hit) = self.cached(&key) {
            debug!(symbol = %symbol, timeframe = %timeframe, "Chart cache hit");
            return Ok(hit);
        }

        let conn = self.resolve_exchange(symbol).ok_or(ChartError::NoExchange)?;
        let candles = conn
            .fetch_ohlcv(symbol, &timeframe, limit)
            .await
            .map_err(|e| ChartError::Fetch {
                symbol: symbol.to_string(),
                error: format!("{:#}", e),
            })?;
        // Same gate the scanner applies: empty or volumeless series are not charted
        quality_gate(&candles).map_err(|_| ChartError::NoData {
            symbol: symbol.to_string(),
        })?;

        let series = Arc::new(build_chart(symbol, conn.id(), &timeframe, &candles, &self.indicators));
        self.store(key, series.clone());
        Ok(series)
    }

    fn cached(&self, key: &CacheKey) -> Option<Arc<ChartSeries>> {
        let cache = self.cache.lock();
        cache
            .get(key)
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, series)| series.clone())
    }

    fn store(&self, key: CacheKey, series: Arc<ChartSeries>) {
        let mut cache = self.cache.lock();
        let ttl = self.ttl;
        cache.retain(|_, (at, _)| at.elapsed() < ttl);
        cache.insert(key, (Instant::now(), series));
    }
}

/// Assemble the chart payload. Indicator columns are `None` where undefined.
pub fn build_chart(
    symbol: &str,
    exchange: &str,
    timeframe: &str,
    candles: &[Candle],
    config: &IndicatorConfig,
) -> ChartSeries {
    let series = compute(candles, config);
    let column = |values: &[Option<f64>]| -> Vec<Option<f64>> {
        if values.is_empty() {
            vec![None; candles.len()]
        } else {
            values.to_vec()
        }
    };

    ChartSeries {
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        timeframe: timeframe.to_string(),
        timestamps: candles.iter().map(|c| c.timestamp).collect(),
        labels: candles
            .iter()
            .map(|c| c.time().map(|t| t.format(LABEL_FORMAT).to_string()).unwrap_or_default())
            .collect(),
        opens: candles.iter().map(|c| c.open).collect(),
        highs: candles.iter().map(|c| c.high).collect(),
        lows: candles.iter().map(|c| c.low).collect(),
        closes: candles.iter().map(|c| c.close).collect(),
        volumes: candles.iter().map(|c| c.volume).collect(),
        ma5: column(&series.ma_fast),
        ma10: column(&series.ma_mid),
        ma20: column(&series.ma_slow),
        volume_ratio: column(&series.volume_ratio),
    }
}
