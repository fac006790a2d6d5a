//! Shared in-memory exchange for integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use volscan_backend::config::ExchangeConfig;
use volscan_backend::exchanges::{ExchangeClient, ExchangeConnection};
use volscan_backend::models::{Candle, MarketInfo, MarketType, Ticker};

pub const HOUR_MS: i64 = 3_600_000;

/// Canned market data keyed by base asset; every market quotes in USDT.
#[derive(Default)]
pub struct MockExchange {
    pub id: String,
    pub candles: HashMap<String, Vec<Candle>>,
    pub quote_volume: f64,
    pub broken_ohlcv: Vec<String>,
    /// Reject bulk ticker requests so the per-symbol path is used
    pub bulk_unsupported: bool,
    /// When set every call fails as if the network were down
    pub offline: Arc<AtomicBool>,
    pub in_flight: Arc<AtomicUsize>,
    pub peak_in_flight: Arc<AtomicUsize>,
    pub call_delay: Option<Duration>,
}

impl MockExchange {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            quote_volume: 5_000_000.0,
            ..Default::default()
        }
    }

    pub fn with_market(mut self, base: &str, candles: Vec<Candle>) -> Self {
        self.candles.insert(format!("{}/USDT", base), candles);
        self
    }

    pub fn with_broken_ohlcv(mut self, base: &str) -> Self {
        let symbol = format!("{}/USDT", base);
        self.candles.entry(symbol.clone()).or_default();
        self.broken_ohlcv.push(symbol);
        self
    }

    pub fn without_bulk_tickers(mut self) -> Self {
        self.bulk_unsupported = true;
        self
    }

    /// Hold every single-symbol call open for `delay` so overlap is observable.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(anyhow!("network unreachable"));
        }
        Ok(())
    }

    async fn track_call(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_markets(&self) -> Result<Vec<MarketInfo>> {
        self.check_online()?;
        let mut markets: Vec<MarketInfo> = self
            .candles
            .keys()
            .filter_map(|s| s.split_once('/'))
            .map(|(base, quote)| MarketInfo::new(base, quote, MarketType::Future))
            .collect();
        markets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(markets)
    }

    async fn fetch_tickers(&self, symbols: &[String]) -> Result<Vec<Ticker>> {
        self.check_online()?;
        if self.bulk_unsupported {
            return Err(anyhow!("bulk tickers not supported"));
        }
        Ok(symbols
            .iter()
            .map(|s| Ticker {
                quote_volume: Some(self.quote_volume),
                ..Ticker::new(s.as_str())
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.check_online()?;
        self.track_call().await;
        Ok(Ticker {
            quote_volume: Some(self.quote_volume),
            ..Ticker::new(symbol)
        })
    }

    async fn fetch_ohlcv(&self, symbol: &str, _timeframe: &str, _limit: usize) -> Result<Vec<Candle>> {
        self.check_online()?;
        self.track_call().await;
        if self.broken_ohlcv.iter().any(|s| s == symbol) {
            return Err(anyhow!("HTTP 502 from upstream"));
        }
        self.candles
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("unknown symbol {}", symbol))
    }
}

pub fn series(closes: impl Fn(usize) -> f64, volumes: &[f64]) -> Vec<Candle> {
    volumes
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let c = closes(i);
            Candle::new(1_700_000_000_000 + i as i64 * HOUR_MS, c, c * 1.01, c * 0.99, c, v)
        })
        .collect()
}

/// 30 bars at volume 10, then four quiet bars and a spike to `last`.
pub fn spike_volumes(last: f64) -> Vec<f64> {
    let mut v = vec![10.0; 30];
    v.extend([5.0, 5.0, 5.0, 5.0, last]);
    v
}

pub fn rising(i: usize) -> f64 {
    100.0 + i as f64
}

pub fn falling(i: usize) -> f64 {
    200.0 - i as f64
}

pub fn connection(mock: MockExchange, priority: u32) -> Arc<ExchangeConnection> {
    let config = ExchangeConfig::new(&mock.id, "USDT", 1_000_000.0, MarketType::Future, priority);
    Arc::new(ExchangeConnection::new(config, Arc::new(mock)))
}
