//! Exchange connectivity
//!
//! The scanner only talks to [`ExchangeClient`]. Each REST connector maps
//! one venue's public market-data endpoints onto it and normalizes symbols to
//! `BASE/QUOTE`. [`ExchangeConnection`] binds a client to its config and
//! caches the market catalog.

pub mod binance;
pub mod bybit;
mod http;
pub mod okx;

pub use binance::BinanceClient;
pub use bybit::BybitClient;
pub use okx::OkxClient;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{ExchangeConfig, NetworkConfig};
use crate::models::{Candle, MarketInfo, Ticker};

/// Read-only market data capability. Implementations must be safe for
/// concurrent calls from many analysis tasks.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn id(&self) -> &str;

    /// Full market catalog
    async fn list_markets(&self) -> Result<Vec<MarketInfo>>;

    /// Bulk ticker snapshot. An error means "unsupported or failed"; callers
    /// fall back to [`ExchangeClient::fetch_ticker`].
    async fn fetch_tickers(&self, symbols: &[String]) -> Result<Vec<Ticker>>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;

    /// Candles in ascending time order
    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>>;
}

pub type SharedClient = Arc<dyn ExchangeClient>;

/// Build the REST connector for a configured exchange.
pub fn connect(config: &ExchangeConfig, network: &NetworkConfig) -> Result<SharedClient> {
    let client: SharedClient = match config.id.as_str() {
        "binance" => Arc::new(BinanceClient::new(config.market_type, network)?),
        "okx" => Arc::new(OkxClient::new(config.market_type, network)?),
        "bybit" => Arc::new(BybitClient::new(config.market_type, network)?),
        other => return Err(anyhow!("no connector for exchange '{}'", other)),
    };
    Ok(client)
}

/// Runtime handle for one configured exchange
pub struct ExchangeConnection {
    config: ExchangeConfig,
    client: SharedClient,
    markets: RwLock<Option<Arc<Vec<MarketInfo>>>>,
}

impl ExchangeConnection {
    pub fn new(config: ExchangeConfig, client: SharedClient) -> Self {
        Self {
            config,
            client,
            markets: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Market catalog, fetched once and cached for the connection's lifetime.
    pub async fn load_markets(&self) -> Result<Arc<Vec<MarketInfo>>> {
        let cached = self.markets.read().clone();
        if let Some(markets) = cached {
            return Ok(markets);
        }
        let markets = Arc::new(self.client.list_markets().await?);
        *self.markets.write() = Some(markets.clone());
        Ok(markets)
    }

    pub fn market_count(&self) -> usize {
        self.markets.read().as_ref().map(|m| m.len()).unwrap_or(0)
    }

    /// Active markets matching this exchange's quote currency and market type.
    /// Each symbol appears at most once.
    pub async fn candidates(&self) -> Result<Vec<MarketInfo>> {
        let markets = self.load_markets().await?;
        let mut seen = HashSet::new();
        Ok(markets
            .iter()
            .filter(|m| m.active)
            .filter(|m| m.quote.eq_ignore_ascii_case(&self.config.quote_currency))
            .filter(|m| m.market_type == self.config.market_type)
            .filter(|m| seen.insert(m.symbol.clone()))
            .cloned()
            .collect())
    }

    pub async fn fetch_tickers(&self, symbols: &[String]) -> Result<Vec<Ticker>> {
        self.client.fetch_tickers(symbols).await
    }

    pub async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.client.fetch_ticker(symbol).await
    }

    pub async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        self.client.fetch_ohlcv(symbol, timeframe, limit).await
    }
}

impl std::fmt::Debug for ExchangeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConnection")
            .field("id", &self.config.id)
            .field("priority", &self.config.priority)
            .field("market_count", &self.market_count())
            .finish()
    }
}
