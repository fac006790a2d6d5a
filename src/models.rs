use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Market type an exchange is scanned on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Spot,
    Future,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Future => "future",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV row. `timestamp` is the bar open time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// Market catalog entry, normalized to `BASE/QUOTE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub market_type: MarketType,
    pub active: bool,
}

impl MarketInfo {
    pub fn new(base: &str, quote: &str, market_type: MarketType) -> Self {
        let base = base.to_uppercase();
        let quote = quote.to_uppercase();
        Self {
            symbol: format!("{}/{}", base, quote),
            base,
            quote,
            market_type,
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Ticker snapshot. Exchanges report different subsets of these fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: Option<f64>,
    pub close: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub base_volume: Option<f64>,
    pub quote_volume: Option<f64>,
}

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v != 0.0)
}

impl Ticker {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// Best available trade price: last, else close, else ask, else bid.
    pub fn reference_price(&self) -> Option<f64> {
        usable(self.last)
            .or_else(|| usable(self.close))
            .or_else(|| usable(self.ask))
            .or_else(|| usable(self.bid))
    }

    /// USD-equivalent traded volume.
    ///
    /// An explicit quote volume wins. Otherwise `base_volume * reference_price`,
    /// and zero when neither side resolves.
    pub fn estimated_quote_volume(&self) -> f64 {
        if let Some(quote) = self.quote_volume.filter(|q| q.is_finite()) {
            return quote;
        }
        match (usable(self.base_volume), self.reference_price()) {
            (Some(base), Some(price)) => base * price,
            _ => 0.0,
        }
    }
}

/// Trading signal emitted by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Long,
    Short,
    Hold,
    None,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Long => "long",
            Signal::Short => "short",
            Signal::Hold => "hold",
            Signal::None => "none",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A symbol's analyzed snapshot for one scan cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub exchange: String,
    pub current_price: f64,
    pub current_volume: f64,
    pub avg_volume_30: f64,
    pub volume_ratio: f64,
    pub ma5: f64,
    pub ma10: f64,
    pub ma20: f64,
    pub signal: Signal,
    pub is_recommended: bool,
    pub price_change_24h: f64,
    pub volatility: f64,
    pub composite_score: f64,
}

/// Connectivity status for one configured exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeStatus {
    pub exchange: String,
    pub enabled: bool,
    pub connected: bool,
    pub market_count: usize,
    pub ticker_success_rate: f64,
    pub description: String,
    pub priority: u32,
    pub quote_currency: String,
    pub min_volume_usd: f64,
    pub market_type: MarketType,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeStatistics {
    pub total_exchanges: usize,
    pub connected_exchanges: usize,
    pub connection_rate: f64,
    pub total_markets: usize,
    pub exchange_symbol_counts: BTreeMap<String, usize>,
}

impl ExchangeStatistics {
    pub fn summarize(statuses: &[ExchangeStatus], symbol_counts: BTreeMap<String, usize>) -> Self {
        let total_exchanges = statuses.len();
        let connected: Vec<&ExchangeStatus> = statuses.iter().filter(|s| s.connected).collect();
        let connection_rate = if total_exchanges > 0 {
            connected.len() as f64 / total_exchanges as f64
        } else {
            0.0
        };
        Self {
            total_exchanges,
            connected_exchanges: connected.len(),
            connection_rate,
            total_markets: connected.iter().map(|s| s.market_count).sum(),
            exchange_symbol_counts: symbol_counts,
        }
    }
}

/// Indicator time series for one symbol, aligned to candle timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub symbol: String,
    pub exchange: String,
    pub timeframe: String,
    pub timestamps: Vec<i64>,
    pub labels: Vec<String>,
    pub opens: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
    pub ma5: Vec<Option<f64>>,
    pub ma10: Vec<Option<f64>>,
    pub ma20: Vec<Option<f64>>,
    pub volume_ratio: Vec<Option<f64>>,
}
