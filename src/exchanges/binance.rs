//! Binance public market data (spot and USDⓈ-M futures)

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::http::{build_client, candle_from_row, compact_symbol, de_string_f64_opt, get_json, normalize_candles};
use super::ExchangeClient;
use crate::config::NetworkConfig;
use crate::models::{Candle, MarketInfo, MarketType, Ticker};

const SPOT_BASE: &str = "https://api.binance.com";
const FUTURES_BASE: &str = "https://fapi.binance.com";
const MAX_KLINES: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    contract_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    last_price: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    bid_price: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    ask_price: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    volume: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    quote_volume: Option<f64>,
}

pub struct BinanceClient {
    client: Client,
    base_url: String,
    market_type: MarketType,
    /// Native id (`BTCUSDT`) -> normalized symbol (`BTC/USDT`)
    symbols: RwLock<HashMap<String, String>>,
}

impl BinanceClient {
    pub fn new(market_type: MarketType, network: &NetworkConfig) -> Result<Self> {
        let base_url = match market_type {
            MarketType::Spot => SPOT_BASE,
            MarketType::Future => FUTURES_BASE,
        };
        Ok(Self {
            client: build_client(network)?,
            base_url: base_url.to_string(),
            market_type,
            symbols: RwLock::new(HashMap::new()),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        let prefix = match self.market_type {
            MarketType::Spot => "/api/v3",
            MarketType::Future => "/fapi/v1",
        };
        format!("{}{}{}", self.base_url, prefix, path)
    }

    fn native_id(&self, symbol: &str) -> String {
        compact_symbol(symbol)
    }

    fn normalized(&self, native: &str) -> Option<String> {
        self.symbols.read().get(native).cloned()
    }

    fn to_ticker(&self, raw: Ticker24h, symbol: String) -> Ticker {
        Ticker {
            symbol,
            last: raw.last_price,
            close: raw.last_price,
            bid: raw.bid_price,
            ask: raw.ask_price,
            base_volume: raw.volume,
            quote_volume: raw.quote_volume,
        }
    }
}

fn market_from_info(info: &SymbolInfo, market_type: MarketType) -> Option<MarketInfo> {
    if market_type == MarketType::Future && info.contract_type.as_deref() != Some("PERPETUAL") {
        return None;
    }
    let market = MarketInfo::new(&info.base_asset, &info.quote_asset, market_type);
    Some(if info.status == "TRADING" {
        market
    } else {
        market.inactive()
    })
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn id(&self) -> &str {
        "binance"
    }

    async fn list_markets(&self) -> Result<Vec<MarketInfo>> {
        let info: ExchangeInfo = get_json(&self.client, &self.url("/exchangeInfo"), &[]).await?;

        let mut ids = HashMap::with_capacity(info.symbols.len());
        let markets: Vec<MarketInfo> = info
            .symbols
            .iter()
            .filter_map(|s| {
                let market = market_from_info(s, self.market_type)?;
                ids.insert(s.symbol.clone(), market.symbol.clone());
                Some(market)
            })
            .collect();

        *self.symbols.write() = ids;
        Ok(markets)
    }

    async fn fetch_tickers(&self, symbols: &[String]) -> Result<Vec<Ticker>> {
        let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();
        let raw: Vec<Ticker24h> = get_json(&self.client, &self.url("/ticker/24hr"), &[]).await?;

        Ok(raw
            .into_iter()
            .filter_map(|t| {
                let symbol = self.normalized(&t.symbol)?;
                wanted
                    .contains(symbol.as_str())
                    .then(|| self.to_ticker(t, symbol))
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let raw: Ticker24h = get_json(
            &self.client,
            &self.url("/ticker/24hr"),
            &[("symbol", self.native_id(symbol))],
        )
        .await?;
        Ok(self.to_ticker(raw, symbol.to_string()))
    }

    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let rows: Vec<Vec<Value>> = get_json(
            &self.client,
            &self.url("/klines"),
            &[
                ("symbol", self.native_id(symbol)),
                ("interval", timeframe.to_string()),
                ("limit", limit.clamp(1, MAX_KLINES).to_string()),
            ],
        )
        .await?;

        let candles: Vec<Candle> = rows.iter().filter_map(|r| candle_from_row(r)).collect();
        if candles.len() != rows.len() {
            return Err(anyhow!("malformed kline rows for {}", symbol));
        }
        Ok(normalize_candles(candles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(symbol: &str, status: &str, contract: Option<&str>) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.replace('/', ""),
            status: status.to_string(),
            base_asset: symbol.split('/').next().unwrap().to_string(),
            quote_asset: symbol.split('/').nth(1).unwrap().to_string(),
            contract_type: contract.map(str::to_string),
        }
    }

    #[test]
    fn test_futures_keep_only_perpetuals() {
        let perp = info("BTC/USDT", "TRADING", Some("PERPETUAL"));
        let quarterly = info("BTC/USDT", "TRADING", Some("CURRENT_QUARTER"));
        assert!(market_from_info(&perp, MarketType::Future).is_some());
        assert!(market_from_info(&quarterly, MarketType::Future).is_none());
        assert!(market_from_info(&quarterly, MarketType::Spot).is_some());
    }

    #[test]
    fn test_halted_market_is_inactive() {
        let halted = info("LUNA/USDT", "BREAK", None);
        let market = market_from_info(&halted, MarketType::Spot).unwrap();
        assert!(!market.active);
        assert_eq!(market.symbol, "LUNA/USDT");
    }

    #[test]
    fn test_ticker_parses_string_fields() {
        let raw: Ticker24h = serde_json::from_str(
            r#"{"symbol":"BTCUSDT","lastPrice":"42000.5","volume":"10","quoteVolume":"420005"}"#,
        )
        .unwrap();
        assert_eq!(raw.last_price, Some(42000.5));
        assert_eq!(raw.bid_price, None);
        assert_eq!(raw.quote_volume, Some(420005.0));
    }

    #[test]
    fn test_urls_per_market_type() {
        let network = NetworkConfig::default();
        let spot = BinanceClient::new(MarketType::Spot, &network).unwrap();
        let fut = BinanceClient::new(MarketType::Future, &network).unwrap();
        assert_eq!(spot.url("/klines"), "https://api.binance.com/api/v3/klines");
        assert_eq!(fut.url("/klines"), "https://fapi.binance.com/fapi/v1/klines");
    }
}
