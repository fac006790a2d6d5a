//! Bybit v5 public market data (spot and linear perpetuals)

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::http::{build_client, candle_from_row, compact_symbol, de_string_f64_opt, get_json, normalize_candles};
use super::ExchangeClient;
use crate::config::NetworkConfig;
use crate::models::{Candle, MarketInfo, MarketType, Ticker};

const BYBIT_API_BASE: &str = "https://api.bybit.com/v5";
const MAX_KLINES: usize = 1000;
const MAX_INSTRUMENT_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<ListResult<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
    #[serde(default)]
    next_page_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    status: String,
    #[serde(default)]
    contract_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: String,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    last_price: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    bid1_price: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    ask1_price: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    volume24h: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    turnover24h: Option<f64>,
}

impl From<(RawTicker, String)> for Ticker {
    fn from((raw, symbol): (RawTicker, String)) -> Self {
        Ticker {
            symbol,
            last: raw.last_price,
            close: raw.last_price,
            bid: raw.bid1_price,
            ask: raw.ask1_price,
            base_volume: raw.volume24h,
            quote_volume: raw.turnover24h,
        }
    }
}

pub struct BybitClient {
    client: Client,
    base_url: String,
    market_type: MarketType,
    symbols: RwLock<HashMap<String, String>>,
}

impl BybitClient {
    pub fn new(market_type: MarketType, network: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(network)?,
            base_url: BYBIT_API_BASE.to_string(),
            market_type,
            symbols: RwLock::new(HashMap::new()),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn category(&self) -> &'static str {
        match self.market_type {
            MarketType::Spot => "spot",
            MarketType::Future => "linear",
        }
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ListResult<T>> {
        let url = self.url(path);
        let envelope: Envelope<T> = get_json(&self.client, &url, query).await?;
        if envelope.ret_code != 0 {
            return Err(anyhow!("Bybit {} error {}: {}", path, envelope.ret_code, envelope.ret_msg));
        }
        envelope
            .result
            .ok_or_else(|| anyhow!("Bybit {} returned no result", path))
    }
}

fn market_from_instrument(inst: &Instrument, market_type: MarketType) -> Option<MarketInfo> {
    if market_type == MarketType::Future && inst.contract_type.as_deref() != Some("LinearPerpetual") {
        return None;
    }
    let market = MarketInfo::new(&inst.base_coin, &inst.quote_coin, market_type);
    Some(if inst.status == "Trading" {
        market
    } else {
        market.inactive()
    })
}

/// Bybit kline intervals are minutes, or D/W/M
fn bybit_interval(timeframe: &str) -> Result<&'static str> {
    Ok(match timeframe {
        "1m" => "1",
        "3m" => "3",
        "5m" => "5",
        "15m" => "15",
        "30m" => "30",
        "1h" => "60",
        "2h" => "120",
        "4h" => "240",
        "6h" => "360",
        "12h" => "720",
        "1d" => "D",
        "1w" => "W",
        "1M" => "M",
        other => return Err(anyhow!("unsupported Bybit timeframe '{}'", other)),
    })
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn id(&self) -> &str {
        "bybit"
    }

    async fn list_markets(&self) -> Result<Vec<MarketInfo>> {
        let mut markets = Vec::new();
        let mut ids = HashMap::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_INSTRUMENT_PAGES {
            let mut query = vec![
                ("category", self.category().to_string()),
                ("limit", "1000".to_string()),
            ];
            if let Some(c) = cursor.take() {
                query.push(("cursor", c));
            }

            let page: ListResult<Instrument> = self.get_list("/market/instruments-info", &query).await?;
            for inst in &page.list {
                if let Some(market) = market_from_instrument(inst, self.market_type) {
                    ids.insert(inst.symbol.clone(), market.symbol.clone());
                    markets.push(market);
                }
            }

            match page.next_page_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        *self.symbols.write() = ids;
        Ok(markets)
    }

    async fn fetch_tickers(&self, symbols: &[String]) -> Result<Vec<Ticker>> {
        let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();
        let page: ListResult<RawTicker> = self
            .get_list("/market/tickers", &[("category", self.category().to_string())])
            .await?;

        let ids = self.symbols.read();
        Ok(page
            .list
            .into_iter()
            .filter_map(|t| {
                let symbol = ids.get(&t.symbol)?.clone();
                wanted
                    .contains(symbol.as_str())
                    .then(|| Ticker::from((t, symbol)))
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let page: ListResult<RawTicker> = self
            .get_list(
                "/market/tickers",
                &[
                    ("category", self.category().to_string()),
                    ("symbol", compact_symbol(symbol)),
                ],
            )
            .await?;
        let raw = page
            .list
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Bybit returned no ticker for {}", symbol))?;
        Ok(Ticker::from((raw, symbol.to_string())))
    }

    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let page: ListResult<Vec<Value>> = self
            .get_list(
                "/market/kline",
                &[
                    ("category", self.category().to_string()),
                    ("symbol", compact_symbol(symbol)),
                    ("interval", bybit_interval(timeframe)?.to_string()),
                    ("limit", limit.clamp(1, MAX_KLINES).to_string()),
                ],
            )
            .await?;

        let candles: Vec<Candle> = page.list.iter().filter_map(|r| candle_from_row(r)).collect();
        if candles.len() != page.list.len() {
            return Err(anyhow!("malformed kline rows for {}", symbol));
        }
        // Bybit returns newest first
        Ok(normalize_candles(candles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interval_mapping() {
        assert_eq!(bybit_interval("1h").unwrap(), "60");
        assert_eq!(bybit_interval("4h").unwrap(), "240");
        assert_eq!(bybit_interval("1d").unwrap(), "D");
        assert!(bybit_interval("7h").is_err());
    }

    #[test]
    fn test_linear_only_for_futures() {
        let inst = |contract: &str| Instrument {
            symbol: "BTCUSDT".to_string(),
            base_coin: "BTC".to_string(),
            quote_coin: "USDT".to_string(),
            status: "Trading".to_string(),
            contract_type: Some(contract.to_string()),
        };
        assert!(market_from_instrument(&inst("LinearPerpetual"), MarketType::Future).is_some());
        assert!(market_from_instrument(&inst("LinearFutures"), MarketType::Future).is_none());
    }

    #[test]
    fn test_envelope_parse() {
        let envelope: Envelope<RawTicker> = serde_json::from_value(json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "list": [{"symbol": "SOLUSDT", "lastPrice": "100", "turnover24h": "5000000"}]
            }
        }))
        .unwrap();
        let list = envelope.result.unwrap().list;
        let ticker = Ticker::from((list.into_iter().next().unwrap(), "SOL/USDT".to_string()));
        assert_eq!(ticker.estimated_quote_volume(), 5_000_000.0);
    }
}
