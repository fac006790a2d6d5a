//! OKX public market data (SPOT and USDT SWAP)

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use super::http::{build_client, de_string_f64_opt, get_json, normalize_candles, value_f64};
use super::ExchangeClient;
use crate::config::NetworkConfig;
use crate::models::{Candle, MarketInfo, MarketType, Ticker};

const OKX_API_BASE: &str = "https://www.okx.com/api/v5";
const MAX_CANDLES: usize = 300;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    #[serde(default)]
    base_ccy: String,
    #[serde(default)]
    quote_ccy: String,
    #[serde(default)]
    settle_ccy: String,
    #[serde(default)]
    uly: String,
    #[serde(default)]
    ct_type: String,
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    inst_id: String,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    last: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    bid_px: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    ask_px: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    vol24h: Option<f64>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    vol_ccy24h: Option<f64>,
}

pub struct OkxClient {
    client: Client,
    base_url: String,
    market_type: MarketType,
}

impl OkxClient {
    pub fn new(market_type: MarketType, network: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(network)?,
            base_url: OKX_API_BASE.to_string(),
            market_type,
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn inst_type(&self) -> &'static str {
        match self.market_type {
            MarketType::Spot => "SPOT",
            MarketType::Future => "SWAP",
        }
    }

    /// `BTC/USDT` -> `BTC-USDT` or `BTC-USDT-SWAP`
    fn inst_id(&self, symbol: &str) -> String {
        let base = symbol.replace('/', "-");
        match self.market_type {
            MarketType::Spot => base,
            MarketType::Future => format!("{}-SWAP", base),
        }
    }

    fn symbol_from_inst_id(&self, inst_id: &str) -> Option<String> {
        let mut parts = inst_id.split('-');
        let base = parts.next()?;
        let quote = parts.next()?;
        Some(format!("{}/{}", base, quote))
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        let url = self.url(path);
        let envelope: Envelope<T> = get_json(&self.client, &url, query).await?;
        if envelope.code != "0" {
            return Err(anyhow!("OKX {} error {}: {}", path, envelope.code, envelope.msg));
        }
        Ok(envelope.data)
    }

    fn to_ticker(&self, raw: RawTicker, symbol: String) -> Ticker {
        // SPOT: vol24h is base, volCcy24h is quote.
        // SWAP: vol24h is contracts, volCcy24h is base.
        let (base_volume, quote_volume) = match self.market_type {
            MarketType::Spot => (raw.vol24h, raw.vol_ccy24h),
            MarketType::Future => (raw.vol_ccy24h, None),
        };
        Ticker {
            symbol,
            last: raw.last,
            close: raw.last,
            bid: raw.bid_px,
            ask: raw.ask_px,
            base_volume,
            quote_volume,
        }
    }

    fn candle_from_row(&self, row: &[Value]) -> Option<Candle> {
        // [ts, o, h, l, c, vol, volCcy, ...]; SWAP volume in base is volCcy
        let volume_idx = match self.market_type {
            MarketType::Spot => 5,
            MarketType::Future => 6,
        };
        let ts = row.first().and_then(value_f64)? as i64;
        Some(Candle::new(
            ts,
            value_f64(row.get(1)?)?,
            value_f64(row.get(2)?)?,
            value_f64(row.get(3)?)?,
            value_f64(row.get(4)?)?,
            value_f64(row.get(volume_idx)?)?,
        ))
    }
}

fn market_from_instrument(inst: &Instrument, market_type: MarketType) -> Option<MarketInfo> {
    let (base, quote) = match market_type {
        MarketType::Spot => (inst.base_ccy.clone(), inst.quote_ccy.clone()),
        MarketType::Future => {
            if inst.ct_type != "linear" {
                return None;
            }
            let base = inst.uly.split('-').next().unwrap_or_default().to_string();
            (base, inst.settle_ccy.clone())
        }
    };
    if base.is_empty() || quote.is_empty() {
        return None;
    }
    let market = MarketInfo::new(&base, &quote, market_type);
    Some(if inst.state == "live" {
        market
    } else {
        market.inactive()
    })
}

/// `1h` -> `1H`, `1d` -> `1D`; minute and month bars pass through
fn okx_bar(timeframe: &str) -> String {
    match timeframe.chars().last() {
        Some('h') | Some('d') | Some('w') => timeframe.to_uppercase(),
        _ => timeframe.to_string(),
    }
}

#[async_trait]
impl ExchangeClient for OkxClient {
    fn id(&self) -> &str {
        "okx"
    }

    async fn list_markets(&self) -> Result<Vec<MarketInfo>> {
        let instruments: Vec<Instrument> = self
            .get_data("/public/instruments", &[("instType", self.inst_type().to_string())])
            .await?;
        Ok(instruments
            .iter()
            .filter_map(|i| market_from_instrument(i, self.market_type))
            .collect())
    }

    async fn fetch_tickers(&self, symbols: &[String]) -> Result<Vec<Ticker>> {
        let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();
        let raw: Vec<RawTicker> = self
            .get_data("/market/tickers", &[("instType", self.inst_type().to_string())])
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|t| {
                let symbol = self.symbol_from_inst_id(&t.inst_id)?;
                wanted
                    .contains(symbol.as_str())
                    .then(|| self.to_ticker(t, symbol))
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let raw: Vec<RawTicker> = self
            .get_data("/market/ticker", &[("instId", self.inst_id(symbol))])
            .await?;
        let first = raw
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OKX returned no ticker for {}", symbol))?;
        Ok(self.to_ticker(first, symbol.to_string()))
    }

    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let rows: Vec<Vec<Value>> = self
            .get_data(
                "/market/candles",
                &[
                    ("instId", self.inst_id(symbol)),
                    ("bar", okx_bar(timeframe)),
                    ("limit", limit.clamp(1, MAX_CANDLES).to_string()),
                ],
            )
            .await?;

        let candles: Vec<Candle> = rows.iter().filter_map(|r| self.candle_from_row(r)).collect();
        if candles.len() != rows.len() {
            return Err(anyhow!("malformed candle rows for {}", symbol));
        }
        // OKX returns newest first
        Ok(normalize_candles(candles))
    }
}
