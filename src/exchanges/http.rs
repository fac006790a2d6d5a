//! Shared REST plumbing for the exchange connectors.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::models::Candle;

pub fn build_client(network: &NetworkConfig) -> Result<Client> {
    Client::builder()
        .timeout(network.request_timeout())
        .pool_max_idle_per_host(network.max_concurrency.max(1))
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent(network.user_agent.clone())
        .build()
        .context("Failed to build exchange HTTP client")
}

pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T> {
    let resp = client
        .get(url)
        .query(query)
        .send()
        .await
        .with_context(|| format!("GET {} failed", url))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("GET {} {}: {}", url, status, text));
    }

    resp.json::<T>()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))
}

/// Exchanges send numbers as strings, numbers, or empty strings.
pub fn de_string_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(value_f64(&v))
}

pub fn value_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn value_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

/// Parse a `[ts, open, high, low, close, volume, ...]` row.
pub fn candle_from_row(row: &[Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    Some(Candle::new(
        value_i64(&row[0])?,
        value_f64(&row[1])?,
        value_f64(&row[2])?,
        value_f64(&row[3])?,
        value_f64(&row[4])?,
        value_f64(&row[5])?,
    ))
}

/// Rows in ascending time, duplicates by timestamp dropped.
pub fn normalize_candles(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    candles
}

/// `BTC/USDT` -> `BTCUSDT`
pub fn compact_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}
