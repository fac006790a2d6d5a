//! Symbol Aggregator
//!
//! Builds the per-cycle symbol universe from every active exchange.
//! Exchanges are queried concurrently but merged strictly in priority order,
//! so the first exchange to list a symbol owns it.

use anyhow::{anyhow, Result};
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::exchanges::ExchangeConnection;
use crate::models::Ticker;

/// Deduplicated symbol set with its owning exchange. Iterates in symbol order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolUniverse {
    owners: BTreeMap<String, String>,
}

impl SymbolUniverse {
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, symbol: &str) -> Option<&str> {
        self.owners.get(symbol).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.owners.iter().map(|(s, e)| (s.as_str(), e.as_str()))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.owners.keys().map(String::as_str)
    }

    /// Record `exchange` as owner unless the symbol is already owned.
    /// Returns whether the symbol was newly added.
    pub fn claim(&mut self, symbol: &str, exchange: &str) -> bool {
        if self.owners.contains_key(symbol) {
            return false;
        }
        self.owners.insert(symbol.to_string(), exchange.to_string());
        true
    }

    /// Owned-symbol count per exchange
    pub fn symbol_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for exchange in self.owners.values() {
            *counts.entry(exchange.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// What one exchange contributed to a cycle's universe
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeContribution {
    pub exchange: String,
    pub candidates: usize,
    pub eligible: usize,
    /// Symbols this exchange won after dedup
    pub owned: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationReport {
    pub universe: SymbolUniverse,
    pub contributions: Vec<ExchangeContribution>,
}

impl AggregationReport {
    /// True when there were exchanges to ask and every one of them failed
    pub fn all_failed(&self) -> bool {
        !self.contributions.is_empty() && self.contributions.iter().all(|c| c.error.is_some())
    }
}

struct Eligible {
    candidates: usize,
    symbols: Vec<String>,
}

/// Build the universe from `connections`, which must already be in priority
/// order. Failures reduce the candidate set and are never returned.
pub async fn aggregate(connections: &[Arc<ExchangeConnection>], concurrency: usize) -> AggregationReport {
    let results = join_all(connections.iter().map(|conn| eligible_symbols(conn, concurrency))).await;

    let mut report = AggregationReport::default();
    for (conn, result) in connections.iter().zip(results) {
        let contribution = match result {
            Ok(eligible) => {
                let owned = eligible
                    .symbols
                    .iter()
                    .filter(|s| report.universe.claim(s, conn.id()))
                    .count();
                info!(
                    exchange = %conn.id(),
                    candidates = eligible.candidates,
                    eligible = eligible.symbols.len(),
                    owned,
                    "📊 Exchange symbols aggregated"
                );
                ExchangeContribution {
                    exchange: conn.id().to_string(),
                    candidates: eligible.candidates,
                    eligible: eligible.symbols.len(),
                    owned,
                    error: None,
                }
            }
            Err(e) => {
                warn!(exchange = %conn.id(), error = %e, "Symbol aggregation failed for exchange");
                ExchangeContribution {
                    exchange: conn.id().to_string(),
                    candidates: 0,
                    eligible: 0,
                    owned: 0,
                    error: Some(format!("{:#}", e)),
                }
            }
        };
        report.contributions.push(contribution);
    }

    report
}

async fn eligible_symbols(conn: &ExchangeConnection, concurrency: usize) -> Result<Eligible> {
    let candidates: Vec<String> = conn.candidates().await?.into_iter().map(|m| m.symbol).collect();
    if candidates.is_empty() {
        return Ok(Eligible {
            candidates: 0,
            symbols: Vec::new(),
        });
    }

    let tickers = match conn.fetch_tickers(&candidates).await {
        Ok(tickers) if !tickers.is_empty() => tickers,
        Ok(_) => {
            debug!(exchange = %conn.id(), "Bulk ticker fetch returned nothing, falling back to per-symbol");
            fetch_each(conn, &candidates, concurrency).await
        }
        Err(e) => {
            debug!(exchange = %conn.id(), error = %e, "Bulk ticker fetch unavailable, falling back to per-symbol");
            fetch_each(conn, &candidates, concurrency).await
        }
    };
    // Every ticker path failed: the exchange is unreachable, not merely quiet
    if tickers.is_empty() {
        return Err(anyhow!(
            "no ticker reachable for any of {} candidates",
            candidates.len()
        ));
    }

    let by_symbol: HashMap<&str, &Ticker> = tickers.iter().map(|t| (t.symbol.as_str(), t)).collect();
    let min_volume = conn.config().min_volume_usd;
    let symbols = candidates
        .iter()
        .filter(|s| {
            by_symbol
                .get(s.as_str())
                .map(|t| t.estimated_quote_volume() > min_volume)
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    Ok(Eligible {
        candidates: candidates.len(),
        symbols,
    })
}

async fn fetch_each(conn: &ExchangeConnection, symbols: &[String], concurrency: usize) -> Vec<Ticker> {
    stream::iter(symbols.iter().cloned())
        .map(|symbol| async move {
            match conn.fetch_ticker(&symbol).await {
                Ok(ticker) => Some(ticker),
                Err(e) => {
                    debug!(exchange = %conn.id(), symbol = %symbol, error = %e, "Ticker fetch failed");
                    None
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|t| async move { t })
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use crate::exchanges::ExchangeClient;
    use crate::models::{Candle, MarketInfo, MarketType};
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct Venue {
        id: &'static str,
        markets: Vec<(&'static str, f64)>,
        bulk: bool,
        fail_catalog: bool,
    }

    #[async_trait]
    impl ExchangeClient for Venue {
        fn id(&self) -> &str {
            self.id
        }

        async fn list_markets(&self) -> Result<Vec<MarketInfo>> {
            if self.fail_catalog {
                return Err(anyhow!("catalog unavailable"));
            }
            Ok(self
                .markets
                .iter()
                .map(|(base, _)| MarketInfo::new(base, "USDT", MarketType::Spot))
                .collect())
        }

        async fn fetch_tickers(&self, _symbols: &[String]) -> Result<Vec<Ticker>> {
            if !self.bulk {
                return Err(anyhow!("bulk tickers not supported"));
            }
            Ok(self
                .markets
                .iter()
                .map(|(base, qv)| Ticker {
                    quote_volume: Some(*qv),
                    ..Ticker::new(format!("{}/USDT", base))
                })
                .collect())
        }

        async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
            if symbol.starts_with("FLAKY") {
                return Err(anyhow!("timeout"));
            }
            let base = symbol.trim_end_matches("/USDT");
            let (_, qv) = self
                .markets
                .iter()
                .find(|(b, _)| *b == base)
                .ok_or_else(|| anyhow!("unknown symbol"))?;
            // No quote volume on the slow path: derive it from base * last
            Ok(Ticker {
                base_volume: Some(*qv / 2.0),
                last: Some(2.0),
                ..Ticker::new(symbol)
            })
        }

        async fn fetch_ohlcv(&self, _s: &str, _tf: &str, _limit: usize) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }
    }

    fn connection(venue: Venue, priority: u32, min_volume: f64) -> Arc<ExchangeConnection> {
        let config = ExchangeConfig::new(venue.id, "USDT", min_volume, MarketType::Spot, priority);
        Arc::new(ExchangeConnection::new(config, Arc::new(venue)))
    }

    #[tokio::test]
    async fn test_dedup_prefers_priority_order() {
        let primary = connection(
            Venue {
                id: "primary",
                markets: vec![("X", 5_000_000.0), ("Y", 5_000_000.0)],
                bulk: true,
                fail_catalog: false,
            },
            1,
            1_000_000.0,
        );
        let secondary = connection(
            Venue {
                id: "secondary",
                markets: vec![("X", 9_000_000.0), ("Z", 9_000_000.0)],
                bulk: true,
                fail_catalog: false,
            },
            2,
            1_000_000.0,
        );

        let report = aggregate(&[primary, secondary], 4).await;
        assert_eq!(report.universe.owner("X/USDT"), Some("primary"));
        assert_eq!(report.universe.owner("Z/USDT"), Some("secondary"));
        assert_eq!(report.universe.len(), 3);
        assert_eq!(report.contributions[1].owned, 1);
        assert_eq!(
            report.universe.symbols().collect::<Vec<_>>(),
            vec!["X/USDT", "Y/USDT", "Z/USDT"]
        );
    }

    #[tokio::test]
    async fn test_min_volume_is_strict() {
        let conn = connection(
            Venue {
                id: "v",
                markets: vec![("AT", 1_000_000.0), ("ABOVE", 1_000_001.0)],
                bulk: true,
                fail_catalog: false,
            },
            1,
            1_000_000.0,
        );
        let report = aggregate(&[conn], 4).await;
        assert_eq!(report.universe.symbols().collect::<Vec<_>>(), vec!["ABOVE/USDT"]);
    }

    #[tokio::test]
    async fn test_per_symbol_fallback() {
        let conn = connection(
            Venue {
                id: "slow",
                markets: vec![("BIG", 4_000_000.0), ("SMALL", 10.0), ("FLAKY", 9_000_000.0)],
                bulk: false,
                fail_catalog: false,
            },
            1,
            1_000_000.0,
        );
        let report = aggregate(&[conn], 2).await;
        assert_eq!(report.universe.symbols().collect::<Vec<_>>(), vec!["BIG/USDT"]);
        assert_eq!(report.contributions[0].candidates, 3);
        assert!(report.contributions[0].error.is_none());
    }

    #[tokio::test]
    async fn test_failed_exchange_does_not_abort() {
        let broken = connection(
            Venue {
                id: "broken",
                markets: vec![("X", 5_000_000.0)],
                bulk: true,
                fail_catalog: true,
            },
            1,
            0.0,
        );
        let healthy = connection(
            Venue {
                id: "healthy",
                markets: vec![("X", 5_000_000.0)],
                bulk: true,
                fail_catalog: false,
            },
            2,
            0.0,
        );
        let report = aggregate(&[broken, healthy], 4).await;
        assert_eq!(report.universe.owner("X/USDT"), Some("healthy"));
        assert!(report.contributions[0].error.is_some());
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn test_unreachable_tickers_mark_exchange_failed() {
        let dark = connection(
            Venue {
                id: "dark",
                markets: vec![("FLAKY1", 5_000_000.0), ("FLAKY2", 5_000_000.0)],
                bulk: false,
                fail_catalog: false,
            },
            1,
            0.0,
        );
        let report = aggregate(&[dark], 4).await;
        assert!(report.universe.is_empty());
        assert_eq!(report.contributions[0].candidates, 0);
        assert!(report.contributions[0].error.as_deref().unwrap().contains("no ticker reachable"));
        assert!(report.all_failed());
    }

    #[tokio::test]
    async fn test_no_exchanges_empty_universe() {
        let report = aggregate(&[], 4).await;
        assert!(report.universe.is_empty());
        assert!(!report.all_failed());
    }
}
