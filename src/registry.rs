//! Exchange Registry
//!
//! Probes every enabled exchange once at startup. An exchange whose probe
//! fails stays excluded for the life of the process. When nothing survives,
//! a single fallback exchange is tried; if that fails too the registry is
//! empty and every downstream consumer sees "no data".

use anyhow::{anyhow, Context, Result};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{ExchangeConfig, ScannerConfig};
use crate::exchanges::{connect, ExchangeConnection, SharedClient};
use crate::models::ExchangeStatus;

#[derive(Debug)]
enum EntryState {
    Active(Arc<ExchangeConnection>),
    Excluded(String),
    Disabled,
}

#[derive(Debug)]
struct Entry {
    config: ExchangeConfig,
    state: EntryState,
}

#[derive(Debug, Default)]
pub struct ExchangeRegistry {
    entries: Vec<Entry>,
    active: Vec<Arc<ExchangeConnection>>,
    used_fallback: bool,
}

impl ExchangeRegistry {
    /// Probe the configured exchanges with the built-in REST connectors.
    pub async fn probe(config: &ScannerConfig) -> Self {
        let network = config.network.clone();
        Self::probe_with(
            &config.exchanges,
            Some(&config.fallback_exchange),
            config.network.probe_timeout(),
            move |cfg| connect(cfg, &network),
        )
        .await
    }

    /// Probe with a caller-supplied connector.
    pub async fn probe_with<F>(
        configs: &[ExchangeConfig],
        fallback: Option<&ExchangeConfig>,
        probe_timeout: Duration,
        connector: F,
    ) -> Self
    where
        F: Fn(&ExchangeConfig) -> Result<SharedClient>,
    {
        let mut ordered: Vec<ExchangeConfig> = configs.to_vec();
        ordered.sort_by_key(|c| c.priority);

        let probes = ordered.iter().map(|cfg| {
            let enabled = cfg.enabled;
            let attempt = if enabled {
                Some(open_connection(cfg, probe_timeout, &connector))
            } else {
                None
            };
            async move {
                match attempt {
                    Some(fut) => Some(fut.await),
                    None => None,
                }
            }
        });
        let results = join_all(probes).await;

        let mut registry = Self::default();
        for (config, result) in ordered.into_iter().zip(results) {
            let state = match result {
                None => EntryState::Disabled,
                Some(Ok(conn)) => {
                    info!(
                        exchange = %config.id,
                        priority = config.priority,
                        markets = conn.market_count(),
                        "✅ Exchange connected"
                    );
                    registry.active.push(conn.clone());
                    EntryState::Active(conn)
                }
                Some(Err(e)) => {
                    warn!(exchange = %config.id, error = %e, "Exchange probe failed, excluding for this run");
                    EntryState::Excluded(format!("{:#}", e))
                }
            };
            registry.entries.push(Entry { config, state });
        }

        if registry.active.is_empty() {
            if let Some(fallback) = fallback {
                warn!(exchange = %fallback.id, "No exchange passed its probe, trying fallback");
                registry.used_fallback = true;
                let state = match open_connection(fallback, probe_timeout, &connector).await {
                    Ok(conn) => {
                        info!(exchange = %fallback.id, "✅ Fallback exchange connected");
                        registry.active.push(conn.clone());
                        EntryState::Active(conn)
                    }
                    Err(e) => {
                        error!(error = %e, "Fallback exchange failed; no market data available");
                        EntryState::Excluded(format!("{:#}", e))
                    }
                };
                registry.entries.push(Entry {
                    config: fallback.clone(),
                    state,
                });
            }
        }

        registry
    }

    /// Registry over already-open connections, ordered by priority.
    pub fn from_connections(mut connections: Vec<Arc<ExchangeConnection>>) -> Self {
        connections.sort_by_key(|c| c.config().priority);
        let entries = connections
            .iter()
            .map(|conn| Entry {
                config: conn.config().clone(),
                state: EntryState::Active(conn.clone()),
            })
            .collect();
        Self {
            entries,
            active: connections,
            used_fallback: false,
        }
    }

    /// Active connections in priority order
    pub fn active(&self) -> &[Arc<ExchangeConnection>] {
        &self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ExchangeConnection>> {
        self.active.iter().find(|c| c.id() == id)
    }

    /// Status for every configured exchange. Active ones get a live ticker
    /// sample over their first `sample_size` candidate markets.
    pub async fn sample_status(&self, sample_size: usize) -> Vec<ExchangeStatus> {
        join_all(self.entries.iter().map(|entry| entry_status(entry, sample_size))).await
    }
}

async fn open_connection<F>(
    config: &ExchangeConfig,
    probe_timeout: Duration,
    connector: &F,
) -> Result<Arc<ExchangeConnection>>
where
    F: Fn(&ExchangeConfig) -> Result<SharedClient>,
{
    let client = connector(config).with_context(|| format!("connecting {}", config.id))?;
    let conn = Arc::new(ExchangeConnection::new(config.clone(), client));

    match tokio::time::timeout(probe_timeout, conn.load_markets()).await {
        Ok(Ok(_)) => Ok(conn),
        Ok(Err(e)) => Err(e.context(format!("loading {} markets", config.id))),
        Err(_) => Err(anyhow!("{} probe timed out after {:?}", config.id, probe_timeout)),
    }
}

async fn entry_status(entry: &Entry, sample_size: usize) -> ExchangeStatus {
    let config = &entry.config;
    let mut status = ExchangeStatus {
        exchange: config.id.clone(),
        enabled: config.enabled,
        connected: false,
        market_count: 0,
        ticker_success_rate: 0.0,
        description: config.description.clone(),
        priority: config.priority,
        quote_currency: config.quote_currency.clone(),
        min_volume_usd: config.min_volume_usd,
        market_type: config.market_type,
        last_error: None,
    };

    match &entry.state {
        EntryState::Disabled => {}
        EntryState::Excluded(e) => status.last_error = Some(e.clone()),
        EntryState::Active(conn) => {
            status.connected = true;
            status.market_count = conn.market_count();
            match conn.candidates().await {
                Ok(candidates) => {
                    let sample: Vec<String> =
                        candidates.into_iter().take(sample_size).map(|m| m.symbol).collect();
                    let results = join_all(sample.iter().map(|s| conn.fetch_ticker(s))).await;
                    let ok = results.iter().filter(|r| r.is_ok()).count();
                    if !sample.is_empty() {
                        status.ticker_success_rate = ok as f64 / sample.len() as f64;
                    }
                    status.last_error = results
                        .into_iter()
                        .filter_map(|r| r.err())
                        .last()
                        .map(|e| format!("{:#}", e));
                }
                Err(e) => status.last_error = Some(format!("{:#}", e)),
            }
        }
    }

    status
}
