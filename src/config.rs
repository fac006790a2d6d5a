//! Scanner configuration
//!
//! TOML file with serde defaults for every field, plus a thin layer of
//! environment overrides. A missing file is not an error.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::MarketType;

/// Upper bound on the registry's connectivity probe.
pub const MAX_PROBE_TIMEOUT_SECS: u64 = 10;

/// Bars needed before the classifier can emit: 30 trailing plus the current one.
pub const MIN_HISTORY_BARS: usize = 31;

/// Top-level scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<ExchangeConfig>,

    /// Used when every configured exchange fails its probe
    #[serde(default = "default_fallback_exchange")]
    pub fallback_exchange: ExchangeConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub indicators: IndicatorConfig,

    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            exchanges: default_exchanges(),
            fallback_exchange: default_fallback_exchange(),
            network: NetworkConfig::default(),
            indicators: IndicatorConfig::default(),
            data: DataConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(contents)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `path` (or `VOLSCAN_CONFIG`, or `volscan.toml`),
    /// falling back to defaults, then apply environment overrides.
    pub fn from_env(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::var("VOLSCAN_CONFIG").ok().map(Into::into))
            .unwrap_or_else(|| "volscan.toml".into());

        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            tracing::debug!("Using default scanner config ({} not found)", path.display());
            Self::default()
        };

        config.apply_env_overrides();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("VOLSCAN_TOP_N") {
            self.data.top_n = v;
        }
        if let Some(v) = env_parse("VOLSCAN_UPDATE_INTERVAL_SECS") {
            self.data.update_interval_secs = v;
        }
        if let Some(v) = env_parse("VOLSCAN_RETRY_INTERVAL_SECS") {
            self.data.retry_interval_secs = v;
        }
        if let Some(v) = env_parse("VOLSCAN_MAX_CONCURRENCY") {
            self.network.max_concurrency = v;
        }
        if let Ok(v) = std::env::var("VOLSCAN_TIMEFRAME") {
            if !v.trim().is_empty() {
                self.data.timeframe = v.trim().to_string();
            }
        }
        if let Some(v) = env_parse("VOLSCAN_VOLUME_RATIO_THRESHOLD") {
            self.indicators.volume_ratio_threshold = v;
        }
        if let Some(v) = env_parse("PORT") {
            self.server.port = v;
        }
    }

    /// Bring hand-edited exchange entries to the casing connectors and
    /// symbol matching expect.
    pub fn normalize(&mut self) {
        for exchange in self.exchanges.iter_mut().chain(std::iter::once(&mut self.fallback_exchange)) {
            exchange.normalize();
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ind = &self.indicators;
        if !(ind.volume_ratio_threshold > 0.0) {
            return Err(anyhow!("volume_ratio_threshold must be positive"));
        }
        if !(ind.strong_volume_ratio > 0.0) {
            return Err(anyhow!("strong_volume_ratio must be positive"));
        }
        if ind.strong_volume_ratio < ind.volume_ratio_threshold {
            return Err(anyhow!(
                "strong_volume_ratio {} is below volume_ratio_threshold {}",
                ind.strong_volume_ratio,
                ind.volume_ratio_threshold
            ));
        }
        let [fast, mid, slow] = ind.ma_periods;
        if fast == 0 || fast >= mid || mid >= slow {
            return Err(anyhow!("ma_periods must be non-zero and strictly ascending"));
        }
        if ind.volume_ma_period == 0 || ind.price_volatility_period == 0 {
            return Err(anyhow!("indicator windows must be non-zero"));
        }
        if self.network.max_concurrency == 0 {
            return Err(anyhow!("max_concurrency must be at least 1"));
        }
        if self.data.candle_limit < MIN_HISTORY_BARS {
            return Err(anyhow!(
                "candle_limit {} is below the {} bars needed to emit",
                self.data.candle_limit,
                MIN_HISTORY_BARS
            ));
        }
        for exchange in &self.exchanges {
            if exchange.id.trim().is_empty() {
                return Err(anyhow!("exchange id must not be empty"));
            }
            if exchange.quote_currency.trim().is_empty() {
                return Err(anyhow!("exchange {} has no quote currency", exchange.id));
            }
        }
        Ok(())
    }

    /// Default config rendered as TOML
    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Self::default()).context("serializing default config")
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("serializing config")?;
        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("writing config {}", path.as_ref().display()))?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

// =============================================================================
// EXCHANGES
// =============================================================================

/// One configured exchange. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub id: String,
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    /// USD-equivalent minimum 24h volume (strictly exceeded to qualify)
    #[serde(default = "default_min_volume_usd")]
    pub min_volume_usd: f64,
    #[serde(default = "default_market_type")]
    pub market_type: MarketType,
    /// Lower = higher priority
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

impl ExchangeConfig {
    pub fn new(id: &str, quote_currency: &str, min_volume_usd: f64, market_type: MarketType, priority: u32) -> Self {
        Self {
            id: id.to_lowercase(),
            quote_currency: quote_currency.to_uppercase(),
            min_volume_usd,
            market_type,
            priority,
            enabled: true,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn normalize(&mut self) {
        self.id = self.id.trim().to_lowercase();
        self.quote_currency = self.quote_currency.trim().to_uppercase();
    }
}

fn default_quote_currency() -> String {
    "USDT".to_string()
}
fn default_min_volume_usd() -> f64 {
    1_000_000.0
}
fn default_market_type() -> MarketType {
    MarketType::Spot
}
fn default_priority() -> u32 {
    999
}
fn default_true() -> bool {
    true
}

/// The stock exchange table. Only exchanges with a connector in
/// [`crate::exchanges`] are enabled out of the box.
pub fn default_exchanges() -> Vec<ExchangeConfig> {
    use MarketType::{Future, Spot};
    vec![
        ExchangeConfig::new("binance", "USDT", 1_000_000.0, Future, 1)
            .with_description("Binance USDT-margined perpetuals"),
        ExchangeConfig::new("okx", "USDT", 800_000.0, Future, 2)
            .with_description("OKX USDT perpetual swaps"),
        ExchangeConfig::new("kucoin", "USDT", 500_000.0, Spot, 3)
            .with_description("KuCoin spot")
            .disabled(),
        ExchangeConfig::new("huobi", "USDT", 600_000.0, Spot, 4)
            .with_description("Huobi spot")
            .disabled(),
        ExchangeConfig::new("bybit", "USDT", 400_000.0, Future, 5)
            .with_description("Bybit USDT linear perpetuals"),
        ExchangeConfig::new("gateio", "USDT", 300_000.0, Spot, 6)
            .with_description("Gate.io spot")
            .disabled(),
        ExchangeConfig::new("mexc", "USDT", 200_000.0, Spot, 7)
            .with_description("MEXC spot")
            .disabled(),
        ExchangeConfig::new("bitget", "USDT", 300_000.0, Spot, 8)
            .with_description("Bitget spot")
            .disabled(),
        ExchangeConfig::new("coinbase", "USD", 2_000_000.0, Spot, 9)
            .with_description("Coinbase spot")
            .disabled(),
        ExchangeConfig::new("kraken", "USD", 1_500_000.0, Spot, 10)
            .with_description("Kraken spot")
            .disabled(),
        ExchangeConfig::new("bitfinex", "USD", 1_000_000.0, Spot, 11)
            .with_description("Bitfinex spot")
            .disabled(),
        ExchangeConfig::new("upbit", "KRW", 500_000.0, Spot, 12)
            .with_description("Upbit KRW spot")
            .disabled(),
    ]
}

pub fn default_fallback_exchange() -> ExchangeConfig {
    ExchangeConfig::new("binance", "USDT", 1_000_000.0, MarketType::Spot, 999)
        .with_description("Fallback exchange")
}

// =============================================================================
// NETWORK
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-request HTTP timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Registry probe timeout, capped at [`MAX_PROBE_TIMEOUT_SECS`]
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Concurrent per-symbol fetches during a scan. Analysis shares one
    /// bound across exchanges; per-symbol ticker fallback applies it per
    /// exchange, so aggregation can reach exchanges x this value.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_probe_timeout_secs() -> u64 {
    MAX_PROBE_TIMEOUT_SECS
}
fn default_max_concurrency() -> usize {
    8
}
fn default_user_agent() -> String {
    concat!("volscan/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            probe_timeout_secs: default_probe_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            user_agent: default_user_agent(),
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.clamp(1, MAX_PROBE_TIMEOUT_SECS))
    }
}

// =============================================================================
// INDICATORS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Ratio at or above which an MA-aligned symbol gets a directional signal
    #[serde(default = "default_volume_ratio_threshold")]
    pub volume_ratio_threshold: f64,

    /// Ratio at or above which a symbol is recommended
    #[serde(default = "default_strong_volume_ratio")]
    pub strong_volume_ratio: f64,

    /// Fast, mid and slow moving-average windows
    #[serde(default = "default_ma_periods")]
    pub ma_periods: [usize; 3],

    /// Rolling volume mean window
    #[serde(default = "default_volume_ma_period")]
    pub volume_ma_period: usize,

    /// Rolling std-dev window over percent change
    #[serde(default = "default_price_volatility_period")]
    pub price_volatility_period: usize,
}

fn default_volume_ratio_threshold() -> f64 {
    3.0
}
fn default_strong_volume_ratio() -> f64 {
    5.0
}
fn default_ma_periods() -> [usize; 3] {
    [5, 10, 20]
}
fn default_volume_ma_period() -> usize {
    30
}
fn default_price_volatility_period() -> usize {
    10
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            volume_ratio_threshold: default_volume_ratio_threshold(),
            strong_volume_ratio: default_strong_volume_ratio(),
            ma_periods: default_ma_periods(),
            volume_ma_period: default_volume_ma_period(),
            price_volatility_period: default_price_volatility_period(),
        }
    }
}

// =============================================================================
// DATA / SCHEDULING
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// Candles fetched per symbol per scan
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,

    /// Sleep between successful cycles
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Sleep after a cycle-level failure
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Opportunities kept in the published snapshot
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    #[serde(default = "default_sort")]
    pub default_sort: String,

    #[serde(default = "default_chart_limit")]
    pub chart_limit: usize,

    #[serde(default = "default_chart_cache_ttl_secs")]
    pub chart_cache_ttl_secs: u64,

    /// Markets sampled per exchange for the ticker success rate
    #[serde(default = "default_status_sample_size")]
    pub status_sample_size: usize,
}

fn default_timeframe() -> String {
    "1h".to_string()
}
fn default_candle_limit() -> usize {
    100
}
fn default_update_interval_secs() -> u64 {
    180
}
fn default_retry_interval_secs() -> u64 {
    60
}
fn default_top_n() -> usize {
    100
}
fn default_sort() -> String {
    "volume_ratio".to_string()
}
fn default_chart_limit() -> usize {
    100
}
fn default_chart_cache_ttl_secs() -> u64 {
    300
}
fn default_status_sample_size() -> usize {
    5
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            timeframe: default_timeframe(),
            candle_limit: default_candle_limit(),
            update_interval_secs: default_update_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            top_n: default_top_n(),
            default_sort: default_sort(),
            chart_limit: default_chart_limit(),
            chart_cache_ttl_secs: default_chart_cache_ttl_secs(),
            status_sample_size: default_status_sample_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
