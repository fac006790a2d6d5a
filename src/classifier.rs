//! Opportunity Classifier
//!
//! Turns one symbol's candles and indicator series into an [`Opportunity`],
//! or a [`SkipReason`] explaining why none was emitted.

use std::fmt;

use crate::config::{IndicatorConfig, MIN_HISTORY_BARS};
use crate::indicators::{latest, IndicatorSeries};
use crate::models::{Candle, Opportunity, Signal};

/// Trailing volume average lookback, current bar excluded.
pub const AVG_VOLUME_LOOKBACK: usize = MIN_HISTORY_BARS - 1;

/// Bars back for the 24h change, counting the latest bar as the first.
pub const CHANGE_24H_BARS: usize = 24;

// =============================================================================
// SKIP REASONS
// =============================================================================

/// Why a symbol produced no opportunity this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Candle fetch failed or timed out
    FetchFailed(String),
    /// Exchange returned no candles
    EmptyData,
    /// Candles present but total volume is zero
    ZeroVolume,
    InsufficientHistory { have: usize, need: usize },
    /// Latest close or volume is missing, non-positive or non-finite
    InvalidLatest,
    /// Trailing 30-bar volume mean is non-positive or non-finite
    InvalidAverageVolume,
    /// Indicator math produced something unusable
    Computation(String),
    /// Shutdown requested before the symbol was analyzed
    Cancelled,
}

impl SkipReason {
    /// Stable label for counting
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::FetchFailed(_) => "fetch_failed",
            SkipReason::EmptyData => "empty_data",
            SkipReason::ZeroVolume => "zero_volume",
            SkipReason::InsufficientHistory { .. } => "insufficient_history",
            SkipReason::InvalidLatest => "invalid_latest",
            SkipReason::InvalidAverageVolume => "invalid_average_volume",
            SkipReason::Computation(_) => "computation",
            SkipReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::FetchFailed(e) => write!(f, "candle fetch failed: {}", e),
            SkipReason::EmptyData => write!(f, "no candles returned"),
            SkipReason::ZeroVolume => write!(f, "candles carry zero total volume"),
            SkipReason::InsufficientHistory { have, need } => {
                write!(f, "insufficient history: {} bars, need {}", have, need)
            }
            SkipReason::InvalidLatest => write!(f, "latest close or volume is not positive"),
            SkipReason::InvalidAverageVolume => write!(f, "trailing average volume is not positive"),
            SkipReason::Computation(e) => write!(f, "computation error: {}", e),
            SkipReason::Cancelled => write!(f, "scan cancelled"),
        }
    }
}

impl std::error::Error for SkipReason {}

// =============================================================================
// SIGNAL RULES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaAlignment {
    Bullish,
    Bearish,
    Neutral,
}

/// Bullish iff fast > mid > slow, bearish iff fast < mid < slow, all three
/// strictly positive in either case.
pub fn ma_alignment(fast: f64, mid: f64, slow: f64) -> MaAlignment {
    if !(fast > 0.0 && mid > 0.0 && slow > 0.0) {
        return MaAlignment::Neutral;
    }
    if fast > mid && mid > slow {
        MaAlignment::Bullish
    } else if fast < mid && mid < slow {
        MaAlignment::Bearish
    } else {
        MaAlignment::Neutral
    }
}

/// Ordered decision table. Returns the signal and the recommended flag.
pub fn decide_signal(volume_ratio: f64, alignment: MaAlignment, config: &IndicatorConfig) -> (Signal, bool) {
    let directional = match alignment {
        MaAlignment::Bullish => Some(Signal::Long),
        MaAlignment::Bearish => Some(Signal::Short),
        MaAlignment::Neutral => None,
    };

    if volume_ratio >= config.strong_volume_ratio {
        (directional.unwrap_or(Signal::Hold), true)
    } else if volume_ratio >= config.volume_ratio_threshold {
        (directional.unwrap_or(Signal::None), false)
    } else {
        (Signal::None, false)
    }
}

// =============================================================================
// CLASSIFY
// =============================================================================

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Fractional change of the latest close against the close 24 bars back
/// (the latest bar counting as the first). Zero without enough bars or with
/// a non-positive reference.
pub fn price_change_24h(candles: &[Candle]) -> f64 {
    if candles.len() < CHANGE_24H_BARS {
        return 0.0;
    }
    let reference = candles[candles.len() - CHANGE_24H_BARS].close;
    match candles.last() {
        Some(last) if positive(reference) => (last.close - reference) / reference,
        _ => 0.0,
    }
}

pub fn classify(
    symbol: &str,
    exchange: &str,
    candles: &[Candle],
    series: &IndicatorSeries,
    config: &IndicatorConfig,
) -> Result<Opportunity, SkipReason> {
    if candles.len() < MIN_HISTORY_BARS {
        return Err(SkipReason::InsufficientHistory {
            have: candles.len(),
            need: MIN_HISTORY_BARS,
        });
    }
    if series.len() != candles.len() {
        return Err(SkipReason::Computation(format!(
            "series length {} does not match {} candles",
            series.len(),
            candles.len()
        )));
    }

    let (prior, latest_bar) = candles.split_at(candles.len() - 1);
    let latest_bar = latest_bar[0];
    if !positive(latest_bar.close) || !positive(latest_bar.volume) {
        return Err(SkipReason::InvalidLatest);
    }

    let trailing = &prior[prior.len() - AVG_VOLUME_LOOKBACK..];
    let avg_volume_30 = trailing.iter().map(|c| c.volume).sum::<f64>() / AVG_VOLUME_LOOKBACK as f64;
    if !positive(avg_volume_30) {
        return Err(SkipReason::InvalidAverageVolume);
    }

    let volume_ratio = latest_bar.volume / avg_volume_30;
    if !volume_ratio.is_finite() {
        return Err(SkipReason::Computation(format!("volume ratio {}", volume_ratio)));
    }

    // Undefined moving averages count as zero, which forces neutral alignment
    let ma5 = latest(&series.ma_fast).unwrap_or(0.0);
    let ma10 = latest(&series.ma_mid).unwrap_or(0.0);
    let ma20 = latest(&series.ma_slow).unwrap_or(0.0);

    let (signal, is_recommended) = decide_signal(volume_ratio, ma_alignment(ma5, ma10, ma20), config);

    Ok(Opportunity {
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        current_price: latest_bar.close,
        current_volume: latest_bar.volume,
        avg_volume_30,
        volume_ratio,
        ma5,
        ma10,
        ma20,
        signal,
        is_recommended,
        price_change_24h: price_change_24h(candles),
        volatility: latest(&series.volatility).unwrap_or(0.0),
        composite_score: 0.0,
    })
}
