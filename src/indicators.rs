//! Indicator Engine
//!
//! Pure rolling-window computations over a candle sequence. Every output
//! series is index-aligned with the input candles; positions without enough
//! history are `None`, which is distinct from a computed zero.

use statrs::statistics::Statistics;

use crate::config::IndicatorConfig;
use crate::models::Candle;

/// Shortest sequence that produces a series; anything shorter yields an
/// empty [`IndicatorSeries`].
pub const MIN_SERIES_LEN: usize = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSeries {
    /// Moving averages of close, one per configured window (fast, mid, slow)
    pub ma_fast: Vec<Option<f64>>,
    pub ma_mid: Vec<Option<f64>>,
    pub ma_slow: Vec<Option<f64>>,
    /// Rolling volume mean, current bar included
    pub volume_mean: Vec<Option<f64>>,
    /// volume / volume_mean at the same index
    pub volume_ratio: Vec<Option<f64>>,
    pub pct_change: Vec<Option<f64>>,
    /// Sample std-dev of pct_change
    pub volatility: Vec<Option<f64>>,
}

impl IndicatorSeries {
    pub fn len(&self) -> usize {
        self.ma_fast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ma_fast.is_empty()
    }
}

/// Latest value of a series, flattening undefined to `None`.
pub fn latest(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

pub fn compute(candles: &[Candle], config: &IndicatorConfig) -> IndicatorSeries {
    if candles.len() < MIN_SERIES_LEN {
        return IndicatorSeries::default();
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let [fast, mid, slow] = config.ma_periods;

    let volume_mean = rolling_mean(&volumes, config.volume_ma_period);
    let volume_ratio = volumes
        .iter()
        .zip(&volume_mean)
        .map(|(v, mean)| match mean {
            Some(m) if *m != 0.0 => finite(v / m),
            _ => None,
        })
        .collect();

    let pct_change = pct_change(&closes);
    let volatility = rolling_sample_std(&pct_change, config.price_volatility_period);

    IndicatorSeries {
        ma_fast: rolling_mean(&closes, fast),
        ma_mid: rolling_mean(&closes, mid),
        ma_slow: rolling_mean(&closes, slow),
        volume_mean,
        volume_ratio,
        pct_change,
        volatility,
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Simple moving average over the trailing `window` values. The first
/// `window - 1` positions, and any window holding a non-finite value, are `None`.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            if slice.iter().any(|v| !v.is_finite()) {
                return None;
            }
            finite(slice.iter().mean())
        })
        .collect()
}

/// `(close[t] - close[t-1]) / close[t-1]`; undefined at t = 0 and where the
/// previous close is zero.
pub fn pct_change(closes: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(closes.len());
    if closes.is_empty() {
        return out;
    }
    out.push(None);
    for pair in closes.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        out.push(if prev != 0.0 { finite((cur - prev) / prev) } else { None });
    }
    out
}

/// Rolling sample (n-1) standard deviation. A window containing any
/// undefined value is undefined.
pub fn rolling_sample_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if window < 2 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice: Option<Vec<f64>> = values[i + 1 - window..=i].iter().copied().collect();
            slice.and_then(|w| finite(w.iter().std_dev()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (c, v))| Candle::new(i as i64 * 3_600_000, *c, *c, *c, *c, *v))
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_empty_and_short_sequences() {
        let config = IndicatorConfig::default();
        assert!(compute(&[], &config).is_empty());
        assert!(compute(&candles(&[1.0], &[1.0]), &config).is_empty());
    }

    #[test]
    fn test_series_aligned_to_candles() {
        let closes: Vec<f64> = (1..=40).map(f64::from).collect();
        let volumes = vec![10.0; 40];
        let series = compute(&candles(&closes, &volumes), &IndicatorConfig::default());

        assert_eq!(series.len(), 40);
        assert_eq!(series.volatility.len(), 40);
        assert!(series.ma_fast[3].is_none());
        assert!(approx(series.ma_fast[4].unwrap(), 3.0));
        assert!(series.ma_mid[8].is_none());
        assert!(approx(series.ma_mid[9].unwrap(), 5.5));
        assert!(series.ma_slow[18].is_none());
        assert!(approx(series.ma_slow[19].unwrap(), 10.5));
        assert!(series.volume_mean[28].is_none());
        assert!(approx(series.volume_ratio[29].unwrap(), 1.0));
    }

    #[test]
    fn test_rolling_mean_undefined_is_not_zero() {
        let out = rolling_mean(&[0.0, 0.0, 0.0], 2);
        assert_eq!(out, vec![None, Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_volume_ratio_undefined_on_zero_mean() {
        let closes = vec![1.0; 5];
        let volumes = vec![0.0; 5];
        let mut config = IndicatorConfig::default();
        config.volume_ma_period = 2;
        let series = compute(&candles(&closes, &volumes), &config);
        assert!(series.volume_ratio.iter().all(Option::is_none));
    }

    #[test]
    fn test_pct_change() {
        let out = pct_change(&[100.0, 110.0, 99.0, 0.0, 5.0]);
        assert_eq!(out[0], None);
        assert!(approx(out[1].unwrap(), 0.1));
        assert!(approx(out[2].unwrap(), -0.1));
        assert!(approx(out[3].unwrap(), -1.0));
        assert_eq!(out[4], None);
    }

    #[test]
    fn test_volatility_is_sample_std() {
        // pct_change: None, 1.0, 0.0, 0.5 -> window 3 at t=3 is [1.0, 0.0, 0.5]
        let values = vec![None, Some(1.0), Some(0.0), Some(0.5)];
        let out = rolling_sample_std(&values, 3);
        assert_eq!(out[2], None);
        // mean 0.5, squared deviations 0.25 + 0.25 + 0 = 0.5, / (n-1) = 0.25
        assert!(approx(out[3].unwrap(), 0.5));
    }

    #[test]
    fn test_latest_flattens() {
        assert_eq!(latest(&[]), None);
        assert_eq!(latest(&[Some(1.0), None]), None);
        assert_eq!(latest(&[None, Some(2.0)]), Some(2.0));
    }
}
