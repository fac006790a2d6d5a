//! Scoring & Ranking
//!
//! Composite score is a fixed weighted blend of three sub-scores, each
//! clamped to [0, 100]. Ranking is a stable descending sort; equal keys keep
//! the order they arrived in.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::models::Opportunity;

const VOLUME_WEIGHT: f64 = 0.4;
const MOMENTUM_WEIGHT: f64 = 0.3;
const LIQUIDITY_WEIGHT: f64 = 0.3;

fn sub_score(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 100.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Weighted composite in [0, 100], rounded to two decimals.
pub fn composite_score(opp: &Opportunity) -> f64 {
    let volume = sub_score(opp.volume_ratio * 10.0);
    let momentum = sub_score(opp.price_change_24h.abs() * 100.0 * 2.0);
    let liquidity = sub_score(opp.current_volume / 1_000_000.0 * 20.0);

    let blended = volume * VOLUME_WEIGHT + momentum * MOMENTUM_WEIGHT + liquidity * LIQUIDITY_WEIGHT;
    round2(blended).clamp(0.0, 100.0)
}

/// Fill in `composite_score` for every opportunity.
pub fn score_all(opportunities: &mut [Opportunity]) {
    for opp in opportunities.iter_mut() {
        opp.composite_score = composite_score(opp);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    VolumeRatio,
    CompositeScore,
    CurrentVolume,
    #[serde(rename = "price_change_24h")]
    PriceChange24h,
    CurrentPrice,
}

impl SortKey {
    pub const ALL: [SortKey; 5] = [
        SortKey::VolumeRatio,
        SortKey::CompositeScore,
        SortKey::CurrentVolume,
        SortKey::PriceChange24h,
        SortKey::CurrentPrice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::VolumeRatio => "volume_ratio",
            SortKey::CompositeScore => "composite_score",
            SortKey::CurrentVolume => "current_volume",
            SortKey::PriceChange24h => "price_change_24h",
            SortKey::CurrentPrice => "current_price",
        }
    }

    /// Unknown names fall back to [`SortKey::VolumeRatio`].
    pub fn parse_lenient(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(name.trim()))
            .unwrap_or_default()
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn compare(key: SortKey, a: &Opportunity, b: &Opportunity) -> Ordering {
    match key {
        SortKey::VolumeRatio => desc(a.volume_ratio, b.volume_ratio)
            .then_with(|| desc(a.composite_score, b.composite_score))
            .then_with(|| desc(a.current_volume, b.current_volume)),
        SortKey::CompositeScore => desc(a.composite_score, b.composite_score),
        SortKey::CurrentVolume => desc(a.current_volume, b.current_volume),
        SortKey::PriceChange24h => desc(a.price_change_24h.abs(), b.price_change_24h.abs()),
        SortKey::CurrentPrice => desc(a.current_price, b.current_price),
    }
}

/// Stable in-place descending sort.
pub fn rank(opportunities: &mut [Opportunity], key: SortKey) {
    opportunities.sort_by(|a, b| compare(key, a, b));
}

/// Sort the full set, then keep the first `n`.
pub fn top_n(mut opportunities: Vec<Opportunity>, key: SortKey, n: usize) -> Vec<Opportunity> {
    rank(&mut opportunities, key);
    opportunities.truncate(n);
    opportunities
}
