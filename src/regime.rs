//! Regime classification for the segmented backtest variant
//!
//! Labels each trading day from the 5-day close change and the EMA20/EMA50
//! relative position, then coalesces consecutive same-label days into
//! contiguous segments over the bar sequence.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorSet;
use crate::Candle;

const TREND_CHANGE_PCT: f64 = 0.5;
const CHANGE_LOOKBACK_DAYS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Uptrend,
    Downtrend,
    Sideways,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Regime::Uptrend => "UPTREND",
            Regime::Downtrend => "DOWNTREND",
            Regime::Sideways => "SIDEWAYS",
        };
        write!(f, "{s}")
    }
}

/// A contiguous `[start_index, end_index]` bar range sharing one regime label.
#[derive(Debug, Clone, Serialize)]
pub struct RegimeSegment {
    pub regime: Regime,
    pub start_index: usize,
    pub end_index: usize,
    pub start_date: chrono::NaiveDate,
    pub end_date: chrono::NaiveDate,
    /// Realized close-to-close change over the segment, percent.
    pub price_change_pct: f64,
}

impl RegimeSegment {
    pub fn contains(&self, bar_index: usize) -> bool {
        bar_index >= self.start_index && bar_index <= self.end_index
    }
}

/// One trading day's bar span within the candle sequence.
#[derive(Debug, Clone, Copy)]
struct DaySpan {
    first: usize,
    last: usize,
}

fn day_spans(candles: &[Candle]) -> Vec<DaySpan> {
    let mut spans: Vec<DaySpan> = Vec::new();
    for (i, c) in candles.iter().enumerate() {
        match spans.last_mut() {
            Some(span) if candles[span.first].date == c.date => span.last = i,
            _ => spans.push(DaySpan { first: i, last: i }),
        }
    }
    spans
}

/// Classify each trading day and coalesce into segments.
///
/// Days with fewer than five prior trading days carry no regime and are
/// excluded from segmentation entirely, so segments never start at a
/// defaulted SIDEWAYS label.
pub fn classify_segments(candles: &[Candle], indicators: &IndicatorSet) -> Vec<RegimeSegment> {
    let spans = day_spans(candles);
    if spans.len() <= CHANGE_LOOKBACK_DAYS {
        return Vec::new();
    }

    let labeled: Vec<(Regime, DaySpan)> = spans
        .iter()
        .enumerate()
        .skip(CHANGE_LOOKBACK_DAYS)
        .map(|(day_idx, &span)| {
            let close = candles[span.last].close;
            let ref_close = candles[spans[day_idx - CHANGE_LOOKBACK_DAYS].last].close;
            let change_pct = (close - ref_close) / ref_close * 100.0;

            let ema20 = indicators.ema20[span.last];
            let ema50 = indicators.ema50[span.last];

            let regime = if change_pct > TREND_CHANGE_PCT && ema20 > ema50 {
                Regime::Uptrend
            } else if change_pct < -TREND_CHANGE_PCT && ema20 < ema50 {
                Regime::Downtrend
            } else {
                Regime::Sideways
            };

            (regime, span)
        })
        .collect();

    labeled
        .into_iter()
        .chunk_by(|(regime, _)| *regime)
        .into_iter()
        .map(|(regime, group)| {
            let spans: Vec<DaySpan> = group.map(|(_, span)| span).collect();
            let start_index = spans[0].first;
            let end_index = spans[spans.len() - 1].last;
            let start_close = candles[start_index].close;
            let end_close = candles[end_index].close;

            RegimeSegment {
                regime,
                start_index,
                end_index,
                start_date: candles[start_index].date,
                end_date: candles[end_index].date,
                price_change_pct: (end_close - start_close) / start_close * 100.0,
            }
        })
        .collect()
}

/// Which segment, if any, a bar index falls into.
pub fn regime_at(segments: &[RegimeSegment], bar_index: usize) -> Option<Regime> {
    segments
        .iter()
        .find(|s| s.contains(bar_index))
        .map(|s| s.regime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// One bar per day, closes supplied per day.
    fn daily_candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let ts = start + Duration::days(i as i64);
                Candle {
                    timestamp: ts,
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 100.0,
                    hour: 10.0,
                    date: ts.date_naive(),
                }
            })
            .collect()
    }

    #[test]
    fn short_history_yields_no_segments() {
        let candles = daily_candles(&[100.0, 101.0, 102.0, 103.0]);
        let ind = IndicatorSet::compute(&candles);
        assert!(classify_segments(&candles, &ind).is_empty());
    }

    #[test]
    fn rising_tape_classifies_uptrend() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let candles = daily_candles(&closes);
        let ind = IndicatorSet::compute(&candles);
        let segments = classify_segments(&candles, &ind);

        assert!(!segments.is_empty());
        assert!(segments.iter().all(|s| s.regime == Regime::Uptrend));
        assert!(segments[0].price_change_pct > 0.0);
    }

    #[test]
    fn segments_partition_without_overlap() {
        let closes: Vec<f64> = (0..30)
            .map(|i| {
                if i < 15 {
                    100.0 * 1.01f64.powi(i)
                } else {
                    100.0 * 1.01f64.powi(15) * 0.99f64.powi(i - 15)
                }
            })
            .collect();
        let candles = daily_candles(&closes);
        let ind = IndicatorSet::compute(&candles);
        let segments = classify_segments(&candles, &ind);

        for pair in segments.windows(2) {
            assert!(pair[0].end_index < pair[1].start_index);
            // Gapless at day granularity: next segment starts on the next bar.
            assert_eq!(pair[0].end_index + 1, pair[1].start_index);
        }
    }

    #[test]
    fn first_labeled_day_skips_warmup() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let candles = daily_candles(&closes);
        let ind = IndicatorSet::compute(&candles);
        let segments = classify_segments(&candles, &ind);

        // Days 0..4 have no 5-day lookback, so the first segment starts at bar 5.
        assert_eq!(segments[0].start_index, 5);
        assert_eq!(regime_at(&segments, 2), None);
    }
}
