//! Technical indicators
//!
//! Every function returns an array index-aligned 1:1 with its input. The
//! value at index `i` is a function of inputs at indices `<= i` only; nothing
//! here may look ahead. Warmup conventions (how each series behaves before
//! its period fills) are fixed here and relied on by the pattern detector:
//!
//! - EMA seeds with the first close.
//! - RSI is 50 (neutral) at index 0, Wilder smoothing afterwards; a zero
//!   average loss maps to rs = 100, never a division error.
//! - ATR uses a simple running average for the first `period` bars, Wilder
//!   smoothing afterwards.
//! - Bollinger bands collapse to the close until the window fills.
//! - VWAP resets at every calendar-date boundary.

use crate::Candle;

/// Simple Moving Average. Before the window fills, the average of what
/// exists so far.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut result = Vec::with_capacity(values.len());
    let mut running = 0.0;

    for (i, &v) in values.iter().enumerate() {
        running += v;
        if i >= period {
            running -= values[i - period];
            result.push(running / period as f64);
        } else {
            result.push(running / (i + 1) as f64);
        }
    }

    result
}

/// Exponential Moving Average, seeded with the first value.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut result = Vec::with_capacity(values.len());
    if values.is_empty() || period == 0 {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut prev = values[0];
    result.push(prev);

    for &value in &values[1..] {
        prev = (value - prev) * multiplier + prev;
        result.push(prev);
    }

    result
}

/// Relative Strength Index with Wilder smoothing.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut result = Vec::with_capacity(closes.len());
    if closes.is_empty() {
        return result;
    }

    // Neutral seed until there is a price change to measure.
    result.push(50.0);

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for i in 1..closes.len() {
        let change = closes[i] - closes[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);

        if i == 1 {
            avg_gain = gain;
            avg_loss = loss;
        } else {
            let p = period as f64;
            avg_gain = (avg_gain * (p - 1.0) + gain) / p;
            avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        }

        // Zero average loss means maximally bullish, not a division error.
        let rs = if avg_loss == 0.0 {
            100.0
        } else {
            avg_gain / avg_loss
        };
        result.push(100.0 - 100.0 / (1.0 + rs));
    }

    result
}

/// True Range series.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(candles.len());

    for (i, c) in candles.iter().enumerate() {
        let value = if i == 0 {
            c.high - c.low
        } else {
            let prev_close = candles[i - 1].close;
            let hl = c.high - c.low;
            let hc = (c.high - prev_close).abs();
            let lc = (c.low - prev_close).abs();
            hl.max(hc).max(lc)
        };
        tr.push(value);
    }

    tr
}

/// Average True Range: simple running average for the first `period` bars,
/// Wilder smoothing afterwards.
pub fn atr(candles: &[Candle], period: usize) -> Vec<f64> {
    let tr = true_range(candles);
    let mut result = Vec::with_capacity(tr.len());
    let mut prev = 0.0;

    for (i, &t) in tr.iter().enumerate() {
        prev = if i < period {
            (prev * i as f64 + t) / (i + 1) as f64
        } else {
            (prev * (period as f64 - 1.0) + t) / period as f64
        };
        result.push(prev);
    }

    result
}

/// Bollinger bands (upper, middle, lower) over a trailing window with the
/// given standard-deviation width. Until the window fills the bands collapse
/// to the close, which keeps every index defined without inventing a spread.
pub fn bollinger_bands(closes: &[f64], period: usize, num_std: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut upper = Vec::with_capacity(closes.len());
    let mut middle = Vec::with_capacity(closes.len());
    let mut lower = Vec::with_capacity(closes.len());

    for i in 0..closes.len() {
        if i + 1 < period {
            upper.push(closes[i]);
            middle.push(closes[i]);
            lower.push(closes[i]);
            continue;
        }

        let window = &closes[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window
            .iter()
            .map(|&x| {
                let diff = x - mean;
                diff * diff
            })
            .sum::<f64>()
            / period as f64;
        let std_dev = variance.sqrt();

        upper.push(mean + num_std * std_dev);
        middle.push(mean);
        lower.push(mean - num_std * std_dev);
    }

    (upper, middle, lower)
}

/// Volume-weighted average price, reset at each calendar-date boundary.
///
/// A zero cumulative volume (possible on the first bar of a thin session)
/// falls back to the typical price rather than dividing by zero.
pub fn vwap(candles: &[Candle]) -> Vec<f64> {
    let mut result = Vec::with_capacity(candles.len());
    let mut cum_pv = 0.0;
    let mut cum_vol = 0.0;

    for (i, c) in candles.iter().enumerate() {
        if i > 0 && c.date != candles[i - 1].date {
            cum_pv = 0.0;
            cum_vol = 0.0;
        }

        let typical = c.typical_price();
        cum_pv += typical * c.volume;
        cum_vol += c.volume;

        if cum_vol > 0.0 {
            result.push(cum_pv / cum_vol);
        } else {
            result.push(typical);
        }
    }

    result
}

/// All indicator series the pattern catalog reads, computed once per run.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    pub ema20: Vec<f64>,
    pub ema50: Vec<f64>,
    pub rsi2: Vec<f64>,
    pub rsi14: Vec<f64>,
    pub atr14: Vec<f64>,
    pub bb_upper: Vec<f64>,
    pub bb_middle: Vec<f64>,
    pub bb_lower: Vec<f64>,
    pub vwap: Vec<f64>,
    /// Mean ATR over the whole series, for the slippage volatility ratio.
    pub avg_atr: f64,
}

impl IndicatorSet {
    pub fn compute(candles: &[Candle]) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let atr14 = atr(candles, 14);
        let avg_atr = if atr14.is_empty() {
            0.0
        } else {
            atr14.iter().sum::<f64>() / atr14.len() as f64
        };

        let (bb_upper, bb_middle, bb_lower) = bollinger_bands(&closes, 20, 2.0);

        IndicatorSet {
            ema20: ema(&closes, 20),
            ema50: ema(&closes, 50),
            rsi2: rsi(&closes, 2),
            rsi14: rsi(&closes, 14),
            atr14,
            bb_upper,
            bb_middle,
            bb_lower,
            vwap: vwap(candles),
            avg_atr,
        }
    }
}
