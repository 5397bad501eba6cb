//! Pattern detection
//!
//! A fixed catalog of named entry rules. Each rule is a pure predicate over
//! the current bar, the previous bar, and the indicator arrays at the current
//! index; nothing may read past the current index. A rule emits at most one
//! signal per bar.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SessionConfig;
use crate::indicators::IndicatorSet;
use crate::{Candle, Direction, PatternSignal};

const RSI2_OVERSOLD: f64 = 10.0;
const RSI2_OVERBOUGHT: f64 = 90.0;

/// What happens when several rules fire on the same bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSelection {
    /// Every firing rule becomes an independent signal (backtest variants).
    All,
    /// Only the highest-confidence rule survives (live variant).
    TopRanked,
}

/// Evaluation context handed to each rule predicate.
pub struct PatternContext<'a> {
    pub candles: &'a [Candle],
    pub ind: &'a IndicatorSet,
    pub i: usize,
    pub session: &'a SessionConfig,
}

impl<'a> PatternContext<'a> {
    fn cur(&self) -> &Candle {
        &self.candles[self.i]
    }

    fn prev(&self) -> &Candle {
        &self.candles[self.i - 1]
    }

    /// High/low of the session's opening window, scanning backward from the
    /// current bar and stopping at the first bar of a different calendar
    /// date. Bounded by construction: the scan never leaves the current day.
    /// None while still inside the window or if the window has no bars.
    fn opening_range(&self) -> Option<(f64, f64)> {
        let cur = self.cur();
        let window_end = self.session.opening_range_end();
        if cur.hour < window_end {
            return None;
        }

        let mut high = f64::NEG_INFINITY;
        let mut low = f64::INFINITY;
        let mut found = false;

        for j in (0..self.i).rev() {
            let bar = &self.candles[j];
            if bar.date != cur.date {
                break;
            }
            if bar.hour < window_end {
                high = high.max(bar.high);
                low = low.min(bar.low);
                found = true;
            }
        }

        found.then_some((high, low))
    }
}

/// One catalog entry: a named rule with a fixed direction and rank weight.
pub struct PatternDef {
    pub id: &'static str,
    pub direction: Direction,
    /// Rank weight in (0, 1], consulted only under top-ranked selection.
    pub confidence: f64,
    check: fn(&PatternContext) -> bool,
}

fn rsi2_oversold_bounce(ctx: &PatternContext) -> bool {
    let i = ctx.i;
    ctx.ind.rsi2[i - 1] < RSI2_OVERSOLD
        && ctx.ind.rsi2[i] > ctx.ind.rsi2[i - 1]
        && ctx.cur().close > ctx.prev().close
}

fn rsi2_overbought_fade(ctx: &PatternContext) -> bool {
    let i = ctx.i;
    ctx.ind.rsi2[i - 1] > RSI2_OVERBOUGHT
        && ctx.ind.rsi2[i] < ctx.ind.rsi2[i - 1]
        && ctx.cur().close < ctx.prev().close
}

fn bb_lower_bounce(ctx: &PatternContext) -> bool {
    let i = ctx.i;
    ctx.prev().close < ctx.ind.bb_lower[i - 1] && ctx.cur().close > ctx.ind.bb_lower[i]
}

fn bb_upper_fade(ctx: &PatternContext) -> bool {
    let i = ctx.i;
    ctx.prev().close > ctx.ind.bb_upper[i - 1] && ctx.cur().close < ctx.ind.bb_upper[i]
}

fn vwap_pullback_long(ctx: &PatternContext) -> bool {
    let i = ctx.i;
    let c = ctx.cur();
    c.close > ctx.ind.vwap[i] && c.low <= ctx.ind.vwap[i] && c.close > c.open
}

fn vwap_pullback_short(ctx: &PatternContext) -> bool {
    let i = ctx.i;
    let c = ctx.cur();
    c.close < ctx.ind.vwap[i] && c.high >= ctx.ind.vwap[i] && c.close < c.open
}

fn ema20_bounce_long(ctx: &PatternContext) -> bool {
    let i = ctx.i;
    let c = ctx.cur();
    ctx.ind.ema20[i] > ctx.ind.ema50[i]
        && c.low <= ctx.ind.ema20[i]
        && c.close > ctx.ind.ema20[i]
        && c.close > c.open
}

fn ema20_bounce_short(ctx: &PatternContext) -> bool {
    let i = ctx.i;
    let c = ctx.cur();
    ctx.ind.ema20[i] < ctx.ind.ema50[i]
        && c.high >= ctx.ind.ema20[i]
        && c.close < ctx.ind.ema20[i]
        && c.close < c.open
}

fn orb_breakout_long(ctx: &PatternContext) -> bool {
    match ctx.opening_range() {
        Some((or_high, _)) => ctx.cur().close > or_high && ctx.prev().close <= or_high,
        None => false,
    }
}

fn orb_breakout_short(ctx: &PatternContext) -> bool {
    match ctx.opening_range() {
        Some((_, or_low)) => ctx.cur().close < or_low && ctx.prev().close >= or_low,
        None => false,
    }
}

/// The full rule catalog, both directions.
pub fn full_catalog() -> Vec<PatternDef> {
    vec![
        PatternDef {
            id: "RSI2_OVERSOLD_BOUNCE",
            direction: Direction::Long,
            confidence: 0.75,
            check: rsi2_oversold_bounce,
        },
        PatternDef {
            id: "RSI2_OVERBOUGHT_FADE",
            direction: Direction::Short,
            confidence: 0.75,
            check: rsi2_overbought_fade,
        },
        PatternDef {
            id: "BB_LOWER_BOUNCE",
            direction: Direction::Long,
            confidence: 0.65,
            check: bb_lower_bounce,
        },
        PatternDef {
            id: "BB_UPPER_FADE",
            direction: Direction::Short,
            confidence: 0.65,
            check: bb_upper_fade,
        },
        PatternDef {
            id: "VWAP_PULLBACK_LONG",
            direction: Direction::Long,
            confidence: 0.70,
            check: vwap_pullback_long,
        },
        PatternDef {
            id: "VWAP_PULLBACK_SHORT",
            direction: Direction::Short,
            confidence: 0.70,
            check: vwap_pullback_short,
        },
        PatternDef {
            id: "EMA20_BOUNCE_LONG",
            direction: Direction::Long,
            confidence: 0.60,
            check: ema20_bounce_long,
        },
        PatternDef {
            id: "EMA20_BOUNCE_SHORT",
            direction: Direction::Short,
            confidence: 0.60,
            check: ema20_bounce_short,
        },
        PatternDef {
            id: "ORB_BREAKOUT_LONG",
            direction: Direction::Long,
            confidence: 0.80,
            check: orb_breakout_long,
        },
        PatternDef {
            id: "ORB_BREAKOUT_SHORT",
            direction: Direction::Short,
            confidence: 0.80,
            check: orb_breakout_short,
        },
    ]
}

/// SHORT-side rules only.
pub fn short_catalog() -> Vec<PatternDef> {
    full_catalog()
        .into_iter()
        .filter(|def| def.direction == Direction::Short)
        .collect()
}

/// Momentum subset used by the scalping variant.
pub fn scalp_catalog() -> Vec<PatternDef> {
    full_catalog()
        .into_iter()
        .filter(|def| def.id.starts_with("RSI2") || def.id.starts_with("ORB"))
        .collect()
}

/// Runs a catalog over the candle sequence.
pub struct PatternDetector {
    catalog: Vec<PatternDef>,
    selection: SignalSelection,
    session: SessionConfig,
}

impl PatternDetector {
    pub fn new(catalog: Vec<PatternDef>, selection: SignalSelection, session: SessionConfig) -> Self {
        PatternDetector {
            catalog,
            selection,
            session,
        }
    }

    /// Evaluate the catalog at one bar index (needs a previous bar).
    pub fn detect_at(
        &self,
        candles: &[Candle],
        ind: &IndicatorSet,
        i: usize,
    ) -> Vec<PatternSignal> {
        if i == 0 || i >= candles.len() {
            return Vec::new();
        }
        // Ingestion already filters to the session; guard anyway so a caller
        // feeding unfiltered candles cannot trade the overnight tape.
        if !self.session.in_session(candles[i].hour) {
            return Vec::new();
        }

        let ctx = PatternContext {
            candles,
            ind,
            i,
            session: &self.session,
        };

        let mut signals: Vec<PatternSignal> = self
            .catalog
            .iter()
            .filter(|def| (def.check)(&ctx))
            .map(|def| PatternSignal {
                pattern: def.id,
                direction: def.direction,
                bar_index: i,
                entry_price: candles[i].close,
                atr: ind.atr14[i],
                confidence: def.confidence,
            })
            .collect();

        if self.selection == SignalSelection::TopRanked && signals.len() > 1 {
            // Catalog order breaks confidence ties.
            let best = signals
                .iter()
                .enumerate()
                .max_by(|(ia, a), (ib, b)| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(ib.cmp(ia))
                })
                .map(|(idx, _)| idx);
            if let Some(idx) = best {
                signals = vec![signals.swap_remove(idx)];
            }
        }

        signals
    }

    /// Evaluate every bar in the sequence.
    pub fn detect_all(&self, candles: &[Candle], ind: &IndicatorSet) -> Vec<PatternSignal> {
        let mut signals = Vec::new();
        for i in 1..candles.len() {
            signals.extend(self.detect_at(candles, ind, i));
        }
        debug!(
            "Detected {} candidate signals over {} bars",
            signals.len(),
            candles.len()
        );
        signals
    }
}
