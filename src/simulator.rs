//! Trade simulation
//!
//! Walks each candidate signal forward bar-by-bar through a four-exit state
//! machine (stop, target, day close, timeout) with a volatility-scaled
//! slippage model and a fixed per-round-trip fee. One signal in, at most one
//! immutable [`TradeRecord`] out.

use tracing::trace;

use crate::config::{CostConfig, RiskConfig, SessionConfig};
use crate::{Candle, Direction, ExitReason, PatternSignal, TradeRecord};

pub struct TradeSimulator {
    cost: CostConfig,
    risk: RiskConfig,
    session: SessionConfig,
}

impl TradeSimulator {
    pub fn new(cost: CostConfig, risk: RiskConfig, session: SessionConfig) -> Self {
        TradeSimulator {
            cost,
            risk,
            session,
        }
    }

    /// Slippage in price points for one fill.
    ///
    /// Scales with how elevated the signal-bar ATR is versus the series
    /// average, capped at a 2x ratio so one wild bar cannot explode the cost.
    pub fn slippage_points(&self, atr: f64, avg_atr: f64) -> f64 {
        let ratio = if avg_atr > 0.0 {
            (atr / avg_atr).min(2.0)
        } else {
            0.0
        };
        self.cost.base_slippage_ticks * (1.0 + self.cost.volatility_multiplier * ratio)
            * self.cost.tick_size
    }

    /// Simulate one signal forward. Returns None only when the signal fires
    /// on the final bar, where no forward bar exists to trade against.
    pub fn simulate(
        &self,
        candles: &[Candle],
        signal: &PatternSignal,
        avg_atr: f64,
    ) -> Option<TradeRecord> {
        let entry_index = signal.bar_index;
        if entry_index + 1 >= candles.len() {
            return None;
        }

        let sign = signal.direction.sign();
        let slippage = self.slippage_points(signal.atr, avg_atr);

        // Adverse entry fill: buy higher, sell lower.
        let entry_fill = signal.entry_price + sign * slippage;

        // Levels are anchored at the signal price, not the degraded fill.
        let stop_distance = signal.atr * self.risk.stop_atr_multiple;
        let target_distance = signal.atr * self.risk.target_atr_multiple;
        let stop_level = signal.entry_price - sign * stop_distance;
        let target_level = signal.entry_price + sign * target_distance;

        let entry_date = candles[entry_index].date;

        let mut exit: Option<(usize, f64, ExitReason)> = None;

        for k in 1..=self.risk.max_hold_bars {
            let idx = entry_index + k;
            let Some(bar) = candles.get(idx) else {
                // Ran off the end of the series: implicit timeout at the
                // last available bar, never an out-of-range access.
                break;
            };

            // Session roll has priority: nothing is held overnight.
            if bar.date != entry_date || bar.hour >= self.session.close_hour {
                exit = Some((idx, bar.open, ExitReason::DayClosed));
                break;
            }

            let stop_hit = match signal.direction {
                Direction::Long => bar.low <= stop_level,
                Direction::Short => bar.high >= stop_level,
            };
            if stop_hit {
                exit = Some((idx, stop_level, ExitReason::Stopped));
                break;
            }

            let target_hit = match signal.direction {
                Direction::Long => bar.high >= target_level,
                Direction::Short => bar.low <= target_level,
            };
            if target_hit {
                exit = Some((idx, target_level, ExitReason::Targeted));
                break;
            }
        }

        let (exit_index, exit_price, exit_reason) = exit.unwrap_or_else(|| {
            let idx = (entry_index + self.risk.max_hold_bars).min(candles.len() - 1);
            (idx, candles[idx].close, ExitReason::TimedOut)
        });

        // Adverse exit fill, symmetric to entry.
        let exit_fill = exit_price - sign * slippage;

        // Slippage already lives in the fills; the fee is the only further
        // deduction, subtracted exactly once.
        let gross_points = (exit_fill - entry_fill) * sign;
        let net_pnl = gross_points * self.cost.point_value - self.cost.round_trip_fee();

        trace!(
            pattern = signal.pattern,
            ?exit_reason,
            gross_points,
            net_pnl,
            "simulated trade"
        );

        Some(TradeRecord {
            pattern: signal.pattern,
            direction: signal.direction,
            entry_index,
            exit_index,
            entry_time: candles[entry_index].timestamp,
            exit_time: candles[exit_index].timestamp,
            entry_price: entry_fill,
            exit_price: exit_fill,
            exit_reason,
            gross_points,
            net_pnl,
            hold_bars: exit_index - entry_index,
        })
    }

    /// Simulate a batch of signals, dropping the ones that cannot run.
    pub fn simulate_all(
        &self,
        candles: &[Candle],
        signals: &[PatternSignal],
        avg_atr: f64,
    ) -> Vec<TradeRecord> {
        signals
            .iter()
            .filter_map(|s| self.simulate(candles, s, avg_atr))
            .collect()
    }
}
