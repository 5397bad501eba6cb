//! Live signal generation
//!
//! One evaluation per request: load the persisted trading state, apply the
//! safety gates, run top-ranked detection on the latest closed bar, and
//! forward any resulting order through the execution webhook. A rule-based
//! adjuster mutates the persisted adaptive parameters between evaluations,
//! never inside one.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::data;
use crate::execution::{Action, ExecutionClient, ExecutionOrder};
use crate::indicators::IndicatorSet;
use crate::patterns::{full_catalog, PatternDetector, SignalSelection};
use crate::state::{self, AdaptiveParams, StateStore, TradingState};
use crate::{Candle, Direction, EngineError};

/// The live route never runs on less history than this.
const LIVE_MIN_BARS: usize = 100;

/// Confidence bump per consecutive loss beyond the first.
const CONFIDENCE_STEP: f64 = 0.05;
const CONFIDENCE_CEILING: f64 = 0.85;
/// Loss streak at which the stop widens to give trades more room.
const WIDE_STOP_STREAK: u32 = 3;
const WIDE_STOP_MULTIPLE: f64 = 2.0;

/// What the evaluation decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveAction {
    Entered,
    Exited,
    Holding,
    NoSignal,
    Blocked,
}

/// Order details echoed back when an entry fires.
#[derive(Debug, Clone, Serialize)]
pub struct LiveOrder {
    pub pattern: String,
    pub direction: Direction,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
}

/// The JSON document the live endpoint returns.
#[derive(Debug, Serialize)]
pub struct LiveReport {
    pub action: LiveAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<LiveOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub has_open_position: bool,
    pub trades_taken_today: u32,
    pub consecutive_losses: u32,
    pub params: AdaptiveParams,
    pub evaluated_at: chrono::DateTime<Utc>,
    pub last_bar_time: chrono::DateTime<Utc>,
}

pub struct LiveEngine<'a> {
    config: &'a Config,
    store: &'a dyn StateStore,
    execution: Option<&'a ExecutionClient>,
}

impl<'a> LiveEngine<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a dyn StateStore,
        execution: Option<&'a ExecutionClient>,
    ) -> Self {
        LiveEngine {
            config,
            store,
            execution,
        }
    }

    /// Evaluate the latest closed bar and persist whatever state changed.
    pub async fn evaluate(&self, candles: &[Candle]) -> Result<LiveReport, EngineError> {
        data::ensure_min_bars(candles, LIVE_MIN_BARS)?;

        let last = candles.len() - 1;
        let bar = &candles[last];

        let mut state = state::load_state(self.store)?;
        state.roll_date(bar.date);

        let indicators = IndicatorSet::compute(candles);
        let atr = indicators.atr14[last];

        let (action, order, reason) = if state.has_open_position {
            self.manage_open_position(&mut state, bar, atr).await?
        } else {
            self.try_enter(&mut state, candles, &indicators, last).await?
        };

        // The adjuster runs after the decision so it shapes the NEXT
        // evaluation, never the one that just happened.
        adjust_params(&mut state);
        state::save_state(self.store, &state)?;

        Ok(LiveReport {
            action,
            order,
            reason,
            has_open_position: state.has_open_position,
            trades_taken_today: state.trades_taken_today,
            consecutive_losses: state.consecutive_losses,
            params: state.params.clone(),
            evaluated_at: Utc::now(),
            last_bar_time: bar.timestamp,
        })
    }

    async fn manage_open_position(
        &self,
        state: &mut TradingState,
        bar: &Candle,
        atr: f64,
    ) -> Result<(LiveAction, Option<LiveOrder>, Option<String>), EngineError> {
        let direction = state
            .open_direction
            .ok_or_else(|| EngineError::State("open position without direction".to_string()))?;
        let entry = state
            .entry_price
            .ok_or_else(|| EngineError::State("open position without entry price".to_string()))?;

        let sign = direction.sign();
        let stop = entry - sign * atr * state.params.stop_atr_multiple;
        let target = entry + sign * atr * state.params.target_atr_multiple;

        let stop_hit = match direction {
            Direction::Long => bar.low <= stop,
            Direction::Short => bar.high >= stop,
        };
        let target_hit = match direction {
            Direction::Long => bar.high >= target,
            Direction::Short => bar.low <= target,
        };
        let session_over = bar.hour >= self.config.session.close_hour;

        if !(stop_hit || target_hit || session_over) {
            return Ok((LiveAction::Holding, None, None));
        }

        let exit_price = if stop_hit {
            stop
        } else if target_hit {
            target
        } else {
            bar.close
        };
        let pnl = (exit_price - entry) * sign * self.config.cost.point_value
            - self.config.cost.round_trip_fee();

        let pattern = state.open_pattern.clone().unwrap_or_default();
        self.send_order(Action::Flat, &pattern, exit_price, stop, target)
            .await?;
        state.record_exit(pnl);

        info!(exit_price, pnl, "live position closed");
        Ok((
            LiveAction::Exited,
            None,
            Some(if stop_hit {
                "stop reached".to_string()
            } else if target_hit {
                "target reached".to_string()
            } else {
                "session close".to_string()
            }),
        ))
    }

    async fn try_enter(
        &self,
        state: &mut TradingState,
        candles: &[Candle],
        indicators: &IndicatorSet,
        last: usize,
    ) -> Result<(LiveAction, Option<LiveOrder>, Option<String>), EngineError> {
        let live = &self.config.live;

        if state.trades_taken_today >= live.max_trades_per_day {
            return Ok((
                LiveAction::Blocked,
                None,
                Some(format!(
                    "daily trade cap reached ({}/{})",
                    state.trades_taken_today, live.max_trades_per_day
                )),
            ));
        }
        if state.realized_pnl_today <= -live.max_daily_loss {
            return Ok((
                LiveAction::Blocked,
                None,
                Some(format!(
                    "daily loss limit reached ({:.2})",
                    state.realized_pnl_today
                )),
            ));
        }

        let detector = PatternDetector::new(
            full_catalog(),
            SignalSelection::TopRanked,
            self.config.session.clone(),
        );
        let Some(signal) = detector.detect_at(candles, indicators, last).pop() else {
            return Ok((LiveAction::NoSignal, None, None));
        };

        if signal.confidence < state.params.min_confidence {
            return Ok((
                LiveAction::NoSignal,
                None,
                Some(format!(
                    "confidence {:.2} below threshold {:.2}",
                    signal.confidence, state.params.min_confidence
                )),
            ));
        }

        let sign = signal.direction.sign();
        let stop = signal.entry_price - sign * signal.atr * state.params.stop_atr_multiple;
        let target = signal.entry_price + sign * signal.atr * state.params.target_atr_multiple;

        self.send_order(
            Action::entry(signal.direction),
            signal.pattern,
            signal.entry_price,
            stop,
            target,
        )
        .await?;
        state.record_entry(
            signal.direction,
            signal.pattern,
            signal.entry_price,
            candles[last].date,
        );

        info!(
            pattern = signal.pattern,
            ?signal.direction,
            entry = signal.entry_price,
            "live entry signal"
        );

        Ok((
            LiveAction::Entered,
            Some(LiveOrder {
                pattern: signal.pattern.to_string(),
                direction: signal.direction,
                confidence: signal.confidence,
                entry_price: signal.entry_price,
                stop_price: stop,
                target_price: target,
            }),
            None,
        ))
    }

    async fn send_order(
        &self,
        action: Action,
        pattern: &str,
        entry: f64,
        stop: f64,
        target: f64,
    ) -> Result<(), EngineError> {
        let Some(client) = self.execution else {
            warn!(?action, "no execution webhook configured, signal not forwarded");
            return Ok(());
        };

        client
            .send(&ExecutionOrder {
                action,
                contract: self.config.live.contract.clone(),
                quantity: self.config.live.quantity,
                pattern: pattern.to_string(),
                entry_price: entry,
                stop_price: stop,
                target_price: target,
                timestamp: Utc::now().timestamp(),
            })
            .await
    }
}

/// Between-run parameter adjustment.
///
/// A loss streak makes the next entry harder to take (higher confidence bar)
/// and, past [`WIDE_STOP_STREAK`], gives it more room to breathe. Any
/// non-losing exit snaps everything back to the configured defaults.
pub fn adjust_params(state: &mut TradingState) {
    let defaults = AdaptiveParams::default();

    if state.consecutive_losses == 0 {
        state.params = defaults;
        return;
    }

    let extra = state.consecutive_losses.saturating_sub(1) as f64 * CONFIDENCE_STEP;
    state.params.min_confidence = (defaults.min_confidence + extra).min(CONFIDENCE_CEILING);

    state.params.stop_atr_multiple = if state.consecutive_losses >= WIDE_STOP_STREAK {
        WIDE_STOP_MULTIPLE
    } else {
        defaults.stop_atr_multiple
    };
    state.params.target_atr_multiple = defaults.target_atr_multiple;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn no_losses_keeps_defaults() {
        let mut state = TradingState::default();
        adjust_params(&mut state);
        assert_eq!(state.params, AdaptiveParams::default());
    }

    #[test]
    fn loss_streak_raises_confidence_bar() {
        let mut state = TradingState::default();
        state.consecutive_losses = 3;
        adjust_params(&mut state);
        assert_relative_eq!(state.params.min_confidence, 0.70);
        assert_relative_eq!(state.params.stop_atr_multiple, WIDE_STOP_MULTIPLE);
    }

    #[test]
    fn confidence_bar_is_capped() {
        let mut state = TradingState::default();
        state.consecutive_losses = 20;
        adjust_params(&mut state);
        assert_relative_eq!(state.params.min_confidence, CONFIDENCE_CEILING);
    }

    #[test]
    fn win_resets_adjustments() {
        let mut state = TradingState::default();
        state.consecutive_losses = 4;
        adjust_params(&mut state);
        assert!(state.params.min_confidence > 0.6);

        state.record_exit(250.0);
        adjust_params(&mut state);
        assert_eq!(state.params, AdaptiveParams::default());
    }
}
