//! Backtest pipeline
//!
//! Composes the stages (indicators, optional regime segmentation, pattern
//! detection, trade simulation, aggregation) into one run over a candle
//! sequence. The route variants differ only in catalog, risk parameters,
//! and whether statistics are keyed by regime; everything else is shared.

use serde::Serialize;
use tracing::info;

use crate::aggregate::{self, PatternStatistics};
use crate::config::{Config, RiskConfig};
use crate::indicators::IndicatorSet;
use crate::patterns::{self, PatternDetector, SignalSelection};
use crate::regime::{self, RegimeSegment};
use crate::simulator::TradeSimulator;
use crate::{data, Candle, EngineError, TradeRecord};

/// How many of the most recent trades a report carries.
const RECENT_TRADES: usize = 20;

/// The backtest variants exposed over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Full catalog, per-pattern statistics.
    Patterns,
    /// Full catalog, statistics keyed by market regime.
    Regimes,
    /// SHORT-side rules only.
    Short,
    /// Momentum subset with tight stops and short holds.
    Scalp,
}

impl Variant {
    /// Minimum bar count for a meaningful run.
    pub fn min_bars(self) -> usize {
        match self {
            Variant::Patterns | Variant::Short => 300,
            Variant::Regimes => 500,
            Variant::Scalp => 100,
        }
    }

    fn catalog(self) -> Vec<patterns::PatternDef> {
        match self {
            Variant::Patterns | Variant::Regimes => patterns::full_catalog(),
            Variant::Short => patterns::short_catalog(),
            Variant::Scalp => patterns::scalp_catalog(),
        }
    }

    fn risk(self, base: &RiskConfig) -> RiskConfig {
        match self {
            Variant::Scalp => RiskConfig {
                stop_atr_multiple: 1.0,
                target_atr_multiple: 1.2,
                max_hold_bars: 12,
            },
            _ => base.clone(),
        }
    }
}

impl std::str::FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patterns" => Ok(Variant::Patterns),
            "regimes" => Ok(Variant::Regimes),
            "short" => Ok(Variant::Short),
            "scalp" => Ok(Variant::Scalp),
            other => Err(format!(
                "unknown variant '{other}' (expected patterns, regimes, short, or scalp)"
            )),
        }
    }
}

/// Cost-model parameters echoed back in every report.
#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub round_trip_fee: f64,
    pub base_slippage_ticks: f64,
    pub volatility_multiplier: f64,
    pub tick_size: f64,
    pub point_value: f64,
    pub stop_atr_multiple: f64,
    pub target_atr_multiple: f64,
    pub max_hold_bars: usize,
}

/// The JSON document a backtest endpoint returns.
#[derive(Debug, Serialize)]
pub struct BacktestReport {
    pub variant: Variant,
    pub candle_count: usize,
    pub trade_count: usize,
    pub cost_model: CostSummary,
    /// Patterns that cleared the sample and profitability bars, best first.
    pub profitable_patterns: Vec<PatternStatistics>,
    /// Every group that met the minimum sample, for context.
    pub all_patterns: Vec<PatternStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regime_segments: Option<Vec<RegimeSegment>>,
    pub recent_trades: Vec<TradeRecord>,
    pub verdict: String,
}

/// One parameterized pipeline shared by all variants.
pub struct Backtester {
    config: Config,
}

impl Backtester {
    pub fn new(config: Config) -> Self {
        Backtester { config }
    }

    /// Run one variant over an already-ingested candle sequence.
    pub fn run(&self, candles: &[Candle], variant: Variant) -> Result<BacktestReport, EngineError> {
        data::ensure_min_bars(candles, variant.min_bars())?;

        let indicators = IndicatorSet::compute(candles);

        let segments = (variant == Variant::Regimes)
            .then(|| regime::classify_segments(candles, &indicators));

        let detector = PatternDetector::new(
            variant.catalog(),
            SignalSelection::All,
            self.config.session.clone(),
        );
        let signals = detector.detect_all(candles, &indicators);

        let risk = variant.risk(&self.config.risk);
        let simulator = TradeSimulator::new(
            self.config.cost.clone(),
            risk.clone(),
            self.config.session.clone(),
        );
        let trades = simulator.simulate_all(candles, &signals, indicators.avg_atr);

        let all_patterns = aggregate::aggregate(&trades, segments.as_deref());
        let profitable_patterns = aggregate::profitable(all_patterns.clone());

        info!(
            ?variant,
            candles = candles.len(),
            signals = signals.len(),
            trades = trades.len(),
            profitable = profitable_patterns.len(),
            "backtest run complete"
        );

        let verdict = build_verdict(&trades, &profitable_patterns, &all_patterns);
        let recent_trades = trades
            .iter()
            .rev()
            .take(RECENT_TRADES)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        Ok(BacktestReport {
            variant,
            candle_count: candles.len(),
            trade_count: trades.len(),
            cost_model: CostSummary {
                round_trip_fee: self.config.cost.round_trip_fee(),
                base_slippage_ticks: self.config.cost.base_slippage_ticks,
                volatility_multiplier: self.config.cost.volatility_multiplier,
                tick_size: self.config.cost.tick_size,
                point_value: self.config.cost.point_value,
                stop_atr_multiple: risk.stop_atr_multiple,
                target_atr_multiple: risk.target_atr_multiple,
                max_hold_bars: risk.max_hold_bars,
            },
            profitable_patterns,
            all_patterns,
            regime_segments: segments,
            recent_trades,
            verdict,
        })
    }
}

fn build_verdict(
    trades: &[TradeRecord],
    profitable: &[PatternStatistics],
    reported: &[PatternStatistics],
) -> String {
    if trades.is_empty() {
        return "No signals fired over the analyzed window; nothing to evaluate.".to_string();
    }

    let total_net: f64 = trades.iter().map(|t| t.net_pnl).sum();

    if profitable.is_empty() {
        format!(
            "NOT profitable after costs: no pattern cleared the minimum-sample and \
             profitability bars over {} simulated trades (total net P&L {:.2}).",
            trades.len(),
            total_net
        )
    } else {
        let best = &profitable[0];
        format!(
            "Net profitable after costs: {} of {} reported patterns clear the bar. \
             Best is {} with net expectancy {:.2} per trade over {} trades. \
             Total net P&L across all simulated trades: {:.2}.",
            profitable.len(),
            reported.len(),
            best.pattern,
            best.net_expectancy,
            best.trades,
            total_net
        )
    }
}
