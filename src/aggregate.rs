//! Trade aggregation
//!
//! Groups closed trades by pattern (and regime, in the segmented variant)
//! and reduces each group to the statistics the API reports. Groups below
//! the minimum sample are dropped outright rather than reported as noise.

use std::collections::HashMap;

use serde::Serialize;

use crate::regime::{regime_at, Regime, RegimeSegment};
use crate::{ProfitFactor, TradeRecord};

/// Groups with fewer trades than this are statistically meaningless.
pub const MIN_SAMPLE: usize = 5;

/// Aggregated outcome of one pattern (optionally within one regime).
#[derive(Debug, Clone, Serialize)]
pub struct PatternStatistics {
    pub pattern: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regime: Option<Regime>,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    /// Mean gross points across all trades in the group.
    pub expectancy_points: f64,
    /// Mean net P&L per trade in currency, after all costs.
    pub net_expectancy: f64,
    pub avg_win_points: f64,
    pub avg_loss_points: f64,
    pub avg_win_net: f64,
    pub avg_loss_net: f64,
    pub gross_profit_factor: ProfitFactor,
    pub net_profit_factor: ProfitFactor,
    pub total_net_pnl: f64,
}

fn reduce_group(
    pattern: &'static str,
    regime: Option<Regime>,
    trades: &[&TradeRecord],
) -> PatternStatistics {
    let winners: Vec<&&TradeRecord> = trades.iter().filter(|t| t.net_pnl > 0.0).collect();
    let losers: Vec<&&TradeRecord> = trades.iter().filter(|t| t.net_pnl <= 0.0).collect();

    let n = trades.len() as f64;
    let wins = winners.len();

    let gross_win_points: f64 = trades
        .iter()
        .map(|t| t.gross_points.max(0.0))
        .sum();
    let gross_loss_points: f64 = trades
        .iter()
        .map(|t| (-t.gross_points).max(0.0))
        .sum();

    let net_win_sum: f64 = winners.iter().map(|t| t.net_pnl).sum();
    let net_loss_sum: f64 = losers.iter().map(|t| -t.net_pnl).sum();

    let total_net_pnl: f64 = trades.iter().map(|t| t.net_pnl).sum();
    let total_points: f64 = trades.iter().map(|t| t.gross_points).sum();

    let avg = |sum: f64, count: usize| if count > 0 { sum / count as f64 } else { 0.0 };

    PatternStatistics {
        pattern,
        regime,
        trades: trades.len(),
        wins,
        win_rate: wins as f64 / n * 100.0,
        expectancy_points: total_points / n,
        net_expectancy: total_net_pnl / n,
        avg_win_points: avg(
            winners.iter().map(|t| t.gross_points).sum(),
            winners.len(),
        ),
        avg_loss_points: avg(losers.iter().map(|t| t.gross_points).sum(), losers.len()),
        avg_win_net: avg(net_win_sum, winners.len()),
        avg_loss_net: -avg(net_loss_sum, losers.len()),
        gross_profit_factor: ProfitFactor::compute(gross_win_points, gross_loss_points),
        net_profit_factor: ProfitFactor::compute(net_win_sum, net_loss_sum),
        total_net_pnl,
    }
}

/// Aggregate trades by pattern; with segments, additionally by regime.
///
/// Trades whose entry bar falls outside every segment (the warmup days) are
/// excluded from regime-keyed aggregation.
pub fn aggregate(
    trades: &[TradeRecord],
    segments: Option<&[RegimeSegment]>,
) -> Vec<PatternStatistics> {
    let mut groups: HashMap<(&'static str, Option<Regime>), Vec<&TradeRecord>> = HashMap::new();

    for trade in trades {
        let key = match segments {
            Some(segments) => match regime_at(segments, trade.entry_index) {
                Some(regime) => (trade.pattern, Some(regime)),
                None => continue,
            },
            None => (trade.pattern, None),
        };
        groups.entry(key).or_default().push(trade);
    }

    let mut stats: Vec<PatternStatistics> = groups
        .into_iter()
        .filter(|(_, trades)| trades.len() >= MIN_SAMPLE)
        .map(|((pattern, regime), trades)| reduce_group(pattern, regime, &trades))
        .collect();

    // Deterministic output order regardless of hash iteration.
    stats.sort_by(|a, b| {
        a.pattern
            .cmp(b.pattern)
            .then_with(|| format!("{:?}", a.regime).cmp(&format!("{:?}", b.regime)))
    });
    stats
}

/// Filter to the patterns worth trading: positive net expectancy and a net
/// profit factor of at least 1.0, best first.
pub fn profitable(mut stats: Vec<PatternStatistics>) -> Vec<PatternStatistics> {
    stats.retain(|s| s.net_expectancy > 0.0 && s.net_profit_factor.at_least(1.0));
    stats.sort_by(|a, b| {
        b.net_expectancy
            .partial_cmp(&a.net_expectancy)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, ExitReason};
    use chrono::{Duration, TimeZone, Utc};

    fn trade(pattern: &'static str, entry_index: usize, gross_points: f64, net_pnl: f64) -> TradeRecord {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap();
        TradeRecord {
            pattern,
            direction: Direction::Long,
            entry_index,
            exit_index: entry_index + 3,
            entry_time: t0,
            exit_time: t0 + Duration::minutes(15),
            entry_price: 100.0,
            exit_price: 100.0 + gross_points,
            exit_reason: ExitReason::Targeted,
            gross_points,
            net_pnl,
            hold_bars: 3,
        }
    }

    #[test]
    fn below_min_sample_is_dropped() {
        // 4 perfect trades: still dropped.
        let trades: Vec<TradeRecord> = (0..4)
            .map(|i| trade("BB_LOWER_BOUNCE", i, 5.0, 200.0))
            .collect();
        assert!(aggregate(&trades, None).is_empty());
    }

    #[test]
    fn stats_reduce_correctly() {
        let trades = vec![
            trade("BB_LOWER_BOUNCE", 0, 4.0, 180.0),
            trade("BB_LOWER_BOUNCE", 10, 4.0, 180.0),
            trade("BB_LOWER_BOUNCE", 20, -3.0, -160.0),
            trade("BB_LOWER_BOUNCE", 30, 4.0, 180.0),
            trade("BB_LOWER_BOUNCE", 40, -3.0, -160.0),
        ];
        let stats = aggregate(&trades, None);
        assert_eq!(stats.len(), 1);
        let s = &stats[0];

        assert_eq!(s.trades, 5);
        assert_eq!(s.wins, 3);
        assert_eq!(s.win_rate, 60.0);
        assert_eq!(s.total_net_pnl, 220.0);
        assert_eq!(s.net_expectancy, 44.0);
        assert_eq!(s.gross_profit_factor, ProfitFactor::Finite(2.0));
        assert!(s.avg_loss_net < 0.0);
    }

    #[test]
    fn all_winners_report_unbounded_factor() {
        let trades: Vec<TradeRecord> = (0..6)
            .map(|i| trade("ORB_BREAKOUT_LONG", i, 5.0, 230.0))
            .collect();
        let stats = aggregate(&trades, None);
        assert_eq!(stats[0].net_profit_factor, ProfitFactor::Unbounded);

        let json = serde_json::to_value(&stats[0]).unwrap();
        assert_eq!(json["net_profit_factor"], 999.0);
    }

    #[test]
    fn profitable_filters_and_sorts() {
        let good: Vec<TradeRecord> = (0..6).map(|i| trade("A_GOOD", i, 5.0, 100.0)).collect();
        let better: Vec<TradeRecord> = (0..6).map(|i| trade("B_BETTER", i, 8.0, 300.0)).collect();
        let bad: Vec<TradeRecord> = (0..6).map(|i| trade("C_BAD", i, -2.0, -50.0)).collect();

        let mut all = good;
        all.extend(better);
        all.extend(bad);

        let result = profitable(aggregate(&all, None));
        let ids: Vec<&str> = result.iter().map(|s| s.pattern).collect();
        assert_eq!(ids, vec!["B_BETTER", "A_GOOD"]);
    }

    #[test]
    fn losing_pattern_never_marked_profitable_by_win_rate() {
        // 5 wins of 10 and 1 loss of -200: high win rate, negative expectancy.
        let mut trades: Vec<TradeRecord> =
            (0..5).map(|i| trade("VWAP_PULLBACK_LONG", i, 0.5, 10.0)).collect();
        trades.push(trade("VWAP_PULLBACK_LONG", 50, -5.0, -200.0));

        let result = profitable(aggregate(&trades, None));
        assert!(result.is_empty());
    }
}
