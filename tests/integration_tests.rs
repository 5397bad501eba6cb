//! Integration tests for the pattern backtest engine
//!
//! These tests drive the pipeline stages together over synthetic intraday
//! candles and verify the properties the whole system is built around:
//! causality, session handling, exit discipline, and cost accounting.

use chrono::{Duration, NaiveDate, TimeZone, Utc};

use pattern_backtest::aggregate;
use pattern_backtest::engine::{Backtester, Variant};
use pattern_backtest::indicators::IndicatorSet;
use pattern_backtest::patterns::{full_catalog, PatternDetector, SignalSelection};
use pattern_backtest::simulator::TradeSimulator;
use pattern_backtest::{Candle, Config, ExitReason, ProfitFactor};

// =============================================================================
// Test Utilities
// =============================================================================

const BARS_PER_DAY: usize = 78; // 09:30 to 16:00 in 5-minute steps

/// Build one regular-hours session of 5-minute candles from a close series.
/// Open is the previous close, high/low extend `range` beyond the body.
fn session_day(date: NaiveDate, closes: &[f64], range: f64) -> Vec<Candle> {
    assert!(closes.len() <= BARS_PER_DAY, "more closes than session bars");
    let day_start = Utc.from_utc_datetime(&date.and_hms_opt(14, 30, 0).unwrap());

    let mut candles = Vec::with_capacity(closes.len());
    let mut prev_close = closes[0];
    for (i, &close) in closes.iter().enumerate() {
        let open = prev_close;
        let body_high = open.max(close);
        let body_low = open.min(close);
        candles.push(Candle {
            timestamp: day_start + Duration::minutes(5 * i as i64),
            open,
            high: body_high + range,
            low: body_low - range,
            close,
            volume: 1000.0 + i as f64 * 10.0,
            hour: 9.5 + (5 * i) as f64 / 60.0,
            date,
        });
        prev_close = close;
    }
    candles
}

/// Deterministic drifting walk: several full sessions of gentle movement.
fn generate_walk_candles(days: usize, base_price: f64, amplitude: f64) -> Vec<Candle> {
    let first_day = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
    let mut candles = Vec::new();
    let mut price = base_price;

    for d in 0..days {
        let date = first_day + Duration::days(d as i64);
        let mut closes = Vec::with_capacity(BARS_PER_DAY);
        for i in 0..BARS_PER_DAY {
            // Bounded oscillation, no RNG so failures reproduce exactly.
            let step = ((i * 7 + d * 13) % 11) as f64 - 5.0;
            price += step * amplitude / 5.0;
            closes.push(price);
        }
        candles.extend(session_day(date, &closes, amplitude));
    }
    candles
}

/// One session containing a sharp two-bar selloff followed by a recovery,
/// embedded in otherwise quiet drift. The selloff drives RSI(2) into single
/// digits and the recovery bar prints a higher close while RSI turns up.
fn generate_rsi2_dip_candles() -> Vec<Candle> {
    let first_day = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
    let mut candles = Vec::new();

    // Warmup sessions so every indicator window is full before the setup.
    let mut price = 5000.0;
    for d in 0..6 {
        let date = first_day + Duration::days(d as i64);
        let mut closes = Vec::with_capacity(BARS_PER_DAY);
        for i in 0..BARS_PER_DAY {
            price += if i % 2 == 0 { 0.75 } else { -0.5 };
            closes.push(price);
        }
        candles.extend(session_day(date, &closes, 1.5));
    }

    // Setup session: drift, dump, recover strongly.
    let date = first_day + Duration::days(6);
    let mut closes = Vec::with_capacity(BARS_PER_DAY);
    for i in 0..BARS_PER_DAY {
        let close = match i {
            0..=19 => price + (i % 2) as f64 * 0.5,
            20 => price - 6.0,
            21 => price - 12.0,
            // Recovery: one modest up close (the signal bar), then a steady
            // climb that crosses any plausible target within the hold window.
            _ => price - 12.0 + (i - 21) as f64 * 1.5,
        };
        closes.push(close);
    }
    candles.extend(session_day(date, &closes, 1.5));
    candles
}

// =============================================================================
// Pipeline properties
// =============================================================================

#[test]
fn indicators_are_causal() {
    let candles = generate_walk_candles(5, 5000.0, 2.0);
    let full = IndicatorSet::compute(&candles);

    let cut = candles.len() - 60;
    let truncated = IndicatorSet::compute(&candles[..cut]);

    // Values over the shared prefix must be identical: nothing computed at
    // bar i may depend on bars after i.
    for i in 0..cut {
        assert_eq!(full.ema20[i], truncated.ema20[i], "ema20 differs at {i}");
        assert_eq!(full.rsi2[i], truncated.rsi2[i], "rsi2 differs at {i}");
        assert_eq!(full.atr14[i], truncated.atr14[i], "atr14 differs at {i}");
        assert_eq!(full.vwap[i], truncated.vwap[i], "vwap differs at {i}");
        assert_eq!(
            full.bb_upper[i], truncated.bb_upper[i],
            "bb_upper differs at {i}"
        );
    }
}

#[test]
fn vwap_resets_each_session() {
    let candles = generate_walk_candles(3, 5000.0, 2.0);
    let ind = IndicatorSet::compute(&candles);

    // First bar of the second session: VWAP equals that bar's typical price,
    // nothing carried over from the previous day.
    let first_of_day2 = BARS_PER_DAY;
    assert_ne!(candles[first_of_day2].date, candles[first_of_day2 - 1].date);
    let expected = candles[first_of_day2].typical_price();
    assert!((ind.vwap[first_of_day2] - expected).abs() < 1e-9);
}

#[test]
fn every_trade_has_one_bounded_exit() {
    let candles = generate_rsi2_dip_candles();
    let config = Config::default();
    let ind = IndicatorSet::compute(&candles);

    let detector = PatternDetector::new(
        full_catalog(),
        SignalSelection::All,
        config.session.clone(),
    );
    let signals = detector.detect_all(&candles, &ind);
    assert!(!signals.is_empty(), "dip session produced no signals at all");

    let simulator = TradeSimulator::new(
        config.cost.clone(),
        config.risk.clone(),
        config.session.clone(),
    );
    let trades = simulator.simulate_all(&candles, &signals, ind.avg_atr);

    for trade in &trades {
        assert!(trade.exit_index > trade.entry_index);
        assert!(trade.exit_index <= trade.entry_index + config.risk.max_hold_bars);
        assert!(trade.exit_index < candles.len());
        assert_eq!(trade.hold_bars, trade.exit_index - trade.entry_index);
        assert!(matches!(
            trade.exit_reason,
            ExitReason::Stopped | ExitReason::Targeted | ExitReason::DayClosed | ExitReason::TimedOut
        ));
    }
}

#[test]
fn costs_are_applied_exactly_once() {
    let candles = generate_rsi2_dip_candles();
    let config = Config::default();
    let ind = IndicatorSet::compute(&candles);

    let detector = PatternDetector::new(
        full_catalog(),
        SignalSelection::All,
        config.session.clone(),
    );
    let signals = detector.detect_all(&candles, &ind);
    let simulator = TradeSimulator::new(
        config.cost.clone(),
        config.risk.clone(),
        config.session.clone(),
    );
    let trades = simulator.simulate_all(&candles, &signals, ind.avg_atr);
    assert!(!trades.is_empty());

    for trade in &trades {
        // Slippage lives in the recorded fills. Gross reconstructed from the
        // fills matches gross_points, and net differs from gross by exactly
        // the fixed fee, so slippage can never be counted twice.
        let reconstructed = (trade.exit_price - trade.entry_price) * trade.direction.sign();
        assert!((trade.gross_points - reconstructed).abs() < 1e-9);

        let expected_net =
            trade.gross_points * config.cost.point_value - config.cost.round_trip_fee();
        assert!((trade.net_pnl - expected_net).abs() < 1e-9);
    }
}

#[test]
fn rsi2_dip_produces_a_resolved_long_trade() {
    let candles = generate_rsi2_dip_candles();
    assert!(candles.len() >= 500);

    let config = Config::default();
    let ind = IndicatorSet::compute(&candles);

    let detector = PatternDetector::new(
        full_catalog(),
        SignalSelection::All,
        config.session.clone(),
    );
    let signals = detector.detect_all(&candles, &ind);

    let rsi2_signals: Vec<_> = signals
        .iter()
        .filter(|s| s.pattern == "RSI2_OVERSOLD_BOUNCE")
        .collect();
    assert!(
        !rsi2_signals.is_empty(),
        "two-bar selloff and recovery did not trigger the RSI2 bounce"
    );

    let simulator = TradeSimulator::new(
        config.cost.clone(),
        config.risk.clone(),
        config.session.clone(),
    );

    for signal in rsi2_signals {
        let trade = simulator
            .simulate(&candles, signal, ind.avg_atr)
            .expect("mid-session signal must produce a trade");

        // Exactly one exit, inside the hold window, with stop and target
        // anchored off the signal-bar ATR.
        assert!(trade.hold_bars >= 1);
        assert!(trade.hold_bars <= config.risk.max_hold_bars);
        if trade.entry_index > 21 + 6 * BARS_PER_DAY {
            // The recovery climbs 1.5/bar, so the dip-day signal resolves at
            // the target rather than timing out.
            assert_eq!(trade.exit_reason, ExitReason::Targeted);
            assert!(trade.gross_points > 0.0);
        }
    }
}

// =============================================================================
// Aggregation and reporting
// =============================================================================

#[test]
fn full_run_produces_clean_json() {
    let candles = generate_walk_candles(10, 5000.0, 3.0);
    let backtester = Backtester::new(Config::default());

    let report = backtester.run(&candles, Variant::Patterns).unwrap();
    assert_eq!(report.candle_count, candles.len());

    let json = serde_json::to_string(&report).unwrap();
    assert!(!json.contains("NaN"), "serialized report contains NaN");
    assert!(!json.contains("inf"), "serialized report contains infinity");
}

#[test]
fn regime_variant_reports_segments() {
    let candles = generate_walk_candles(12, 5000.0, 3.0);
    let backtester = Backtester::new(Config::default());

    let report = backtester.run(&candles, Variant::Regimes).unwrap();
    let segments = report.regime_segments.expect("regime variant emits segments");
    assert!(!segments.is_empty());

    // Segments tile the post-warmup range without gaps or overlap.
    for pair in segments.windows(2) {
        assert_eq!(pair[0].end_index + 1, pair[1].start_index);
    }
}

#[test]
fn scalp_variant_accepts_short_history() {
    // One session is plenty for scalp but far below the other variants' floor.
    let candles = generate_walk_candles(2, 5000.0, 3.0);
    let backtester = Backtester::new(Config::default());

    assert!(backtester.run(&candles, Variant::Scalp).is_ok());
    assert!(backtester.run(&candles, Variant::Regimes).is_err());
}

#[test]
fn thin_groups_never_reach_the_report() {
    let candles = generate_walk_candles(10, 5000.0, 3.0);
    let backtester = Backtester::new(Config::default());

    let report = backtester.run(&candles, Variant::Patterns).unwrap();
    for stats in &report.all_patterns {
        assert!(stats.trades >= aggregate::MIN_SAMPLE);
        assert!(stats.win_rate >= 0.0 && stats.win_rate <= 100.0);
        match stats.net_profit_factor {
            ProfitFactor::Finite(v) => assert!(v.is_finite()),
            ProfitFactor::Unbounded => {}
        }
    }
}
