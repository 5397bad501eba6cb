//! Backtest command implementation

use anyhow::{Context, Result};
use tracing::info;

use pattern_backtest::data::{self, CandleProvider};
use pattern_backtest::engine::{Backtester, Variant};

pub async fn run(
    config_path: Option<String>,
    variant: String,
    days: u32,
    data_file: Option<String>,
) -> Result<()> {
    let config = super::load_config(config_path.as_deref())?;
    let variant: Variant = variant.parse().map_err(anyhow::Error::msg)?;

    let candles = match data_file {
        Some(path) => {
            info!("Loading candles from {}", path);
            let raw = data::load_csv(&path)?;
            data::normalize_bars(raw, 1.0, &config.data, &config.session)
        }
        None => {
            info!("Fetching {} days of {} bars", days, config.data.interval);
            let provider = CandleProvider::new(config.data.clone(), config.session.clone());
            provider.fetch(days).await?
        }
    };

    let backtester = Backtester::new(config);
    let report = backtester.run(&candles, variant)?;

    // Print results
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS ({:?})", report.variant);
    println!("{}", "=".repeat(60));
    println!("Candles analyzed:   {}", report.candle_count);
    println!("Trades simulated:   {}", report.trade_count);
    println!("Patterns reported:  {}", report.all_patterns.len());
    println!("Profitable:         {}", report.profitable_patterns.len());
    println!();
    for stats in &report.profitable_patterns {
        match stats.regime {
            Some(regime) => println!(
                "  {:<24} [{}]  {} trades, {:.1}% win, net expectancy {:.2}",
                stats.pattern, regime, stats.trades, stats.win_rate, stats.net_expectancy
            ),
            None => println!(
                "  {:<24}  {} trades, {:.1}% win, net expectancy {:.2}",
                stats.pattern, stats.trades, stats.win_rate, stats.net_expectancy
            ),
        }
    }
    println!();
    println!("{}", report.verdict);
    println!("{}", "=".repeat(60));

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    std::fs::write("backtest_report.json", &json)
        .context("Failed to write backtest_report.json")?;
    info!("Full report written to backtest_report.json");

    Ok(())
}
