//! Download command implementation

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use pattern_backtest::data::{self, CandleProvider};

pub async fn run(
    config_path: Option<String>,
    symbol: Option<String>,
    days: u32,
    output: String,
) -> Result<()> {
    let config = super::load_config(config_path.as_deref())?;
    let symbol = symbol.unwrap_or_else(|| config.data.primary_symbol.clone());

    info!("Downloading {} days of {} for {}", days, config.data.interval, symbol);

    let provider = CandleProvider::new(config.data.clone(), config.session.clone());
    let bars = provider
        .fetch_raw(&symbol, days)
        .await
        .with_context(|| format!("Failed to download history for {symbol}"))?;

    anyhow::ensure!(!bars.is_empty(), "Provider returned no bars for {symbol}");

    if let Some(parent) = Path::new(&output).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    data::save_csv(&bars, &output)?;

    info!("Saved {} bars to {}", bars.len(), output);
    println!("Saved {} bars for {} to {}", bars.len(), symbol, output);
    Ok(())
}
