//! Candle ingestion
//!
//! Fetches historical OHLCV bars from the chart provider, normalizes them to
//! the exchange timezone, filters to regular trading hours, and hands the
//! rest of the pipeline a clean chronological sequence. Also handles CSV
//! load/save for offline runs and the download command.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

use crate::config::{DataConfig, SessionConfig};
use crate::{Candle, EngineError};

const CHART_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

// =============================================================================
// Provider response shapes
// =============================================================================
//
// Every per-bar field is optional: the provider emits nulls for halted or
// empty intervals, and those bars are skipped rather than aborting the run.

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartPayload,
}

#[derive(Debug, Deserialize)]
struct ChartPayload {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

/// One bar as it comes off the wire, before normalization.
#[derive(Debug, Clone)]
pub struct RawBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// =============================================================================
// Normalization
// =============================================================================

/// Derive exchange-local hour and date for a UTC timestamp.
pub fn session_fields(timestamp: DateTime<Utc>, utc_offset_hours: f64) -> (f64, chrono::NaiveDate) {
    let offset_secs = (utc_offset_hours * 3600.0).round() as i32;
    // Offsets come from config; an out-of-range value falls back to UTC.
    let offset = FixedOffset::east_opt(offset_secs).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    let local = timestamp.with_timezone(&offset);
    let hour = local.hour() as f64 + local.minute() as f64 / 60.0 + local.second() as f64 / 3600.0;
    (hour, local.date_naive())
}

/// Turn raw provider bars into session-tagged candles.
///
/// Applies, in order: price scaling (for the fallback source), session-field
/// derivation, the regular-trading-hours filter, candle validation (invalid
/// bars are skipped and counted, never fatal), and chronological sort with
/// duplicate-timestamp removal.
pub fn normalize_bars(
    raw: Vec<RawBar>,
    scale: f64,
    data: &DataConfig,
    session: &SessionConfig,
) -> Vec<Candle> {
    let mut skipped = 0usize;
    let mut candles: Vec<Candle> = raw
        .into_iter()
        .filter_map(|bar| {
            let (hour, date) = session_fields(bar.timestamp, data.utc_offset_hours);
            if !session.in_session(hour) {
                return None;
            }
            let candle = Candle {
                timestamp: bar.timestamp,
                open: bar.open * scale,
                high: bar.high * scale,
                low: bar.low * scale,
                close: bar.close * scale,
                volume: bar.volume,
                hour,
                date,
            };
            if candle.is_valid() {
                Some(candle)
            } else {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        warn!("Skipped {} malformed bars during normalization", skipped);
    }

    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    candles
}

/// Reject runs that fetched data but not enough of it.
pub fn ensure_min_bars(candles: &[Candle], need: usize) -> Result<(), EngineError> {
    if candles.len() < need {
        return Err(EngineError::InsufficientData {
            got: candles.len(),
            need,
        });
    }
    Ok(())
}

// =============================================================================
// Candle provider
// =============================================================================

/// HTTPS candle source with a scaled fallback instrument.
pub struct CandleProvider {
    client: reqwest::Client,
    data: DataConfig,
    session: SessionConfig,
}

impl CandleProvider {
    pub fn new(data: DataConfig, session: SessionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(data.timeout_secs))
            .build()
            .unwrap_or_default();

        CandleProvider {
            client,
            data,
            session,
        }
    }

    /// Fetch `days` of history at the configured interval.
    ///
    /// Tries the primary symbol, then the fallback symbol with price scaling.
    /// Both exhausted means `DataUnavailable`.
    pub async fn fetch(&self, days: u32) -> Result<Vec<Candle>, EngineError> {
        match self.fetch_symbol(&self.data.primary_symbol, days).await {
            Ok(raw) if !raw.is_empty() => {
                let candles = normalize_bars(raw, 1.0, &self.data, &self.session);
                if !candles.is_empty() {
                    info!(
                        "Fetched {} session bars from primary {}",
                        candles.len(),
                        self.data.primary_symbol
                    );
                    return Ok(candles);
                }
                warn!(
                    "Primary {} returned no in-session bars, trying fallback",
                    self.data.primary_symbol
                );
            }
            Ok(_) => warn!(
                "Primary {} returned no bars, trying fallback",
                self.data.primary_symbol
            ),
            Err(e) => warn!(
                "Primary {} failed ({}), trying fallback",
                self.data.primary_symbol, e
            ),
        }

        let raw = self
            .fetch_symbol(&self.data.fallback_symbol, days)
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;
        let candles = normalize_bars(raw, self.data.fallback_scale, &self.data, &self.session);

        if candles.is_empty() {
            return Err(EngineError::DataUnavailable {
                symbol: self.data.primary_symbol.clone(),
            });
        }

        info!(
            "Fetched {} session bars from fallback {} (scale x{})",
            candles.len(),
            self.data.fallback_symbol,
            self.data.fallback_scale
        );
        Ok(candles)
    }

    /// Fetch raw (unfiltered) bars for one symbol, for the download path.
    pub async fn fetch_raw(&self, symbol: &str, days: u32) -> Result<Vec<RawBar>, EngineError> {
        self.fetch_symbol(symbol, days).await
    }

    async fn fetch_symbol(&self, symbol: &str, days: u32) -> Result<Vec<RawBar>, EngineError> {
        let url = format!(
            "{}/{}?interval={}&range={}d",
            CHART_BASE_URL, symbol, self.data.interval, days
        );

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "pattern-backtest/0.1")
            .send()
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Provider(format!(
                "{} returned status {}",
                symbol,
                response.status()
            )));
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Provider(format!("unparseable chart body: {e}")))?;

        Ok(flatten_chart(body))
    }
}

/// Flatten the provider's parallel arrays into bars, dropping any index with
/// a missing OHLC field.
fn flatten_chart(body: ChartResponse) -> Vec<RawBar> {
    let Some(result) = body.chart.result.and_then(|mut r| {
        if r.is_empty() {
            None
        } else {
            Some(r.remove(0))
        }
    }) else {
        return Vec::new();
    };

    let Some(timestamps) = result.timestamp else {
        return Vec::new();
    };
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Vec::new();
    };

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let fields = (
            quote.open.get(i).copied().flatten(),
            quote.high.get(i).copied().flatten(),
            quote.low.get(i).copied().flatten(),
            quote.close.get(i).copied().flatten(),
        );
        let (Some(open), Some(high), Some(low), Some(close)) = fields else {
            continue;
        };
        let Some(timestamp) = DateTime::from_timestamp(ts, 0) else {
            continue;
        };
        bars.push(RawBar {
            timestamp,
            open,
            high,
            low,
            close,
            volume: quote.volume.get(i).copied().flatten().unwrap_or(0.0),
        });
    }

    bars
}

// =============================================================================
// CSV load/save for offline runs
// =============================================================================

/// Load raw bars from a CSV file (timestamp,open,high,low,close,volume).
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<RawBar>> {
    let mut reader = csv::Reader::from_path(path.as_ref()).context("Failed to open CSV file")?;
    let mut bars = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.context(format!("Failed to read row {}", row_idx + 1))?;

        let ts_str = record.get(0).context("Missing timestamp column")?;
        let timestamp = ts_str
            .parse::<DateTime<Utc>>()
            .or_else(|_| {
                chrono::NaiveDateTime::parse_from_str(ts_str, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
            .context(format!("Failed to parse timestamp: {}", ts_str))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .context(format!("Missing {name} column"))?
                .parse()
                .context(format!("Failed to parse {name}"))
        };

        bars.push(RawBar {
            timestamp,
            open: field(1, "open")?,
            high: field(2, "high")?,
            low: field(3, "low")?,
            close: field(4, "close")?,
            volume: field(5, "volume")?,
        });
    }

    Ok(bars)
}

/// Save bars to CSV in the same column layout `load_csv` reads.
pub fn save_csv(bars: &[RawBar], path: impl AsRef<Path>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref()).context("Failed to create CSV file")?;
    writer.write_record(["timestamp", "open", "high", "low", "close", "volume"])?;

    for bar in bars {
        writer.write_record([
            bar.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
        ])?;
    }

    writer.flush()?;
    info!("Saved {} rows to {}", bars.len(), path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(ts: DateTime<Utc>, price: f64) -> RawBar {
        RawBar {
            timestamp: ts,
            open: price,
            high: price + 1.0,
            low: price - 1.0,
            close: price,
            volume: 500.0,
        }
    }

    #[test]
    fn session_fields_apply_offset() {
        // 14:30 UTC at -5h is 09:30 local.
        let ts = Utc.with_ymd_and_hms(2025, 3, 10, 14, 30, 0).unwrap();
        let (hour, date) = session_fields(ts, -5.0);
        assert_eq!(hour, 9.5);
        assert_eq!(date.to_string(), "2025-03-10");
    }

    #[test]
    fn session_fields_roll_date_backward() {
        // 02:00 UTC at -5h is 21:00 the previous local day.
        let ts = Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap();
        let (hour, date) = session_fields(ts, -5.0);
        assert_eq!(hour, 21.0);
        assert_eq!(date.to_string(), "2025-03-09");
    }

    #[test]
    fn normalize_filters_to_session_and_scales() {
        let data = DataConfig::default();
        let session = SessionConfig::default();
        let in_session = Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap(); // 10:00 local
        let overnight = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap(); // 03:00 local

        let candles = normalize_bars(
            vec![raw(in_session, 500.0), raw(overnight, 500.0)],
            10.0,
            &data,
            &session,
        );

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 5000.0);
        assert_eq!(candles[0].hour, 10.0);
    }

    #[test]
    fn normalize_skips_invalid_bars() {
        let data = DataConfig::default();
        let session = SessionConfig::default();
        let ts = Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap();
        let mut bad = raw(ts, 500.0);
        bad.low = bad.high + 5.0; // inverted range

        let candles = normalize_bars(vec![bad], 1.0, &data, &session);
        assert!(candles.is_empty());
    }

    #[test]
    fn min_bars_check() {
        assert!(matches!(
            ensure_min_bars(&[], 100),
            Err(EngineError::InsufficientData { got: 0, need: 100 })
        ));
    }
}
