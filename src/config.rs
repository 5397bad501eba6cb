//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for the execution webhook credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a JSON file, then apply env overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus env overrides, for running without a config file.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("EXECUTION_WEBHOOK_URL") {
            self.live.webhook_url = Some(url);
        }
        if let Ok(secret) = std::env::var("EXECUTION_WEBHOOK_SECRET") {
            self.live.webhook_secret = Some(secret);
        }
    }
}

/// Candle provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Primary instrument queried first.
    pub primary_symbol: String,
    /// Proxy instrument used when the primary returns nothing usable.
    pub fallback_symbol: String,
    /// Price multiplier applied to fallback bars so levels stay comparable.
    pub fallback_scale: f64,
    /// Bar interval, provider notation ("5m", "15m", ...).
    pub interval: String,
    /// Exchange timezone as a fixed offset from UTC, in hours.
    pub utc_offset_hours: f64,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            primary_symbol: "ES=F".to_string(),
            fallback_symbol: "SPY".to_string(),
            fallback_scale: 10.0,
            interval: "5m".to_string(),
            utc_offset_hours: -5.0,
            timeout_secs: 30,
        }
    }
}

/// Regular-trading-hours session definition, exchange-local fractional hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub open_hour: f64,
    pub close_hour: f64,
    /// Opening-range window length in minutes, for the ORB patterns.
    pub opening_range_minutes: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            open_hour: 9.5,   // 09:30
            close_hour: 16.0, // 16:00
            opening_range_minutes: 15.0,
        }
    }
}

impl SessionConfig {
    /// True when the bar falls inside regular trading hours.
    pub fn in_session(&self, hour: f64) -> bool {
        hour >= self.open_hour && hour < self.close_hour
    }

    /// End of the opening-range window, fractional hours.
    pub fn opening_range_end(&self) -> f64 {
        self.open_hour + self.opening_range_minutes / 60.0
    }
}

/// Cost model: fixed fees per round trip plus volatility-scaled slippage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    pub commission: f64,
    pub exchange_fee: f64,
    pub regulatory_fee: f64,
    pub clearing_fee: f64,
    /// Slippage floor, in ticks per fill.
    pub base_slippage_ticks: f64,
    /// How strongly slippage scales with the atr/avg_atr ratio.
    pub volatility_multiplier: f64,
    pub tick_size: f64,
    /// Currency value of one full price point.
    pub point_value: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        // ES futures, one contract.
        CostConfig {
            commission: 3.98,
            exchange_fee: 2.58,
            regulatory_fee: 0.04,
            clearing_fee: 0.60,
            base_slippage_ticks: 1.0,
            volatility_multiplier: 0.5,
            tick_size: 0.25,
            point_value: 50.0,
        }
    }
}

impl CostConfig {
    /// Fixed cost per round trip, all fee components summed.
    pub fn round_trip_fee(&self) -> f64 {
        self.commission + self.exchange_fee + self.regulatory_fee + self.clearing_fee
    }
}

/// Stop/target sizing and hold limits for the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub stop_atr_multiple: f64,
    pub target_atr_multiple: f64,
    pub max_hold_bars: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            stop_atr_multiple: 1.5,
            target_atr_multiple: 2.0,
            max_hold_bars: 40,
        }
    }
}

/// Live signal route configuration and safety limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Contract symbol sent to the execution webhook.
    pub contract: String,
    pub quantity: u32,
    /// Hard cap on entries per calendar day.
    pub max_trades_per_day: u32,
    /// Minimum signal confidence the live route will act on.
    pub min_confidence: f64,
    /// Lookback window the live route fetches, in days.
    pub lookback_days: u32,
    /// Entries stop for the day once realized losses exceed this (currency).
    pub max_daily_loss: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            contract: "MES".to_string(),
            quantity: 1,
            max_trades_per_day: 3,
            min_confidence: 0.6,
            lookback_days: 10,
            max_daily_loss: 1500.0,
            webhook_url: None,
            webhook_secret: None,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: 8000 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_object() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.data.primary_symbol, "ES=F");
        assert_eq!(config.risk.max_hold_bars, 40);
    }

    #[test]
    fn round_trip_fee_sums_components() {
        let cost = CostConfig::default();
        let expected = cost.commission + cost.exchange_fee + cost.regulatory_fee + cost.clearing_fee;
        assert_eq!(cost.round_trip_fee(), expected);
    }

    #[test]
    fn session_bounds() {
        let session = SessionConfig::default();
        assert!(session.in_session(9.5));
        assert!(session.in_session(15.99));
        assert!(!session.in_session(16.0));
        assert!(!session.in_session(9.0));
        assert_eq!(session.opening_range_end(), 9.75);
    }
}
