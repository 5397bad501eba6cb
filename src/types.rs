//! Core data types used across the backtest engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// Errors produced by the backtest pipeline
#[derive(Debug, Error)]
pub enum EngineError {
    /// Every candle source was tried and none returned usable bars.
    #[error("no candle data available for {symbol} (primary and fallback exhausted)")]
    DataUnavailable { symbol: String },

    /// The run fetched data but not enough bars to be meaningful.
    #[error("insufficient data: got {got} bars, need at least {need}")]
    InsufficientData { got: usize, need: usize },

    /// Upstream provider failure (network, non-2xx, unparseable body).
    #[error("candle provider error: {0}")]
    Provider(String),

    /// Trading state store failure.
    #[error("state store error: {0}")]
    State(String),

    /// Execution webhook failure.
    #[error("execution webhook error: {0}")]
    Execution(String),
}

/// One OHLCV bar, normalized to the exchange timezone.
///
/// `hour` is the fractional hour-of-day in the exchange timezone (9.5 means
/// 09:30) and `date` the exchange-local calendar date; both are derived once
/// at ingestion and drive session filtering, VWAP resets, and day-close exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub hour: f64,
    pub date: NaiveDate,
}

impl Candle {
    /// Typical price used by VWAP.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short. Gross points = (exit - entry) * sign.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

/// How a simulated trade left the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    Stopped,
    Targeted,
    DayClosed,
    TimedOut,
}

/// A candidate entry produced by the pattern detector.
///
/// Transient: a signal only exists long enough to be handed to the simulator,
/// which turns it into a [`TradeRecord`].
#[derive(Debug, Clone, Serialize)]
pub struct PatternSignal {
    pub pattern: &'static str,
    pub direction: Direction,
    pub bar_index: usize,
    pub entry_price: f64,
    /// ATR at the signal bar, used to size the stop and target.
    pub atr: f64,
    /// Static rank weight, consulted only under top-ranked selection.
    pub confidence: f64,
}

/// Outcome of simulating one signal forward. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub pattern: &'static str,
    pub direction: Direction,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    /// Fill prices already include slippage, in the adverse direction.
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    /// Signed P&L in price points, from the adjusted fills.
    pub gross_points: f64,
    /// gross_points * point_value - fixed round-trip fee.
    pub net_pnl: f64,
    pub hold_bars: usize,
}

/// Profit factor as computed, before any display concession.
///
/// A group with zero gross losses has no meaningful ratio; that case is kept
/// as `Unbounded` in the model and only becomes the `999.0` sentinel when the
/// report is serialized, so Infinity/NaN can never leak into JSON.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfitFactor {
    Finite(f64),
    Unbounded,
}

impl ProfitFactor {
    pub const SENTINEL: f64 = 999.0;

    pub fn compute(gross_wins: f64, gross_losses: f64) -> Self {
        if gross_losses > 0.0 {
            ProfitFactor::Finite(gross_wins / gross_losses)
        } else {
            ProfitFactor::Unbounded
        }
    }

    /// Display value: the ratio, or the finite sentinel for unbounded groups.
    pub fn value_or_sentinel(self) -> f64 {
        match self {
            ProfitFactor::Finite(v) => v,
            ProfitFactor::Unbounded => Self::SENTINEL,
        }
    }

    /// True when the ratio clears `threshold` (unbounded always does).
    pub fn at_least(self, threshold: f64) -> bool {
        match self {
            ProfitFactor::Finite(v) => v >= threshold,
            ProfitFactor::Unbounded => true,
        }
    }
}

impl Serialize for ProfitFactor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value_or_sentinel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        let ts = Utc.with_ymd_and_hms(2025, 3, 10, 15, 30, 0).unwrap();
        Candle {
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume: 1000.0,
            hour: 10.5,
            date: ts.date_naive(),
        }
    }

    #[test]
    fn valid_candle_passes() {
        assert!(candle(100.0, 105.0, 95.0, 102.0).is_valid());
    }

    #[test]
    fn inverted_range_rejected() {
        let c = candle(100.0, 95.0, 105.0, 100.0);
        assert!(matches!(
            c.validate(),
            Err(CandleValidationError::HighLessThanLow { .. })
        ));
    }

    #[test]
    fn close_outside_range_rejected() {
        let mut c = candle(100.0, 105.0, 95.0, 102.0);
        c.close = 110.0;
        assert!(matches!(
            c.validate(),
            Err(CandleValidationError::CloseOutOfRange { .. })
        ));
    }

    #[test]
    fn profit_factor_zero_losses_is_unbounded() {
        let pf = ProfitFactor::compute(250.0, 0.0);
        assert_eq!(pf, ProfitFactor::Unbounded);
        assert_eq!(pf.value_or_sentinel(), ProfitFactor::SENTINEL);
        assert!(pf.at_least(1.0));
    }

    #[test]
    fn profit_factor_serializes_finite_sentinel() {
        let json = serde_json::to_string(&ProfitFactor::Unbounded).unwrap();
        assert_eq!(json, "999.0");
        let json = serde_json::to_string(&ProfitFactor::compute(30.0, 20.0)).unwrap();
        assert_eq!(json, "1.5");
    }

    #[test]
    fn direction_sign_flips_pnl() {
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
    }
}
