//! Historical Pattern Backtest Engine
//!
//! Backtests a catalog of intraday price patterns against index-futures
//! candles with realistic cost modeling, exposes the results over an HTTP
//! API, and generates gated live trade signals from the same pipeline.

pub mod aggregate;
pub mod config;
pub mod data;
pub mod engine;
pub mod execution;
pub mod indicators;
pub mod live;
pub mod patterns;
pub mod regime;
pub mod server;
pub mod simulator;
pub mod state;
pub mod types;

pub use config::Config;
pub use types::*;
