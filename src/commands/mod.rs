//! CLI command implementations

pub mod backtest;
pub mod download;
pub mod serve;

use anyhow::Result;
use pattern_backtest::Config;

/// Load the config file when given, otherwise defaults plus env overrides.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::from_env()),
    }
}
