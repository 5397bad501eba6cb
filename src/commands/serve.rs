//! Serve command implementation

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use pattern_backtest::server::{self, AppState};
use pattern_backtest::state::SqliteStateStore;

pub async fn run(config_path: Option<String>, state_db: String, port: Option<u16>) -> Result<()> {
    let mut config = super::load_config(config_path.as_deref())?;
    if let Some(port) = port {
        config.server.port = port;
    }

    let store = SqliteStateStore::open(&state_db)
        .with_context(|| format!("Failed to open state database at {state_db}"))?;

    info!(
        "Serving {} / {} on port {}",
        config.data.primary_symbol, config.data.fallback_symbol, config.server.port
    );

    let state = Arc::new(AppState::new(config, store));
    server::serve(state).await
}
