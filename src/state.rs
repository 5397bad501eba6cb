//! Live trading state
//!
//! The live signal route is stateless between invocations by design: the
//! process gives no continuity guarantee, so everything that must survive a
//! restart lives in an explicit, versioned record persisted through a
//! key-value store interface. No process-global mutable state.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::{Direction, EngineError};

pub const STATE_SCHEMA_VERSION: u32 = 1;
const STATE_KEY: &str = "trading_state";

/// Parameters the between-run adjuster is allowed to mutate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveParams {
    pub stop_atr_multiple: f64,
    pub target_atr_multiple: f64,
    pub min_confidence: f64,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        AdaptiveParams {
            stop_atr_multiple: 1.5,
            target_atr_multiple: 2.0,
            min_confidence: 0.6,
        }
    }
}

/// The persisted live-trading record, one row in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingState {
    pub version: u32,
    pub has_open_position: bool,
    pub open_direction: Option<Direction>,
    pub open_pattern: Option<String>,
    pub entry_price: Option<f64>,
    pub trades_taken_today: u32,
    pub last_trade_date: Option<NaiveDate>,
    pub consecutive_losses: u32,
    pub realized_pnl_today: f64,
    pub params: AdaptiveParams,
    pub updated_at: DateTime<Utc>,
}

impl Default for TradingState {
    fn default() -> Self {
        TradingState {
            version: STATE_SCHEMA_VERSION,
            has_open_position: false,
            open_direction: None,
            open_pattern: None,
            entry_price: None,
            trades_taken_today: 0,
            last_trade_date: None,
            consecutive_losses: 0,
            realized_pnl_today: 0.0,
            params: AdaptiveParams::default(),
            updated_at: Utc::now(),
        }
    }
}

impl TradingState {
    /// Reset the daily counters when the calendar rolls over.
    pub fn roll_date(&mut self, today: NaiveDate) {
        if self.last_trade_date != Some(today) {
            self.trades_taken_today = 0;
            self.realized_pnl_today = 0.0;
        }
    }

    pub fn record_entry(&mut self, direction: Direction, pattern: &str, price: f64, today: NaiveDate) {
        self.has_open_position = true;
        self.open_direction = Some(direction);
        self.open_pattern = Some(pattern.to_string());
        self.entry_price = Some(price);
        self.trades_taken_today += 1;
        self.last_trade_date = Some(today);
        self.updated_at = Utc::now();
    }

    pub fn record_exit(&mut self, pnl: f64) {
        self.has_open_position = false;
        self.open_direction = None;
        self.open_pattern = None;
        self.entry_price = None;
        self.realized_pnl_today += pnl;
        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
        self.updated_at = Utc::now();
    }
}

/// Minimal key-value contract the live route persists through.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, EngineError>;
    fn set(&self, key: &str, value: &str) -> Result<(), EngineError>;
}

/// Load the trading state, falling back to a fresh record when the key is
/// missing, unreadable, or from an incompatible schema version.
pub fn load_state(store: &dyn StateStore) -> Result<TradingState, EngineError> {
    let Some(raw) = store.get(STATE_KEY)? else {
        debug!("No persisted trading state, starting fresh");
        return Ok(TradingState::default());
    };

    match serde_json::from_str::<TradingState>(&raw) {
        Ok(state) if state.version == STATE_SCHEMA_VERSION => Ok(state),
        Ok(state) => {
            warn!(
                "Persisted state has schema version {}, expected {}; starting fresh",
                state.version, STATE_SCHEMA_VERSION
            );
            Ok(TradingState::default())
        }
        Err(e) => {
            warn!("Persisted state unreadable ({}), starting fresh", e);
            Ok(TradingState::default())
        }
    }
}

pub fn save_state(store: &dyn StateStore, state: &TradingState) -> Result<(), EngineError> {
    let raw = serde_json::to_string(state).map_err(|e| EngineError::State(e.to_string()))?;
    store.set(STATE_KEY, &raw)
}

/// SQLite-backed key-value store.
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::State(e.to_string()))?;
        }

        let conn = Connection::open(path).map_err(|e| EngineError::State(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| EngineError::State(e.to_string()))?;

        let store = Self::from_connection(conn)?;
        info!("SQLite state store opened at {}", path.display());
        Ok(store)
    }

    /// In-memory store, for tests.
    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(|e| EngineError::State(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, EngineError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .map_err(|e| EngineError::State(e.to_string()))?;

        Ok(SqliteStateStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, EngineError> {
        self.conn
            .lock()
            .map_err(|_| EngineError::State("state store mutex poisoned".to_string()))
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let conn = self.lock()?;
        let result = conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get::<_, String>(0)
        });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(EngineError::State(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = CURRENT_TIMESTAMP",
            params![key, value],
        )
        .map_err(|e| EngineError::State(e.to_string()))?;
        Ok(())
    }
}
