//! SQLite persistence sink
//!
//! Every write is an upsert keyed on the record's stable id, so replaying an
//! outbox batch after an outage converges on the same stored state.

use rusqlite::{params, Connection, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{EngineError, EngineResult};
use crate::persistence::{PersistRecord, PersistenceSink};

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            // Ignore failure here; Connection::open will surface it.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn new_in_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn run_migrations(&self) -> SqlResult<()> {
        let conn = self.conn.lock().unwrap();
        let migration_sql = include_str!("migrations/V1__initial_schema.sql");
        conn.execute_batch(migration_sql)?;
        Ok(())
    }

    pub fn get_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub fn health_check(&self) -> SqlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let result: i32 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(result == 1)
    }

    pub fn count(&self, table: &str) -> EngineResult<i64> {
        match table {
            "sessions" | "orders" | "trades" | "heartbeats" => {}
            other => {
                return Err(EngineError::Database(format!("unknown table '{}'", other)));
            }
        }
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .map_err(EngineError::from)?;
        Ok(count)
    }

    /// Realized PnL stored for a session, for end-of-run summaries.
    pub fn session_pnl(&self, session_id: &str) -> EngineResult<f64> {
        let conn = self.conn.lock().unwrap();
        let pnl: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(pnl), 0.0) FROM trades WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(EngineError::from)?;
        Ok(pnl)
    }
}

impl PersistenceSink for Database {
    fn upsert(&mut self, record: &PersistRecord) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        let result = match record {
            PersistRecord::Session(s) => conn.execute(
                "INSERT INTO sessions (session_id, symbol, started_at, initial_equity)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                     symbol = excluded.symbol,
                     started_at = excluded.started_at,
                     initial_equity = excluded.initial_equity",
                params![
                    s.session_id,
                    s.symbol,
                    s.started_at.to_rfc3339(),
                    s.initial_equity
                ],
            ),
            PersistRecord::Order(o) => conn.execute(
                "INSERT INTO orders (intent_id, session_id, order_id, side, level_index,
                                     price, size, reason, bar_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(intent_id) DO UPDATE SET
                     order_id = excluded.order_id,
                     size = excluded.size",
                params![
                    o.intent_id,
                    o.session_id,
                    o.order_id,
                    o.side.as_str(),
                    o.level_index as i64,
                    o.price,
                    o.size,
                    o.reason,
                    o.bar_time.to_rfc3339()
                ],
            ),
            PersistRecord::Trade(t) => conn.execute(
                "INSERT INTO trades (trade_id, session_id, entry_ts, exit_ts, entry_price,
                                     exit_price, entry_level, exit_level, size, pnl,
                                     return_pct, holding_period_secs, match_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(trade_id) DO NOTHING",
                params![
                    t.trade_id,
                    t.session_id,
                    t.trade.entry_ts.to_rfc3339(),
                    t.trade.exit_ts.to_rfc3339(),
                    t.trade.entry_price,
                    t.trade.exit_price,
                    t.trade.entry_level as i64,
                    t.trade.exit_level as i64,
                    t.trade.size,
                    t.trade.pnl,
                    t.trade.return_pct,
                    t.trade.holding_period_secs,
                    t.trade.match_type.as_str()
                ],
            ),
            PersistRecord::Heartbeat(h) => conn.execute(
                "INSERT INTO heartbeats (session_id, bars_processed, bar_time, equity,
                                         holdings, cost_basis, risk_level, shutdown_reason,
                                         inventory_ratio, grid_enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(session_id, bars_processed) DO UPDATE SET
                     equity = excluded.equity,
                     holdings = excluded.holdings,
                     cost_basis = excluded.cost_basis,
                     risk_level = excluded.risk_level,
                     shutdown_reason = excluded.shutdown_reason,
                     inventory_ratio = excluded.inventory_ratio,
                     grid_enabled = excluded.grid_enabled",
                params![
                    h.session_id,
                    h.status.bars_processed as i64,
                    h.bar_time.to_rfc3339(),
                    h.status.equity,
                    h.status.holdings,
                    h.status.cost_basis,
                    h.status.risk_level as i64,
                    h.status.shutdown_reason,
                    h.status.inventory_ratio,
                    h.status.grid_enabled as i64
                ],
            ),
        };

        result
            .map(|_| ())
            .map_err(|e| EngineError::SinkUnavailable(e.to_string()))
    }
}
