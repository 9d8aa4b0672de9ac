//! Persistence layer
//!
//! The trading loop never blocks on storage: records flow through an
//! append-only outbox into a sink whose `upsert` is idempotent, so a batch
//! buffered during an outage can be replayed safely once the sink recovers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::matching::TradeRecord;
use crate::core::StatusSnapshot;
use crate::error::EngineResult;
use crate::types::{OrderIntent, Side};

pub mod database;
pub mod outbox;

pub use database::Database;
pub use outbox::Outbox;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub symbol: String,
    pub started_at: DateTime<Utc>,
    pub initial_equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub intent_id: String,
    pub session_id: String,
    pub order_id: Option<String>,
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub size: f64,
    pub reason: String,
    pub bar_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub trade_id: String,
    pub session_id: String,
    #[serde(flatten)]
    pub trade: TradeRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub session_id: String,
    pub bar_time: DateTime<Utc>,
    #[serde(flatten)]
    pub status: StatusSnapshot,
}

/// One persistable record. Each variant carries a stable key so replaying
/// the same record twice is a no-op at the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistRecord {
    Session(SessionRecord),
    Order(OrderRecord),
    Trade(TradeRow),
    Heartbeat(HeartbeatRecord),
}

impl PersistRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            PersistRecord::Session(_) => "session",
            PersistRecord::Order(_) => "order",
            PersistRecord::Trade(_) => "trade",
            PersistRecord::Heartbeat(_) => "heartbeat",
        }
    }

    pub fn order_from_intent(
        session_id: &str,
        intent: &OrderIntent,
        order_id: Option<String>,
    ) -> Self {
        PersistRecord::Order(OrderRecord {
            intent_id: intent.intent_id.clone(),
            session_id: session_id.to_string(),
            order_id,
            side: intent.side,
            level_index: intent.level_index,
            price: intent.price,
            size: intent.size,
            reason: intent.reason.clone(),
            bar_time: intent.bar_time,
        })
    }
}

/// Storage backend. Implementations must make `upsert` idempotent: the
/// outbox may deliver any record more than once.
pub trait PersistenceSink {
    fn upsert(&mut self, record: &PersistRecord) -> EngineResult<()>;
}
