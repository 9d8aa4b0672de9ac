// Event-driven session runner
//
// One runner per symbol, strictly sequential: each bar is processed to
// completion (intents placed, fills applied in confirmation order, records
// enqueued) before the next bar is admitted. Persistence is fire-and-forget
// through the outbox so a slow sink never stalls the loop.

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use std::time::Duration;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::{GridEngine, StatusSnapshot};
use crate::error::EngineResult;
use crate::gateway::ExecutionGateway;
use crate::persistence::{
    HeartbeatRecord, Outbox, PersistRecord, PersistenceSink, SessionRecord, TradeRow,
};
use crate::types::MarketSlice;

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub symbol: String,
    pub bars_processed: u64,
    pub intents_emitted: u64,
    pub fills_applied: u64,
    pub round_trips: u64,
    pub realized_pnl: f64,
    pub final_status: StatusSnapshot,
    /// Records still buffered when the session ended (sink was down).
    pub outbox_pending: usize,
}

pub struct SessionRunner<G, S> {
    session_id: String,
    symbol: String,
    engine: GridEngine,
    gateway: G,
    sink: S,
    outbox: Outbox,
    heartbeat_interval: u64,
}

impl<G, S> SessionRunner<G, S>
where
    G: ExecutionGateway,
    S: PersistenceSink,
{
    pub fn new(config: &EngineConfig, engine: GridEngine, gateway: G, sink: S) -> Self {
        let outbox = Outbox::new(
            Duration::from_millis(config.session.outbox_retry_base_ms),
            Duration::from_millis(config.session.outbox_retry_max_ms),
        );
        Self {
            session_id: Uuid::new_v4().to_string(),
            symbol: config.session.symbol.clone(),
            engine,
            gateway,
            sink,
            outbox,
            heartbeat_interval: config.session.heartbeat_interval_bars,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn engine(&self) -> &GridEngine {
        &self.engine
    }

    /// Drive the session over a bar stream to completion. `progress` is
    /// called once per bar with the running bar count.
    pub async fn run<St, P>(mut self, mut bars: St, mut progress: P) -> EngineResult<SessionSummary>
    where
        St: Stream<Item = MarketSlice> + Unpin,
        P: FnMut(u64),
    {
        self.outbox.enqueue(PersistRecord::Session(SessionRecord {
            session_id: self.session_id.clone(),
            symbol: self.symbol.clone(),
            started_at: Utc::now(),
            initial_equity: self.engine.equity(),
        }));

        let mut bars_processed: u64 = 0;
        let mut intents_emitted: u64 = 0;
        let mut fills_applied: u64 = 0;
        let mut round_trips: u64 = 0;

        while let Some(slice) = bars.next().await {
            bars_processed += 1;

            let intents = self.engine.on_bar(&slice);
            for intent in &intents {
                intents_emitted += 1;
                let order_id = match self.gateway.place_limit_order(intent) {
                    Ok(order_id) => Some(order_id),
                    Err(err) => {
                        // A rejected placement re-arms on the next crossing;
                        // the record keeps the attempt visible downstream.
                        tracing::warn!(error = %err, "order placement failed");
                        None
                    }
                };
                self.outbox.enqueue(PersistRecord::order_from_intent(
                    &self.session_id,
                    intent,
                    order_id,
                ));
            }

            // Fills are applied in the order the gateway confirmed them.
            for fill in self.gateway.poll_fills(&slice.bar) {
                fills_applied += 1;
                let outcome = self.engine.on_fill(&fill);
                for trade in outcome.trades {
                    round_trips += 1;
                    self.outbox.enqueue(PersistRecord::Trade(TradeRow {
                        trade_id: Uuid::new_v4().to_string(),
                        session_id: self.session_id.clone(),
                        trade,
                    }));
                }
                if outcome.shortfall > 0.0 {
                    tracing::warn!(
                        shortfall = outcome.shortfall,
                        "sell fill truncated to holdings"
                    );
                }
            }

            if bars_processed % self.heartbeat_interval == 0 {
                self.outbox.enqueue(PersistRecord::Heartbeat(HeartbeatRecord {
                    session_id: self.session_id.clone(),
                    bar_time: slice.bar.timestamp,
                    status: self.engine.status(),
                }));
            }

            self.outbox.flush(&mut self.sink);
            progress(bars_processed);
        }

        // Final heartbeat, then one last drain regardless of backoff.
        let final_status = self.engine.status();
        self.outbox.enqueue(PersistRecord::Heartbeat(HeartbeatRecord {
            session_id: self.session_id.clone(),
            bar_time: Utc::now(),
            status: final_status.clone(),
        }));
        self.outbox.flush_now(&mut self.sink);

        let summary = SessionSummary {
            session_id: self.session_id,
            symbol: self.symbol,
            bars_processed,
            intents_emitted,
            fills_applied,
            round_trips,
            realized_pnl: final_status.realized_pnl,
            final_status,
            outbox_pending: self.outbox.pending_len(),
        };
        tracing::info!(
            session = %summary.session_id,
            bars = summary.bars_processed,
            intents = summary.intents_emitted,
            fills = summary.fills_applied,
            pnl = summary.realized_pnl,
            "session complete"
        );
        Ok(summary)
    }
}
