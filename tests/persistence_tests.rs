// Outbox + sink integration: outage buffering and idempotent replay

mod common;

use chrono::{TimeZone, Utc};
use std::time::Duration;

use grid_engine::persistence::{
    Database, HeartbeatRecord, Outbox, PersistRecord, PersistenceSink, SessionRecord, TradeRow,
};
use grid_engine::core::{MatchType, StatusSnapshot, TradeRecord};
use grid_engine::{EngineError, EngineResult};

/// Sink wrapper that simulates an outage.
struct FlakySink {
    inner: Database,
    available: bool,
    attempts: u64,
}

impl FlakySink {
    fn new(inner: Database) -> Self {
        Self { inner, available: true, attempts: 0 }
    }
}

impl PersistenceSink for FlakySink {
    fn upsert(&mut self, record: &PersistRecord) -> EngineResult<()> {
        self.attempts += 1;
        if !self.available {
            return Err(EngineError::SinkUnavailable("simulated outage".to_string()));
        }
        self.inner.upsert(record)
    }
}

fn sample_records(session_id: &str) -> Vec<PersistRecord> {
    let started = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let mut records = vec![PersistRecord::Session(SessionRecord {
        session_id: session_id.to_string(),
        symbol: "BTCUSDT".to_string(),
        started_at: started,
        initial_equity: 10_000.0,
    })];

    for i in 0..4 {
        records.push(PersistRecord::Trade(TradeRow {
            trade_id: format!("t-{}", i),
            session_id: session_id.to_string(),
            trade: TradeRecord {
                entry_ts: started,
                exit_ts: started + chrono::Duration::minutes(i),
                entry_price: 100.0,
                exit_price: 100.24,
                entry_level: i as usize,
                exit_level: i as usize,
                size: 0.5,
                pnl: 0.12,
                return_pct: 0.0024,
                holding_period_secs: 60 * i,
                match_type: MatchType::PairedLevel,
            },
        }));
    }

    records.push(PersistRecord::Heartbeat(HeartbeatRecord {
        session_id: session_id.to_string(),
        bar_time: started + chrono::Duration::minutes(5),
        status: StatusSnapshot {
            equity: 10_000.48,
            holdings: 0.0,
            cost_basis: 0.0,
            risk_level: 0,
            shutdown_reason: None,
            inventory_ratio: 0.0,
            grid_enabled: true,
            grid_version: 1,
            open_positions: 0,
            realized_pnl: 0.48,
            unrealized_pnl: 0.0,
            bars_processed: 5,
        },
    }));

    records
}

fn table_counts(db: &Database) -> (i64, i64, i64) {
    (
        db.count("sessions").unwrap(),
        db.count("trades").unwrap(),
        db.count("heartbeats").unwrap(),
    )
}

#[test]
fn replay_after_outage_matches_uninterrupted_write() {
    // Baseline: sink never goes down.
    let baseline_db = Database::new_in_memory().unwrap();
    baseline_db.run_migrations().unwrap();
    let mut baseline_sink = FlakySink::new(baseline_db);
    let mut outbox = Outbox::new(Duration::ZERO, Duration::ZERO);
    for record in sample_records("s-base") {
        outbox.enqueue(record);
    }
    assert_eq!(outbox.flush(&mut baseline_sink), 6);
    let baseline = table_counts(&baseline_sink.inner);

    // Outage in the middle of the batch, then recovery and replay.
    let db = Database::new_in_memory().unwrap();
    db.run_migrations().unwrap();
    let mut sink = FlakySink::new(db);
    let mut outbox = Outbox::new(Duration::ZERO, Duration::ZERO);

    let records = sample_records("s-base");
    for record in &records[..2] {
        outbox.enqueue(record.clone());
    }
    outbox.flush(&mut sink);

    sink.available = false;
    for record in &records[2..] {
        outbox.enqueue(record.clone());
    }
    outbox.flush(&mut sink);
    assert!(outbox.pending_len() > 0);

    sink.available = true;
    outbox.flush(&mut sink);
    assert_eq!(outbox.pending_len(), 0);

    assert_eq!(table_counts(&sink.inner), baseline);
    assert_eq!(
        sink.inner.session_pnl("s-base").unwrap(),
        baseline_sink.inner.session_pnl("s-base").unwrap()
    );
}

#[test]
fn double_replay_is_idempotent() {
    let db = Database::new_in_memory().unwrap();
    db.run_migrations().unwrap();
    let mut sink = FlakySink::new(db);

    // Deliver the whole batch twice, as a replay after a crash would.
    for _ in 0..2 {
        let mut outbox = Outbox::new(Duration::ZERO, Duration::ZERO);
        for record in sample_records("s-dup") {
            outbox.enqueue(record);
        }
        outbox.flush(&mut sink);
    }

    assert_eq!(table_counts(&sink.inner), (1, 4, 1));
    assert!((sink.inner.session_pnl("s-dup").unwrap() - 0.48).abs() < 1e-9);
    assert_eq!(sink.attempts, 12);
}

#[test]
fn trading_records_survive_while_sink_is_down() {
    let db = Database::new_in_memory().unwrap();
    db.run_migrations().unwrap();
    let mut sink = FlakySink::new(db);
    sink.available = false;

    let mut outbox = Outbox::new(Duration::from_millis(10), Duration::from_millis(100));
    for record in sample_records("s-hold") {
        outbox.enqueue(record);
    }

    // Repeated flushes while down never lose or reorder anything.
    outbox.flush_now(&mut sink);
    outbox.flush_now(&mut sink);
    assert_eq!(outbox.pending_len(), 6);

    sink.available = true;
    outbox.flush_now(&mut sink);
    assert_eq!(table_counts(&sink.inner), (1, 4, 1));
}
