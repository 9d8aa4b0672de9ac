// Shared fixtures for integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use grid_engine::{Bar, EngineConfig, MarketSlice};

pub fn create_test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.grid.support = 90.0;
    config.grid.resistance = 115.0;
    config.grid.layers_buy = 10;
    config.grid.layers_sell = 10;
    config.account.equity = 10_000.0;
    config.session.symbol = "TESTUSDT".to_string();
    config.session.heartbeat_interval_bars = 5;
    config
}

pub fn ts(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

pub fn slice(minute: i64, low: f64, high: f64, close: f64) -> MarketSlice {
    MarketSlice {
        bar: Bar {
            timestamp: ts(minute),
            open: close,
            high,
            low,
            close,
            volume: 10.0,
        },
        atr: 0.5,
        funding_rate: None,
        vol_percentile: None,
    }
}
