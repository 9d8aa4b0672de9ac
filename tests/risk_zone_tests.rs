// Risk zone tier behavior over realistic price paths

mod common;

use common::{create_test_config, slice, ts};
use grid_engine::core::risk_zone::{RiskInputs, RiskZoneStateMachine};
use grid_engine::{FillEvent, GridEngine, RiskLevel, Side};

fn inputs(price: f64, minute: i64) -> RiskInputs {
    RiskInputs {
        timestamp: ts(minute),
        price,
        atr: 2.0,
        unrealized_pnl: 0.0,
        realized_pnl: 0.0,
        equity: 10_000.0,
        inventory_notional: 0.0,
        capacity: 30_000.0,
        inventory_ratio: 0.0,
    }
}

#[test]
fn tiers_escalate_with_depth_of_breach() {
    let config = create_test_config();
    let mut sm = RiskZoneStateMachine::new(config.risk_zone.clone(), 100.0, 1.0);

    // cushion = 2.0: Level 1 under 102, Level 3 under 96, Shutdown under 94.
    assert_eq!(sm.update(&inputs(103.0, 0)).level, RiskLevel::Normal);
    assert_eq!(sm.update(&inputs(101.0, 1)).level, RiskLevel::Level1);
    assert_eq!(sm.update(&inputs(95.0, 2)).level, RiskLevel::Level3);
    assert_eq!(sm.update(&inputs(93.0, 3)).level, RiskLevel::Shutdown);
    // And straight back down the ladder as price recovers.
    assert_eq!(sm.update(&inputs(95.0, 4)).level, RiskLevel::Level3);
    assert_eq!(sm.update(&inputs(101.0, 5)).level, RiskLevel::Level1);
    assert_eq!(sm.update(&inputs(105.0, 6)).level, RiskLevel::Normal);
}

#[test]
fn dwell_escalation_requires_continuous_presence() {
    let config = create_test_config();
    let dwell = config.risk_zone.level2_dwell_minutes;
    let mut sm = RiskZoneStateMachine::new(config.risk_zone.clone(), 100.0, 1.0);

    sm.update(&inputs(101.0, 0));
    // Just before the dwell window closes: still Level 1.
    assert_eq!(sm.update(&inputs(101.0, dwell - 1)).level, RiskLevel::Level1);
    assert_eq!(sm.update(&inputs(101.0, dwell)).level, RiskLevel::Level2);

    // Leaving the zone resets the clock entirely.
    sm.update(&inputs(105.0, dwell + 1));
    assert_eq!(sm.update(&inputs(101.0, dwell + 2)).level, RiskLevel::Level1);
}

#[test]
fn sell_multipliers_grow_with_tier() {
    let config = create_test_config();
    let mut sm = RiskZoneStateMachine::new(config.risk_zone.clone(), 100.0, 1.0);

    sm.update(&inputs(101.0, 0));
    let (_, l1_sell) = sm.multipliers(0.0);
    sm.update(&inputs(95.0, 1));
    let (l3_buy, l3_sell) = sm.multipliers(0.0);

    assert!(l3_sell > l1_sell);
    assert!(l3_buy < 1.0);
}

/// Shutdown driven by inventory, then recovery as exposure unwinds, all
/// through the engine's own accounting.
#[test]
fn inventory_shutdown_recovers_after_unwind() {
    let mut config = create_test_config();
    config.account.equity = 1_000.0;
    config.account.leverage = 1.0;
    config.account.capacity_threshold_pct = 0.5; // capacity = 500
    let mut engine = GridEngine::new(config, 100.0).unwrap();
    let plan = engine.plan().clone();

    // Load up enough inventory to breach 95% of capacity.
    engine.on_fill(&FillEvent {
        side: Side::Buy,
        level_index: 0,
        price: plan.buy_levels[0],
        size: 5.0,
        timestamp: ts(0),
    });

    engine.on_bar(&slice(1, 99.0, 100.0, 99.5));
    let status = engine.status();
    assert_eq!(status.risk_level, 4);
    assert!(!status.grid_enabled);
    assert!(status
        .shutdown_reason
        .as_deref()
        .unwrap()
        .contains("inventory"));

    // Unwind; the next bar clears the shutdown on its own.
    engine.on_fill(&FillEvent {
        side: Side::Sell,
        level_index: 0,
        price: plan.sell_levels[0],
        size: 5.0,
        timestamp: ts(2),
    });
    engine.on_bar(&slice(3, 99.0, 100.0, 99.5));
    assert_eq!(engine.status().risk_level, 0);
    assert!(engine.status().grid_enabled);
}

#[test]
fn unrealized_drawdown_shutdown_respects_profit_buffer() {
    let config = create_test_config();
    let mut sm = RiskZoneStateMachine::new(config.risk_zone.clone(), 100.0, 1.0);

    // 10% unrealized loss against an 8% limit: shutdown.
    let mut bad = inputs(105.0, 0);
    bad.unrealized_pnl = -1_000.0;
    assert_eq!(sm.update(&bad).level, RiskLevel::Shutdown);

    // Same loss with banked profit widening the limit: back to Normal on
    // the very next evaluation.
    let mut buffered = inputs(105.0, 1);
    buffered.unrealized_pnl = -1_000.0;
    buffered.realized_pnl = 1_500.0;
    assert_eq!(sm.update(&buffered).level, RiskLevel::Normal);
}
