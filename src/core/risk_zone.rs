// Tiered risk zone state machine
//
// Evaluated every bar against price, unrealized PnL and inventory. Tiers
// progressively throttle buys and amplify sells; the final tier stops order
// generation entirely. Recovery is automatic: the moment no condition holds,
// the machine returns to Normal without operator intervention. The only
// sticky element is the Level-2 dwell timer.

use chrono::{DateTime, Duration, Utc};

use crate::config::RiskZoneConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Normal = 0,
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
    Shutdown = 4,
}

impl RiskLevel {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Inputs the machine consumes each bar. Assembled by the engine so the
/// machine itself stays free of accounting concerns.
#[derive(Debug, Clone, Copy)]
pub struct RiskInputs {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub atr: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub equity: f64,
    pub inventory_notional: f64,
    pub capacity: f64,
    pub inventory_ratio: f64,
}

#[derive(Debug, Clone)]
pub struct RiskZoneState {
    pub level: RiskLevel,
    pub shutdown_reason: Option<String>,
    pub zone_entered_at: Option<DateTime<Utc>>,
    pub grid_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RiskZoneStateMachine {
    config: RiskZoneConfig,
    support: f64,
    cushion_multiplier: f64,
    level: RiskLevel,
    shutdown_reason: Option<String>,
    zone_entered_at: Option<DateTime<Utc>>,
}

impl RiskZoneStateMachine {
    pub fn new(config: RiskZoneConfig, support: f64, cushion_multiplier: f64) -> Self {
        Self {
            config,
            support,
            cushion_multiplier,
            level: RiskLevel::Normal,
            shutdown_reason: None,
            zone_entered_at: None,
        }
    }

    /// Follow a range update; tier boundaries move with the support.
    pub fn set_support(&mut self, support: f64) {
        self.support = support;
    }

    pub fn level(&self) -> RiskLevel {
        self.level
    }

    pub fn state(&self) -> RiskZoneState {
        RiskZoneState {
            level: self.level,
            shutdown_reason: self.shutdown_reason.clone(),
            zone_entered_at: self.zone_entered_at,
            grid_enabled: self.level < RiskLevel::Shutdown,
        }
    }

    /// Re-evaluate the tier for this bar. Transitions both ways: conditions
    /// relax every bar, including out of Shutdown.
    pub fn update(&mut self, inputs: &RiskInputs) -> RiskZoneState {
        let previous = self.level;
        let cushion = inputs.atr * self.cushion_multiplier;

        if let Some(reason) = self.shutdown_condition(inputs) {
            self.level = RiskLevel::Shutdown;
            if self.shutdown_reason.as_deref() != Some(reason.as_str()) {
                tracing::warn!(reason = %reason, "risk shutdown engaged");
            }
            self.shutdown_reason = Some(reason);
            if self.zone_entered_at.is_none() {
                self.zone_entered_at = Some(inputs.timestamp);
            }
        } else if inputs.price < self.support - 2.0 * inputs.atr {
            self.level = RiskLevel::Level3;
            self.shutdown_reason = None;
            if self.zone_entered_at.is_none() {
                self.zone_entered_at = Some(inputs.timestamp);
            }
        } else if inputs.price < self.support + cushion {
            let entered = *self.zone_entered_at.get_or_insert(inputs.timestamp);
            let dwell = Duration::minutes(self.config.level2_dwell_minutes);
            self.level = if inputs.timestamp - entered >= dwell {
                RiskLevel::Level2
            } else {
                RiskLevel::Level1
            };
            self.shutdown_reason = None;
        } else {
            self.level = RiskLevel::Normal;
            self.shutdown_reason = None;
            self.zone_entered_at = None;
        }

        if previous != self.level {
            tracing::info!(
                from = previous.as_u8(),
                to = self.level.as_u8(),
                price = inputs.price,
                "risk zone transition"
            );
        }

        self.state()
    }

    fn shutdown_condition(&self, inputs: &RiskInputs) -> Option<String> {
        if inputs.price < self.support - 3.0 * inputs.atr {
            return Some(format!(
                "price {:.2} below support - 3*ATR ({:.2})",
                inputs.price,
                self.support - 3.0 * inputs.atr
            ));
        }

        // Banked gains extend the allowed drawdown; banked losses tighten it.
        let buffer = inputs.realized_pnl * self.config.profit_buffer_ratio / inputs.equity;
        let adjusted_loss_pct = (self.config.max_loss_pct + buffer).max(0.0);
        if inputs.unrealized_pnl < -adjusted_loss_pct * inputs.equity {
            return Some(format!(
                "unrealized pnl {:.2} beyond {:.2}% of equity",
                inputs.unrealized_pnl,
                adjusted_loss_pct * 100.0
            ));
        }

        if inputs.inventory_notional > self.config.max_inventory_pct * inputs.capacity {
            return Some(format!(
                "inventory notional {:.2} above {:.0}% of capacity {:.2}",
                inputs.inventory_notional,
                self.config.max_inventory_pct * 100.0,
                inputs.capacity
            ));
        }

        None
    }

    /// Buy/sell size multipliers for the current tier. At Shutdown no order
    /// is generated at all, so the pair here is never consulted; it is zero
    /// for defense in depth.
    pub fn multipliers(&self, inventory_ratio: f64) -> (f64, f64) {
        match self.level {
            RiskLevel::Normal => (1.0, 1.0),
            RiskLevel::Level1 => {
                let mut buy = self.config.level1_buy_mult;
                if inventory_ratio > self.config.inventory_cut_ratio {
                    buy *= 0.5;
                }
                (buy, self.config.level1_sell_mult)
            }
            RiskLevel::Level2 => (self.config.level2_buy_mult, self.config.level2_sell_mult),
            RiskLevel::Level3 => (self.config.level3_buy_mult, self.config.level3_sell_mult),
            RiskLevel::Shutdown => (0.0, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn machine() -> RiskZoneStateMachine {
        RiskZoneStateMachine::new(RiskZoneConfig::default(), 100.0, 1.0)
    }

    fn inputs(price: f64, minute: i64) -> RiskInputs {
        RiskInputs {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
                + Duration::minutes(minute),
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
    fn stays_normal_inside_range() {
        let mut sm = machine();
        let state = sm.update(&inputs(105.0, 0));
        assert_eq!(state.level, RiskLevel::Normal);
        assert!(state.grid_enabled);
        assert!(state.zone_entered_at.is_none());
    }

    #[test]
    fn level1_below_cushion_boundary() {
        let mut sm = machine();
        // support + cushion = 102, price below it but above support - 2*ATR = 96
        let state = sm.update(&inputs(101.0, 0));
        assert_eq!(state.level, RiskLevel::Level1);
        assert!(state.grid_enabled);
    }

    #[test]
    fn dwell_escalates_to_level2() {
        let mut sm = machine();
        sm.update(&inputs(101.0, 0));
        assert_eq!(sm.level(), RiskLevel::Level1);
        // Still in the zone after the dwell window (default 30 minutes).
        let state = sm.update(&inputs(101.0, 31));
        assert_eq!(state.level, RiskLevel::Level2);
    }

    #[test]
    fn deep_breach_is_level3() {
        let mut sm = machine();
        let state = sm.update(&inputs(95.0, 0));
        assert_eq!(state.level, RiskLevel::Level3);
        assert!(state.grid_enabled);
    }

    #[test]
    fn price_collapse_shuts_down() {
        let mut sm = machine();
        let state = sm.update(&inputs(93.0, 0));
        assert_eq!(state.level, RiskLevel::Shutdown);
        assert!(!state.grid_enabled);
        assert!(state.shutdown_reason.unwrap().contains("below support"));
    }

    #[test]
    fn unrealized_loss_shuts_down() {
        let mut sm = machine();
        let mut i = inputs(105.0, 0);
        i.unrealized_pnl = -1_000.0; // 10% of equity, above 8% default limit
        let state = sm.update(&i);
        assert_eq!(state.level, RiskLevel::Shutdown);
        assert!(state.shutdown_reason.unwrap().contains("unrealized"));
    }

    #[test]
    fn banked_profit_absorbs_drawdown() {
        let mut sm = machine();
        let mut i = inputs(105.0, 0);
        i.unrealized_pnl = -1_000.0;
        // 8% base + 0.5 * 1500/10000 = 15.5% allowed: no shutdown.
        i.realized_pnl = 1_500.0;
        let state = sm.update(&i);
        assert_eq!(state.level, RiskLevel::Normal);
    }

    #[test]
    fn inventory_breach_shuts_down() {
        let mut sm = machine();
        let mut i = inputs(105.0, 0);
        i.inventory_notional = 29_000.0; // above 95% of 30_000 capacity
        let state = sm.update(&i);
        assert_eq!(state.level, RiskLevel::Shutdown);
        assert!(state.shutdown_reason.unwrap().contains("inventory"));
    }

    #[test]
    fn recovers_within_one_bar() {
        let mut sm = machine();
        sm.update(&inputs(93.0, 0));
        assert_eq!(sm.level(), RiskLevel::Shutdown);
        let state = sm.update(&inputs(105.0, 1));
        assert_eq!(state.level, RiskLevel::Normal);
        assert!(state.shutdown_reason.is_none());
        assert!(state.zone_entered_at.is_none());
    }

    #[test]
    fn level1_multipliers_with_inventory_cut() {
        let mut sm = machine();
        sm.update(&inputs(101.0, 0));
        let (buy, sell) = sm.multipliers(0.2);
        assert!((buy - 0.20).abs() < 1e-12);
        assert!((sell - 3.0).abs() < 1e-12);
        // Heavy inventory halves the buy multiplier again.
        let (buy, _) = sm.multipliers(0.6);
        assert!((buy - 0.10).abs() < 1e-12);
    }

    #[test]
    fn dwell_timer_resets_after_recovery() {
        let mut sm = machine();
        sm.update(&inputs(101.0, 0));
        sm.update(&inputs(105.0, 10)); // back to normal, timer cleared
        let state = sm.update(&inputs(101.0, 40));
        // 40 minutes after the first entry, but the zone was re-entered at
        // minute 40, so this is Level1 again, not Level2.
        assert_eq!(state.level, RiskLevel::Level1);
    }
}
