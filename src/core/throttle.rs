// Execution-time throttle overlay
//
// Independent of the tiered risk zone: three checks with fixed precedence
// (inventory > profit lock > volatility spike), first match wins. Requires
// bar-by-bar state, so it only exists in the event-driven loop.

use crate::config::ThrottleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleReason {
    InventoryLimit,
    ProfitLock,
    VolatilitySpike,
}

impl ThrottleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleReason::InventoryLimit => "inventory_limit",
            ThrottleReason::ProfitLock => "profit_lock",
            ThrottleReason::VolatilitySpike => "volatility_spike",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleDecision {
    pub multiplier: f64,
    pub reason: Option<ThrottleReason>,
}

impl ThrottleDecision {
    fn pass() -> Self {
        Self { multiplier: 1.0, reason: None }
    }
}

#[derive(Debug, Clone)]
pub struct ThrottleManager {
    config: ThrottleConfig,
}

impl ThrottleManager {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config }
    }

    /// Evaluate the overlay for the current bar.
    pub fn evaluate(
        &self,
        exposure: f64,
        daily_pnl: f64,
        current_atr: f64,
        avg_atr: f64,
    ) -> ThrottleDecision {
        let c = &self.config;

        if exposure / c.max_units >= c.inventory_threshold {
            return ThrottleDecision {
                multiplier: 0.0,
                reason: Some(ThrottleReason::InventoryLimit),
            };
        }

        if daily_pnl >= c.risk_budget * c.profit_target_pct {
            return ThrottleDecision {
                multiplier: c.profit_reduction,
                reason: Some(ThrottleReason::ProfitLock),
            };
        }

        if avg_atr > 0.0 && current_atr / avg_atr >= c.volatility_threshold {
            return ThrottleDecision {
                multiplier: c.volatility_reduction,
                reason: Some(ThrottleReason::VolatilitySpike),
            };
        }

        ThrottleDecision::pass()
    }
}
