// Per-bar orchestration
//
// GridEngine wires the level plan, weight allocation, matching, sizing,
// inventory, risk zone and throttle into one owned context. A bar is
// processed to completion before the next is admitted; fills are applied in
// confirmation order through `on_fill`. Nothing outside this struct mutates
// engine state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::factors::{OrderSizingPipeline, SizingContext, SizingOutcome};
use crate::core::inventory::InventoryTracker;
use crate::core::levels::{generate_plan, GridPlan};
use crate::core::matching::{GridMatchingEngine, TradeRecord};
use crate::core::risk_zone::{RiskInputs, RiskZoneStateMachine};
use crate::core::throttle::ThrottleManager;
use crate::core::weights::{budget_split, level_weights};
use crate::error::EngineResult;
use crate::types::{FillEvent, MarketRegime, MarketSlice, OrderIntent, Side};

/// Scale applied to the relative EMA slope before tanh normalization.
const TREND_SLOPE_SCALE: f64 = 50.0;

/// Funding settles every eight hours (00:00 / 08:00 / 16:00 UTC).
const FUNDING_PERIOD_SECS: i64 = 8 * 3600;

/// Snapshot polled by dashboards and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub equity: f64,
    pub holdings: f64,
    pub cost_basis: f64,
    pub risk_level: u8,
    pub shutdown_reason: Option<String>,
    pub inventory_ratio: f64,
    pub grid_enabled: bool,
    pub grid_version: u64,
    pub open_positions: usize,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub bars_processed: u64,
}

/// Result of applying one fill.
#[derive(Debug, Clone, Default)]
pub struct FillOutcome {
    pub trades: Vec<TradeRecord>,
    pub realized_pnl: f64,
    /// Sell size beyond holdings, truncated by the matcher.
    pub shortfall: f64,
}

pub struct GridEngine {
    config: EngineConfig,
    regime: MarketRegime,
    plan: GridPlan,
    weights: Vec<f64>,
    matching: GridMatchingEngine,
    inventory: InventoryTracker,
    risk_zone: RiskZoneStateMachine,
    throttle: ThrottleManager,
    pipeline: OrderSizingPipeline,
    kill_switch: Arc<AtomicBool>,

    // Rolling state.
    atr_window: VecDeque<f64>,
    ema_fast: Option<f64>,
    ema_slow: Option<f64>,
    last_atr: f64,
    last_close: Option<f64>,

    // Accounting.
    initial_equity: f64,
    realized_pnl: f64,
    daily_pnl: f64,
    daily_pnl_date: Option<NaiveDate>,
    bars_processed: u64,
    grid_version: u64,
}

impl GridEngine {
    /// Build an engine around `mid`. Fails only on invalid static
    /// configuration; the engine refuses to start rather than degrade.
    pub fn new(config: EngineConfig, mid: f64) -> EngineResult<Self> {
        config.validate()?;
        let regime = config.regime()?;

        // No bars seen yet: seed spacing with a flat ATR baseline.
        let plan = generate_plan(&config.grid, 1, mid, 0.0, 0.0)?;
        let weights = level_weights(plan.level_count(), config.weights.edge_k);
        let matching = GridMatchingEngine::new(&plan);
        let inventory = InventoryTracker::new(&config.account);
        let risk_zone = RiskZoneStateMachine::new(
            config.risk_zone.clone(),
            config.grid.support,
            config.grid.cushion_multiplier,
        );
        let throttle = ThrottleManager::new(config.throttle.clone());
        let pipeline = OrderSizingPipeline::new(config.factors.clone());
        let initial_equity = config.account.equity;

        tracing::info!(
            symbol = %config.session.symbol,
            levels = plan.level_count(),
            spacing = plan.spacing,
            "grid engine initialized"
        );

        Ok(Self {
            config,
            regime,
            plan,
            weights,
            matching,
            inventory,
            risk_zone,
            throttle,
            pipeline,
            kill_switch: Arc::new(AtomicBool::new(false)),
            atr_window: VecDeque::new(),
            ema_fast: None,
            ema_slow: None,
            last_atr: 0.0,
            last_close: None,
            initial_equity,
            realized_pnl: 0.0,
            daily_pnl: 0.0,
            daily_pnl_date: None,
            bars_processed: 0,
            grid_version: 1,
        })
    }

    /// Operator kill switch, checked once per bar. Setting it stops new
    /// order intents without unwinding existing state.
    pub fn kill_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.kill_switch)
    }

    pub fn plan(&self) -> &GridPlan {
        &self.plan
    }

    pub fn matching(&self) -> &GridMatchingEngine {
        &self.matching
    }

    pub fn equity(&self) -> f64 {
        self.initial_equity + self.realized_pnl
    }

    /// Trader moved the range: regenerate the grid wholesale under a new
    /// version. Positions and cost basis carry over; pending orders reset.
    pub fn update_range(&mut self, support: f64, resistance: f64, mid: f64) -> EngineResult<()> {
        let mut grid = self.config.grid.clone();
        grid.support = support;
        grid.resistance = resistance;
        // Generate first so a bad range leaves the running grid untouched.
        let plan = generate_plan(
            &grid,
            self.grid_version + 1,
            mid,
            self.last_atr,
            self.atr_baseline(),
        )?;
        self.config.grid = grid;
        self.grid_version += 1;
        self.plan = plan;
        self.weights = level_weights(self.plan.level_count(), self.config.weights.edge_k);
        self.matching.reset_with_plan(&self.plan);
        self.risk_zone.set_support(support);
        tracing::info!(
            support,
            resistance,
            mid,
            version = self.grid_version,
            "range updated, grid regenerated"
        );
        Ok(())
    }

    /// Process one bar to completion and emit the resulting order intents.
    pub fn on_bar(&mut self, slice: &MarketSlice) -> Vec<OrderIntent> {
        let bar = &slice.bar;
        self.bars_processed += 1;
        self.last_atr = slice.atr;
        self.last_close = Some(bar.close);
        self.roll_daily_pnl(bar.timestamp.date_naive());
        self.update_indicators(slice);

        let price = bar.close;
        let risk_state = self.risk_zone.update(&RiskInputs {
            timestamp: bar.timestamp,
            price,
            atr: slice.atr,
            unrealized_pnl: self.unrealized_pnl(price),
            realized_pnl: self.realized_pnl,
            equity: self.equity(),
            inventory_notional: self.inventory.notional(price),
            capacity: self.inventory.capacity(),
            inventory_ratio: self.inventory.ratio(price),
        });

        let triggered = self.matching.check_triggers(bar);
        if triggered.is_empty() {
            return Vec::new();
        }

        if self.kill_switch.load(Ordering::SeqCst) {
            tracing::warn!("kill switch set; suppressing {} triggers", triggered.len());
            for t in &triggered {
                self.matching.release(t.side, t.level_index);
            }
            return Vec::new();
        }

        let throttle = self.throttle.evaluate(
            self.inventory.long_exposure(),
            self.daily_pnl,
            slice.atr,
            self.atr_baseline(),
        );
        if let Some(reason) = throttle.reason {
            tracing::debug!(
                multiplier = throttle.multiplier,
                reason = reason.as_str(),
                "throttle active"
            );
        }

        let (buy_split, sell_split) = budget_split(self.regime);
        let trend_score = self.trend_score();
        let range_position = self
            .plan
            .range_position(price, self.config.grid.support, self.config.grid.resistance);
        let minutes_to_funding = minutes_around_funding(bar.timestamp);
        let inventory_ratio = self.inventory.ratio(price);
        let risk_multipliers = self.risk_zone.multipliers(inventory_ratio);

        let mut intents = Vec::new();
        for t in triggered {
            let weight = self.weights.get(t.level_index).copied().unwrap_or(0.0);
            let split = match t.side {
                Side::Buy => buy_split,
                Side::Sell => sell_split,
            };
            let base = OrderSizingPipeline::base_size(self.equity() * split, weight, t.price);

            let ctx = SizingContext {
                side: t.side,
                level_index: t.level_index,
                level_price: t.price,
                trend_score,
                range_position,
                funding_rate: slice.funding_rate,
                minutes_to_funding,
                vol_percentile: slice.vol_percentile,
                inventory_ratio,
                risk_level: risk_state.level,
                risk_multipliers,
                paired_available: self.matching.paired_holdings(t.level_index),
                total_holdings: self.matching.holdings(),
            };

            match self.pipeline.size_order(&ctx, base, throttle.multiplier) {
                SizingOutcome::Sized(size) => {
                    intents.push(OrderIntent {
                        intent_id: Uuid::new_v4().to_string(),
                        side: t.side,
                        level_index: t.level_index,
                        price: t.price,
                        size,
                        reason: format!(
                            "level crossing (grid v{}, risk {})",
                            self.grid_version,
                            risk_state.level.as_u8()
                        ),
                        bar_time: bar.timestamp,
                    });
                }
                SizingOutcome::Suppressed { factor } => {
                    tracing::debug!(
                        side = t.side.as_str(),
                        level = t.level_index,
                        factor,
                        "order suppressed"
                    );
                    self.matching.release(t.side, t.level_index);
                }
                SizingOutcome::Blocked { factor, reason } => {
                    tracing::debug!(
                        side = t.side.as_str(),
                        level = t.level_index,
                        factor,
                        %reason,
                        "order blocked"
                    );
                    self.matching.release(t.side, t.level_index);
                }
            }
        }

        intents
    }

    /// Apply a confirmed fill. Fills must arrive in the order the exchange
    /// confirmed them; at most one is processed at a time per symbol.
    pub fn on_fill(&mut self, fill: &FillEvent) -> FillOutcome {
        match fill.side {
            Side::Buy => {
                self.matching
                    .apply_buy_fill(fill.level_index, fill.size, fill.price, fill.timestamp);
                self.inventory.apply_fill(Side::Buy, fill.size);
                FillOutcome::default()
            }
            Side::Sell => {
                let matched = self.matching.apply_sell_fill(
                    fill.level_index,
                    fill.size,
                    fill.price,
                    fill.timestamp,
                );
                let pnl = matched.realized_pnl();
                self.inventory.apply_fill(Side::Sell, matched.matched_size());
                self.inventory.apply_realized_pnl(pnl);
                self.realized_pnl += pnl;
                self.daily_pnl += pnl;
                FillOutcome {
                    shortfall: matched.shortfall,
                    realized_pnl: pnl,
                    trades: matched.trades,
                }
            }
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let price = self.last_close.unwrap_or(self.plan.mid);
        let state = self.risk_zone.state();
        StatusSnapshot {
            equity: self.equity(),
            holdings: self.matching.holdings(),
            cost_basis: self.matching.cost_basis(),
            risk_level: state.level.as_u8(),
            shutdown_reason: state.shutdown_reason,
            inventory_ratio: self.inventory.ratio(price),
            grid_enabled: state.grid_enabled,
            grid_version: self.grid_version,
            open_positions: self.matching.open_position_count(),
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl(price),
            bars_processed: self.bars_processed,
        }
    }

    fn unrealized_pnl(&self, price: f64) -> f64 {
        self.matching.holdings() * price - self.matching.cost_basis()
    }

    fn update_indicators(&mut self, slice: &MarketSlice) {
        let close = slice.bar.close;
        let fast_n = self.config.factors.trend.ema_fast;
        let slow_n = self.config.factors.trend.ema_slow;
        self.ema_fast = Some(ema_step(self.ema_fast, close, fast_n));
        self.ema_slow = Some(ema_step(self.ema_slow, close, slow_n));

        self.atr_window.push_back(slice.atr);
        while self.atr_window.len() > self.config.session.atr_baseline_period {
            self.atr_window.pop_front();
        }
    }

    /// Rolling mean of ATR; the running mean before the window is full so
    /// early bars do not inflate spacing.
    fn atr_baseline(&self) -> f64 {
        if self.atr_window.is_empty() {
            return 0.0;
        }
        self.atr_window.iter().sum::<f64>() / self.atr_window.len() as f64
    }

    /// EMA-slope trend score, tanh-normalized into [-1, 1].
    fn trend_score(&self) -> f64 {
        match (self.ema_fast, self.ema_slow) {
            (Some(fast), Some(slow)) if slow > 0.0 => {
                ((fast - slow) / slow * TREND_SLOPE_SCALE).tanh()
            }
            _ => 0.0,
        }
    }

    fn roll_daily_pnl(&mut self, date: NaiveDate) {
        if self.daily_pnl_date != Some(date) {
            self.daily_pnl_date = Some(date);
            self.daily_pnl = 0.0;
        }
    }
}

fn ema_step(previous: Option<f64>, value: f64, period: usize) -> f64 {
    match previous {
        None => value,
        Some(prev) => {
            let alpha = 2.0 / (period as f64 + 1.0);
            alpha * value + (1.0 - alpha) * prev
        }
    }
}

/// Minutes to the nearest 8-hour funding settlement, before or after.
fn minutes_around_funding(ts: chrono::DateTime<chrono::Utc>) -> i64 {
    let secs_of_day = ts.num_seconds_from_midnight() as i64;
    let until_next = FUNDING_PERIOD_SECS - secs_of_day % FUNDING_PERIOD_SECS;
    let since_last = FUNDING_PERIOD_SECS - until_next;
    until_next.min(since_last) / 60
}
