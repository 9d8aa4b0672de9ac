// Grid matching engine
//
// Owns pending orders, open buy positions and the engine-wide cost basis.
// Each price level is a small state machine (Armed -> Triggered -> filled ->
// re-Armed); triggers use crossing semantics so one bar cannot fire the same
// level twice. Sell fills resolve against open positions paired-level-first
// with a FIFO fallback, preserving exact cost-basis accounting under partial
// fills. Matching never raises: an oversell is truncated to holdings and
// reported, not thrown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::core::levels::GridPlan;
use crate::types::{Bar, Side};

/// Aggregate holdings below this are treated as zero and the cost basis is
/// snapped to exactly zero.
pub const HOLDINGS_EPSILON: f64 = 1e-8;

/// Per-level, per-direction order slot. At most one resting order per
/// direction per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    /// No order at this level.
    Empty,
    /// A resting order is waiting for a crossing.
    Armed,
    /// The bar crossed the level; an intent is out, awaiting fill.
    Triggered,
}

/// One open long position created by a buy fill.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub size: f64,
    pub buy_price: f64,
    pub level_index: usize,
    /// The sell level this position must preferentially match against.
    pub target_sell_level: usize,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    PairedLevel,
    FifoFallback,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::PairedLevel => "paired_level",
            MatchType::FifoFallback => "fifo_fallback",
        }
    }
}

/// Append-only round-trip record, one per matched (buy position, sell) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_ts: DateTime<Utc>,
    pub exit_ts: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_level: usize,
    pub exit_level: usize,
    pub size: f64,
    pub pnl: f64,
    pub return_pct: f64,
    pub holding_period_secs: i64,
    pub match_type: MatchType,
}

/// An order whose level the current bar crossed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggeredOrder {
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
}

/// Result of applying a sell fill.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub trades: Vec<TradeRecord>,
    /// Buy levels re-armed because their position completed a round trip.
    pub rearmed_buys: Vec<usize>,
    /// Sell size that could not be matched against any holdings. Nonzero
    /// only when the requested sell exceeded total holdings; the fill is
    /// truncated, never rejected.
    pub shortfall: f64,
}

impl MatchOutcome {
    pub fn matched_size(&self) -> f64 {
        self.trades.iter().map(|t| t.size).sum()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }
}

#[derive(Debug, Clone)]
pub struct GridMatchingEngine {
    buy_levels: Vec<f64>,
    sell_levels: Vec<f64>,
    buy_slots: Vec<SlotState>,
    sell_slots: Vec<SlotState>,
    /// Insertion order doubles as the FIFO queue.
    positions: VecDeque<OpenPosition>,
    cost_basis: f64,
    prev_close: Option<f64>,
}

impl GridMatchingEngine {
    /// Build from a freshly generated plan: every buy level is armed, no
    /// sells until a buy fills.
    pub fn new(plan: &GridPlan) -> Self {
        let n = plan.level_count();
        Self {
            buy_levels: plan.buy_levels.clone(),
            sell_levels: plan.sell_levels.clone(),
            buy_slots: vec![SlotState::Armed; n],
            sell_slots: vec![SlotState::Empty; n],
            positions: VecDeque::new(),
            cost_basis: 0.0,
            prev_close: None,
        }
    }

    /// Adopt a regenerated plan. Pending orders are reset wholesale; open
    /// positions and cost basis carry over. Positions whose target level no
    /// longer exists are retargeted to the outermost level of the new plan.
    pub fn reset_with_plan(&mut self, plan: &GridPlan) {
        let n = plan.level_count();
        self.buy_levels = plan.buy_levels.clone();
        self.sell_levels = plan.sell_levels.clone();
        self.buy_slots = vec![SlotState::Armed; n];
        self.sell_slots = vec![SlotState::Empty; n];
        self.prev_close = None;

        if n == 0 {
            self.positions.clear();
            return;
        }
        for pos in &mut self.positions {
            if pos.target_sell_level >= n {
                tracing::warn!(
                    old_target = pos.target_sell_level,
                    new_target = n - 1,
                    "retargeting position after grid regeneration"
                );
                pos.target_sell_level = n - 1;
                pos.level_index = pos.level_index.min(n - 1);
            }
            self.sell_slots[pos.target_sell_level] = SlotState::Armed;
        }
        // Levels holding inventory do not buy again until the round trip
        // completes.
        for pos in &self.positions {
            if pos.level_index < n {
                self.buy_slots[pos.level_index] = SlotState::Empty;
            }
        }
    }

    pub fn buy_level_price(&self, index: usize) -> Option<f64> {
        self.buy_levels.get(index).copied()
    }

    pub fn sell_level_price(&self, index: usize) -> Option<f64> {
        self.sell_levels.get(index).copied()
    }

    pub fn cost_basis(&self) -> f64 {
        self.cost_basis
    }

    pub fn positions(&self) -> impl Iterator<Item = &OpenPosition> {
        self.positions.iter()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    /// Total open size across all positions.
    pub fn holdings(&self) -> f64 {
        self.positions.iter().map(|p| p.size).sum()
    }

    /// Open size whose preferred exit is the given sell level.
    pub fn paired_holdings(&self, sell_level: usize) -> f64 {
        self.positions
            .iter()
            .filter(|p| p.target_sell_level == sell_level)
            .map(|p| p.size)
            .sum()
    }

    pub fn slot(&self, side: Side, index: usize) -> SlotState {
        let slots = match side {
            Side::Buy => &self.buy_slots,
            Side::Sell => &self.sell_slots,
        };
        slots.get(index).copied().unwrap_or(SlotState::Empty)
    }

    /// Scan armed orders against the bar. Crossing semantics: the previous
    /// close must sit on the far side of the level, so a level fires at most
    /// once per crossing and the first bar after a reset never fires.
    pub fn check_triggers(&mut self, bar: &Bar) -> Vec<TriggeredOrder> {
        let mut triggered = Vec::new();

        if let Some(prev) = self.prev_close {
            for (i, &price) in self.buy_levels.iter().enumerate() {
                if self.buy_slots[i] == SlotState::Armed && bar.low <= price && prev > price {
                    self.buy_slots[i] = SlotState::Triggered;
                    triggered.push(TriggeredOrder { side: Side::Buy, level_index: i, price });
                }
            }
            for (i, &price) in self.sell_levels.iter().enumerate() {
                if self.sell_slots[i] == SlotState::Armed && bar.high >= price && prev < price {
                    self.sell_slots[i] = SlotState::Triggered;
                    triggered.push(TriggeredOrder { side: Side::Sell, level_index: i, price });
                }
            }
        }

        self.prev_close = Some(bar.close);
        triggered
    }

    /// Return a triggered slot to armed when sizing suppressed or blocked
    /// the order and no intent went out.
    pub fn release(&mut self, side: Side, index: usize) {
        let slots = match side {
            Side::Buy => &mut self.buy_slots,
            Side::Sell => &mut self.sell_slots,
        };
        if let Some(slot) = slots.get_mut(index) {
            if *slot == SlotState::Triggered {
                *slot = SlotState::Armed;
            }
        }
    }

    /// Apply a confirmed buy fill: open a position targeting the paired sell
    /// level and arm that sell order.
    pub fn apply_buy_fill(
        &mut self,
        level_index: usize,
        size: f64,
        fill_price: f64,
        timestamp: DateTime<Utc>,
    ) {
        if level_index >= self.buy_levels.len() || size <= 0.0 {
            return;
        }

        self.positions.push_back(OpenPosition {
            size,
            buy_price: fill_price,
            level_index,
            target_sell_level: level_index,
            opened_at: timestamp,
        });
        self.cost_basis += size * fill_price;

        self.buy_slots[level_index] = SlotState::Empty;
        if self.sell_slots[level_index] == SlotState::Empty {
            self.sell_slots[level_index] = SlotState::Armed;
        }

        tracing::debug!(
            level = level_index,
            size,
            price = fill_price,
            cost_basis = self.cost_basis,
            "buy fill opened position"
        );
    }

    /// Apply a confirmed sell fill. Matches paired-level-first, then falls
    /// back to the globally oldest position for any remainder. Any size
    /// beyond total holdings is truncated and reported as a shortfall.
    pub fn apply_sell_fill(
        &mut self,
        level_index: usize,
        size: f64,
        fill_price: f64,
        timestamp: DateTime<Utc>,
    ) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();
        if level_index < self.sell_slots.len() {
            self.sell_slots[level_index] = SlotState::Empty;
        }
        if size <= 0.0 {
            return outcome;
        }
        if self.positions.is_empty() {
            // Cannot sell what is not held.
            outcome.shortfall = size;
            tracing::warn!(level = level_index, size, "sell fill with no open positions");
            return outcome;
        }

        let mut remaining = size;

        // Pass 1: positions that target this level, oldest first.
        remaining = self.consume_positions(
            remaining,
            fill_price,
            level_index,
            timestamp,
            MatchType::PairedLevel,
            &mut outcome,
            |pos| pos.target_sell_level == level_index,
        );

        // Pass 2: FIFO fallback against the globally oldest positions. Rare
        // under the sizing cap, but always handled.
        if remaining > HOLDINGS_EPSILON {
            remaining = self.consume_positions(
                remaining,
                fill_price,
                level_index,
                timestamp,
                MatchType::FifoFallback,
                &mut outcome,
                |_| true,
            );
        }

        if remaining > HOLDINGS_EPSILON {
            outcome.shortfall = remaining;
            tracing::warn!(
                level = level_index,
                shortfall = remaining,
                "sell exceeded holdings; truncated"
            );
        }

        // Exact-zero snap keeps float dust out of the cost basis.
        if self.holdings() <= HOLDINGS_EPSILON {
            self.cost_basis = 0.0;
        } else {
            self.cost_basis = self.cost_basis.max(0.0);
        }

        // The level keeps an exit armed while inventory still targets it.
        if level_index < self.sell_slots.len() && self.paired_holdings(level_index) > HOLDINGS_EPSILON
        {
            self.sell_slots[level_index] = SlotState::Armed;
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn consume_positions<F>(
        &mut self,
        mut remaining: f64,
        fill_price: f64,
        exit_level: usize,
        timestamp: DateTime<Utc>,
        match_type: MatchType,
        outcome: &mut MatchOutcome,
        eligible: F,
    ) -> f64
    where
        F: Fn(&OpenPosition) -> bool,
    {
        let mut index = 0;
        while index < self.positions.len() && remaining > HOLDINGS_EPSILON {
            if !eligible(&self.positions[index]) {
                index += 1;
                continue;
            }

            let matched = remaining.min(self.positions[index].size);
            let pos = &mut self.positions[index];
            pos.size -= matched;
            remaining -= matched;
            self.cost_basis -= matched * pos.buy_price;

            outcome.trades.push(TradeRecord {
                entry_ts: pos.opened_at,
                exit_ts: timestamp,
                entry_price: pos.buy_price,
                exit_price: fill_price,
                entry_level: pos.level_index,
                exit_level,
                size: matched,
                pnl: (fill_price - pos.buy_price) * matched,
                return_pct: fill_price / pos.buy_price - 1.0,
                holding_period_secs: (timestamp - pos.opened_at).num_seconds(),
                match_type,
            });

            if pos.size <= HOLDINGS_EPSILON {
                let origin = pos.level_index;
                self.positions.remove(index);
                // Round trip complete: re-enter at the originating buy level.
                if origin < self.buy_slots.len() && self.buy_slots[origin] == SlotState::Empty {
                    self.buy_slots[origin] = SlotState::Armed;
                    outcome.rearmed_buys.push(origin);
                }
            } else {
                index += 1;
            }
        }
        remaining
    }
}
