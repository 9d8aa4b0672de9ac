// Execution gateway
//
// The engine emits order intents; a gateway owns the exchange conversation.
// Live connectivity is out of scope, but the seam is a trait so replay and
// live deployments drive the same session loop. The simulated gateway fills
// resting limits when a bar trades through them, with a bounded random
// price improvement to keep replays honest about fill prices.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::types::{Bar, FillEvent, OrderIntent, Side};

pub trait ExecutionGateway {
    /// Place a limit order for an intent; returns the gateway's order id.
    fn place_limit_order(&mut self, intent: &OrderIntent) -> EngineResult<String>;

    /// Cancel a resting order. Unknown ids are a no-op: the order may have
    /// filled while the cancel was in flight.
    fn cancel_order(&mut self, order_id: &str) -> EngineResult<()>;

    /// Deliver fills confirmed against this bar, in confirmation order.
    fn poll_fills(&mut self, bar: &Bar) -> Vec<FillEvent>;

    fn open_order_count(&self) -> usize;
}

#[derive(Debug, Clone)]
struct RestingOrder {
    order_id: String,
    side: Side,
    level_index: usize,
    price: f64,
    size: f64,
    placed_at: DateTime<Utc>,
}

/// Replay gateway: fills a resting buy when the bar's low reaches its
/// price, a resting sell when the bar's high reaches it.
pub struct SimulatedGateway {
    resting: Vec<RestingOrder>,
    /// Maximum price improvement on fills, in basis points.
    improvement_bps: f64,
    rng: StdRng,
}

impl SimulatedGateway {
    pub fn new(improvement_bps: f64) -> Self {
        Self::with_seed(improvement_bps, rand::thread_rng().gen())
    }

    /// Seeded constructor for reproducible replays and tests.
    pub fn with_seed(improvement_bps: f64, seed: u64) -> Self {
        Self {
            resting: Vec::new(),
            improvement_bps,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn improved_price(&mut self, side: Side, limit: f64) -> f64 {
        if self.improvement_bps <= 0.0 {
            return limit;
        }
        let improvement = self.rng.gen_range(0.0..self.improvement_bps) / 10_000.0;
        match side {
            // A buy fills at its limit or better (lower).
            Side::Buy => limit * (1.0 - improvement),
            Side::Sell => limit * (1.0 + improvement),
        }
    }
}

impl ExecutionGateway for SimulatedGateway {
    fn place_limit_order(&mut self, intent: &OrderIntent) -> EngineResult<String> {
        let order_id = Uuid::new_v4().to_string();
        tracing::debug!(
            order_id = %order_id,
            side = intent.side.as_str(),
            level = intent.level_index,
            price = intent.price,
            size = intent.size,
            "placed limit order"
        );
        self.resting.push(RestingOrder {
            order_id: order_id.clone(),
            side: intent.side,
            level_index: intent.level_index,
            price: intent.price,
            size: intent.size,
            placed_at: intent.bar_time,
        });
        Ok(order_id)
    }

    fn cancel_order(&mut self, order_id: &str) -> EngineResult<()> {
        let before = self.resting.len();
        self.resting.retain(|o| o.order_id != order_id);
        if self.resting.len() == before {
            tracing::debug!(order_id, "cancel for unknown order (already filled?)");
        }
        Ok(())
    }

    fn poll_fills(&mut self, bar: &Bar) -> Vec<FillEvent> {
        let mut fills = Vec::new();
        let mut remaining = Vec::with_capacity(self.resting.len());

        for order in self.resting.drain(..) {
            let touched = match order.side {
                Side::Buy => bar.low <= order.price,
                Side::Sell => bar.high >= order.price,
            };
            if touched {
                fills.push((order.placed_at, order));
            } else {
                remaining.push(order);
            }
        }
        self.resting = remaining;

        // Confirmation order: oldest placement first.
        fills.sort_by_key(|(placed_at, _)| *placed_at);
        fills
            .into_iter()
            .map(|(_, order)| {
                let price = self.improved_price(order.side, order.price);
                FillEvent {
                    side: order.side,
                    level_index: order.level_index,
                    price,
                    size: order.size,
                    timestamp: bar.timestamp,
                }
            })
            .collect()
    }

    fn open_order_count(&self) -> usize {
        self.resting.len()
    }
}
