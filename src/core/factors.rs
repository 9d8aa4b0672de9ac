// Order sizing pipeline
//
// A triggered level's base size is repriced by an ordered chain of
// multiplicative factors, each a pure function of the sizing context. A
// factor may hard-block the order outright; the first block wins and the
// rest of the chain is not consulted. After the chain, the execution-time
// throttle multiplier is applied, and finally the sell-side size is capped
// at the holdings that target the triggered level so a single amplified
// sell can never require more than its paired buys to match.

use crate::config::FactorConfig;
use crate::core::risk_zone::RiskLevel;
use crate::types::Side;

/// Everything a factor is allowed to look at. Assembled once per triggered
/// order by the engine.
#[derive(Debug, Clone)]
pub struct SizingContext {
    pub side: Side,
    pub level_index: usize,
    pub level_price: f64,
    /// Trend score from the EMA slope, tanh-normalized into [-1, 1].
    pub trend_score: f64,
    /// Price position inside the configured range; < 0 below support,
    /// > 1 above resistance.
    pub range_position: f64,
    pub funding_rate: Option<f64>,
    pub minutes_to_funding: i64,
    pub vol_percentile: Option<f64>,
    /// Inventory notional / capacity.
    pub inventory_ratio: f64,
    pub risk_level: RiskLevel,
    /// (buy, sell) multipliers from the risk zone tier.
    pub risk_multipliers: (f64, f64),
    /// Open-position size targeting this sell level (sells only).
    pub paired_available: f64,
    /// Total open holdings (sells only).
    pub total_holdings: f64,
}

/// One factor's verdict.
#[derive(Debug, Clone)]
pub struct FactorDecision {
    pub multiplier: f64,
    pub blocked: bool,
    pub reason: Option<String>,
}

impl FactorDecision {
    fn pass() -> Self {
        Self { multiplier: 1.0, blocked: false, reason: None }
    }

    fn scale(multiplier: f64) -> Self {
        Self { multiplier, blocked: false, reason: None }
    }

    fn block(reason: String) -> Self {
        Self { multiplier: 0.0, blocked: true, reason: Some(reason) }
    }
}

/// Final sizing result. A suppressed order is intentional (multipliers
/// collapsed the size); a blocked order was vetoed by a named factor. The
/// two are never conflated with an anomaly.
#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    Sized(f64),
    Suppressed { factor: &'static str },
    Blocked { factor: &'static str, reason: String },
}

impl SizingOutcome {
    pub fn size(&self) -> f64 {
        match self {
            SizingOutcome::Sized(size) => *size,
            _ => 0.0,
        }
    }
}

type FactorFn = fn(&FactorConfig, &SizingContext) -> FactorDecision;

/// Fixed evaluation order; tested, because "first hard-block wins" depends
/// on it.
const FACTOR_CHAIN: &[(&str, FactorFn)] = &[
    ("trend", trend_factor),
    ("breakout", breakout_factor),
    ("funding", funding_factor),
    ("range_position", range_position_factor),
    ("volatility_regime", volatility_factor),
    ("inventory_skew", inventory_factor),
    ("risk_zone", risk_zone_factor),
];

/// Sizes below this are treated as suppressed rather than emitted as dust.
const MIN_ORDER_SIZE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct OrderSizingPipeline {
    config: FactorConfig,
}

impl OrderSizingPipeline {
    pub fn new(config: FactorConfig) -> Self {
        Self { config }
    }

    /// Base size before adjustment: the side's budget share for this level,
    /// denominated in units at the level price.
    pub fn base_size(side_budget: f64, level_weight: f64, level_price: f64) -> f64 {
        if level_price <= 0.0 {
            return 0.0;
        }
        side_budget * level_weight / level_price
    }

    /// Run the full chain for one triggered order.
    pub fn size_order(
        &self,
        ctx: &SizingContext,
        base_size: f64,
        throttle_multiplier: f64,
    ) -> SizingOutcome {
        let mut size = base_size;
        let mut last_zeroing_factor: &'static str = "base";

        for &(name, factor) in FACTOR_CHAIN {
            let decision = factor(&self.config, ctx);
            if decision.blocked {
                let reason = decision.reason.unwrap_or_default();
                tracing::debug!(
                    factor = name,
                    side = ctx.side.as_str(),
                    level = ctx.level_index,
                    %reason,
                    "order hard-blocked"
                );
                return SizingOutcome::Blocked { factor: name, reason };
            }
            size *= decision.multiplier;
            if decision.multiplier <= 0.0 {
                last_zeroing_factor = name;
            }
        }

        size *= throttle_multiplier;
        if throttle_multiplier <= 0.0 {
            last_zeroing_factor = "throttle";
        }

        // Critical invariant: a sell may consume at most the positions that
        // target this level (all holdings if none do), no matter how far the
        // chain amplified it.
        if ctx.side == Side::Sell {
            let cap = if ctx.paired_available > 0.0 {
                ctx.paired_available
            } else {
                ctx.total_holdings
            };
            size = size.min(cap);
        }

        if size < MIN_ORDER_SIZE {
            SizingOutcome::Suppressed { factor: last_zeroing_factor }
        } else {
            SizingOutcome::Sized(size)
        }
    }
}

/// Trend / mean-reversion dampening, buys only. A strongly negative trend
/// blocks the buy; a mildly negative one shrinks it, floor-bounded, scaled
/// by the configured mean-reversion strength.
fn trend_factor(config: &FactorConfig, ctx: &SizingContext) -> FactorDecision {
    if ctx.side != Side::Buy {
        return FactorDecision::pass();
    }
    let c = &config.trend;

    if ctx.trend_score <= -c.block_threshold {
        return FactorDecision::block(format!(
            "trend score {:.3} at or below -{:.3}",
            ctx.trend_score, c.block_threshold
        ));
    }

    let downside = (-ctx.trend_score).max(0.0);
    let dampen = (1.0 - c.dampen_k * downside).max(c.floor);
    FactorDecision::scale(dampen * c.mean_reversion_mult)
}

/// Breakout risk, buys only: proximity to the lower boundary combined with
/// downward trend pressure.
fn breakout_factor(config: &FactorConfig, ctx: &SizingContext) -> FactorDecision {
    if ctx.side != Side::Buy {
        return FactorDecision::pass();
    }
    let c = &config.breakout;

    let proximity = if c.band <= 0.0 {
        0.0
    } else {
        ((c.band - ctx.range_position) / c.band).clamp(0.0, 1.0)
    };
    let pressure = (-ctx.trend_score).max(0.0);
    let risk_score = proximity * pressure;

    if risk_score >= c.block_threshold {
        return FactorDecision::block(format!(
            "breakout risk {:.3} at or above {:.3}",
            risk_score, c.block_threshold
        ));
    }

    FactorDecision::scale((1.0 - c.dampen_k * risk_score).max(c.floor))
}

/// Funding-rate pressure, gated to a window around the 8h settlement.
/// Positive funding dampens buys and amplifies sells; negative funding is
/// left alone.
fn funding_factor(config: &FactorConfig, ctx: &SizingContext) -> FactorDecision {
    let c = &config.funding;

    let rate = match ctx.funding_rate {
        Some(rate) => rate,
        None => return FactorDecision::pass(),
    };
    if ctx.minutes_to_funding > c.window_minutes || rate <= 0.0 {
        return FactorDecision::pass();
    }

    match ctx.side {
        Side::Buy => {
            if let Some(block_rate) = c.buy_block_rate {
                if rate >= block_rate {
                    return FactorDecision::block(format!(
                        "funding rate {:.5} at or above {:.5}",
                        rate, block_rate
                    ));
                }
            }
            FactorDecision::scale((1.0 - c.buy_dampen_k * rate).clamp(c.buy_floor, 1.0))
        }
        Side::Sell => {
            FactorDecision::scale((1.0 + c.sell_amplify_k * rate).clamp(1.0, c.sell_cap))
        }
    }
}

/// Top-of-range asymmetry: deep in the upper band, buys shrink and sells
/// grow with the normalized distance into the band.
fn range_position_factor(config: &FactorConfig, ctx: &SizingContext) -> FactorDecision {
    let c = &config.range_position;

    if ctx.range_position < c.band_start {
        return FactorDecision::pass();
    }
    let span = 1.0 - c.band_start;
    let depth = if span <= 0.0 {
        1.0
    } else {
        ((ctx.range_position - c.band_start) / span).clamp(0.0, 1.0)
    };

    match ctx.side {
        Side::Buy => FactorDecision::scale((1.0 - c.buy_dampen_k * depth).max(c.buy_floor)),
        Side::Sell => FactorDecision::scale((1.0 + c.sell_amplify_k * depth).min(c.sell_cap)),
    }
}

/// Extreme-volatility regime: bias toward de-risking by amplifying sells.
/// Buys are untouched unless configured otherwise.
fn volatility_factor(config: &FactorConfig, ctx: &SizingContext) -> FactorDecision {
    let c = &config.volatility;

    let score = match ctx.vol_percentile {
        Some(score) => score,
        None => return FactorDecision::pass(),
    };
    if score < c.extreme_percentile {
        return FactorDecision::pass();
    }
    let span = 1.0 - c.extreme_percentile;
    let excess = if span <= 0.0 {
        1.0
    } else {
        ((score - c.extreme_percentile) / span).clamp(0.0, 1.0)
    };

    match ctx.side {
        Side::Buy => FactorDecision::scale(c.buy_mult),
        Side::Sell => FactorDecision::scale((1.0 + c.sell_amplify_k * excess).min(c.sell_cap)),
    }
}

/// Inventory skew, buys only: block at capacity, otherwise dampen in
/// proportion to how close inventory sits to the block ratio.
fn inventory_factor(config: &FactorConfig, ctx: &SizingContext) -> FactorDecision {
    if ctx.side != Side::Buy {
        return FactorDecision::pass();
    }
    let c = &config.inventory;

    if ctx.inventory_ratio >= c.block_ratio {
        return FactorDecision::block(format!(
            "inventory ratio {:.3} at or above {:.3}",
            ctx.inventory_ratio, c.block_ratio
        ));
    }

    FactorDecision::scale((1.0 - c.skew_k * ctx.inventory_ratio / c.block_ratio).max(0.0))
}

/// Tiered risk-zone multipliers; Shutdown vetoes both sides outright.
fn risk_zone_factor(_config: &FactorConfig, ctx: &SizingContext) -> FactorDecision {
    if ctx.risk_level == RiskLevel::Shutdown {
        return FactorDecision::block("risk zone shutdown".to_string());
    }
    let (buy, sell) = ctx.risk_multipliers;
    match ctx.side {
        Side::Buy => FactorDecision::scale(buy),
        Side::Sell => FactorDecision::scale(sell),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FactorConfig;

    fn pipeline() -> OrderSizingPipeline {
        OrderSizingPipeline::new(FactorConfig::default())
    }

    fn buy_ctx() -> SizingContext {
        SizingContext {
            side: Side::Buy,
            level_index: 3,
            level_price: 100.0,
            trend_score: 0.0,
            range_position: 0.5,
            funding_rate: None,
            minutes_to_funding: 240,
            vol_percentile: None,
            inventory_ratio: 0.0,
            risk_level: RiskLevel::Normal,
            risk_multipliers: (1.0, 1.0),
            paired_available: 0.0,
            total_holdings: 0.0,
        }
    }

    fn sell_ctx() -> SizingContext {
        SizingContext {
            side: Side::Sell,
            paired_available: 0.6,
            total_holdings: 1.4,
            ..buy_ctx()
        }
    }

    #[test]
    fn neutral_context_keeps_base_size() {
        let outcome = pipeline().size_order(&buy_ctx(), 2.0, 1.0);
        assert_eq!(outcome, SizingOutcome::Sized(2.0));
    }

    #[test]
    fn base_size_is_budget_weight_over_price() {
        let size = OrderSizingPipeline::base_size(5_000.0, 0.1, 250.0);
        assert!((size - 2.0).abs() < 1e-12);
        assert_eq!(OrderSizingPipeline::base_size(5_000.0, 0.1, 0.0), 0.0);
    }

    #[test]
    fn strong_downtrend_blocks_buys() {
        let mut ctx = buy_ctx();
        ctx.trend_score = -0.9;
        match pipeline().size_order(&ctx, 2.0, 1.0) {
            SizingOutcome::Blocked { factor, .. } => assert_eq!(factor, "trend"),
            other => panic!("expected trend block, got {:?}", other),
        }
    }

    #[test]
    fn mild_downtrend_dampens_with_floor() {
        let mut ctx = buy_ctx();
        ctx.trend_score = -0.5;
        let outcome = pipeline().size_order(&ctx, 2.0, 1.0);
        // 1 - 0.6 * 0.5 = 0.7 multiplier
        assert!((outcome.size() - 1.4).abs() < 1e-9);

        ctx.trend_score = -0.79; // just under the block threshold
        let outcome = pipeline().size_order(&ctx, 2.0, 1.0);
        // dampen would be 0.526, above the 0.3 floor
        assert!(outcome.size() >= 2.0 * 0.3 - 1e-9);
    }

    #[test]
    fn trend_factor_ignores_sells() {
        let mut ctx = sell_ctx();
        ctx.trend_score = -0.95;
        let outcome = pipeline().size_order(&ctx, 0.5, 1.0);
        assert!(matches!(outcome, SizingOutcome::Sized(_)));
    }

    #[test]
    fn breakout_risk_blocks_near_lower_boundary() {
        let mut ctx = buy_ctx();
        ctx.range_position = 0.0; // sitting on support
        ctx.trend_score = -0.79; // heavy pressure, but under the trend block
        match pipeline().size_order(&ctx, 2.0, 1.0) {
            SizingOutcome::Blocked { factor, .. } => assert_eq!(factor, "breakout"),
            other => panic!("expected breakout block, got {:?}", other),
        }
    }

    #[test]
    fn funding_is_time_gated() {
        let mut ctx = buy_ctx();
        ctx.funding_rate = Some(0.0004);
        ctx.minutes_to_funding = 240; // outside the window
        let outcome = pipeline().size_order(&ctx, 2.0, 1.0);
        assert_eq!(outcome, SizingOutcome::Sized(2.0));

        ctx.minutes_to_funding = 10;
        let outcome = pipeline().size_order(&ctx, 2.0, 1.0);
        // 1 - 2000 * 0.0004 = 0.2, clamped to the 0.4 floor
        assert!((outcome.size() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn high_funding_blocks_buys_inside_window() {
        let mut ctx = buy_ctx();
        ctx.funding_rate = Some(0.002);
        ctx.minutes_to_funding = 5;
        match pipeline().size_order(&ctx, 2.0, 1.0) {
            SizingOutcome::Blocked { factor, .. } => assert_eq!(factor, "funding"),
            other => panic!("expected funding block, got {:?}", other),
        }
    }

    #[test]
    fn positive_funding_amplifies_sells_in_window() {
        let mut ctx = sell_ctx();
        ctx.funding_rate = Some(0.0003);
        ctx.minutes_to_funding = 5;
        ctx.paired_available = 100.0; // keep the cap out of the way
        let outcome = pipeline().size_order(&ctx, 1.0, 1.0);
        // 1 + 1000 * 0.0003 = 1.3
        assert!((outcome.size() - 1.3).abs() < 1e-9);
    }

    #[test]
    fn top_of_range_shrinks_buys_and_grows_sells() {
        let mut buy = buy_ctx();
        buy.range_position = 0.85; // depth 0.5 into the top band
        let outcome = pipeline().size_order(&buy, 2.0, 1.0);
        // 1 - 0.7 * 0.5 = 0.65
        assert!((outcome.size() - 1.3).abs() < 1e-9);

        let mut sell = sell_ctx();
        sell.range_position = 0.85;
        sell.paired_available = 100.0;
        let outcome = pipeline().size_order(&sell, 1.0, 1.0);
        // 1 + 0.5 * 0.5 = 1.25
        assert!((outcome.size() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn extreme_volatility_amplifies_sells_only() {
        let mut sell = sell_ctx();
        sell.vol_percentile = Some(0.95);
        sell.paired_available = 100.0;
        let outcome = pipeline().size_order(&sell, 1.0, 1.0);
        // excess 0.5 -> 1 + 2.0 * 0.5 = 2.0, capped at 1.8
        assert!((outcome.size() - 1.8).abs() < 1e-9);

        let mut buy = buy_ctx();
        buy.vol_percentile = Some(0.95);
        let outcome = pipeline().size_order(&buy, 2.0, 1.0);
        assert_eq!(outcome, SizingOutcome::Sized(2.0));
    }

    #[test]
    fn inventory_skew_is_monotonic_and_blocks_at_capacity() {
        let pipeline = pipeline();
        let mut previous = f64::INFINITY;
        for step in 0..=8 {
            let mut ctx = buy_ctx();
            ctx.inventory_ratio = 0.1 * step as f64; // 0.0 .. 0.8, under block
            let size = pipeline.size_order(&ctx, 2.0, 1.0).size();
            assert!(size <= previous + 1e-12, "dampening must be non-increasing");
            previous = size;
        }

        let mut ctx = buy_ctx();
        ctx.inventory_ratio = 0.9;
        match pipeline.size_order(&ctx, 2.0, 1.0) {
            SizingOutcome::Blocked { factor, .. } => assert_eq!(factor, "inventory_skew"),
            other => panic!("expected inventory block, got {:?}", other),
        }
    }

    #[test]
    fn risk_shutdown_blocks_both_sides() {
        for mut ctx in [buy_ctx(), sell_ctx()] {
            ctx.risk_level = RiskLevel::Shutdown;
            match pipeline().size_order(&ctx, 2.0, 1.0) {
                SizingOutcome::Blocked { factor, .. } => assert_eq!(factor, "risk_zone"),
                other => panic!("expected risk zone block, got {:?}", other),
            }
        }
    }

    #[test]
    fn risk_tier_multipliers_apply() {
        let mut buy = buy_ctx();
        buy.risk_level = RiskLevel::Level1;
        buy.risk_multipliers = (0.2, 3.0);
        let outcome = pipeline().size_order(&buy, 2.0, 1.0);
        assert!((outcome.size() - 0.4).abs() < 1e-9);

        let mut sell = sell_ctx();
        sell.risk_level = RiskLevel::Level1;
        sell.risk_multipliers = (0.2, 3.0);
        sell.paired_available = 100.0;
        let outcome = pipeline().size_order(&sell, 1.0, 1.0);
        assert!((outcome.size() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn first_block_wins() {
        // Both the trend factor and the inventory factor would block; the
        // chain must report the earlier one.
        let mut ctx = buy_ctx();
        ctx.trend_score = -0.9;
        ctx.inventory_ratio = 0.95;
        match pipeline().size_order(&ctx, 2.0, 1.0) {
            SizingOutcome::Blocked { factor, .. } => assert_eq!(factor, "trend"),
            other => panic!("expected trend block, got {:?}", other),
        }
    }

    #[test]
    fn sell_size_capped_at_paired_holdings() {
        // Amplify hard: risk tier 3 sell multiplier is 5x.
        let mut ctx = sell_ctx();
        ctx.risk_level = RiskLevel::Level3;
        ctx.risk_multipliers = (0.05, 5.0);
        ctx.paired_available = 0.6;
        ctx.total_holdings = 2.0;
        let outcome = pipeline().size_order(&ctx, 1.0, 1.0);
        assert_eq!(outcome, SizingOutcome::Sized(0.6));
    }

    #[test]
    fn sell_cap_falls_back_to_total_holdings() {
        let mut ctx = sell_ctx();
        ctx.paired_available = 0.0;
        ctx.total_holdings = 0.8;
        let outcome = pipeline().size_order(&ctx, 5.0, 1.0);
        assert_eq!(outcome, SizingOutcome::Sized(0.8));
    }

    #[test]
    fn sell_with_no_holdings_is_suppressed() {
        let mut ctx = sell_ctx();
        ctx.paired_available = 0.0;
        ctx.total_holdings = 0.0;
        assert!(matches!(
            pipeline().size_order(&ctx, 1.0, 1.0),
            SizingOutcome::Suppressed { .. }
        ));
    }

    #[test]
    fn throttle_multiplier_applies_after_chain() {
        let outcome = pipeline().size_order(&buy_ctx(), 2.0, 0.5);
        assert_eq!(outcome, SizingOutcome::Sized(1.0));

        let outcome = pipeline().size_order(&buy_ctx(), 2.0, 0.0);
        assert!(matches!(
            outcome,
            SizingOutcome::Suppressed { factor: "throttle" }
        ));
    }
}
