// Grid level generation
//
// Pure function from (mid, range, volatility) to the price ladder. A plan is
// immutable once generated; range updates and mid shifts regenerate it
// wholesale under a new version.

use crate::config::GridConfig;
use crate::error::ConfigError;

/// A generated price ladder. `buy_levels[i]` and `sell_levels[i]` form a
/// paired level: the sell leg sits exactly one spacing unit above its buy.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPlan {
    pub version: u64,
    pub mid: f64,
    pub spacing: f64,
    pub eff_support: f64,
    pub eff_resistance: f64,
    pub buy_levels: Vec<f64>,
    pub sell_levels: Vec<f64>,
}

impl GridPlan {
    pub fn level_count(&self) -> usize {
        self.buy_levels.len()
    }

    /// Position of `price` inside the raw configured range, in [0, 1] when
    /// in range. Used by the boundary-sensitive sizing factors.
    pub fn range_position(&self, price: f64, support: f64, resistance: f64) -> f64 {
        (price - support) / (resistance - support)
    }
}

/// Generate a grid plan around `mid`.
///
/// `atr_baseline` is the rolling mean of ATR maintained by the caller; the
/// ratio of current ATR to it drives the spacing widening so the generator
/// itself stays pure.
pub fn generate_plan(
    config: &GridConfig,
    version: u64,
    mid: f64,
    atr: f64,
    atr_baseline: f64,
) -> Result<GridPlan, ConfigError> {
    if config.support >= config.resistance {
        return Err(ConfigError::Validation(format!(
            "support ({}) must be below resistance ({})",
            config.support, config.resistance
        )));
    }
    if config.spacing.spacing_multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "spacing_multiplier {} < 1.0 would not cover fees",
            config.spacing.spacing_multiplier
        )));
    }

    let cushion = atr * config.cushion_multiplier;
    let eff_support = config.support - cushion;
    let eff_resistance = config.resistance + cushion;

    let spacing = compute_spacing(config, atr, atr_baseline);

    let mut buy_levels = Vec::with_capacity(config.layers_buy);
    let mut sell_levels = Vec::with_capacity(config.layers_buy);

    let mut price = mid;
    for _ in 0..config.layers_buy {
        price /= 1.0 + spacing;
        if price < eff_support {
            break;
        }
        let sell = price * (1.0 + spacing);
        // A pair whose sell leg would sit beyond the effective resistance is
        // dropped whole; a buy without its exit is not a grid level.
        if sell > eff_resistance {
            continue;
        }
        buy_levels.push(price);
        sell_levels.push(sell);
    }

    tracing::debug!(
        version,
        mid,
        spacing,
        levels = buy_levels.len(),
        eff_support,
        eff_resistance,
        "generated grid plan"
    );

    Ok(GridPlan {
        version,
        mid,
        spacing,
        eff_support,
        eff_resistance,
        buy_levels,
        sell_levels,
    })
}

/// Cost-covering spacing, widened when ATR runs above its baseline and
/// clamped to the configured ceiling.
fn compute_spacing(config: &GridConfig, atr: f64, atr_baseline: f64) -> f64 {
    let s = &config.spacing;
    let base = (s.min_return + 2.0 * s.maker_fee) * s.spacing_multiplier;

    let atr_pct = if atr_baseline > 0.0 { atr / atr_baseline } else { 1.0 };
    let widened = base * (1.0 + s.volatility_k * (atr_pct - 1.0).max(0.0));

    widened.min(s.max_spacing)
}
