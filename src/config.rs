// Configuration management for the grid engine
//
// A single structured configuration object carries every threshold and
// multiplier the engine consults. It is immutable for a run: changing it
// requires re-initialization, not hot-patching.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::types::MarketRegime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub equity: f64,
    pub leverage: f64,
    /// Fraction of `equity * leverage` usable as inventory capacity.
    pub capacity_threshold_pct: f64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            equity: 10_000.0,
            leverage: 3.0,
            capacity_threshold_pct: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacingConfig {
    /// Minimum net return per grid round trip.
    pub min_return: f64,
    pub maker_fee: f64,
    /// Sensitivity of spacing to ATR expansion above its baseline.
    pub volatility_k: f64,
    /// Scales the cost-covering base spacing. Must be >= 1.0 or the grid
    /// cannot cover fees (cost-coverage invariant).
    pub spacing_multiplier: f64,
    /// Hard ceiling on spacing to bound the worst case.
    pub max_spacing: f64,
}

impl Default for SpacingConfig {
    fn default() -> Self {
        Self {
            min_return: 0.002,
            maker_fee: 0.0002,
            volatility_k: 0.5,
            spacing_multiplier: 1.0,
            max_spacing: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub support: f64,
    pub resistance: f64,
    /// Volatility cushion = ATR * cushion_multiplier, widening the effective
    /// range so a brief overshoot is not treated as out-of-range.
    pub cushion_multiplier: f64,
    pub layers_buy: usize,
    pub layers_sell: usize,
    pub spacing: SpacingConfig,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            support: 100_000.0,
            resistance: 112_000.0,
            cushion_multiplier: 1.5,
            layers_buy: 40,
            layers_sell: 40,
            spacing: SpacingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConfig {
    /// Edge-weighting slope: raw weight = 1 + edge_k * (i - 1), i = 1 nearest mid.
    pub edge_k: f64,
    /// Range regime: "up_range", "neutral_range" or "down_range".
    pub regime: String,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            edge_k: 0.15,
            regime: "neutral_range".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendFactorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// Hard-block buys once the tanh-normalized trend score falls to or
    /// below -block_threshold.
    pub block_threshold: f64,
    pub dampen_k: f64,
    pub floor: f64,
    pub mean_reversion_mult: f64,
}

impl Default for TrendFactorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 12,
            ema_slow: 48,
            block_threshold: 0.8,
            dampen_k: 0.6,
            floor: 0.3,
            mean_reversion_mult: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutFactorConfig {
    /// Fraction of the range counted as the boundary band.
    pub band: f64,
    pub block_threshold: f64,
    pub dampen_k: f64,
    pub floor: f64,
}

impl Default for BreakoutFactorConfig {
    fn default() -> Self {
        Self {
            band: 0.25,
            block_threshold: 0.75,
            dampen_k: 0.8,
            floor: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingFactorConfig {
    /// Factor is active only within this many minutes of the next 8h
    /// funding settlement (00:00 / 08:00 / 16:00 UTC).
    pub window_minutes: i64,
    pub buy_dampen_k: f64,
    pub buy_floor: f64,
    pub sell_amplify_k: f64,
    pub sell_cap: f64,
    /// Optional hard block on buys above this funding rate.
    pub buy_block_rate: Option<f64>,
}

impl Default for FundingFactorConfig {
    fn default() -> Self {
        Self {
            window_minutes: 30,
            buy_dampen_k: 2_000.0,
            buy_floor: 0.4,
            sell_amplify_k: 1_000.0,
            sell_cap: 1.5,
            buy_block_rate: Some(0.001),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangePositionFactorConfig {
    /// Factor activates once the range position reaches this fraction.
    pub band_start: f64,
    pub buy_dampen_k: f64,
    pub buy_floor: f64,
    pub sell_amplify_k: f64,
    pub sell_cap: f64,
}

impl Default for RangePositionFactorConfig {
    fn default() -> Self {
        Self {
            band_start: 0.7,
            buy_dampen_k: 0.7,
            buy_floor: 0.25,
            sell_amplify_k: 0.5,
            sell_cap: 1.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityFactorConfig {
    /// Percentile score at which the extreme-volatility regime starts.
    pub extreme_percentile: f64,
    pub sell_amplify_k: f64,
    pub sell_cap: f64,
    /// Buys are untouched by default; set below 1.0 to dampen them too.
    pub buy_mult: f64,
}

impl Default for VolatilityFactorConfig {
    fn default() -> Self {
        Self {
            extreme_percentile: 0.9,
            sell_amplify_k: 2.0,
            sell_cap: 1.8,
            buy_mult: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryFactorConfig {
    /// Hard-block buys at or above this notional/capacity ratio.
    pub block_ratio: f64,
    pub skew_k: f64,
}

impl Default for InventoryFactorConfig {
    fn default() -> Self {
        Self {
            block_ratio: 0.9,
            skew_k: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorConfig {
    pub trend: TrendFactorConfig,
    pub breakout: BreakoutFactorConfig,
    pub funding: FundingFactorConfig,
    pub range_position: RangePositionFactorConfig,
    pub volatility: VolatilityFactorConfig,
    pub inventory: InventoryFactorConfig,
}

impl Default for FactorConfig {
    fn default() -> Self {
        Self {
            trend: TrendFactorConfig::default(),
            breakout: BreakoutFactorConfig::default(),
            funding: FundingFactorConfig::default(),
            range_position: RangePositionFactorConfig::default(),
            volatility: VolatilityFactorConfig::default(),
            inventory: InventoryFactorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskZoneConfig {
    pub level1_buy_mult: f64,
    pub level1_sell_mult: f64,
    /// Extra buy cut applied in Level 1 when inventory ratio exceeds
    /// `inventory_cut_ratio`.
    pub inventory_cut_ratio: f64,
    pub level2_buy_mult: f64,
    pub level2_sell_mult: f64,
    /// Minutes the Level-1 condition must persist before escalating to
    /// Level 2.
    pub level2_dwell_minutes: i64,
    pub level3_buy_mult: f64,
    pub level3_sell_mult: f64,
    /// Shutdown once unrealized loss exceeds this fraction of equity
    /// (before the profit buffer is applied).
    pub max_loss_pct: f64,
    /// Fraction of realized profit allowed to absorb additional drawdown
    /// before shutdown.
    pub profit_buffer_ratio: f64,
    /// Shutdown once inventory notional exceeds this fraction of capacity.
    pub max_inventory_pct: f64,
}

impl Default for RiskZoneConfig {
    fn default() -> Self {
        Self {
            level1_buy_mult: 0.20,
            level1_sell_mult: 3.0,
            inventory_cut_ratio: 0.5,
            level2_buy_mult: 0.10,
            level2_sell_mult: 4.0,
            level2_dwell_minutes: 30,
            level3_buy_mult: 0.05,
            level3_sell_mult: 5.0,
            max_loss_pct: 0.08,
            profit_buffer_ratio: 0.5,
            max_inventory_pct: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Throttle to zero once exposure / max_units reaches this ratio.
    pub inventory_threshold: f64,
    pub max_units: f64,
    /// Daily PnL target as a fraction of the risk budget.
    pub profit_target_pct: f64,
    pub risk_budget: f64,
    pub profit_reduction: f64,
    /// ATR spike ratio (current / average) that triggers the volatility cut.
    pub volatility_threshold: f64,
    pub volatility_reduction: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            inventory_threshold: 0.95,
            max_units: 5.0,
            profit_target_pct: 1.0,
            risk_budget: 500.0,
            profit_reduction: 0.5,
            volatility_threshold: 2.5,
            volatility_reduction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub symbol: String,
    pub db_path: String,
    /// Emit a heartbeat record every this many bars.
    pub heartbeat_interval_bars: u64,
    /// Base delay before the first outbox replay attempt, in milliseconds.
    pub outbox_retry_base_ms: u64,
    pub outbox_retry_max_ms: u64,
    /// ATR period used by the feed when the column is not supplied.
    pub atr_period: usize,
    /// Rolling window for the ATR spacing baseline.
    pub atr_baseline_period: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            db_path: "data/grid_engine.db".to_string(),
            heartbeat_interval_bars: 60,
            outbox_retry_base_ms: 500,
            outbox_retry_max_ms: 30_000,
            atr_period: 14,
            atr_baseline_period: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub account: AccountConfig,
    pub grid: GridConfig,
    pub weights: WeightConfig,
    pub factors: FactorConfig,
    pub risk_zone: RiskZoneConfig,
    pub throttle: ThrottleConfig,
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: EngineConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from file, or create a default one if missing.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            tracing::info!("created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    pub fn regime(&self) -> Result<MarketRegime, ConfigError> {
        MarketRegime::from_config_str(&self.weights.regime)
    }

    /// Validate static configuration. The engine refuses to start on any
    /// failure here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.support >= self.grid.resistance {
            return Err(ConfigError::Validation(format!(
                "support ({}) must be below resistance ({})",
                self.grid.support, self.grid.resistance
            )));
        }

        if self.grid.spacing.spacing_multiplier < 1.0 {
            return Err(ConfigError::Validation(format!(
                "spacing_multiplier {} < 1.0 would not cover fees",
                self.grid.spacing.spacing_multiplier
            )));
        }

        if self.grid.layers_buy == 0 || self.grid.layers_sell == 0 {
            return Err(ConfigError::Validation(
                "layers_buy and layers_sell must be greater than 0".to_string(),
            ));
        }

        if self.grid.spacing.min_return <= 0.0 {
            return Err(ConfigError::Validation(
                "min_return must be positive".to_string(),
            ));
        }

        if self.grid.spacing.maker_fee < 0.0 {
            return Err(ConfigError::Validation(
                "maker_fee must be non-negative".to_string(),
            ));
        }

        if self.account.equity <= 0.0 {
            return Err(ConfigError::Validation(
                "equity must be positive".to_string(),
            ));
        }

        if self.account.leverage < 1.0 {
            return Err(ConfigError::Validation(
                "leverage must be at least 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.account.capacity_threshold_pct) {
            return Err(ConfigError::Validation(
                "capacity_threshold_pct must be within [0, 1]".to_string(),
            ));
        }

        if self.factors.inventory.block_ratio <= 0.0 {
            return Err(ConfigError::Validation(
                "inventory block_ratio must be positive".to_string(),
            ));
        }

        if self.risk_zone.max_loss_pct <= 0.0 {
            return Err(ConfigError::Validation(
                "max_loss_pct must be positive".to_string(),
            ));
        }

        if self.risk_zone.level2_dwell_minutes < 0 {
            return Err(ConfigError::Validation(
                "level2_dwell_minutes must be non-negative".to_string(),
            ));
        }

        if self.throttle.max_units <= 0.0 {
            return Err(ConfigError::Validation(
                "throttle max_units must be positive".to_string(),
            ));
        }

        if self.session.heartbeat_interval_bars == 0 {
            return Err(ConfigError::Validation(
                "heartbeat_interval_bars must be greater than 0".to_string(),
            ));
        }

        if self.session.atr_period == 0 || self.session.atr_baseline_period == 0 {
            return Err(ConfigError::Validation(
                "atr_period and atr_baseline_period must be greater than 0".to_string(),
            ));
        }

        // Regime text must parse.
        self.regime()?;

        Ok(())
    }
}
