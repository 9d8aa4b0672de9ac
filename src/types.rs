// Common types shared across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One price bar at fixed resolution (typically 1 minute).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A bar together with the auxiliary series aligned to it.
///
/// The feed is responsible for alignment; the engine never looks anything up
/// by timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSlice {
    pub bar: Bar,
    /// Wilder ATR over the feed's configured period.
    pub atr: f64,
    /// Current funding rate, if the venue publishes one.
    pub funding_rate: Option<f64>,
    /// Volatility percentile score in [0, 1], if precomputed upstream.
    pub vol_percentile: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Range regime used to split the order budget between sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    UpRange,
    NeutralRange,
    DownRange,
}

impl MarketRegime {
    /// Parse from configuration text. Unknown text is a configuration error,
    /// not a default.
    pub fn from_config_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "up_range" => Ok(MarketRegime::UpRange),
            "neutral_range" => Ok(MarketRegime::NeutralRange),
            "down_range" => Ok(MarketRegime::DownRange),
            other => Err(ConfigError::Validation(format!(
                "unrecognized regime '{}' (expected up_range, neutral_range or down_range)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::UpRange => "up_range",
            MarketRegime::NeutralRange => "neutral_range",
            MarketRegime::DownRange => "down_range",
        }
    }
}

/// Order intent emitted after a bar's decision step.
///
/// The execution gateway turns intents into live orders; the engine never
/// talks to the exchange directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub intent_id: String,
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub size: f64,
    pub reason: String,
    pub bar_time: DateTime<Utc>,
}

/// Fill confirmation delivered back from the execution gateway.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEvent {
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub size: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regime_round_trip() {
        for regime in [
            MarketRegime::UpRange,
            MarketRegime::NeutralRange,
            MarketRegime::DownRange,
        ] {
            assert_eq!(
                MarketRegime::from_config_str(regime.as_str()).unwrap(),
                regime
            );
        }
    }

    #[test]
    fn regime_rejects_unknown_text() {
        assert!(MarketRegime::from_config_str("sideways").is_err());
    }
}
