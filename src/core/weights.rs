// Per-level weight allocation and regime budget split

use crate::types::MarketRegime;

/// Normalized per-level weights, edge levels heavier.
///
/// Raw weight for level i (1-based, i = 1 nearest mid) is `1 + k * (i - 1)`,
/// normalized so the weights sum to 1.
pub fn level_weights(level_count: usize, edge_k: f64) -> Vec<f64> {
    if level_count == 0 {
        return Vec::new();
    }

    let raw: Vec<f64> = (0..level_count).map(|i| 1.0 + edge_k * i as f64).collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Budget split `(buy, sell)` for the given regime.
pub fn budget_split(regime: MarketRegime) -> (f64, f64) {
    match regime {
        MarketRegime::UpRange => (0.7, 0.3),
        MarketRegime::NeutralRange => (0.5, 0.5),
        MarketRegime::DownRange => (0.3, 0.7),
    }
}
