use serde::{Deserialize, Serialize};

use super::{Direction, Timeframe};

/// Candidate produced by a strategy evaluator. Never persisted; it either
/// becomes a `Trade` or is dropped by the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    #[serde(default)]
    pub strategy_name: String,
    #[serde(default)]
    pub category: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    /// Up to three levels, nearest first. Zero entries count as absent.
    #[serde(default)]
    pub take_profits: Vec<f64>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

impl Signal {
    /// Present take-profit levels, zeros dropped, at most three.
    pub fn targets(&self) -> Vec<f64> {
        self.take_profits
            .iter()
            .copied()
            .filter(|tp| *tp != 0.0 && tp.is_finite())
            .take(3)
            .collect()
    }

    pub fn first_target(&self) -> Option<f64> {
        self.targets().first().copied()
    }

    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    pub fn reward(&self) -> Option<f64> {
        self.first_target().map(|tp| (tp - self.entry_price).abs())
    }
}
