use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "BUY", alias = "buy", alias = "LONG")]
    Long,
    #[serde(alias = "SELL", alias = "sell", alias = "SHORT")]
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// +1.0 for long, -1.0 for short. Multiplying a raw price move by this
    /// turns it into a signed reward.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Signed move from `from` to `to`, positive when it favours the position.
    pub fn favourable_move(&self, from: f64, to: f64) -> f64 {
        (to - from) * self.sign()
    }

    /// True when `level` sits on the loss side of `entry`.
    pub fn is_loss_side(&self, entry: f64, level: f64) -> bool {
        match self {
            Direction::Long => level < entry,
            Direction::Short => level > entry,
        }
    }

    /// True when `level` sits on the profit side of `entry`.
    pub fn is_profit_side(&self, entry: f64, level: f64) -> bool {
        match self {
            Direction::Long => level > entry,
            Direction::Short => level < entry,
        }
    }

    /// Whether a stop at `stop` is touched, given the side of the book the
    /// position would close against (bid for longs, ask for shorts).
    pub fn stop_crossed(&self, stop: f64, bid: f64, ask: f64) -> bool {
        match self {
            Direction::Long => bid <= stop,
            Direction::Short => ask >= stop,
        }
    }

    pub fn target_reached(&self, target: f64, bid: f64, ask: f64) -> bool {
        match self {
            Direction::Long => bid >= target,
            Direction::Short => ask <= target,
        }
    }

    /// Entry side of the book for a fresh position.
    pub fn entry_price(&self, bid: f64, ask: f64) -> f64 {
        match self {
            Direction::Long => ask,
            Direction::Short => bid,
        }
    }

    /// Of two candidate stops, the one carrying less risk.
    pub fn tighter_stop(&self, a: f64, b: f64) -> f64 {
        match self {
            Direction::Long => a.max(b),
            Direction::Short => a.min(b),
        }
    }
}
