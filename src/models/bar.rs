use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Historical bar as returned by the price feed. Only the extremes matter
/// for replay; open/close are carried for completeness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    #[serde(default)]
    pub open: f64,
    pub high: f64,
    pub low: f64,
    #[serde(default)]
    pub close: f64,
}

impl Bar {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Top of book for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
}

impl Tick {
    pub fn new(bid: f64, ask: f64) -> Self {
        Self { bid, ask }
    }

    /// A zero-spread tick, used when replaying bar extremes.
    pub fn flat(price: f64) -> Self {
        Self {
            bid: price,
            ask: price,
        }
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn is_valid(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.bid.is_finite() && self.ask.is_finite()
    }
}
