pub mod http;
pub mod instruments;
pub mod replay;

pub use http::HttpFeed;
pub use instruments::{InstrumentSpec, InstrumentTable};
pub use replay::ReplayFeed;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Bar, Signal, Tick, Timeframe};

/// Market data source. Implementations must be callable from the daemon
/// loop and the broadcaster tasks at the same time.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn current_tick(&self, symbol: &str) -> Result<Tick>;

    /// One-minute bars starting at `from`, oldest first.
    async fn historical_bars(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<Bar>>;
}

#[async_trait]
pub trait StrategyEvaluator: Send + Sync {
    async fn evaluate(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Signal>>;
}
