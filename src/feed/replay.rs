use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::feed::{PriceFeed, StrategyEvaluator};
use crate::models::{Bar, Signal, Tick, Timeframe};

#[derive(Default)]
struct ReplayState {
    bars: HashMap<String, Vec<Bar>>,
    ticks: HashMap<String, Tick>,
    signals: HashMap<(String, Timeframe), Vec<Signal>>,
    now: Option<DateTime<Utc>>,
}

/// Feed that replays pre-loaded bars. A cursor (`now`) controls which bars
/// are visible; explicitly pinned ticks take precedence over bar closes.
/// Queued signals are handed out once by `evaluate`.
#[derive(Default)]
pub struct ReplayFeed {
    state: RwLock<ReplayState>,
}

impl ReplayFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bars must be one-minute and may arrive in any order.
    pub async fn load_bars(&self, symbol: &str, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.open_time);
        self.state.write().await.bars.insert(symbol.to_string(), bars);
    }

    pub async fn set_tick(&self, symbol: &str, tick: Tick) {
        self.state.write().await.ticks.insert(symbol.to_string(), tick);
    }

    pub async fn clear_tick(&self, symbol: &str) {
        self.state.write().await.ticks.remove(symbol);
    }

    pub async fn queue_signals(&self, symbol: &str, timeframe: Timeframe, signals: Vec<Signal>) {
        self.state
            .write()
            .await
            .signals
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .extend(signals);
    }

    /// Advance the replay clock. Without a clock every loaded bar is visible.
    pub async fn set_time(&self, t: DateTime<Utc>) {
        self.state.write().await.now = Some(t);
    }

    fn visible<'a>(bars: &'a [Bar], now: Option<DateTime<Utc>>) -> &'a [Bar] {
        match now {
            Some(now) => &bars[..bars.partition_point(|b| b.open_time <= now)],
            None => bars,
        }
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    async fn current_tick(&self, symbol: &str) -> Result<Tick> {
        let state = self.state.read().await;
        if let Some(tick) = state.ticks.get(symbol) {
            return Ok(*tick);
        }
        let bars = state
            .bars
            .get(symbol)
            .with_context(|| format!("No data loaded for {}", symbol))?;
        Self::visible(bars, state.now)
            .last()
            .map(|b| Tick::flat(b.close))
            .with_context(|| format!("No price for {} at current time", symbol))
    }

    async fn historical_bars(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<Bar>> {
        let state = self.state.read().await;
        let bars = match state.bars.get(symbol) {
            Some(b) => Self::visible(b, state.now),
            None => return Ok(Vec::new()),
        };
        let start = bars.partition_point(|b| b.open_time < from);
        Ok(bars[start..].iter().take(count).cloned().collect())
    }
}

#[async_trait]
impl StrategyEvaluator for ReplayFeed {
    async fn evaluate(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Signal>> {
        Ok(self
            .state
            .write()
            .await
            .signals
            .remove(&(symbol.to_string(), timeframe))
            .unwrap_or_default())
    }
}
