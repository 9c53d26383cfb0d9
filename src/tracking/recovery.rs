use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::feed::PriceFeed;
use crate::models::{Direction, Stage, Tick, Trade};
use crate::tracking::events::EventBus;
use crate::tracking::lifecycle::LifecycleEngine;
use crate::tracking::store::TradeStore;

#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub checked: usize,
    /// Trades found closed while the process was down.
    pub recovered: Vec<Trade>,
    /// Trades still open whose state advanced during replay.
    pub updated: usize,
    pub failed_symbols: Vec<String>,
}

/// Replays one-minute history over trades that were active when the process
/// stopped, so exits that happened during downtime are booked at the level
/// that was hit.
pub struct RecoveryManager<'a> {
    store: &'a TradeStore,
    feed: &'a dyn PriceFeed,
    engine: &'a LifecycleEngine,
    bus: &'a EventBus,
    bar_count: usize,
}

impl<'a> RecoveryManager<'a> {
    pub fn new(
        store: &'a TradeStore,
        feed: &'a dyn PriceFeed,
        engine: &'a LifecycleEngine,
        bus: &'a EventBus,
        bar_count: usize,
    ) -> Self {
        Self {
            store,
            feed,
            engine,
            bus,
            bar_count,
        }
    }

    pub async fn recover_after_restart(&self, now: DateTime<Utc>) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let active = self.store.get_active_trades();
        if active.is_empty() {
            return report;
        }
        info!("Recovery: checking {} active trade(s)", active.len());

        let mut updated = Vec::new();
        for trade in active {
            report.checked += 1;
            let bars = match self
                .feed
                .historical_bars(&trade.symbol, trade.opened_at, self.bar_count)
                .await
            {
                Ok(bars) => bars,
                Err(e) => {
                    warn!("Recovery: no history for {} ({}): {}", trade.symbol, trade.id, e);
                    if !report.failed_symbols.contains(&trade.symbol) {
                        report.failed_symbols.push(trade.symbol.clone());
                    }
                    continue;
                }
            };

            let mut trade = trade;
            match self.replay(&mut trade, &bars, now) {
                Replay::Closed => {
                    if let Err(e) = self.store.close_trade(&trade) {
                        error!("Recovery: failed to archive {}: {}", trade.id, e);
                        continue;
                    }
                    self.bus.publish_close(&trade);
                    report.recovered.push(trade);
                }
                Replay::Advanced => updated.push(trade),
                Replay::Unchanged => {}
            }
        }

        if !updated.is_empty() {
            report.updated = updated.len();
            if let Err(e) = self.store.apply_updates(&updated) {
                error!("Recovery: failed to save replayed trades: {}", e);
            }
        }

        info!(
            "Recovery done: {} checked, {} closed, {} advanced, {} symbol(s) failed",
            report.checked,
            report.recovered.len(),
            report.updated,
            report.failed_symbols.len()
        );
        report
    }

    fn replay(&self, trade: &mut Trade, bars: &[crate::models::Bar], now: DateTime<Utc>) -> Replay {
        let mut changed = false;
        for bar in bars {
            // Adverse extreme first so a bar that spans both levels books the stop.
            let path = match trade.direction {
                Direction::Long => [bar.low, bar.high],
                Direction::Short => [bar.high, bar.low],
            };
            for price in path {
                let tick = Tick::flat(price);
                let out = self
                    .engine
                    .process_tick(trade, price, tick.bid, tick.ask, bar.open_time);
                for event in &out.events {
                    self.bus.publish(trade, event);
                }
                changed |= out.changed;

                if let (true, Some(exit), Some(reason)) = (out.closed, out.exit_price, out.exit_reason) {
                    let reason = reason.recovered();
                    self.engine.finalize(trade, exit, reason, bar.open_time);
                    let event = self.engine.record_event(
                        trade,
                        Stage::Recovery,
                        exit,
                        format!("Recovered exit ({}) from bar at {}, checked {}", reason, bar.open_time, now),
                        bar.open_time,
                    );
                    self.bus.publish(trade, &event);
                    return Replay::Closed;
                }
            }
        }
        if changed {
            Replay::Advanced
        } else {
            Replay::Unchanged
        }
    }
}

enum Replay {
    Closed,
    Advanced,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LifecycleConfig, StoreConfig};
    use crate::feed::{InstrumentTable, ReplayFeed};
    use crate::models::{ExitReason, TradeStatus};
    use crate::test_helpers::{make_bars, make_trade, t0};
    use crate::tracking::persistence::MemoryStore;
    use std::sync::Arc;

    fn setup() -> (TradeStore, LifecycleEngine, EventBus) {
        (
            TradeStore::new(Arc::new(MemoryStore::new()), StoreConfig::default()),
            LifecycleEngine::new(LifecycleConfig::default(), InstrumentTable::new()),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn stop_recovered_at_level_not_bar_low() {
        let (store, engine, bus) = setup();
        store
            .record_entry(make_trade("s1", Direction::Long, 100.0, 90.0, &[110.0]))
            .unwrap();
        let feed = ReplayFeed::new();
        feed.load_bars(
            "US30",
            make_bars(&[(100.0, 102.0, 98.0, 101.0), (101.0, 103.0, 85.0, 88.0), (88.0, 115.0, 87.0, 112.0)]),
        )
        .await;

        let mgr = RecoveryManager::new(&store, &feed, &engine, &bus, 10_000);
        let report = mgr.recover_after_restart(t0()).await;

        assert_eq!(report.recovered.len(), 1);
        let closed = &report.recovered[0];
        assert_eq!(closed.status, TradeStatus::Closed);
        assert_eq!(closed.exit_reason, Some(ExitReason::SlRecovery));
        assert_eq!(closed.exit_price, Some(90.0));
        assert_eq!(closed.events.last().unwrap().stage, Stage::Recovery);
        assert!(store.get_active_trades().is_empty());
        assert_eq!(store.load_records("s1").trades.len(), 1);
    }

    #[tokio::test]
    async fn target_recovered_for_short() {
        let (store, engine, bus) = setup();
        store
            .record_entry(make_trade("s1", Direction::Short, 100.0, 110.0, &[80.0]))
            .unwrap();
        let feed = ReplayFeed::new();
        feed.load_bars("US30", make_bars(&[(100.0, 104.0, 95.0, 96.0), (96.0, 97.0, 78.0, 79.0)]))
            .await;

        let report = RecoveryManager::new(&store, &feed, &engine, &bus, 10_000)
            .recover_after_restart(t0())
            .await;
        let closed = &report.recovered[0];
        assert_eq!(closed.exit_reason, Some(ExitReason::TpRecovery));
        assert_eq!(closed.exit_price, Some(80.0));
    }

    #[tokio::test]
    async fn missing_history_is_isolated() {
        let (store, engine, bus) = setup();
        let mut other = make_trade("s2", Direction::Long, 100.0, 90.0, &[120.0]);
        other.symbol = "EURUSD".to_string();
        store.record_entry(other).unwrap();
        store
            .record_entry(make_trade("s1", Direction::Long, 100.0, 90.0, &[120.0]))
            .unwrap();

        struct FailingFeed;
        #[async_trait::async_trait]
        impl PriceFeed for FailingFeed {
            async fn current_tick(&self, _symbol: &str) -> anyhow::Result<Tick> {
                anyhow::bail!("offline")
            }
            async fn historical_bars(
                &self,
                symbol: &str,
                _from: DateTime<Utc>,
                _count: usize,
            ) -> anyhow::Result<Vec<crate::models::Bar>> {
                if symbol == "EURUSD" {
                    anyhow::bail!("offline")
                }
                Ok(make_bars(&[(100.0, 104.0, 99.0, 103.0)]))
            }
        }

        let report = RecoveryManager::new(&store, &FailingFeed, &engine, &bus, 10_000)
            .recover_after_restart(t0())
            .await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.failed_symbols, vec!["EURUSD".to_string()]);
        assert!(report.recovered.is_empty());
        assert_eq!(report.updated, 1);
        assert_eq!(store.get_active_trades().len(), 2);
    }
}
