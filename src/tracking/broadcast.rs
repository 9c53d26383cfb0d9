//! Live broadcaster
//!
//! Streams quotes for symbols with active trades plus a periodic tracker
//! snapshot to any number of subscribers. Runs beside the daemon and only
//! reads from the store.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BroadcastConfig;
use crate::feed::PriceFeed;
use crate::models::{Direction, Stage, Tick, Trade};
use crate::tracking::daemon::DaemonHandle;
use crate::tracking::store::{TrackerStatus, TradeStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveSummary {
    pub id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub current_price: f64,
    pub current_pnl_pips: f64,
    pub current_pnl_usd: f64,
    pub current_stage: Stage,
}

impl From<&Trade> for ActiveSummary {
    fn from(t: &Trade) -> Self {
        Self {
            id: t.id.clone(),
            strategy_id: t.strategy_id.clone(),
            symbol: t.symbol.clone(),
            direction: t.direction,
            entry_price: t.entry_price,
            stop_loss: t.stop_loss,
            current_price: t.current_price,
            current_pnl_pips: t.current_pnl_pips,
            current_pnl_usd: t.current_pnl_usd,
            current_stage: t.current_stage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveMessage {
    Price {
        symbol: String,
        bid: f64,
        ask: f64,
        spread: f64,
        time: DateTime<Utc>,
    },
    Analysis {
        time: DateTime<Utc>,
        status: TrackerStatus,
        active: Vec<ActiveSummary>,
    },
}

#[derive(Debug, Clone, Copy)]
struct CachedTick {
    tick: Tick,
    at: DateTime<Utc>,
}

/// Recent quotes per symbol, bounded by count and age.
pub struct TickCache {
    ticks: HashMap<String, VecDeque<CachedTick>>,
    max_per_symbol: usize,
    max_age: ChronoDuration,
}

impl TickCache {
    pub fn new(max_per_symbol: usize, max_age: std::time::Duration) -> Self {
        Self {
            ticks: HashMap::new(),
            max_per_symbol: max_per_symbol.max(1),
            max_age: ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::minutes(10)),
        }
    }

    pub fn push(&mut self, symbol: &str, tick: Tick, at: DateTime<Utc>) {
        let entries = self.ticks.entry(symbol.to_string()).or_default();
        entries.push_back(CachedTick { tick, at });
        while entries.len() > self.max_per_symbol {
            entries.pop_front();
        }
    }

    pub fn latest(&self, symbol: &str) -> Option<Tick> {
        self.ticks.get(symbol).and_then(|e| e.back()).map(|c| c.tick)
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.ticks.get(symbol).map(|e| e.len()).unwrap_or(0)
    }

    /// Drop entries older than the age limit and forget empty symbols.
    /// Returns the number of ticks removed.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.max_age;
        let mut removed = 0;
        for entries in self.ticks.values_mut() {
            let before = entries.len();
            entries.retain(|c| c.at >= cutoff);
            removed += before - entries.len();
        }
        self.ticks.retain(|_, e| !e.is_empty());
        removed
    }

    /// (symbols, ticks)
    pub fn stats(&self) -> (usize, usize) {
        (self.ticks.len(), self.ticks.values().map(|e| e.len()).sum())
    }
}

pub struct LiveBroadcaster {
    cfg: BroadcastConfig,
    store: Arc<TradeStore>,
    feed: Arc<dyn PriceFeed>,
    daemon: Option<DaemonHandle>,
    tx: broadcast::Sender<String>,
    stop_tx: watch::Sender<bool>,
    cache: Mutex<TickCache>,
}

impl LiveBroadcaster {
    pub fn new(cfg: BroadcastConfig, store: Arc<TradeStore>, feed: Arc<dyn PriceFeed>) -> Self {
        let (tx, _) = broadcast::channel(cfg.channel_capacity.max(1));
        let (stop_tx, _) = watch::channel(false);
        let cache = Mutex::new(TickCache::new(cfg.max_ticks_per_symbol, cfg.cache_max_age));
        Self {
            cfg,
            store,
            feed,
            daemon: None,
            tx,
            stop_tx,
            cache,
        }
    }

    /// Report the daemon's liveness in analysis snapshots.
    pub fn with_daemon(mut self, handle: DaemonHandle) -> Self {
        self.daemon = Some(handle);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn cache(&self) -> MutexGuard<'_, TickCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn latest_tick(&self, symbol: &str) -> Option<Tick> {
        self.cache().latest(symbol)
    }

    pub fn cache_stats(&self) -> (usize, usize) {
        self.cache().stats()
    }

    fn send(&self, msg: &LiveMessage) {
        match serde_json::to_string(msg) {
            // No receivers is fine.
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => warn!("Failed to encode live message: {}", e),
        }
    }

    /// Quote every symbol that has an active trade. Returns how many
    /// symbols were broadcast.
    pub async fn broadcast_prices(&self) -> usize {
        let symbols: BTreeSet<String> = self
            .store
            .get_active_trades()
            .into_iter()
            .map(|t| t.symbol)
            .collect();

        let mut sent = 0;
        for symbol in symbols {
            let tick = match self.feed.current_tick(&symbol).await {
                Ok(tick) if tick.is_valid() => tick,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Live quote for {} unavailable: {}", symbol, e);
                    continue;
                }
            };
            let now = Utc::now();
            self.cache().push(&symbol, tick, now);
            self.send(&LiveMessage::Price {
                symbol,
                bid: tick.bid,
                ask: tick.ask,
                spread: tick.spread(),
                time: now,
            });
            sent += 1;
        }
        sent
    }

    pub fn broadcast_analysis(&self) {
        let running = self.daemon.as_ref().is_some_and(|h| h.is_running());
        let active = self.store.get_active_trades();
        self.send(&LiveMessage::Analysis {
            time: Utc::now(),
            status: self.store.tracker_status(running),
            active: active.iter().map(ActiveSummary::from).collect(),
        });
    }

    pub fn cleanup_cache(&self, now: DateTime<Utc>) -> usize {
        let mut cache = self.cache();
        let removed = cache.cleanup(now);
        let (symbols, ticks) = cache.stats();
        info!(
            "Cache cleanup: removed {} tick(s), {} left across {} symbol(s)",
            removed, ticks, symbols
        );
        removed
    }

    /// Spawn the price, analysis and cache cleanup loops.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        if !self.cfg.enabled {
            info!("Live broadcaster disabled");
            return Vec::new();
        }
        info!(
            "Live broadcaster started (prices every {}s, analysis every {}s)",
            self.cfg.price_interval.as_secs(),
            self.cfg.analysis_interval.as_secs()
        );

        let price = {
            let this = self.clone();
            let mut stop = self.stop_tx.subscribe();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(this.cfg.price_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => { this.broadcast_prices().await; }
                        _ = stop.changed() => break,
                    }
                }
            })
        };

        let analysis = {
            let this = self.clone();
            let mut stop = self.stop_tx.subscribe();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(this.cfg.analysis_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => this.broadcast_analysis(),
                        _ = stop.changed() => break,
                    }
                }
            })
        };

        let cleanup = {
            let this = self.clone();
            let mut stop = self.stop_tx.subscribe();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(this.cfg.cleanup_interval);
                // The first tick fires immediately; nothing to clean yet.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => { this.cleanup_cache(Utc::now()); }
                        _ = stop.changed() => break,
                    }
                }
            })
        };

        vec![price, analysis, cleanup]
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
