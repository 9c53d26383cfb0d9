use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DaemonConfig};
use crate::error::TrackerError;
use crate::feed::{InstrumentTable, PriceFeed, StrategyEvaluator};
use crate::models::{ExitReason, Signal, Tick, Trade};
use crate::tracking::events::EventBus;
use crate::tracking::lifecycle::LifecycleEngine;
use crate::tracking::recovery::{RecoveryManager, RecoveryReport};
use crate::tracking::store::{DaemonState, TradeStore};
use crate::tracking::validator::{SignalValidator, ValidatorStats};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub evaluated: usize,
    pub accepted: usize,
    pub opened: usize,
    pub closed: usize,
    pub expired: usize,
    pub errors: usize,
}

/// Control side of a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    stop_tx: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
}

impl DaemonHandle {
    /// Ask the loop to stop. Takes effect at the next cycle boundary or
    /// immediately if the loop is sleeping.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct TrackerDaemon {
    cfg: DaemonConfig,
    store: Arc<TradeStore>,
    evaluator: Arc<dyn StrategyEvaluator>,
    feed: Arc<dyn PriceFeed>,
    engine: LifecycleEngine,
    validator: SignalValidator,
    bus: EventBus,
    state: DaemonState,
    stop_rx: watch::Receiver<bool>,
    running: Arc<AtomicBool>,
    consecutive_failures: u32,
}

impl TrackerDaemon {
    pub fn new(
        cfg: &Config,
        store: Arc<TradeStore>,
        evaluator: Arc<dyn StrategyEvaluator>,
        feed: Arc<dyn PriceFeed>,
        bus: EventBus,
    ) -> (Self, DaemonHandle) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(false));
        let state = store.load_state();

        info!("{}", "=".repeat(60));
        info!("Signal tracker starting up");
        info!(
            "Tracking {} symbol(s) on {} timeframe(s), cycle every {}s",
            cfg.daemon.symbols.len(),
            cfg.daemon.timeframes.len(),
            cfg.daemon.cycle_interval.as_secs()
        );
        info!(
            "Resuming at cycle {} ({} signals, {} closes so far)",
            state.total_cycles, state.total_signals, state.total_closes
        );
        info!("{}", "=".repeat(60));

        let daemon = Self {
            cfg: cfg.daemon.clone(),
            store,
            evaluator,
            feed,
            engine: LifecycleEngine::new(cfg.lifecycle.clone(), InstrumentTable::new()),
            validator: SignalValidator::new(cfg.validator.clone()),
            bus,
            state,
            stop_rx,
            running: running.clone(),
            consecutive_failures: 0,
        };
        let handle = DaemonHandle {
            stop_tx: Arc::new(stop_tx),
            running,
        };
        (daemon, handle)
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    pub fn validator_stats(&self) -> ValidatorStats {
        self.validator.stats()
    }

    fn stopping(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Recover downtime exits, then cycle until stopped.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let now = Utc::now();
        self.state.started_at = Some(now);
        self.state.running = true;
        if let Err(e) = self.store.save_state(&self.state) {
            warn!("Failed to save startup state: {}", e);
        }

        let report = self.recover(now).await;
        if !report.recovered.is_empty() {
            info!("Recovered {} trade(s) closed during downtime", report.recovered.len());
        }

        info!("Tracker loop running");
        while !self.stopping() {
            let result = self.run_cycle(Utc::now()).await;
            let wait = self.after_cycle(&result);
            self.pause(wait).await;
        }

        self.shutdown();
        Ok(())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Book a cycle result and return how long to wait before the next one.
    /// Past `max_consecutive_failures` the wait is `failure_backoff` and the
    /// failure count starts over.
    fn after_cycle(&mut self, result: &Result<CycleReport, TrackerError>) -> Duration {
        match result {
            Ok(report) => {
                self.consecutive_failures = 0;
                if report.opened > 0 || report.closed > 0 || report.expired > 0 {
                    info!(
                        "Cycle {}: {} opened, {} closed, {} expired",
                        report.cycle, report.opened, report.closed, report.expired
                    );
                } else {
                    debug!("Cycle {}: quiet", report.cycle);
                }
                self.cfg.cycle_interval
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!("Cycle error #{}: {}", self.consecutive_failures, e);
                if self.consecutive_failures > self.cfg.max_consecutive_failures {
                    error!(
                        "{} consecutive failures, backing off for {}s",
                        self.consecutive_failures,
                        self.cfg.failure_backoff.as_secs()
                    );
                    self.consecutive_failures = 0;
                    return self.cfg.failure_backoff;
                }
                self.cfg.cycle_interval
            }
        }
    }

    /// Sleep for `duration` unless a stop request arrives first.
    async fn pause(&mut self, duration: Duration) {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                changed = self.stop_rx.changed() => match changed {
                    Ok(()) if *self.stop_rx.borrow() => return,
                    Ok(()) => continue,
                    Err(_) => {
                        // Every handle is gone; nobody can stop us mid-sleep.
                        sleep.as_mut().await;
                        return;
                    }
                },
            }
        }
    }

    fn shutdown(&mut self) {
        self.state.running = false;
        if let Err(e) = self.store.save_state(&self.state) {
            error!("Final state save failed: {}", e);
        }
        self.running.store(false, Ordering::SeqCst);
        let fallbacks = self.engine.risk_fallbacks();
        if fallbacks > 0 {
            warn!("{} tick(s) ran on the fallback risk distance", fallbacks);
        }
        info!(
            "Tracker stopped after {} cycle(s); {} active trade(s) checkpointed",
            self.state.total_cycles,
            self.store.get_active_trades().len()
        );
    }

    pub async fn recover(&mut self, now: DateTime<Utc>) -> RecoveryReport {
        let report = RecoveryManager::new(
            &self.store,
            self.feed.as_ref(),
            &self.engine,
            &self.bus,
            self.cfg.recovery_bar_count,
        )
        .recover_after_restart(now)
        .await;
        self.state.total_closes += report.recovered.len() as u64;
        report
    }

    /// One pass: admit new signals, advance every active trade, periodic
    /// housekeeping, checkpoint. Individual failures are isolated; the cycle
    /// only fails when state cannot be saved or every collaborator call failed.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, TrackerError> {
        self.state.total_cycles += 1;
        self.state.last_cycle = Some(now);
        let mut report = CycleReport {
            cycle: self.state.total_cycles,
            ..Default::default()
        };
        let mut calls = Calls::default();

        self.open_signals(now, &mut report, &mut calls).await;
        self.track_active(now, &mut report, &mut calls).await;
        self.housekeeping(now, &mut report);

        self.store.save_state(&self.state)?;

        if calls.made > 0 && calls.failed == calls.made {
            return Err(TrackerError::Collaborator(anyhow!(
                "all {} collaborator calls failed",
                calls.made
            )));
        }
        Ok(report)
    }

    async fn open_signals(&mut self, now: DateTime<Utc>, report: &mut CycleReport, calls: &mut Calls) {
        let active: HashSet<String> = self
            .store
            .get_active_trades()
            .into_iter()
            .map(|t| t.strategy_id)
            .collect();
        let cooldown = chrono::Duration::from_std(self.cfg.signal_cooldown)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let max = self.cfg.max_signals_per_cycle;

        let mut candidates: Vec<Signal> = Vec::new();
        'scan: for symbol in &self.cfg.symbols {
            for tf in &self.cfg.timeframes {
                if candidates.len() >= max {
                    break 'scan;
                }
                calls.made += 1;
                let signals = match self.evaluator.evaluate(symbol, *tf).await {
                    Ok(signals) => signals,
                    Err(e) => {
                        calls.failed += 1;
                        warn!("Evaluator failed for {} {}: {}", symbol, tf, e);
                        continue;
                    }
                };
                for sig in signals {
                    if candidates.len() >= max {
                        break 'scan;
                    }
                    if active.contains(&sig.strategy_id)
                        || candidates.iter().any(|c| c.strategy_id == sig.strategy_id)
                    {
                        continue;
                    }
                    if let Some(last) = self.state.strategy_last_signal.get(&sig.strategy_id) {
                        if now - *last < cooldown {
                            debug!("{} still cooling down", sig.strategy_id);
                            continue;
                        }
                    }
                    candidates.push(sig);
                }
            }
        }

        report.evaluated = candidates.len();
        if candidates.is_empty() {
            return;
        }
        for sig in &candidates {
            self.state
                .strategy_last_signal
                .insert(sig.strategy_id.clone(), now);
        }

        let accepted = self.validator.validate_batch(candidates);
        report.accepted = accepted.len();
        if !accepted.is_empty() {
            info!("{} of {} signal(s) passed validation", accepted.len(), report.evaluated);
        }

        for sig in accepted {
            let trade = Trade::open(&sig, self.cfg.lot_size, now);
            match self.store.record_entry(trade) {
                Ok(Some(trade)) => {
                    self.bus.publish_open(&trade);
                    self.state.total_signals += 1;
                    report.opened += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to open trade for {}: {}", sig.strategy_id, e);
                    report.errors += 1;
                }
            }
        }
    }

    async fn track_active(&mut self, now: DateTime<Utc>, report: &mut CycleReport, calls: &mut Calls) {
        let active = self.store.get_active_trades();

        // One quote per symbol per cycle; None marks a symbol that failed.
        let mut quotes: HashMap<String, Option<Tick>> = HashMap::new();
        let mut open = Vec::with_capacity(active.len());

        for mut trade in active {
            let tick = match quotes.get(&trade.symbol) {
                Some(quote) => *quote,
                None => {
                    calls.made += 1;
                    let quote = match self.feed.current_tick(&trade.symbol).await {
                        Ok(tick) if tick.is_valid() => Some(tick),
                        Ok(tick) => {
                            warn!("Ignoring invalid quote for {}: {:?}", trade.symbol, tick);
                            None
                        }
                        Err(e) => {
                            calls.failed += 1;
                            warn!("No quote for {}: {}", trade.symbol, e);
                            None
                        }
                    };
                    quotes.insert(trade.symbol.clone(), quote);
                    quote
                }
            };
            let Some(tick) = tick else { continue };

            let current = trade.direction.entry_price(tick.bid, tick.ask);
            let out = self
                .engine
                .process_tick(&mut trade, current, tick.bid, tick.ask, now);
            for event in &out.events {
                self.bus.publish(&trade, event);
            }

            if let (true, Some(price), Some(reason)) = (out.closed, out.exit_price, out.exit_reason) {
                self.engine.finalize(&mut trade, price, reason, now);
                match self.store.close_trade(&trade) {
                    Ok(()) => {
                        self.bus.publish_close(&trade);
                        self.state.total_closes += 1;
                        report.closed += 1;
                    }
                    Err(e) => {
                        error!("Failed to archive {}: {}", trade.id, e);
                        report.errors += 1;
                    }
                }
                continue;
            }
            open.push(trade);
        }

        if let Err(e) = self.store.apply_updates(&open) {
            error!("Failed to checkpoint active trades: {}", e);
            report.errors += 1;
        }
    }

    fn housekeeping(&mut self, now: DateTime<Utc>, report: &mut CycleReport) {
        let cycle = self.state.total_cycles;

        if self.cfg.expire_every_cycles > 0 && cycle % self.cfg.expire_every_cycles == 0 {
            match self
                .store
                .expire_stale(self.cfg.max_trade_age_hours, now, self.engine.instruments())
            {
                Ok(expired) => {
                    for trade in &expired {
                        self.bus.publish_close(trade);
                    }
                    self.state.total_closes += expired.len() as u64;
                    report.expired = expired.len();
                }
                Err(e) => {
                    error!("Expiry pass failed: {}", e);
                    report.errors += 1;
                }
            }
        }

        if self.cfg.cleanup_every_cycles > 0 && cycle % self.cfg.cleanup_every_cycles == 0 {
            if let Err(e) = self.store.cleanup_storage() {
                error!("Storage cleanup failed: {}", e);
                report.errors += 1;
            }
        }
    }

    /// Close an active trade by hand at `price`.
    pub fn manual_exit(
        &mut self,
        trade_id: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<Trade, TrackerError> {
        let symbol = self
            .store
            .get_active_trades()
            .into_iter()
            .find(|t| t.id == trade_id)
            .map(|t| t.symbol)
            .ok_or_else(|| TrackerError::NotFound(trade_id.to_string()))?;
        let spec = self.engine.instruments().spec(&symbol);
        let trade = self
            .store
            .record_exit(trade_id, price, ExitReason::Manual, spec.pip_size, spec.tick_value, now)?
            .ok_or_else(|| TrackerError::NotFound(trade_id.to_string()))?;
        self.bus.publish_close(&trade);
        self.state.total_closes += 1;
        self.store.save_state(&self.state)?;
        Ok(trade)
    }
}

#[derive(Default)]
struct Calls {
    made: usize,
    failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::feed::ReplayFeed;
    use crate::models::{Bar, Direction, Stage, Timeframe, TradeStatus};
    use crate::test_helpers::{default_test_config, make_signal, t0};
    use crate::tracking::persistence::MemoryStore;
    use crate::tracking::store::StrategyRecord;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    fn build(cfg: &Config, feed: Arc<ReplayFeed>) -> (TrackerDaemon, DaemonHandle, Arc<TradeStore>) {
        let store = Arc::new(TradeStore::new(Arc::new(MemoryStore::new()), StoreConfig::default()));
        let (daemon, handle) = TrackerDaemon::new(cfg, store.clone(), feed.clone(), feed, EventBus::new());
        (daemon, handle, store)
    }

    fn long_signal(id: &str) -> Signal {
        make_signal(id, "US30", Direction::Long, 100.0, 90.0, &[120.0])
    }

    #[tokio::test]
    async fn opens_tracks_and_closes() {
        let feed = Arc::new(ReplayFeed::new());
        let (mut daemon, _handle, store) = build(&default_test_config(), feed.clone());

        feed.queue_signals("US30", Timeframe::H1, vec![long_signal("s1")]).await;
        feed.set_tick("US30", Tick::new(100.0, 100.0)).await;
        let report = daemon.run_cycle(t0()).await.unwrap();
        assert_eq!(report.opened, 1);
        assert_eq!(store.get_active_trades().len(), 1);

        feed.set_tick("US30", Tick::new(121.0, 121.0)).await;
        let report = daemon.run_cycle(t0() + ChronoDuration::minutes(1)).await.unwrap();
        assert_eq!(report.closed, 1);
        assert!(store.get_active_trades().is_empty());

        let history = store.load_records("s1").trades;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].exit_reason, Some(ExitReason::Tp));
        assert_eq!(history[0].exit_price, Some(120.0));
        assert_eq!(history[0].status, TradeStatus::Closed);

        let state = store.load_state();
        assert_eq!(state.total_cycles, 2);
        assert_eq!(state.total_signals, 1);
        assert_eq!(state.total_closes, 1);
    }

    #[tokio::test]
    async fn cooldown_and_active_strategy_block_new_signals() {
        let feed = Arc::new(ReplayFeed::new());
        let (mut daemon, _handle, store) = build(&default_test_config(), feed.clone());
        feed.set_tick("US30", Tick::new(100.0, 100.0)).await;

        feed.queue_signals("US30", Timeframe::H1, vec![long_signal("s1")]).await;
        daemon.run_cycle(t0()).await.unwrap();

        // Still active.
        feed.queue_signals("US30", Timeframe::H1, vec![long_signal("s1")]).await;
        let report = daemon.run_cycle(t0() + ChronoDuration::minutes(1)).await.unwrap();
        assert_eq!(report.evaluated, 0);

        let id = store.get_active_trades()[0].id.clone();
        daemon.manual_exit(&id, 101.0, t0() + ChronoDuration::minutes(2)).unwrap();

        // Closed but inside the cooldown window.
        feed.queue_signals("US30", Timeframe::H1, vec![long_signal("s1")]).await;
        let report = daemon.run_cycle(t0() + ChronoDuration::minutes(3)).await.unwrap();
        assert_eq!(report.evaluated, 0);

        feed.queue_signals("US30", Timeframe::H1, vec![long_signal("s1")]).await;
        let report = daemon.run_cycle(t0() + ChronoDuration::hours(2)).await.unwrap();
        assert_eq!(report.opened, 1);
    }

    #[tokio::test]
    async fn rejected_signal_is_not_opened() {
        let feed = Arc::new(ReplayFeed::new());
        let (mut daemon, _handle, store) = build(&default_test_config(), feed.clone());
        feed.queue_signals(
            "US30",
            Timeframe::H1,
            vec![make_signal("bad", "US30", Direction::Long, 1.1000, 1.1010, &[1.1005])],
        )
        .await;

        let report = daemon.run_cycle(t0()).await.unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.accepted, 0);
        assert!(store.get_active_trades().is_empty());
        assert_eq!(daemon.validator_stats().by_reason["sl_wrong_side"], 1);
    }

    #[tokio::test]
    async fn manual_exit_and_unknown_id() {
        let feed = Arc::new(ReplayFeed::new());
        let (mut daemon, _handle, store) = build(&default_test_config(), feed.clone());
        feed.set_tick("US30", Tick::new(100.0, 100.0)).await;
        feed.queue_signals("US30", Timeframe::H1, vec![long_signal("s1")]).await;
        daemon.run_cycle(t0()).await.unwrap();

        let id = store.get_active_trades()[0].id.clone();
        let closed = daemon.manual_exit(&id, 95.0, t0() + ChronoDuration::minutes(5)).unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::Manual));
        assert_eq!(closed.current_stage, Stage::ClosedManual);

        assert!(matches!(
            daemon.manual_exit("nope", 1.0, t0()),
            Err(TrackerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stale_trades_expire_on_schedule() {
        let mut cfg = default_test_config();
        cfg.daemon.expire_every_cycles = 2;
        cfg.daemon.max_trade_age_hours = 1.0;
        let feed = Arc::new(ReplayFeed::new());
        let (mut daemon, _handle, store) = build(&cfg, feed.clone());
        feed.set_tick("US30", Tick::new(101.0, 101.0)).await;
        feed.queue_signals("US30", Timeframe::H1, vec![long_signal("s1")]).await;

        daemon.run_cycle(t0()).await.unwrap();
        let report = daemon.run_cycle(t0() + ChronoDuration::hours(2)).await.unwrap();
        assert_eq!(report.expired, 1);
        assert!(store.get_active_trades().is_empty());
        assert_eq!(
            store.load_records("s1").trades[0].exit_reason,
            Some(ExitReason::Expired)
        );
    }

    struct DownEvaluator;

    #[async_trait]
    impl StrategyEvaluator for DownEvaluator {
        async fn evaluate(&self, _symbol: &str, _tf: Timeframe) -> anyhow::Result<Vec<Signal>> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn cycle_fails_when_every_call_fails() {
        let cfg = default_test_config();
        let store = Arc::new(TradeStore::new(Arc::new(MemoryStore::new()), StoreConfig::default()));
        let (mut daemon, _handle) = TrackerDaemon::new(
            &cfg,
            store.clone(),
            Arc::new(DownEvaluator),
            Arc::new(ReplayFeed::new()),
            EventBus::new(),
        );
        let err = daemon.run_cycle(t0()).await.unwrap_err();
        assert!(matches!(err, TrackerError::Collaborator(_)));
        // The cycle is still checkpointed.
        assert_eq!(store.load_state().total_cycles, 1);
    }

    /// Evaluator that can be switched off and on between cycles.
    #[derive(Default)]
    struct SwitchEvaluator {
        down: AtomicBool,
    }

    #[async_trait]
    impl StrategyEvaluator for SwitchEvaluator {
        async fn evaluate(&self, _symbol: &str, _tf: Timeframe) -> anyhow::Result<Vec<Signal>> {
            if self.down.load(Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn repeated_failures_trigger_backoff_and_success_resets() {
        let mut cfg = default_test_config();
        cfg.daemon.max_consecutive_failures = 2;
        cfg.daemon.cycle_interval = std::time::Duration::from_secs(30);
        cfg.daemon.failure_backoff = std::time::Duration::from_secs(300);
        let evaluator = Arc::new(SwitchEvaluator::default());
        let store = Arc::new(TradeStore::new(Arc::new(MemoryStore::new()), StoreConfig::default()));
        let (mut daemon, _handle) = TrackerDaemon::new(
            &cfg,
            store,
            evaluator.clone(),
            Arc::new(ReplayFeed::new()),
            EventBus::new(),
        );

        evaluator.down.store(true, Ordering::SeqCst);
        let mut waits = Vec::new();
        let mut counts = Vec::new();
        for i in 0..3 {
            let result = daemon.run_cycle(t0() + ChronoDuration::minutes(i)).await;
            assert!(result.is_err());
            waits.push(daemon.after_cycle(&result).as_secs());
            counts.push(daemon.consecutive_failures());
        }
        assert_eq!(waits, vec![30, 30, 300]);
        assert_eq!(counts, vec![1, 2, 0]);

        let result = daemon.run_cycle(t0() + ChronoDuration::minutes(5)).await;
        daemon.after_cycle(&result);
        assert_eq!(daemon.consecutive_failures(), 1);

        evaluator.down.store(false, Ordering::SeqCst);
        let result = daemon.run_cycle(t0() + ChronoDuration::minutes(6)).await;
        assert!(result.is_ok());
        assert_eq!(daemon.after_cycle(&result).as_secs(), 30);
        assert_eq!(daemon.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn storage_cleanup_runs_on_its_cycle() {
        let mut cfg = default_test_config();
        cfg.daemon.cleanup_every_cycles = 3;
        let store = Arc::new(TradeStore::new(
            Arc::new(MemoryStore::new()),
            StoreConfig {
                max_trades_per_record: 2,
                ..StoreConfig::default()
            },
        ));
        let feed = Arc::new(ReplayFeed::new());
        let (mut daemon, _handle) =
            TrackerDaemon::new(&cfg, store.clone(), feed.clone(), feed, EventBus::new());

        let oversized = StrategyRecord {
            strategy_id: "big".to_string(),
            trades: (0..5)
                .map(|i| {
                    let mut t = Trade::open(&long_signal("big"), 1.0, t0());
                    t.id = format!("big-{}", i);
                    t
                })
                .collect(),
        };
        store.save_records(&oversized).unwrap();

        for i in 0..2 {
            daemon.run_cycle(t0() + ChronoDuration::minutes(i)).await.unwrap();
            assert_eq!(store.load_records("big").trades.len(), 5);
        }
        daemon.run_cycle(t0() + ChronoDuration::minutes(2)).await.unwrap();
        assert_eq!(store.load_records("big").trades.len(), 2);
    }

    #[tokio::test]
    async fn stop_handle_ends_the_loop() {
        let mut cfg = default_test_config();
        cfg.daemon.cycle_interval = std::time::Duration::from_secs(3600);
        let feed = Arc::new(ReplayFeed::new());
        feed.load_bars(
            "US30",
            vec![Bar {
                open_time: t0(),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
            }],
        )
        .await;
        let (mut daemon, handle, store) = build(&cfg, feed);

        let task = tokio::spawn(async move { daemon.run().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(handle.is_running());

        handle.stop();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("daemon did not stop")
            .unwrap()
            .unwrap();
        assert!(!handle.is_running());
        let state = store.load_state();
        assert!(!state.running);
        assert!(state.started_at.is_some());
        assert!(state.total_cycles >= 1);
    }
}
