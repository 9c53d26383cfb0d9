use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::feed::InstrumentTable;
use crate::models::{ExitReason, Stage, Trade, TradeEvent};
use crate::tracking::persistence::Persistence;
use crate::tracking::stats::{compute_strategy_stats, StrategyStats};

pub const ACTIVE_KEY: &str = "active_tracks.json";
pub const STATE_KEY: &str = "tracker_state.json";
pub const RECORD_PREFIX: &str = "rec_";
const MAX_KEY_ID_LEN: usize = 60;
const DEFAULT_EVENT_CAP: usize = 30;

/// Closed history of one strategy, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    #[serde(default)]
    pub strategy_id: String,
    #[serde(default)]
    pub trades: Vec<Trade>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    #[serde(default)]
    pub last_cycle: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_cycles: u64,
    #[serde(default)]
    pub total_signals: u64,
    #[serde(default)]
    pub total_closes: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub strategy_last_signal: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub trimmed: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerStatus {
    pub running: bool,
    pub active_trades: usize,
    pub active_by_symbol: BTreeMap<String, usize>,
    pub strategies_tracked: usize,
    pub total_cycles: u64,
    pub total_signals: u64,
    pub total_closes: u64,
    pub last_cycle: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Record file name for a strategy id: separators flattened, length bounded.
pub fn record_key(strategy_id: &str) -> String {
    let safe: String = strategy_id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .take(MAX_KEY_ID_LEN)
        .collect();
    format!("{}{}.json", RECORD_PREFIX, safe)
}

/// Trade persistence over three buckets: per-strategy history, the active
/// set and the daemon counters. Every read-modify-write of the active set
/// runs under one lock.
pub struct TradeStore {
    backend: Arc<dyn Persistence>,
    cfg: StoreConfig,
    event_cap: usize,
    active_lock: Mutex<()>,
}

impl TradeStore {
    pub fn new(backend: Arc<dyn Persistence>, cfg: StoreConfig) -> Self {
        Self {
            backend,
            cfg,
            event_cap: DEFAULT_EVENT_CAP,
            active_lock: Mutex::new(()),
        }
    }

    pub fn with_event_cap(mut self, cap: usize) -> Self {
        self.event_cap = cap;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.cfg
    }

    fn lock_active(&self) -> MutexGuard<'_, ()> {
        self.active_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn decode<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let raw = match self.backend.load(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(e) => {
                error!("Failed to read {}: {}", key, e);
                return T::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                let err = StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                };
                error!("{}; treating as empty", err);
                T::default()
            }
        }
    }

    fn encode<T: Serialize>(&self, key: &str, doc: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(doc).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.backend.save(key, &json)
    }

    // ---- buckets ----

    pub fn load_records(&self, strategy_id: &str) -> StrategyRecord {
        let mut record: StrategyRecord = self.decode(&record_key(strategy_id));
        if record.strategy_id.is_empty() {
            record.strategy_id = strategy_id.to_string();
        }
        record
    }

    pub fn save_records(&self, record: &StrategyRecord) -> Result<(), StoreError> {
        self.encode(&record_key(&record.strategy_id), record)
    }

    pub fn load_active(&self) -> Vec<Trade> {
        self.decode(ACTIVE_KEY)
    }

    pub fn save_active(&self, trades: &[Trade]) -> Result<(), StoreError> {
        self.encode(ACTIVE_KEY, &trades)
    }

    pub fn load_state(&self) -> DaemonState {
        self.decode(STATE_KEY)
    }

    pub fn save_state(&self, state: &DaemonState) -> Result<(), StoreError> {
        self.encode(STATE_KEY, state)
    }

    // ---- active set ----

    /// Admit a new trade. Returns `None` when the strategy already holds an
    /// active trade or a capacity limit is reached.
    pub fn record_entry(&self, mut trade: Trade) -> Result<Option<Trade>, StoreError> {
        let _guard = self.lock_active();
        let mut active = self.load_active();

        if active.iter().any(|t| t.strategy_id == trade.strategy_id) {
            debug!("Strategy {} already has an active trade", trade.strategy_id);
            return Ok(None);
        }
        if active.len() >= self.cfg.max_active_trades {
            warn!(
                "Active trade cap ({}) reached, skipping {}",
                self.cfg.max_active_trades, trade.strategy_id
            );
            return Ok(None);
        }
        let on_symbol = active.iter().filter(|t| t.symbol == trade.symbol).count();
        if on_symbol >= self.cfg.max_per_symbol {
            debug!(
                "Symbol cap ({}) reached on {}, skipping {}",
                self.cfg.max_per_symbol, trade.symbol, trade.strategy_id
            );
            return Ok(None);
        }

        let base = trade.id.clone();
        let mut n = 1;
        while active.iter().any(|t| t.id == trade.id) {
            trade.id = format!("{}_{}", base, n);
            n += 1;
        }

        active.push(trade.clone());
        self.save_active(&active)?;
        info!(
            "Opened {} {} {} @ {} [{}]",
            trade.id, trade.direction, trade.symbol, trade.entry_price, trade.strategy_id
        );
        Ok(Some(trade))
    }

    /// Close an active trade by id at `price` and archive it.
    pub fn record_exit(
        &self,
        trade_id: &str,
        price: f64,
        reason: ExitReason,
        pip: f64,
        tick_value: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Trade>, StoreError> {
        let Some(mut trade) = self.load_active().into_iter().find(|t| t.id == trade_id) else {
            return Ok(None);
        };
        trade.finalize(price, reason, now, pip, tick_value);
        trade.push_event(
            TradeEvent::new(now, reason.closing_stage(), price, format!("Closed ({}) @ {}", reason, price)),
            self.event_cap,
        );
        self.close_trade(&trade)?;
        Ok(Some(trade))
    }

    /// Archive an already finalized trade and drop it from the active set.
    /// Archiving is keyed by trade id, so a retry after a partial failure
    /// does not duplicate history.
    pub fn close_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        self.archive(trade)?;

        let _guard = self.lock_active();
        let mut active = self.load_active();
        let before = active.len();
        active.retain(|t| t.id != trade.id);
        if active.len() != before {
            self.save_active(&active)?;
        }
        info!(
            "Closed {} {} @ {} ({}) pnl {:.2}$",
            trade.id,
            trade.symbol,
            trade.exit_price.unwrap_or(trade.current_price),
            trade.exit_reason.map(|r| r.as_str()).unwrap_or("unknown"),
            trade.pnl_usd
        );
        Ok(())
    }

    fn archive(&self, trade: &Trade) -> Result<(), StoreError> {
        let mut record = self.load_records(&trade.strategy_id);
        record.trades.retain(|t| t.id != trade.id);
        record.trades.insert(0, trade.clone());
        record.trades.truncate(self.cfg.max_trades_per_record);
        self.save_records(&record)
    }

    /// Append an event to an active trade. Returns false if the id is unknown.
    pub fn record_event(
        &self,
        trade_id: &str,
        stage: Stage,
        price: f64,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let cap = self.event_cap;
        self.modify_active(trade_id, |t| {
            t.mark_reached(stage);
            t.push_event(TradeEvent::new(now, stage, price, detail), cap);
        })
    }

    pub fn update_trade_price(
        &self,
        trade_id: &str,
        price: f64,
        pip: f64,
        tick_value: f64,
    ) -> Result<bool, StoreError> {
        self.modify_active(trade_id, |t| t.mark_price(price, pip, tick_value))
    }

    fn modify_active(&self, trade_id: &str, f: impl FnOnce(&mut Trade)) -> Result<bool, StoreError> {
        let _guard = self.lock_active();
        let mut active = self.load_active();
        let Some(trade) = active.iter_mut().find(|t| t.id == trade_id) else {
            return Ok(false);
        };
        f(trade);
        self.save_active(&active)?;
        Ok(true)
    }

    /// Write back in-memory copies of active trades and checkpoint the active
    /// set. Trades no longer in the active set are ignored, as are closed ones.
    pub fn apply_updates(&self, updated: &[Trade]) -> Result<(), StoreError> {
        let _guard = self.lock_active();
        let mut active = self.load_active();
        for slot in active.iter_mut() {
            if let Some(fresh) = updated.iter().find(|u| u.id == slot.id && u.is_active()) {
                *slot = fresh.clone();
            }
        }
        self.save_active(&active)
    }

    /// Close every trade older than `max_age_hours` at its last known price.
    /// A trade whose archive write fails stays in the active set and is
    /// retried on the next pass.
    pub fn expire_stale(
        &self,
        max_age_hours: f64,
        now: DateTime<Utc>,
        instruments: &InstrumentTable,
    ) -> Result<Vec<Trade>, StoreError> {
        let _guard = self.lock_active();
        let active = self.load_active();
        if !active.iter().any(|t| t.age_hours(now) > max_age_hours) {
            return Ok(Vec::new());
        }

        let mut keep = Vec::with_capacity(active.len());
        let mut expired = Vec::new();
        for trade in active {
            if trade.age_hours(now) <= max_age_hours {
                keep.push(trade);
                continue;
            }
            let mut closed = trade.clone();
            let spec = instruments.spec(&closed.symbol);
            let price = closed.current_price;
            closed.finalize(price, ExitReason::Expired, now, spec.pip_size, spec.tick_value);
            closed.push_event(
                TradeEvent::new(
                    now,
                    Stage::Expired,
                    price,
                    format!("Expired after {:.0}h", closed.age_hours(now)),
                ),
                self.event_cap,
            );
            match self.archive(&closed) {
                Ok(()) => {
                    info!("Expired {} {} @ {}", closed.id, closed.symbol, price);
                    expired.push(closed);
                }
                Err(e) => {
                    error!("Failed to archive expired trade {}: {}", trade.id, e);
                    keep.push(trade);
                }
            }
        }

        if !expired.is_empty() {
            self.save_active(&keep)?;
        }
        Ok(expired)
    }

    // ---- history ----

    /// Trim oversized histories, then prune the oldest near-empty record
    /// files while the file count is over the limit.
    pub fn cleanup_storage(&self) -> Result<CleanupReport, StoreError> {
        let mut report = CleanupReport::default();
        let keys = self.backend.keys(RECORD_PREFIX)?;

        let mut sizes: HashMap<String, usize> = HashMap::new();
        for key in &keys {
            let mut record: StrategyRecord = self.decode(key);
            if record.trades.len() > self.cfg.max_trades_per_record {
                record.trades.truncate(self.cfg.max_trades_per_record);
                self.encode(key, &record)?;
                report.trimmed += 1;
            }
            sizes.insert(key.clone(), record.trades.len());
        }

        if keys.len() > self.cfg.max_record_files {
            let mut by_age: Vec<&String> = keys.iter().collect();
            by_age.sort_by_key(|k| self.backend.modified(k));
            let mut remaining = keys.len();
            for key in by_age {
                if remaining <= self.cfg.max_record_files {
                    break;
                }
                if sizes.get(key).copied().unwrap_or(0) < self.cfg.min_trades_to_keep_file {
                    self.backend.remove(key)?;
                    report.removed += 1;
                    remaining -= 1;
                }
            }
        }

        if report.trimmed > 0 || report.removed > 0 {
            info!(
                "Storage cleanup: trimmed {} record(s), removed {} file(s)",
                report.trimmed, report.removed
            );
        }
        Ok(report)
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.all_records()
            .into_iter()
            .map(|r| r.strategy_id)
            .collect()
    }

    pub fn all_records(&self) -> Vec<StrategyRecord> {
        let keys = match self.backend.keys(RECORD_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                error!("Failed to list records: {}", e);
                return Vec::new();
            }
        };
        let mut records: Vec<StrategyRecord> = keys
            .iter()
            .map(|key| {
                let mut record: StrategyRecord = self.decode(key);
                if record.strategy_id.is_empty() {
                    record.strategy_id = key
                        .trim_start_matches(RECORD_PREFIX)
                        .trim_end_matches(".json")
                        .to_string();
                }
                record
            })
            .collect();
        records.sort_by(|a, b| a.strategy_id.cmp(&b.strategy_id));
        records
    }

    pub fn get_active_trades(&self) -> Vec<Trade> {
        self.load_active()
    }

    pub fn get_strategy_records(&self, strategy_id: &str) -> (StrategyRecord, StrategyStats) {
        let record = self.load_records(strategy_id);
        let stats = compute_strategy_stats(&record);
        (record, stats)
    }

    /// Look a trade up in the active set first, then in the strategy history.
    pub fn trade_timeline(&self, strategy_id: &str, trade_id: &str) -> Option<Trade> {
        if let Some(t) = self.load_active().into_iter().find(|t| t.id == trade_id) {
            return Some(t);
        }
        self.load_records(strategy_id)
            .trades
            .into_iter()
            .find(|t| t.id == trade_id)
    }

    pub fn tracker_status(&self, running: bool) -> TrackerStatus {
        let state = self.load_state();
        let active = self.load_active();
        let mut active_by_symbol = BTreeMap::new();
        for t in &active {
            *active_by_symbol.entry(t.symbol.clone()).or_insert(0) += 1;
        }
        let strategies_tracked = self.backend.keys(RECORD_PREFIX).map(|k| k.len()).unwrap_or(0);
        TrackerStatus {
            running,
            active_trades: active.len(),
            active_by_symbol,
            strategies_tracked,
            total_cycles: state.total_cycles,
            total_signals: state.total_signals,
            total_closes: state.total_closes,
            last_cycle: state.last_cycle,
            started_at: state.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, TradeStatus};
    use crate::test_helpers::{make_trade, t0};
    use crate::tracking::persistence::{FileStore, MemoryStore};
    use chrono::Duration;

    fn store_with(cfg: StoreConfig) -> TradeStore {
        TradeStore::new(Arc::new(MemoryStore::new()), cfg)
    }

    fn store() -> TradeStore {
        store_with(StoreConfig::default())
    }

    fn on_symbol(id: &str, symbol: &str) -> Trade {
        let mut t = make_trade(id, Direction::Long, 100.0, 90.0, &[120.0]);
        t.symbol = symbol.to_string();
        t
    }

    #[test]
    fn record_key_sanitizes() {
        assert_eq!(record_key("a/b\\c"), "rec_a_b_c.json");
        let long = "x".repeat(100);
        assert_eq!(record_key(&long).len(), "rec_".len() + 60 + ".json".len());
    }

    #[test]
    fn one_active_trade_per_strategy() {
        let store = store();
        assert!(store.record_entry(make_trade("s1", Direction::Long, 100.0, 90.0, &[120.0])).unwrap().is_some());
        assert!(store.record_entry(make_trade("s1", Direction::Short, 100.0, 110.0, &[80.0])).unwrap().is_none());
        assert_eq!(store.get_active_trades().len(), 1);
    }

    #[test]
    fn caps_are_enforced() {
        let store = store_with(StoreConfig {
            max_active_trades: 3,
            max_per_symbol: 2,
            ..StoreConfig::default()
        });
        assert!(store.record_entry(on_symbol("a", "EURUSD")).unwrap().is_some());
        assert!(store.record_entry(on_symbol("b", "EURUSD")).unwrap().is_some());
        assert!(store.record_entry(on_symbol("c", "EURUSD")).unwrap().is_none());
        assert!(store.record_entry(on_symbol("d", "GBPUSD")).unwrap().is_some());
        assert!(store.record_entry(on_symbol("e", "USDJPY")).unwrap().is_none());
    }

    #[test]
    fn colliding_ids_get_suffix() {
        let store = store();
        let a = Trade { id: "X".to_string(), ..make_trade("a", Direction::Long, 100.0, 90.0, &[120.0]) };
        let b = Trade { id: "X".to_string(), ..make_trade("b", Direction::Long, 100.0, 90.0, &[120.0]) };
        store.record_entry(a).unwrap();
        let b = store.record_entry(b).unwrap().unwrap();
        assert_eq!(b.id, "X_1");
    }

    #[test]
    fn exit_moves_trade_to_history() {
        let store = store();
        let opened = store
            .record_entry(make_trade("s1", Direction::Long, 100.0, 90.0, &[120.0]))
            .unwrap()
            .unwrap();
        let closed = store
            .record_exit(&opened.id, 120.0, ExitReason::Tp, 1.0, 1.0, t0() + Duration::hours(1))
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, TradeStatus::Closed);
        assert!(store.get_active_trades().is_empty());

        let (record, stats) = store.get_strategy_records("s1");
        assert_eq!(record.trades.len(), 1);
        assert_eq!(stats.wins, 1);
        assert_eq!(record.trades[0].events.last().unwrap().stage, Stage::ClosedTp);

        assert!(store.record_exit(&opened.id, 120.0, ExitReason::Tp, 1.0, 1.0, t0()).unwrap().is_none());
    }

    #[test]
    fn archive_is_bounded_and_deduplicated() {
        let store = store_with(StoreConfig {
            max_trades_per_record: 3,
            ..StoreConfig::default()
        });
        for i in 0..5 {
            let mut t = make_trade("s1", Direction::Long, 100.0, 90.0, &[120.0]);
            t.id = format!("t{}", i);
            t.finalize(120.0, ExitReason::Tp, t0(), 1.0, 1.0);
            store.close_trade(&t).unwrap();
            store.close_trade(&t).unwrap();
        }
        let record = store.load_records("s1");
        let ids: Vec<&str> = record.trades.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t4", "t3", "t2"]);
    }

    #[test]
    fn persistence_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            data_dir: dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        let store = TradeStore::new(Arc::new(FileStore::from_config(&cfg)), cfg.clone());
        let opened = store
            .record_entry(make_trade("s/1", Direction::Short, 100.0, 110.0, &[80.0, 70.0]))
            .unwrap()
            .unwrap();
        store.record_event(&opened.id, Stage::NearBe, 95.0, "halfway", t0()).unwrap();
        let before = store.get_active_trades();

        let reopened = TradeStore::new(Arc::new(FileStore::from_config(&cfg)), cfg);
        assert_eq!(reopened.get_active_trades(), before);

        let mut closed = before[0].clone();
        closed.finalize(80.0, ExitReason::Tp, t0(), 1.0, 1.0);
        reopened.close_trade(&closed).unwrap();
        assert!(dir.path().join("rec_s_1.json").exists());
        assert_eq!(store.load_records("s/1").trades, vec![closed]);
    }

    #[test]
    fn corrupt_documents_read_as_empty() {
        let backend = Arc::new(MemoryStore::new());
        backend.save(ACTIVE_KEY, "{not json").unwrap();
        backend.save(STATE_KEY, "\"oops\"").unwrap();
        let store = TradeStore::new(backend, StoreConfig::default());
        assert!(store.load_active().is_empty());
        assert_eq!(store.load_state(), DaemonState::default());
    }

    #[test]
    fn expire_closes_old_trades() {
        let store = store();
        store.record_entry(make_trade("old", Direction::Long, 100.0, 90.0, &[120.0])).unwrap();
        let mut fresh = make_trade("new", Direction::Long, 100.0, 90.0, &[120.0]);
        fresh.opened_at = t0() + Duration::hours(200);
        store.record_entry(fresh).unwrap();

        let expired = store
            .expire_stale(168.0, t0() + Duration::hours(201), &InstrumentTable::new())
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].strategy_id, "old");
        assert_eq!(expired[0].exit_reason, Some(ExitReason::Expired));
        assert_eq!(store.get_active_trades().len(), 1);
        assert_eq!(store.load_records("old").trades.len(), 1);
    }

    /// Memory backend whose history writes always fail.
    struct NoHistoryWrites(MemoryStore);

    impl Persistence for NoHistoryWrites {
        fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.load(key)
        }
        fn save(&self, key: &str, doc: &str) -> Result<(), StoreError> {
            if key.starts_with(RECORD_PREFIX) {
                return Err(StoreError::RetriesExhausted {
                    key: key.to_string(),
                    attempts: 3,
                });
            }
            self.0.save(key, doc)
        }
        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.0.remove(key)
        }
        fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.0.keys(prefix)
        }
        fn modified(&self, key: &str) -> Option<std::time::SystemTime> {
            self.0.modified(key)
        }
    }

    #[test]
    fn expiry_keeps_trades_it_cannot_archive() {
        let store = TradeStore::new(Arc::new(NoHistoryWrites(MemoryStore::new())), StoreConfig::default());
        store.record_entry(make_trade("old", Direction::Long, 100.0, 90.0, &[120.0])).unwrap();

        let expired = store
            .expire_stale(168.0, t0() + Duration::hours(200), &InstrumentTable::new())
            .unwrap();
        assert!(expired.is_empty());
        let active = store.get_active_trades();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].strategy_id, "old");
        assert!(active[0].is_active());
        assert!(store.load_records("old").trades.is_empty());
    }

    #[test]
    fn checkpoint_writes_even_without_changes() {
        let backend = Arc::new(MemoryStore::new());
        let store = TradeStore::new(backend.clone(), StoreConfig::default());
        store.apply_updates(&[]).unwrap();
        assert_eq!(backend.load(ACTIVE_KEY).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn cleanup_trims_and_prunes_small_files() {
        let backend = Arc::new(MemoryStore::new());
        let store = TradeStore::new(
            backend.clone(),
            StoreConfig {
                max_trades_per_record: 6,
                max_record_files: 2,
                ..StoreConfig::default()
            },
        );
        let closed = |sid: &str, n: usize| StrategyRecord {
            strategy_id: sid.to_string(),
            trades: (0..n)
                .map(|i| {
                    let mut t = make_trade(sid, Direction::Long, 100.0, 90.0, &[120.0]);
                    t.id = format!("{}-{}", sid, i);
                    t
                })
                .collect(),
        };
        // Oldest first: a small, b large, c small, d small
        store.save_records(&closed("a", 1)).unwrap();
        store.save_records(&closed("b", 10)).unwrap();
        store.save_records(&closed("c", 2)).unwrap();
        store.save_records(&closed("d", 2)).unwrap();

        let report = store.cleanup_storage().unwrap();
        assert_eq!(report.trimmed, 1);
        assert_eq!(report.removed, 2);
        assert_eq!(store.strategy_ids(), vec!["b".to_string(), "d".to_string()]);
        assert_eq!(store.load_records("b").trades.len(), 6);
    }

    #[test]
    fn price_updates_and_timeline_lookup() {
        let store = store();
        let opened = store
            .record_entry(make_trade("s1", Direction::Long, 100.0, 90.0, &[120.0]))
            .unwrap()
            .unwrap();
        assert!(store.update_trade_price(&opened.id, 105.0, 1.0, 1.0).unwrap());
        assert!(!store.update_trade_price("missing", 105.0, 1.0, 1.0).unwrap());

        let live = store.trade_timeline("s1", &opened.id).unwrap();
        assert_eq!(live.current_price, 105.0);
        assert_eq!(live.current_pnl_pips, 5.0);
        assert_eq!(live.highest_price, 105.0);

        store
            .record_exit(&opened.id, 90.0, ExitReason::Sl, 1.0, 1.0, t0() + Duration::minutes(30))
            .unwrap();
        let archived = store.trade_timeline("s1", &opened.id).unwrap();
        assert_eq!(archived.status, TradeStatus::Closed);
        assert_eq!(archived.events.first().unwrap().stage, Stage::Entry);
        assert_eq!(archived.events.last().unwrap().stage, Stage::ClosedSl);
        assert!(store.trade_timeline("s1", "nope").is_none());
    }

    #[test]
    fn status_counts_active_by_symbol() {
        let store = store();
        store.record_entry(on_symbol("a", "EURUSD")).unwrap();
        store.record_entry(on_symbol("b", "EURUSD")).unwrap();
        store.record_entry(on_symbol("c", "XAUUSD")).unwrap();
        store
            .save_state(&DaemonState {
                total_cycles: 7,
                ..DaemonState::default()
            })
            .unwrap();
        let status = store.tracker_status(true);
        assert!(status.running);
        assert_eq!(status.active_trades, 3);
        assert_eq!(status.active_by_symbol["EURUSD"], 2);
        assert_eq!(status.total_cycles, 7);
    }
}
