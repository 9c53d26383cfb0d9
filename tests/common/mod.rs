#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use std::sync::Arc;

use signal_tracker::config::{Config, StoreConfig};
use signal_tracker::models::{Bar, Direction, Signal, Timeframe};
use signal_tracker::tracking::{FileStore, TradeStore};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Create one-minute bars from (open, high, low, close) tuples starting at `start`.
pub fn make_bars(start: DateTime<Utc>, data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    data.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Bar {
            open_time: start + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
        })
        .collect()
}

pub fn make_signal(
    strategy_id: &str,
    symbol: &str,
    direction: Direction,
    entry: f64,
    stop: f64,
    targets: &[f64],
) -> Signal {
    Signal {
        strategy_id: strategy_id.to_string(),
        strategy_name: format!("{} strategy", strategy_id),
        category: "breakout".to_string(),
        symbol: symbol.to_string(),
        timeframe: Timeframe::H1,
        direction,
        entry_price: entry,
        stop_loss: stop,
        take_profits: targets.to_vec(),
        confidence: 65.0,
        rationale: "integration".to_string(),
    }
}

/// Tracker config pointed at `dir`, tracking US30 on H1 only.
pub fn test_config(dir: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.daemon.symbols = vec!["US30".to_string()];
    cfg.store = StoreConfig {
        data_dir: dir.to_path_buf(),
        retry_backoff: std::time::Duration::from_millis(1),
        ..StoreConfig::default()
    };
    cfg
}

/// A store over the files in `cfg.store.data_dir`, as a fresh process would open it.
pub fn open_store(cfg: &Config) -> Arc<TradeStore> {
    Arc::new(
        TradeStore::new(Arc::new(FileStore::from_config(&cfg.store)), cfg.store.clone())
            .with_event_cap(cfg.lifecycle.max_events_per_trade),
    )
}
