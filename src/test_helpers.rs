use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::models::{Bar, Direction, Signal, Timeframe, Trade};

/// Fixed reference time for deterministic tests.
pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
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
        category: "trend".to_string(),
        symbol: symbol.to_string(),
        timeframe: Timeframe::H1,
        direction,
        entry_price: entry,
        stop_loss: stop,
        take_profits: targets.to_vec(),
        confidence: 70.0,
        rationale: "test".to_string(),
    }
}

/// Active trade on a one-point-pip instrument so prices read as pips.
pub fn make_trade(id: &str, direction: Direction, entry: f64, stop: f64, targets: &[f64]) -> Trade {
    let signal = make_signal(id, "US30", direction, entry, stop, targets);
    let mut trade = Trade::open(&signal, 1.0, t0());
    trade.id = format!("T-{}", id);
    trade
}

/// One-minute bars from (open, high, low, close) tuples starting at `t0()`.
pub fn make_bars(data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    data.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Bar {
            open_time: t0() + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
        })
        .collect()
}

pub fn default_test_config() -> Config {
    let mut cfg = Config::default();
    cfg.daemon.symbols = vec!["US30".to_string()];
    cfg.store.retry_backoff = std::time::Duration::from_millis(1);
    cfg
}
