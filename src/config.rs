use crate::models::Timeframe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub type SharedConfig = Arc<RwLock<Config>>;

/// Symbols the daemon evaluates every cycle unless `TRACK_SYMBOLS` overrides.
pub const DEFAULT_SYMBOLS: &[&str] = &[
    "XAUUSD", "XAGUSD", "EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "USDCAD", "NZDUSD", "USDCHF",
    "EURGBP", "EURJPY", "GBPJPY", "EURAUD", "EURCAD", "EURCHF", "EURNZD", "GBPAUD", "GBPCAD",
    "GBPCHF", "GBPNZD", "AUDJPY", "AUDCAD", "AUDCHF", "AUDNZD", "CADJPY", "CADCHF", "CHFJPY",
    "NZDJPY", "NZDCAD", "NZDCHF", "BTCUSD", "US30", "NAS100",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub min_rr: f64,
    pub max_rr: f64,
    /// Fractional distance, 0.0001 = 0.01% of entry.
    pub min_stop_distance_pct: f64,
    pub min_target_distance_pct: f64,
    pub min_confidence: f64,
    /// Accepted signals per (symbol, direction) per cycle.
    pub cluster_cap: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_rr: 1.5,
            max_rr: 8.0,
            min_stop_distance_pct: 0.0001,
            min_target_distance_pct: 0.0001,
            min_confidence: 30.0,
            cluster_cap: 3,
        }
    }
}

/// Lifecycle thresholds. Ratios are multiples of the initial risk distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub trail_activation_r: f64,
    pub trail_distance_ratio: f64,
    pub near_be_r: f64,
    pub be_trigger_r: f64,
    pub in_profit_r: f64,
    pub in_loss_r: f64,
    pub near_sl_r: f64,
    /// Below this the trade's stage reads `near_sl`; the one-off annotation
    /// uses `near_sl_r`.
    pub stage_near_sl_r: f64,
    pub near_tp_pips: f64,
    pub be_exit_tolerance_pips: f64,
    pub fallback_risk_pips: f64,
    pub partial_close_pct: f64,
    pub max_events_per_trade: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            trail_activation_r: 1.5,
            trail_distance_ratio: 0.7,
            near_be_r: 0.5,
            be_trigger_r: 0.6,
            in_profit_r: 1.0,
            in_loss_r: 0.0,
            near_sl_r: -0.8,
            stage_near_sl_r: -0.5,
            near_tp_pips: 20.0,
            be_exit_tolerance_pips: 3.0,
            fallback_risk_pips: 50.0,
            partial_close_pct: 0.33,
            max_events_per_trade: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub max_active_trades: usize,
    pub max_per_symbol: usize,
    pub max_trades_per_record: usize,
    pub max_record_files: usize,
    /// Files holding fewer trades than this may be removed during cleanup.
    pub min_trades_to_keep_file: usize,
    pub save_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("track_records"),
            max_active_trades: 150,
            max_per_symbol: 8,
            max_trades_per_record: 200,
            max_record_files: 500,
            min_trades_to_keep_file: 5,
            save_retries: 3,
            retry_backoff: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub cycle_interval: Duration,
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub signal_cooldown: Duration,
    pub max_signals_per_cycle: usize,
    pub lot_size: f64,
    pub max_trade_age_hours: f64,
    pub expire_every_cycles: u64,
    pub cleanup_every_cycles: u64,
    pub max_consecutive_failures: u32,
    pub failure_backoff: Duration,
    pub recovery_bar_count: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(30),
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            timeframes: vec![Timeframe::H1],
            signal_cooldown: Duration::from_secs(3600),
            max_signals_per_cycle: 10,
            lot_size: 0.01,
            max_trade_age_hours: 168.0,
            expire_every_cycles: 10,
            cleanup_every_cycles: 500,
            max_consecutive_failures: 10,
            failure_backoff: Duration::from_secs(300),
            recovery_bar_count: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub enabled: bool,
    pub price_interval: Duration,
    pub analysis_interval: Duration,
    pub cleanup_interval: Duration,
    pub cache_max_age: Duration,
    pub max_ticks_per_symbol: usize,
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            price_interval: Duration::from_secs(2),
            analysis_interval: Duration::from_secs(15),
            cleanup_interval: Duration::from_secs(300),
            cache_max_age: Duration::from_secs(600),
            max_ticks_per_symbol: 60,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Collaborator endpoint
    pub feed_url: String,
    pub feed_timeout: Duration,

    pub validator: ValidatorConfig,
    pub lifecycle: LifecycleConfig,
    pub store: StoreConfig,
    pub daemon: DaemonConfig,
    pub broadcast: BroadcastConfig,

    // Logging
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "http://127.0.0.1:8000".to_string(),
            feed_timeout: Duration::from_secs(10),
            validator: ValidatorConfig::default(),
            lifecycle: LifecycleConfig::default(),
            store: StoreConfig::default(),
            daemon: DaemonConfig::default(),
            broadcast: BroadcastConfig::default(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset or unparsable values
    /// fall back to the defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let env = |key: &str, default: &str| -> String {
            var(key).unwrap_or_else(|| default.to_string())
        };
        let secs = |key: &str, default: u64| -> Duration {
            Duration::from_secs(env(key, &default.to_string()).parse().unwrap_or(default))
        };

        let mut cfg = Config::default();

        cfg.feed_url = env("FEED_URL", &cfg.feed_url);
        cfg.feed_timeout = secs("FEED_TIMEOUT_SECS", 10);
        cfg.log_level = env("LOG_LEVEL", "INFO");

        cfg.store.data_dir = PathBuf::from(env("TRACK_DIR", "track_records"));
        cfg.store.max_active_trades = env("MAX_ACTIVE_TRADES", "150").parse().unwrap_or(150);
        cfg.store.max_per_symbol = env("MAX_PER_SYMBOL", "8").parse().unwrap_or(8);

        cfg.daemon.cycle_interval = secs("CYCLE_INTERVAL_SECS", 30);
        cfg.daemon.signal_cooldown = secs("SIGNAL_COOLDOWN_SECS", 3600);
        cfg.daemon.lot_size = env("LOT_SIZE", "0.01").parse().unwrap_or(0.01);
        cfg.daemon.max_trade_age_hours = env("MAX_TRADE_AGE_HOURS", "168").parse().unwrap_or(168.0);
        cfg.daemon.max_signals_per_cycle = env("MAX_SIGNALS_PER_CYCLE", "10").parse().unwrap_or(10);

        let symbols = env("TRACK_SYMBOLS", "");
        if !symbols.trim().is_empty() {
            cfg.daemon.symbols = symbols
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        let timeframes: Vec<Timeframe> = env("TRACK_TIMEFRAMES", "H1")
            .split(',')
            .filter_map(Timeframe::from_str_loose)
            .collect();
        if !timeframes.is_empty() {
            cfg.daemon.timeframes = timeframes;
        }

        cfg.validator.min_confidence = env("MIN_CONFIDENCE", "30").parse().unwrap_or(30.0);
        cfg.validator.min_rr = env("MIN_RR", "1.5").parse().unwrap_or(1.5);
        cfg.validator.max_rr = env("MAX_RR", "8.0").parse().unwrap_or(8.0);
        cfg.validator.cluster_cap = env("CLUSTER_CAP", "3").parse().unwrap_or(3);

        cfg.lifecycle.trail_activation_r = env("TRAIL_ACTIVATION_R", "1.5").parse().unwrap_or(1.5);
        cfg.lifecycle.trail_distance_ratio = env("TRAIL_DISTANCE_RATIO", "0.7").parse().unwrap_or(0.7);
        cfg.lifecycle.be_trigger_r = env("BE_TRIGGER_R", "0.6").parse().unwrap_or(0.6);

        cfg.broadcast.enabled = env("BROADCAST", "true").to_lowercase() == "true";

        cfg
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}
