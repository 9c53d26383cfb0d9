pub mod broadcast;
pub mod daemon;
pub mod events;
pub mod lifecycle;
pub mod persistence;
pub mod quality;
pub mod recovery;
pub mod stats;
pub mod store;
pub mod validator;

pub use broadcast::{LiveBroadcaster, LiveMessage, TickCache};
pub use daemon::{CycleReport, DaemonHandle, TrackerDaemon};
pub use events::{BusMessage, ChannelObserver, EventBus, LogObserver, TradeObserver};
pub use lifecycle::{LifecycleEngine, TickOutcome};
pub use persistence::{FileStore, MemoryStore, Persistence};
pub use quality::{flag_quality, flag_trade, Quality, QualityFlag, QualityReport, TradeFlags};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use stats::{compare_categories, compute_strategy_stats, CategoryComparison, StrategyStats};
pub use store::{DaemonState, StrategyRecord, TrackerStatus, TradeStore};
pub use validator::{RejectReason, SignalValidator, ValidatorStats, Verdict};
