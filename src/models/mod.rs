pub mod bar;
pub mod direction;
pub mod signal;
pub mod timeframe;
pub mod trade;

pub use bar::{Bar, Tick};
pub use direction::Direction;
pub use signal::Signal;
pub use timeframe::Timeframe;
pub use trade::{ExitReason, Outcome, PartialClose, Stage, Trade, TradeEvent, TradeStatus};
