use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Direction, Signal, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    #[default]
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    /// A flat exit (break-even stop) scores as a win.
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl >= 0.0 {
            Outcome::Win
        } else {
            Outcome::Loss
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SignalDetected,
    EntryConfirmed,
    InLoss,
    NearBe,
    BeActivated,
    InProfit,
    PartialClose1,
    PartialClose2,
    TrailingActive,
    NearTp,
    NearSl,
    ClosedTp,
    ClosedSl,
    ClosedTrailing,
    ClosedBe,
    ClosedManual,
    ClosedRecovery,
    Entry,
    Exit,
    Recovery,
    Expired,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SignalDetected => "signal_detected",
            Stage::EntryConfirmed => "entry_confirmed",
            Stage::InLoss => "in_loss",
            Stage::NearBe => "near_be",
            Stage::BeActivated => "be_activated",
            Stage::InProfit => "in_profit",
            Stage::PartialClose1 => "partial_close_1",
            Stage::PartialClose2 => "partial_close_2",
            Stage::TrailingActive => "trailing_active",
            Stage::NearTp => "near_tp",
            Stage::NearSl => "near_sl",
            Stage::ClosedTp => "closed_tp",
            Stage::ClosedSl => "closed_sl",
            Stage::ClosedTrailing => "closed_trailing",
            Stage::ClosedBe => "closed_be",
            Stage::ClosedManual => "closed_manual",
            Stage::ClosedRecovery => "closed_recovery",
            Stage::Entry => "entry",
            Stage::Exit => "exit",
            Stage::Recovery => "recovery",
            Stage::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::ClosedTp
                | Stage::ClosedSl
                | Stage::ClosedTrailing
                | Stage::ClosedBe
                | Stage::ClosedManual
                | Stage::ClosedRecovery
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Sl,
    Tp,
    Trailing,
    BreakEven,
    Manual,
    Expired,
    SlRecovery,
    TpRecovery,
    BeRecovery,
    TrailingRecovery,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Sl => "sl",
            ExitReason::Tp => "tp",
            ExitReason::Trailing => "trailing",
            ExitReason::BreakEven => "break_even",
            ExitReason::Manual => "manual",
            ExitReason::Expired => "expired",
            ExitReason::SlRecovery => "sl_recovery",
            ExitReason::TpRecovery => "tp_recovery",
            ExitReason::BeRecovery => "be_recovery",
            ExitReason::TrailingRecovery => "trailing_recovery",
        }
    }

    /// The same exit, observed after the fact from historical bars.
    pub fn recovered(self) -> Self {
        match self {
            ExitReason::Sl => ExitReason::SlRecovery,
            ExitReason::Tp => ExitReason::TpRecovery,
            ExitReason::BreakEven => ExitReason::BeRecovery,
            ExitReason::Trailing => ExitReason::TrailingRecovery,
            other => other,
        }
    }

    pub fn is_recovery(&self) -> bool {
        matches!(
            self,
            ExitReason::SlRecovery
                | ExitReason::TpRecovery
                | ExitReason::BeRecovery
                | ExitReason::TrailingRecovery
        )
    }

    pub fn closing_stage(&self) -> Stage {
        match self {
            ExitReason::Sl => Stage::ClosedSl,
            ExitReason::Tp => Stage::ClosedTp,
            ExitReason::Trailing => Stage::ClosedTrailing,
            ExitReason::BreakEven => Stage::ClosedBe,
            ExitReason::Manual => Stage::ClosedManual,
            ExitReason::Expired => Stage::Expired,
            ExitReason::SlRecovery
            | ExitReason::TpRecovery
            | ExitReason::BeRecovery
            | ExitReason::TrailingRecovery => Stage::ClosedRecovery,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialClose {
    /// Which take-profit level triggered it (1 or 2).
    pub level: u8,
    /// Fraction of the original size closed, 0.33 for a third.
    pub pct: f64,
    pub price: f64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub time: DateTime<Utc>,
    pub stage: Stage,
    pub price: f64,
    #[serde(default)]
    pub detail: String,
}

impl TradeEvent {
    pub fn new(time: DateTime<Utc>, stage: Stage, price: f64, detail: impl Into<String>) -> Self {
        Self {
            time,
            stage,
            price,
            detail: detail.into(),
        }
    }
}

/// Events kept from the start of a trade's history when the list is trimmed.
const KEEP_HEAD_EVENTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub strategy_id: String,
    #[serde(default)]
    pub strategy_name: String,
    #[serde(default)]
    pub category: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub initial_stop: f64,
    #[serde(default)]
    pub tp1: f64,
    #[serde(default)]
    pub tp2: f64,
    #[serde(default)]
    pub tp3: f64,
    pub lot_size: f64,
    #[serde(default)]
    pub confidence: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub status: TradeStatus,

    pub current_price: f64,
    #[serde(default)]
    pub current_pnl_pips: f64,
    #[serde(default)]
    pub current_pnl_usd: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    #[serde(default)]
    pub sl_moved_to_be: bool,
    #[serde(default)]
    pub trailing_active: bool,
    #[serde(default)]
    pub trailing_distance: f64,
    pub current_stage: Stage,
    /// Every stage this trade has ever reached. Unlike `events` this is never
    /// trimmed, so one-shot annotations stay one-shot on long-lived trades.
    #[serde(default)]
    pub reached: Vec<Stage>,
    #[serde(default)]
    pub partial_closes: Vec<PartialClose>,
    #[serde(default)]
    pub events: Vec<TradeEvent>,

    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pnl_pips: f64,
    #[serde(default)]
    pub pnl_usd: f64,
    #[serde(default)]
    pub duration_minutes: f64,
    #[serde(default)]
    pub outcome: Option<Outcome>,
}

impl Trade {
    /// Build an active trade from an accepted signal. The id is derived from
    /// the open time; the store appends a suffix if it collides.
    pub fn open(signal: &Signal, lot_size: f64, now: DateTime<Utc>) -> Self {
        let targets = signal.targets();
        let level = |i: usize| targets.get(i).copied().unwrap_or(0.0);
        let entry = signal.entry_price;

        let mut trade = Self {
            id: now.format("%Y%m%dT%H%M%S%6f").to_string(),
            strategy_id: signal.strategy_id.clone(),
            strategy_name: signal.strategy_name.clone(),
            category: signal.category.clone(),
            symbol: signal.symbol.clone(),
            timeframe: signal.timeframe,
            direction: signal.direction,
            entry_price: entry,
            stop_loss: signal.stop_loss,
            initial_stop: signal.stop_loss,
            tp1: level(0),
            tp2: level(1),
            tp3: level(2),
            lot_size,
            confidence: signal.confidence,
            opened_at: now,
            status: TradeStatus::Active,
            current_price: entry,
            current_pnl_pips: 0.0,
            current_pnl_usd: 0.0,
            highest_price: entry,
            lowest_price: entry,
            sl_moved_to_be: false,
            trailing_active: false,
            trailing_distance: 0.0,
            current_stage: Stage::EntryConfirmed,
            reached: Vec::new(),
            partial_closes: Vec::new(),
            events: Vec::new(),
            exit_price: None,
            exit_reason: None,
            closed_at: None,
            pnl_pips: 0.0,
            pnl_usd: 0.0,
            duration_minutes: 0.0,
            outcome: None,
        };
        trade.reached.push(Stage::EntryConfirmed);
        trade.events.push(TradeEvent::new(
            now,
            Stage::Entry,
            entry,
            format!(
                "{} {} @ {} | SL {} | TP {}",
                signal.direction, signal.symbol, entry, signal.stop_loss, trade.tp1
            ),
        ));
        trade
    }

    pub fn is_active(&self) -> bool {
        self.status == TradeStatus::Active
    }

    /// Present take-profit levels in order.
    pub fn targets(&self) -> Vec<f64> {
        [self.tp1, self.tp2, self.tp3]
            .into_iter()
            .filter(|tp| *tp > 0.0)
            .collect()
    }

    pub fn has_reached(&self, stage: Stage) -> bool {
        self.reached.contains(&stage)
    }

    pub fn mark_reached(&mut self, stage: Stage) {
        if !self.reached.contains(&stage) {
            self.reached.push(stage);
        }
    }

    /// Distance between entry and the stop the trade was opened with.
    pub fn initial_risk(&self) -> f64 {
        (self.entry_price - self.initial_stop).abs()
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_seconds() as f64 / 3600.0
    }

    /// Append an event, trimming the middle of the history once `cap` is hit:
    /// the first few events and the most recent ones survive.
    pub fn push_event(&mut self, event: TradeEvent, cap: usize) {
        let cap = cap.max(1);
        if self.events.len() >= cap {
            let head = KEEP_HEAD_EVENTS.min(cap - 1);
            let tail = cap - 1 - head;
            let split = self.events.len() - tail;
            let mut kept: Vec<TradeEvent> = self.events[..head].to_vec();
            kept.extend_from_slice(&self.events[split..]);
            self.events = kept;
        }
        self.events.push(event);
    }

    /// Refresh the mark-to-market snapshot for `price`.
    pub fn mark_price(&mut self, price: f64, pip: f64, tick_value: f64) {
        self.current_price = price;
        self.highest_price = self.highest_price.max(price);
        self.lowest_price = self.lowest_price.min(price);
        let pips = self.direction.favourable_move(self.entry_price, price) / pip;
        self.current_pnl_pips = round1(pips);
        self.current_pnl_usd = round2(pips * tick_value * self.lot_size);
    }

    /// Realized move in price units. Partial closes are weighted by the
    /// fraction they took off; the remainder is closed at `exit_price`.
    pub fn realized_move(&self, exit_price: f64) -> f64 {
        let mut closed = 0.0;
        let mut moved = 0.0;
        for pc in &self.partial_closes {
            closed += pc.pct;
            moved += pc.pct * self.direction.favourable_move(self.entry_price, pc.price);
        }
        let remainder = (1.0 - closed).max(0.0);
        moved + remainder * self.direction.favourable_move(self.entry_price, exit_price)
    }

    /// Transition `active -> closed`. Calling this on a closed trade is a no-op.
    pub fn finalize(
        &mut self,
        exit_price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
        pip: f64,
        tick_value: f64,
    ) {
        if !self.is_active() {
            return;
        }
        let pips = self.realized_move(exit_price) / pip;
        self.status = TradeStatus::Closed;
        self.current_price = exit_price;
        self.exit_price = Some(exit_price);
        self.exit_reason = Some(reason);
        self.closed_at = Some(now);
        self.pnl_pips = round1(pips);
        self.pnl_usd = round2(pips * tick_value * self.lot_size);
        self.duration_minutes = round1((now - self.opened_at).num_seconds() as f64 / 60.0);
        self.outcome = Some(Outcome::from_pnl(self.pnl_usd));
        let stage = reason.closing_stage();
        self.current_stage = stage;
        self.mark_reached(stage);
    }
}

pub(crate) fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
