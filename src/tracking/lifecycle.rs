use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::config::LifecycleConfig;
use crate::feed::InstrumentTable;
use crate::models::{Direction, ExitReason, PartialClose, Stage, Trade, TradeEvent};

/// Result of feeding one price update into a trade.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub changed: bool,
    pub closed: bool,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub events: Vec<TradeEvent>,
}

/// Drives a trade through break-even, partial closes, trailing and exit.
pub struct LifecycleEngine {
    cfg: LifecycleConfig,
    instruments: InstrumentTable,
    risk_fallbacks: AtomicU64,
}

impl LifecycleEngine {
    pub fn new(cfg: LifecycleConfig, instruments: InstrumentTable) -> Self {
        Self {
            cfg,
            instruments,
            risk_fallbacks: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.cfg
    }

    pub fn instruments(&self) -> &InstrumentTable {
        &self.instruments
    }

    /// How many ticks ran on the fallback risk distance because the trade's
    /// own stop gave a zero or negative one.
    pub fn risk_fallbacks(&self) -> u64 {
        self.risk_fallbacks.load(Ordering::Relaxed)
    }

    /// Apply one tick. `current` is the mark price; `bid`/`ask` decide stop
    /// and target touches. A closing outcome leaves the trade active: the
    /// caller finalizes it through `finalize` or the store.
    pub fn process_tick(
        &self,
        trade: &mut Trade,
        current: f64,
        bid: f64,
        ask: f64,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        let mut out = TickOutcome::default();
        if !trade.is_active() {
            return out;
        }

        let spec = self.instruments.spec(&trade.symbol);
        let pip = spec.pip_size;
        trade.mark_price(current, pip, spec.tick_value);

        let dir = trade.direction;
        let entry = trade.entry_price;
        let risk = self.risk_distance(trade, pip);
        let r = dir.favourable_move(entry, current) / risk;

        // Stop
        let stop = trade.stop_loss;
        if stop > 0.0 && dir.stop_crossed(stop, bid, ask) {
            let reason = if trade.trailing_active {
                ExitReason::Trailing
            } else if trade.sl_moved_to_be
                && (stop - entry).abs() < self.cfg.be_exit_tolerance_pips * pip
            {
                ExitReason::BreakEven
            } else {
                ExitReason::Sl
            };
            self.close(trade, &mut out, stop, reason, now);
            return out;
        }

        // Take-profit cascade
        let (tp1, tp2, tp3) = (trade.tp1, trade.tp2, trade.tp3);
        if tp1 > 0.0 && dir.target_reached(tp1, bid, ask) {
            if (tp2 > 0.0 || tp3 > 0.0) && !trade.has_reached(Stage::PartialClose1) {
                self.partial_close(trade, &mut out, 1, tp1, entry, now);
                trade.sl_moved_to_be = true;
                return out;
            } else if tp2 <= 0.0 && tp3 <= 0.0 {
                self.close(trade, &mut out, tp1, ExitReason::Tp, now);
                return out;
            }
        }

        if tp2 > 0.0
            && trade.has_reached(Stage::PartialClose1)
            && !trade.has_reached(Stage::PartialClose2)
            && dir.target_reached(tp2, bid, ask)
        {
            if tp3 > 0.0 {
                self.partial_close(trade, &mut out, 2, tp2, tp1, now);
                return out;
            }
            self.close(trade, &mut out, tp2, ExitReason::Tp, now);
            return out;
        }

        if tp3 > 0.0 && trade.has_reached(Stage::PartialClose2) && dir.target_reached(tp3, bid, ask) {
            self.close(trade, &mut out, tp3, ExitReason::Tp, now);
            return out;
        }

        // Trailing. A freshly activated trail starts moving the stop on the
        // following tick.
        let was_trailing = trade.trailing_active;
        if !was_trailing && trade.sl_moved_to_be && r >= self.cfg.trail_activation_r {
            let distance = risk * self.cfg.trail_distance_ratio;
            trade.trailing_active = true;
            trade.trailing_distance = distance;
            self.emit(
                trade,
                &mut out,
                Stage::TrailingActive,
                current,
                format!("Trailing active | distance {:.0} pips", distance / pip),
                now,
            );
        }

        if was_trailing && trade.trailing_distance > 0.0 {
            let candidate = match dir {
                Direction::Long => trade.highest_price - trade.trailing_distance,
                Direction::Short => trade.lowest_price + trade.trailing_distance,
            };
            let tightened = dir.tighter_stop(trade.stop_loss, round6(candidate));
            if tightened != trade.stop_loss {
                debug!("Trade {} trail {} -> {}", trade.id, trade.stop_loss, tightened);
                trade.stop_loss = tightened;
                out.changed = true;
            }
            if dir.stop_crossed(trade.stop_loss, bid, ask) {
                let level = trade.stop_loss;
                self.close(trade, &mut out, level, ExitReason::Trailing, now);
                return out;
            }
        }

        self.annotate(trade, &mut out, current, r, pip, now);

        let stage = self.current_stage(trade, r);
        if stage != trade.current_stage {
            trade.current_stage = stage;
            out.changed = true;
        }
        out
    }

    /// Close `trade` at `price` using this engine's instrument table.
    pub fn finalize(&self, trade: &mut Trade, price: f64, reason: ExitReason, now: DateTime<Utc>) {
        let spec = self.instruments.spec(&trade.symbol);
        trade.finalize(price, reason, now, spec.pip_size, spec.tick_value);
    }

    /// Append a bookkeeping event with the configured cap applied.
    pub fn record_event(
        &self,
        trade: &mut Trade,
        stage: Stage,
        price: f64,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> TradeEvent {
        let event = TradeEvent::new(now, stage, price, detail);
        trade.mark_reached(stage);
        trade.push_event(event.clone(), self.cfg.max_events_per_trade);
        event
    }

    fn risk_distance(&self, trade: &Trade, pip: f64) -> f64 {
        let risk = trade.initial_risk();
        if risk > 0.0 && risk.is_finite() {
            return risk;
        }
        self.risk_fallbacks.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Trade {} ({}) has no usable risk distance (entry {}, stop {}); using {} pips",
            trade.id, trade.symbol, trade.entry_price, trade.initial_stop, self.cfg.fallback_risk_pips
        );
        self.cfg.fallback_risk_pips * pip
    }

    fn annotate(
        &self,
        trade: &mut Trade,
        out: &mut TickOutcome,
        current: f64,
        r: f64,
        pip: f64,
        now: DateTime<Utc>,
    ) {
        let dir = trade.direction;

        if !trade.sl_moved_to_be {
            if r >= self.cfg.near_be_r && !trade.has_reached(Stage::NearBe) {
                self.emit(trade, out, Stage::NearBe, current, "Half of risk covered, break-even next", now);
            }
            if r >= self.cfg.be_trigger_r && !trade.has_reached(Stage::BeActivated) {
                let entry = trade.entry_price;
                trade.stop_loss = dir.tighter_stop(trade.stop_loss, entry);
                trade.sl_moved_to_be = true;
                self.emit(trade, out, Stage::BeActivated, entry, format!("Stop moved to break-even @ {}", entry), now);
            }
        }

        if trade.tp1 > 0.0 && !trade.has_reached(Stage::NearTp) {
            let distance = dir.favourable_move(current, trade.tp1) / pip;
            if distance > 0.0 && distance <= self.cfg.near_tp_pips {
                self.emit(trade, out, Stage::NearTp, current, format!("Near TP1, {:.0} pips away", distance), now);
            }
        }

        if r <= self.cfg.near_sl_r && !trade.has_reached(Stage::NearSl) {
            self.emit(trade, out, Stage::NearSl, current, format!("Near stop, {:.1}R", r), now);
        }

        if r >= self.cfg.in_profit_r {
            if !trade.has_reached(Stage::InProfit) {
                let usd = trade.current_pnl_usd;
                self.emit(trade, out, Stage::InProfit, current, format!("1R reached, in profit {:.2}$", usd), now);
            }
        } else if r < self.cfg.in_loss_r && !trade.has_reached(Stage::InLoss) {
            let usd = trade.current_pnl_usd;
            self.emit(trade, out, Stage::InLoss, current, format!("In loss {:.2}$", usd), now);
        }
    }

    fn partial_close(
        &self,
        trade: &mut Trade,
        out: &mut TickOutcome,
        level: u8,
        price: f64,
        new_stop: f64,
        now: DateTime<Utc>,
    ) {
        let pct = self.cfg.partial_close_pct;
        trade.partial_closes.push(PartialClose {
            level,
            pct,
            price,
            time: now,
        });
        trade.stop_loss = trade.direction.tighter_stop(trade.stop_loss, new_stop);
        let stage = if level == 1 {
            Stage::PartialClose1
        } else {
            Stage::PartialClose2
        };
        let detail = format!(
            "TP{} hit @ {} | closed {:.0}% | stop -> {}",
            level,
            price,
            pct * 100.0,
            trade.stop_loss
        );
        self.emit(trade, out, stage, price, detail, now);
    }

    fn close(
        &self,
        trade: &mut Trade,
        out: &mut TickOutcome,
        price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) {
        out.closed = true;
        out.exit_price = Some(price);
        out.exit_reason = Some(reason);
        let detail = format!("Closed ({}) @ {} | PnL {:.2}$", reason, price, trade.current_pnl_usd);
        self.emit(trade, out, reason.closing_stage(), price, detail, now);
    }

    fn emit(
        &self,
        trade: &mut Trade,
        out: &mut TickOutcome,
        stage: Stage,
        price: f64,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let event = self.record_event(trade, stage, price, detail, now);
        out.events.push(event);
        out.changed = true;
    }

    fn current_stage(&self, trade: &Trade, r: f64) -> Stage {
        if trade.trailing_active {
            return Stage::TrailingActive;
        }
        if trade.sl_moved_to_be {
            if r >= self.cfg.in_profit_r {
                return Stage::InProfit;
            }
            return Stage::BeActivated;
        }
        if r >= self.cfg.near_be_r {
            Stage::NearBe
        } else if r < self.cfg.stage_near_sl_r {
            Stage::NearSl
        } else if r < 0.0 {
            Stage::InLoss
        } else {
            Stage::EntryConfirmed
        }
    }
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}
