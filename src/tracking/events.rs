use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::{Trade, TradeEvent};

/// Listener for trade lifecycle activity. Observers run inline on the
/// daemon loop and must not block.
pub trait TradeObserver: Send + Sync {
    fn on_open(&self, _trade: &Trade) {}
    fn on_event(&self, trade: &Trade, event: &TradeEvent);
    fn on_close(&self, _trade: &Trade) {}
}

#[derive(Default, Clone)]
pub struct EventBus {
    observers: Vec<Arc<dyn TradeObserver>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn TradeObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn publish_open(&self, trade: &Trade) {
        for obs in &self.observers {
            obs.on_open(trade);
        }
    }

    pub fn publish(&self, trade: &Trade, event: &TradeEvent) {
        for obs in &self.observers {
            obs.on_event(trade, event);
        }
    }

    pub fn publish_close(&self, trade: &Trade) {
        for obs in &self.observers {
            obs.on_close(trade);
        }
    }
}

/// Writes lifecycle activity to the tracing log.
pub struct LogObserver;

impl TradeObserver for LogObserver {
    fn on_open(&self, trade: &Trade) {
        info!(
            "OPEN {} {} {} @ {} | SL {} | TP {} [{}]",
            trade.id, trade.direction, trade.symbol, trade.entry_price, trade.stop_loss, trade.tp1, trade.strategy_id
        );
    }

    fn on_event(&self, trade: &Trade, event: &TradeEvent) {
        debug!("{} {} @ {}: {}", trade.id, event.stage, event.price, event.detail);
    }

    fn on_close(&self, trade: &Trade) {
        info!(
            "CLOSE {} {} @ {} ({}) | {:+.1} pips {:+.2}$",
            trade.id,
            trade.symbol,
            trade.exit_price.unwrap_or(trade.current_price),
            trade.exit_reason.map(|r| r.as_str()).unwrap_or("unknown"),
            trade.pnl_pips,
            trade.pnl_usd
        );
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusMessage {
    Opened { trade: Trade },
    Event { trade_id: String, strategy_id: String, symbol: String, event: TradeEvent },
    Closed { trade: Trade },
}

/// Forwards activity to an async consumer such as an alert worker.
/// Messages are dropped with a warning when the consumer falls behind.
pub struct ChannelObserver {
    tx: mpsc::Sender<BusMessage>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<BusMessage>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    fn send(&self, msg: BusMessage) {
        if let Err(e) = self.tx.try_send(msg) {
            warn!("Dropping bus message: {}", e);
        }
    }
}

impl TradeObserver for ChannelObserver {
    fn on_open(&self, trade: &Trade) {
        self.send(BusMessage::Opened { trade: trade.clone() });
    }

    fn on_event(&self, trade: &Trade, event: &TradeEvent) {
        self.send(BusMessage::Event {
            trade_id: trade.id.clone(),
            strategy_id: trade.strategy_id.clone(),
            symbol: trade.symbol.clone(),
            event: event.clone(),
        });
    }

    fn on_close(&self, trade: &Trade) {
        self.send(BusMessage::Closed { trade: trade.clone() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, ExitReason, Stage};
    use crate::test_helpers::{make_trade, t0};

    #[tokio::test]
    async fn channel_observer_forwards_in_order() {
        let (observer, mut rx) = ChannelObserver::channel(8);
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(LogObserver));
        bus.subscribe(Arc::new(observer));
        assert_eq!(bus.len(), 2);

        let mut trade = make_trade("a", Direction::Long, 100.0, 90.0, &[120.0]);
        bus.publish_open(&trade);
        let event = TradeEvent::new(t0(), Stage::NearBe, 105.0, "halfway");
        bus.publish(&trade, &event);
        trade.finalize(120.0, ExitReason::Tp, t0(), 1.0, 1.0);
        bus.publish_close(&trade);

        assert!(matches!(rx.recv().await, Some(BusMessage::Opened { .. })));
        match rx.recv().await {
            Some(BusMessage::Event { event: e, trade_id, .. }) => {
                assert_eq!(e.stage, Stage::NearBe);
                assert_eq!(trade_id, trade.id);
            }
            other => panic!("unexpected {:?}", other),
        }
        match rx.recv().await {
            Some(BusMessage::Closed { trade: t }) => assert_eq!(t.exit_reason, Some(ExitReason::Tp)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn full_channel_does_not_block() {
        let (observer, _rx) = ChannelObserver::channel(1);
        let trade = make_trade("a", Direction::Long, 100.0, 90.0, &[120.0]);
        observer.on_open(&trade);
        observer.on_open(&trade);
    }
}
