//! Monitor event stream.
//!
//! Consumers subscribe through a bounded channel; a slow consumer never
//! stalls the fetch loop, events are dropped instead and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::alerts::Alert;
use crate::Quote;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A watched symbol's price moved since the last stored observation.
    QuoteChanged {
        quote: Quote,
        previous: Option<Quote>,
    },
    /// The calendar transitioned closed -> open.
    MarketOpened,
    /// The calendar transitioned open -> closed.
    MarketClosed,
    /// A threshold alert fired.
    Alert(Alert),
}

/// Non-blocking event publisher.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<MonitorEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Publish without waiting; a full channel drops the event.
    pub fn publish(&self, event: MonitorEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, event = ?event_name(&event), "event channel full, dropping event");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn event_name(event: &MonitorEvent) -> &'static str {
    match event {
        MonitorEvent::QuoteChanged { .. } => "quote_changed",
        MonitorEvent::MarketOpened => "market_opened",
        MonitorEvent::MarketClosed => "market_closed",
        MonitorEvent::Alert(_) => "alert",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_in_order() {
        let (sender, mut rx) = EventSender::channel(4);
        sender.publish(MonitorEvent::MarketOpened);
        sender.publish(MonitorEvent::MarketClosed);

        assert_eq!(rx.recv().await, Some(MonitorEvent::MarketOpened));
        assert_eq!(rx.recv().await, Some(MonitorEvent::MarketClosed));
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sender, _rx) = EventSender::channel(1);
        sender.publish(MonitorEvent::MarketOpened);
        sender.publish(MonitorEvent::MarketClosed);

        assert_eq!(sender.dropped_count(), 1);
    }
}
