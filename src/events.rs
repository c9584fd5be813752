use tokio::sync::broadcast;

use crate::models::{Alert, Heartbeat, MonitoringState};

/// Everything the presentation layer can observe. Subscribers register
/// explicitly through [`EventSink::subscribe`]; nothing is emitted
/// ambiently.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    DataCollected(Box<MonitoringState>),
    Alert(Alert),
    Heartbeat(Heartbeat),
    MonitoringStarted,
    MonitoringStopped,
}

/// Broadcast fan-out for monitor events. Emitting with no subscribers is
/// fine; slow subscribers lag and lose oldest events rather than blocking
/// the scheduler.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: MonitorEvent) {
        // Err means no live subscribers; monitoring does not care.
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}
