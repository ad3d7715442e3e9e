//! Observability sink.

use tokio::sync::mpsc;

use crate::types::RuntimeEvent;

/// Ordered event consumer for logging and UI collaborators.
///
/// `emit` must not block: the runtime calls it from the turn driver.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RuntimeEvent);
}

/// Sink that drops every event.
#[derive(Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RuntimeEvent) {}
}

/// Sink backed by an unbounded channel. Dropped receivers are tolerated:
/// emission becomes a no-op once the consumer goes away.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl ChannelSink {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::pair();
        sink.emit(RuntimeEvent::TurnStarted {
            turn_id: "t1".into(),
        });
        sink.emit(RuntimeEvent::TextDelta {
            turn_id: "t1".into(),
            delta: "hello".into(),
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            RuntimeEvent::TurnStarted { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            RuntimeEvent::TextDelta { .. }
        ));
    }

    #[tokio::test]
    async fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::pair();
        drop(rx);
        sink.emit(RuntimeEvent::TurnStarted {
            turn_id: "t1".into(),
        });
    }
}
