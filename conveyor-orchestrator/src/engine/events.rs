//! Execution event fan-out

use conveyor_core::domain::event::ExecutionEvent;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Broadcasts execution events to every subscriber.
///
/// Each subscriber owns an unbounded queue, so a slow consumer never
/// drops events and never blocks the scheduler.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ExecutionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Deliver `event` to all live subscribers, forgetting closed ones
    pub fn publish(&self, event: ExecutionEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::execution::ExecutionStatus;
    use uuid::Uuid;

    fn event(id: i64) -> ExecutionEvent {
        ExecutionEvent {
            execution_id: id,
            pipeline_id: Uuid::new_v4(),
            pipeline_name: "p".to_string(),
            status: ExecutionStatus::Failed,
            failing_stage: Some("Build".to_string()),
            failing_action: None,
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(event(1));
        bus.publish(event(2));

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.recv().await.unwrap().execution_id, 1);
            assert_eq!(rx.recv().await.unwrap().execution_id, 2);
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);

        bus.publish(event(7));

        assert_eq!(kept.recv().await.unwrap().execution_id, 7);
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }
}
