//! Failure Notifier
//!
//! Listens to execution events and sends one message per failed execution
//! to a notification sink. Delivery is best effort: a failed send is logged
//! and never touches the execution.

use anyhow::Result;
use async_trait::async_trait;
use conveyor_core::domain::event::ExecutionEvent;
use conveyor_core::domain::execution::ExecutionStatus;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Destination for failure notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, recipient: &str, message: &str) -> Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, recipient: &str, message: &str) -> Result<()> {
        tracing::warn!(recipient = %recipient, "{}", message);
        Ok(())
    }
}

/// POSTs `{recipient, message}` as JSON to a webhook
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, recipient: &str, message: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({ "recipient": recipient, "message": message }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    recipient: String,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, recipient: impl Into<String>) -> Self {
        Self {
            sink,
            recipient: recipient.into(),
        }
    }

    /// Consume `events` until the bus goes away
    pub fn spawn(self, mut events: mpsc::UnboundedReceiver<ExecutionEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(message) = format_message(&event) else {
                    continue;
                };
                match self.sink.send(&self.recipient, &message).await {
                    Ok(()) => tracing::debug!(
                        execution_id = event.execution_id,
                        "Failure notification sent"
                    ),
                    Err(e) => tracing::error!(
                        execution_id = event.execution_id,
                        "Failed to send failure notification: {:#}",
                        e
                    ),
                }
            }
        })
    }
}

/// Notification text for `event`, or `None` when nothing failed
pub fn format_message(event: &ExecutionEvent) -> Option<String> {
    if event.status != ExecutionStatus::Failed {
        return None;
    }

    let mut message = format!(
        "Pipeline {} ({}) execution #{} FAILED at stage '{}'",
        event.pipeline_name,
        event.pipeline_id,
        event.execution_id,
        event.failing_stage.as_deref().unwrap_or("unknown")
    );
    if let Some(action) = &event.failing_action {
        message.push_str(&format!(" action '{}'", action));
    }
    if let Some(error) = &event.error {
        message.push_str(&format!(": {}", error));
    }
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::EventBus;
    use anyhow::bail;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recording {
        messages: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NotificationSink for Recording {
        async fn send(&self, recipient: &str, message: &str) -> Result<()> {
            self.messages
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl NotificationSink for Broken {
        async fn send(&self, _: &str, _: &str) -> Result<()> {
            bail!("smtp down")
        }
    }

    fn event(id: i64, status: ExecutionStatus) -> ExecutionEvent {
        ExecutionEvent {
            execution_id: id,
            pipeline_id: Uuid::nil(),
            pipeline_name: "shop".to_string(),
            status,
            failing_stage: Some("Build".to_string()),
            failing_action: Some("Compile".to_string()),
            error: Some("execution failed: exit 2".to_string()),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_message_names_execution_stage_and_pipeline() {
        let message = format_message(&event(12, ExecutionStatus::Failed)).unwrap();
        assert_eq!(
            message,
            "Pipeline shop (00000000-0000-0000-0000-000000000000) execution #12 FAILED at stage 'Build' action 'Compile': execution failed: exit 2"
        );
        assert!(format_message(&event(12, ExecutionStatus::Succeeded)).is_none());
        assert!(format_message(&event(12, ExecutionStatus::Stopped)).is_none());
    }

    #[tokio::test]
    async fn test_only_failures_are_sent() {
        let bus = EventBus::new();
        let sink = Arc::new(Recording::default());
        let handle = Notifier::new(sink.clone(), "oncall").spawn(bus.subscribe());

        bus.publish(event(1, ExecutionStatus::Succeeded));
        bus.publish(event(2, ExecutionStatus::Failed));
        drop(bus);
        handle.await.unwrap();

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "oncall");
        assert!(messages[0].1.contains("#2"));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_stop_the_notifier() {
        let bus = EventBus::new();
        let handle = Notifier::new(Arc::new(Broken), "oncall").spawn(bus.subscribe());

        bus.publish(event(1, ExecutionStatus::Failed));
        bus.publish(event(2, ExecutionStatus::Failed));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!handle.is_finished());
        drop(bus);
        handle.await.unwrap();
    }
}
