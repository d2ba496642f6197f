//! Notification delivery for alerts

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::Result;
use crate::models::{NotificationEvent, NotificationKind};

use super::template::TemplateRenderer;

/// Transport that publishes a rendered message to a target
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Publish a message. Returns the transport's message id.
    async fn publish(&self, target: &str, subject: &str, body: &str) -> Result<String>;

    /// Human-readable name for this channel (e.g. "sns", "log")
    fn channel_name(&self) -> &str;
}

/// Notifier that only logs messages; used for dry runs
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, target: &str, subject: &str, body: &str) -> Result<String> {
        info!(target_topic = target, subject, body, "Dry run notification");
        Ok(format!("dry-run-{}", uuid::Uuid::new_v4()))
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

/// Result of delivering one notification
#[derive(Debug, Clone)]
pub struct NotificationResult {
    pub rule_name: String,
    pub kind: NotificationKind,
    pub channel_type: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Renders and delivers decided notifications, one task per event
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    renderer: Arc<dyn TemplateRenderer>,
    template: Arc<str>,
}

impl NotificationDispatcher {
    /// Create a dispatcher rendering every message body from `template`
    pub fn new(
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn TemplateRenderer>,
        template: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            notifier,
            renderer,
            template: template.into(),
        }
    }

    /// Render and publish a single event
    pub async fn send(&self, event: &NotificationEvent) -> NotificationResult {
        let rule = event.rule();
        let sent_at = Utc::now();

        info!(rule = %rule.name, kind = event.kind.as_str(), "Sending notification");

        let result = async {
            let body = self.renderer.render(&self.template, event)?;
            debug!(rule = %rule.name, body = %body, "Rendered message");
            self.notifier
                .publish(&rule.target, &event.subject(), &body)
                .await
        }
        .await;

        match &result {
            Ok(message_id) => {
                info!(
                    rule = %rule.name,
                    channel = self.notifier.channel_name(),
                    message_id = %message_id,
                    "Notification sent"
                );
            }
            Err(e) => {
                warn!(
                    rule = %rule.name,
                    channel = self.notifier.channel_name(),
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }

        NotificationResult {
            rule_name: rule.name.clone(),
            kind: event.kind,
            channel_type: self.notifier.channel_name().to_string(),
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
            message_id: result.ok(),
            sent_at,
        }
    }

    /// Drain the event stream, delivering every event concurrently.
    ///
    /// Returns once every delivery has finished. Failures are logged and
    /// reported, never retried.
    pub async fn dispatch(&self, mut events: mpsc::Receiver<NotificationEvent>) -> Vec<NotificationResult> {
        let mut tasks = JoinSet::new();

        while let Some(event) = events.recv().await {
            let dispatcher = self.clone();
            tasks.spawn(async move { dispatcher.send(&event).await }.in_current_span());
        }

        debug!(count = tasks.len(), "Waiting for notification deliveries");

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Notification task panicked"),
            }
        }
        results
    }
}
