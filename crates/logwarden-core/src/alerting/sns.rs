//! Amazon SNS notifier

use tracing::debug;

use crate::error::{Error, Result};

use super::notifier::Notifier;

/// Longest subject SNS accepts
const MAX_SUBJECT_CHARS: usize = 100;

/// Publishes notifications to SNS topics
#[derive(Debug, Clone)]
pub struct SnsNotifier {
    client: aws_sdk_sns::Client,
}

impl SnsNotifier {
    /// Create a notifier from a shared AWS SDK config
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_sns::Client::new(sdk_config),
        }
    }

    /// Create a notifier from an existing SNS client
    pub fn from_client(client: aws_sdk_sns::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Notifier for SnsNotifier {
    async fn publish(&self, target: &str, subject: &str, body: &str) -> Result<String> {
        let output = self
            .client
            .publish()
            .topic_arn(target)
            .subject(sns_subject(subject))
            .message(body)
            .send()
            .await
            .map_err(|e| Error::notify(format!("SNS publish to {target}: {e}")))?;

        let message_id = output.message_id().unwrap_or_default().to_string();
        debug!(topic = target, message_id = %message_id, "SNS publish result");
        Ok(message_id)
    }

    fn channel_name(&self) -> &str {
        "sns"
    }
}

/// Subjects must be at most 100 printable characters without line breaks
fn sns_subject(subject: &str) -> String {
    subject
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(MAX_SUBJECT_CHARS)
        .collect()
}
