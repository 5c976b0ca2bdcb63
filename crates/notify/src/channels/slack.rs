//! Slack webhook notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Environment variable for Slack webhook URL.
const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";

/// Slack webhook notification channel.
pub struct SlackChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a new Slack channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_SLACK_WEBHOOK_URL).ok();

        if webhook_url.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a Slack channel with a specific webhook URL.
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url: Some(webhook_url),
            client: reqwest::Client::new(),
        }
    }

    /// Format an event as a Slack webhook payload.
    fn format_payload(event: &NotifyEvent) -> SlackPayload {
        let mut fields = vec![];
        for (name, value) in Self::format_fields(event) {
            fields.push(SlackField {
                title: name,
                value,
                short: true,
            });
        }

        let attachment = SlackAttachment {
            fallback: event.title(),
            color: event.severity().color().to_string(),
            author_name: Some("Remedy".to_string()),
            title: event.title(),
            text: Self::format_description(event),
            fields,
            footer: Some(format!(
                "{} | {}",
                event.severity().as_str(),
                event.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
            )),
            ts: Some(event.timestamp().timestamp()),
        };

        SlackPayload {
            attachments: vec![attachment],
        }
    }

    /// Format the description for an event.
    fn format_description(event: &NotifyEvent) -> String {
        match event {
            NotifyEvent::Incident {
                description,
                metric_name,
                anomaly_score,
                ..
            } => {
                let mut text = description.clone();
                if let Some(metric) = metric_name {
                    text.push_str(&format!("\n*Metric:* `{metric}`"));
                }
                if let Some(score) = anomaly_score {
                    text.push_str(&format!("\n*Anomaly score:* {score:.2}"));
                }
                text
            }

            NotifyEvent::Action {
                service_name,
                action_type,
                status,
                reason,
                result,
                ..
            } => {
                let marker = if status == "failed" {
                    "❌"
                } else {
                    "✅"
                };
                let mut text = format!(
                    "{marker} `{action_type}` on `{service_name}`\n*Reason:* {reason}"
                );
                if let Some(result) = result {
                    text.push_str(&format!("\n*Result:* {result}"));
                }
                text
            }

            NotifyEvent::HealthAlert { message, .. } => message.clone(),
        }
    }

    /// Format additional fields for an event.
    fn format_fields(event: &NotifyEvent) -> Vec<(String, String)> {
        match event {
            NotifyEvent::Incident {
                incident_id,
                service_name,
                severity,
                expected_value,
                actual_value,
                metadata,
                ..
            } => {
                let mut fields = vec![
                    ("Incident ID".to_string(), incident_id.clone()),
                    ("Service".to_string(), service_name.clone()),
                    ("Severity".to_string(), severity.as_str().to_string()),
                ];
                if let (Some(expected), Some(actual)) = (expected_value, actual_value) {
                    fields.push((
                        "Expected / Actual".to_string(),
                        format!("{expected:.2} / {actual:.2}"),
                    ));
                }
                for (key, value) in metadata {
                    fields.push((key.clone(), value.clone()));
                }
                fields
            }

            NotifyEvent::Action {
                action_id,
                service_name,
                platform,
                triggered_by,
                ..
            } => vec![
                ("Action ID".to_string(), action_id.clone()),
                ("Service".to_string(), service_name.clone()),
                ("Platform".to_string(), platform.clone()),
                ("Triggered by".to_string(), triggered_by.clone()),
            ],

            NotifyEvent::HealthAlert {
                service_name,
                status,
                ..
            } => vec![
                ("Service".to_string(), service_name.clone()),
                ("Status".to_string(), status.clone()),
            ],
        }
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("SLACK_WEBHOOK_URL".to_string()))?;

        let payload = Self::format_payload(event);

        debug!(channel = "slack", event_type = ?event.title(), "Sending notification");

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if response.status().is_success() {
            debug!(channel = "slack", "Notification sent successfully");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack webhook request failed"
            );

            Err(ChannelError::Other(format!(
                "Slack returned {status}: {body}"
            )))
        }
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_name: Option<String>,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Severity;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn incident_event() -> NotifyEvent {
        NotifyEvent::Incident {
            incident_id: "inc-123".to_string(),
            service_name: "payment-api".to_string(),
            severity: Severity::Critical,
            title: "High error rate".to_string(),
            description: "Error rate exceeds 5%".to_string(),
            metric_name: Some("error_rate".to_string()),
            anomaly_score: Some(0.95),
            expected_value: Some(0.01),
            actual_value: Some(0.08),
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = SlackChannel::new(format!("{}/hook", server.uri()));
        let result = channel.send(&incident_event()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_send_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let channel = SlackChannel::new(server.uri());
        let result = channel.send(&incident_event()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_not_configured() {
        let channel = SlackChannel {
            webhook_url: None,
            client: reqwest::Client::new(),
        };
        assert!(!channel.enabled());
    }

    #[test]
    fn test_payload_formatting() {
        let payload = SlackChannel::format_payload(&incident_event());
        assert_eq!(payload.attachments.len(), 1);
        let attachment = &payload.attachments[0];
        assert_eq!(attachment.color, "#e74c3c");
        assert!(attachment.title.contains("payment-api"));
        assert!(attachment.text.contains("error_rate"));
    }
}
