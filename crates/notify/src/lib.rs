//! Notification system for remediation engine events.
//!
//! This crate provides a fire-and-forget notification system for sending
//! incident, action, and health alerts to external messaging channels when
//! the remediation engine acts on a service.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notifier, NotifyEvent};
//!
//! // Create notifier from environment variables
//! let notifier = Notifier::from_env();
//!
//! // Send a notification (fire-and-forget)
//! notifier.notify(NotifyEvent::HealthAlert {
//!     service_name: "payment-api".to_string(),
//!     status: "degraded".to_string(),
//!     message: "Stale action force-failed".to_string(),
//!     timestamp: chrono::Utc::now(),
//! });
//! ```
//!
//! # Configuration
//!
//! The notifier is configured via environment variables:
//!
//! - `SLACK_WEBHOOK_URL`: Slack webhook URL (enables Slack channel)
//! - `NOTIFY_DISABLED`: Set to "true" to disable all notifications
//!
//! # Architecture
//!
//! The notification system uses a trait-based channel design for extensibility:
//!
//! - [`NotifyChannel`] trait defines the interface for notification channels
//! - [`SlackChannel`] implements Slack webhook notifications
//! - [`Notifier`] dispatches events to all enabled channels
//!
//! Delivery is at-most-once: each attempt is bounded by a fixed timeout and
//! never retried. Failures are logged and reported as `false`, never raised.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{NotifyEvent, Severity};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Upper bound on a single delivery attempt.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Central notification dispatcher.
///
/// The `Notifier` manages multiple notification channels and dispatches
/// events to all enabled channels in a fire-and-forget manner.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a new notifier from environment variables.
    ///
    /// This will auto-detect which channels are configured based on
    /// environment variables and enable them accordingly.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self {
                channels: vec![],
                disabled: true,
            };
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![];

        let slack = SlackChannel::from_env();
        if slack.enabled() {
            info!("Slack notifications enabled");
            channels.push(Arc::new(slack));
        }

        if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Send a notification to all enabled channels (fire-and-forget).
    ///
    /// This method spawns an async task and returns immediately. Errors are
    /// logged but not propagated to the caller.
    pub fn notify(&self, event: NotifyEvent) {
        if !self.has_channels() {
            debug!("No channels configured, skipping event");
            return;
        }

        let channels = self.channels.clone();
        tokio::spawn(async move {
            deliver_to_channels(&channels, &event).await;
        });
    }

    /// Deliver an event to all enabled channels and wait for the outcome.
    ///
    /// Each channel delivery is bounded by a fixed timeout and attempted at
    /// most once. Returns `true` only if every enabled channel accepted the
    /// event; `false` on disabled configuration, timeout, or transport error.
    /// Never panics or propagates an error to the caller.
    pub async fn deliver(&self, event: &NotifyEvent) -> bool {
        if !self.has_channels() {
            debug!("Notifications disabled, delivery skipped");
            return false;
        }

        deliver_to_channels(&self.channels, event).await
    }
}

/// Deliver an event to each channel, logging failures. Returns `true` if all
/// enabled channels succeeded.
async fn deliver_to_channels(channels: &[Arc<dyn NotifyChannel>], event: &NotifyEvent) -> bool {
    let mut all_ok = true;

    for channel in channels {
        let channel_name = channel.name();

        if !channel.enabled() {
            debug!(channel = channel_name, "Channel disabled, skipping");
            continue;
        }

        let result = tokio::time::timeout(SEND_TIMEOUT, channel.send(event)).await;
        match result {
            Ok(Ok(())) => {
                debug!(channel = channel_name, "Notification sent");
            }
            Ok(Err(e)) => {
                error!(
                    channel = channel_name,
                    error = %e,
                    "Failed to send notification"
                );
                all_ok = false;
            }
            Err(_) => {
                error!(
                    channel = channel_name,
                    timeout_secs = SEND_TIMEOUT.as_secs(),
                    "Notification delivery timed out"
                );
                all_ok = false;
            }
        }
    }

    all_ok
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn health_event() -> NotifyEvent {
        NotifyEvent::HealthAlert {
            service_name: "user-auth".to_string(),
            status: "degraded".to_string(),
            message: "Pod restarts climbing".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_disabled_notifier() {
        let notifier = Notifier::disabled();
        assert!(!notifier.has_channels());
        assert_eq!(notifier.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_deliver_disabled_returns_false() {
        let notifier = Notifier::disabled();
        assert!(!notifier.deliver(&health_event()).await);
    }

    #[tokio::test]
    async fn test_deliver_all_channels_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let notifier =
            Notifier::with_channels(vec![Arc::new(SlackChannel::new(server.uri()))]);
        assert!(notifier.deliver(&health_event()).await);
    }

    #[tokio::test]
    async fn test_deliver_failure_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier =
            Notifier::with_channels(vec![Arc::new(SlackChannel::new(server.uri()))]);
        assert!(!notifier.deliver(&health_event()).await);
    }

    #[test]
    fn test_severity_colors() {
        assert_eq!(Severity::Info.color(), "#3498db");
        assert_eq!(Severity::Warning.color(), "#f39c12");
        assert_eq!(Severity::Critical.color(), "#e74c3c");
    }

    #[test]
    fn test_event_titles() {
        let event = NotifyEvent::Action {
            action_id: "a-1".to_string(),
            service_name: "payment-api".to_string(),
            action_type: "restart".to_string(),
            status: "succeeded".to_string(),
            platform: "gke".to_string(),
            reason: "anomaly".to_string(),
            triggered_by: "auto".to_string(),
            result: None,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(event.title(), "Action restart succeeded: payment-api");
        assert_eq!(event.severity(), Severity::Info);

        assert_eq!(health_event().severity(), Severity::Warning);
    }
}
