//! Notification event types for the remediation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity levels for alerts and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
    /// Critical - immediate action required
    Critical,
}

impl Severity {
    /// Get the attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Info => "#3498db",     // Blue
            Self::Warning => "#f39c12",  // Orange
            Self::Critical => "#e74c3c", // Red
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// An anomaly was detected on a service
    Incident {
        incident_id: String,
        service_name: String,
        severity: Severity,
        title: String,
        description: String,
        #[serde(default)]
        metric_name: Option<String>,
        #[serde(default)]
        anomaly_score: Option<f64>,
        #[serde(default)]
        expected_value: Option<f64>,
        #[serde(default)]
        actual_value: Option<f64>,
        #[serde(default)]
        metadata: HashMap<String, String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A remediation action ran against a service
    Action {
        action_id: String,
        service_name: String,
        action_type: String,
        status: String,
        platform: String,
        reason: String,
        triggered_by: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// A service health state change
    HealthAlert {
        service_name: String,
        status: String,
        message: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get a short title for this event type.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::Incident {
                title, service_name, ..
            } => format!("Incident: {title} ({service_name})"),
            Self::Action {
                action_type,
                service_name,
                status,
                ..
            } => format!("Action {action_type} {status}: {service_name}"),
            Self::HealthAlert {
                service_name,
                status,
                ..
            } => format!("Health {status}: {service_name}"),
        }
    }

    /// Get the severity/color for this event.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Incident { severity, .. } => *severity,
            Self::Action { status, .. } => {
                if status == "failed" {
                    Severity::Warning
                } else {
                    Severity::Info
                }
            }
            Self::HealthAlert { status, .. } => {
                if status == "healthy" {
                    Severity::Info
                } else {
                    Severity::Warning
                }
            }
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Incident { timestamp, .. }
            | Self::Action { timestamp, .. }
            | Self::HealthAlert { timestamp, .. } => *timestamp,
        }
    }
}
