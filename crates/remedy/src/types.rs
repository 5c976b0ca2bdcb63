//! Core data model for the remediation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of an anomaly event, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Anomaly signal produced by an external scorer.
///
/// Immutable; consumed once by the policy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// Name of the affected service
    pub service_name: String,
    /// Metric that triggered the anomaly
    pub metric_name: String,
    /// Anomaly detection score (0-1)
    pub anomaly_score: f64,
    /// Severity assigned by the scorer
    pub severity: AnomalySeverity,
    /// Expected metric value
    pub expected_value: f64,
    /// Actual observed metric value
    pub actual_value: f64,
    /// When the anomaly was detected
    pub detected_at: DateTime<Utc>,
}

/// Orchestration backend a service is deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    /// Kubernetes cluster (GKE)
    #[serde(rename = "gke", alias = "kubernetes")]
    Kubernetes,
    /// Serverless container platform (Cloud Run)
    #[serde(rename = "cloud_run")]
    CloudRun,
}

impl Platform {
    /// Wire name for this platform.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Kubernetes => "gke",
            Self::CloudRun => "cloud_run",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment coordinates for a service.
///
/// Read-only at dispatch time; replaced wholesale by registry reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    /// Service name (registry key)
    pub service_name: String,
    /// Backend platform
    pub platform: Platform,
    /// Cluster name (Kubernetes) or region (Cloud Run)
    pub cluster_or_region: String,
    /// Kubernetes namespace (Kubernetes targets only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Type of remediation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Restart,
    Scale,
    RolloutRestart,
}

impl ActionType {
    /// Wire name for this action type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Scale => "scale",
            Self::RolloutRestart => "rollout_restart",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an action was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Auto,
    Manual,
}

impl TriggeredBy {
    /// Wire name for this trigger source.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// Scale parameters. Exactly one shape is valid per platform: fixed replica
/// counts for Kubernetes, autoscaling bounds for Cloud Run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScaleSpec {
    Fixed {
        replicas: u32,
    },
    Bounds {
        min_replicas: u32,
        max_replicas: u32,
    },
}

/// A validated remediation request, target already resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Service to act on
    pub service_name: String,
    /// Action to perform
    pub action_type: ActionType,
    /// Resolved deployment coordinates
    pub target: ServiceTarget,
    /// Free-text reason for the action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// How the action was triggered
    pub triggered_by: TriggeredBy,
    /// Scale parameters (scale actions only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleSpec>,
}

impl ActionRequest {
    /// Single-flight lock key for this request.
    #[must_use]
    pub fn key(&self) -> ActionKey {
        (self.service_name.clone(), self.action_type)
    }
}

/// Single-flight lock key: at most one non-terminal record per key.
pub type ActionKey = (String, ActionType);

/// Lifecycle state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ActionStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether a transition to `next` is allowed. Status is monotonic:
    /// pending -> running -> {succeeded | failed}, never reversed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending | Self::Running, Self::Succeeded | Self::Failed)
        )
    }

    /// Wire name for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ledger's unit of truth: one record per action request, carried from
/// `pending` to a terminal state. Append-only; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Unique, immutable action id
    pub action_id: Uuid,
    /// The originating request
    #[serde(flatten)]
    pub request: ActionRequest,
    /// Current lifecycle state
    pub status: ActionStatus,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Outcome or error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
    /// Number of executor attempts made
    pub attempt_count: u32,
}

impl ActionRecord {
    /// Create a new pending record for a request.
    #[must_use]
    pub fn new(request: ActionRequest) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            request,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            result_message: None,
            attempt_count: 0,
        }
    }

    /// Single-flight lock key for this record.
    #[must_use]
    pub fn key(&self) -> ActionKey {
        self.request.key()
    }
}
