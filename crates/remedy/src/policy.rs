//! Policy engine.
//!
//! Decides whether an incoming anomaly event triggers an automatic
//! remediation, requires operator approval, or is ignored. Evaluation is a
//! pure function of the event, the resolved target, and the policy
//! configuration: no clocks, no I/O, no randomness.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{
    ActionRequest, ActionType, AnomalyEvent, AnomalySeverity, ScaleSpec, ServiceTarget,
    TriggeredBy,
};

/// Remediation rule for one severity level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Action to take for events at this severity
    pub action: ActionType,
    /// Scale parameters (required when `action` is `scale`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleSpec>,
}

/// Policy engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Events scoring below this are ignored outright
    #[serde(default)]
    pub min_score: f64,
    /// Force `RequireApproval` for critical events regardless of the rule table
    #[serde(default)]
    pub require_approval_for_critical: bool,
    /// Per-severity default action table; severities without a rule are ignored
    #[serde(default)]
    pub rules: BTreeMap<AnomalySeverity, PolicyRule>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            require_approval_for_critical: false,
            rules: BTreeMap::new(),
        }
    }
}

/// Outcome of evaluating an anomaly event.
#[derive(Debug, Clone)]
pub enum Decision {
    /// No action; the reason is surfaced to the caller
    Ignore { reason: String },
    /// Dispatch the request automatically
    AutoAct(ActionRequest),
    /// Hold the request for operator approval
    RequireApproval(ActionRequest),
}

impl Decision {
    /// Wire name for this decision.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore { .. } => "ignore",
            Self::AutoAct(_) => "auto",
            Self::RequireApproval(_) => "require_approval",
        }
    }
}

/// Policy engine: maps anomaly events to remediation decisions.
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    /// Create a policy engine with the given configuration.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Evaluate an anomaly event against the policy table.
    ///
    /// The target must already be resolved; unregistered services never
    /// reach this point. Deterministic: the same event and configuration
    /// always produce the same decision.
    #[must_use]
    pub fn evaluate(&self, event: &AnomalyEvent, target: &ServiceTarget) -> Decision {
        if event.anomaly_score < self.config.min_score {
            return Decision::Ignore {
                reason: format!(
                    "score {:.2} below threshold {:.2}",
                    event.anomaly_score, self.config.min_score
                ),
            };
        }

        let Some(rule) = self.config.rules.get(&event.severity) else {
            return Decision::Ignore {
                reason: format!("no rule configured for severity {}", event.severity.as_str()),
            };
        };

        let request = ActionRequest {
            service_name: event.service_name.clone(),
            action_type: rule.action,
            target: target.clone(),
            reason: Some(format!(
                "anomaly on {}: score {:.2}, severity {}",
                event.metric_name,
                event.anomaly_score,
                event.severity.as_str()
            )),
            triggered_by: TriggeredBy::Auto,
            scale: rule.scale,
        };

        if event.severity == AnomalySeverity::Critical && self.config.require_approval_for_critical
        {
            Decision::RequireApproval(request)
        } else {
            Decision::AutoAct(request)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;
    use chrono::Utc;

    fn target() -> ServiceTarget {
        ServiceTarget {
            service_name: "payment-api".to_string(),
            platform: Platform::Kubernetes,
            cluster_or_region: "prod-cluster".to_string(),
            namespace: Some("payments".to_string()),
        }
    }

    fn event(severity: AnomalySeverity, score: f64) -> AnomalyEvent {
        AnomalyEvent {
            service_name: "payment-api".to_string(),
            metric_name: "error_rate".to_string(),
            anomaly_score: score,
            severity,
            expected_value: 0.01,
            actual_value: 0.08,
            detected_at: Utc::now(),
        }
    }

    fn config() -> PolicyConfig {
        let mut rules = BTreeMap::new();
        rules.insert(
            AnomalySeverity::Critical,
            PolicyRule {
                action: ActionType::Restart,
                scale: None,
            },
        );
        rules.insert(
            AnomalySeverity::High,
            PolicyRule {
                action: ActionType::Scale,
                scale: Some(ScaleSpec::Fixed { replicas: 4 }),
            },
        );
        PolicyConfig {
            min_score: 0.5,
            require_approval_for_critical: false,
            rules,
        }
    }

    #[test]
    fn test_auto_act_critical() {
        let engine = PolicyEngine::new(config());
        let decision = engine.evaluate(&event(AnomalySeverity::Critical, 0.95), &target());

        match decision {
            Decision::AutoAct(request) => {
                assert_eq!(request.action_type, ActionType::Restart);
                assert_eq!(request.triggered_by, TriggeredBy::Auto);
            }
            other => panic!("expected AutoAct, got {other:?}"),
        }
    }

    #[test]
    fn test_require_approval_for_critical() {
        let mut cfg = config();
        cfg.require_approval_for_critical = true;
        let engine = PolicyEngine::new(cfg);

        let decision = engine.evaluate(&event(AnomalySeverity::Critical, 0.95), &target());
        assert!(matches!(decision, Decision::RequireApproval(_)));

        // High severity is unaffected by the critical-approval flag
        let decision = engine.evaluate(&event(AnomalySeverity::High, 0.9), &target());
        assert!(matches!(decision, Decision::AutoAct(_)));
    }

    #[test]
    fn test_scale_rule_carries_parameters() {
        let engine = PolicyEngine::new(config());
        let decision = engine.evaluate(&event(AnomalySeverity::High, 0.8), &target());

        match decision {
            Decision::AutoAct(request) => {
                assert_eq!(request.action_type, ActionType::Scale);
                assert_eq!(request.scale, Some(ScaleSpec::Fixed { replicas: 4 }));
            }
            other => panic!("expected AutoAct, got {other:?}"),
        }
    }

    #[test]
    fn test_ignore_below_score_threshold() {
        let engine = PolicyEngine::new(config());
        let decision = engine.evaluate(&event(AnomalySeverity::Critical, 0.3), &target());
        assert!(matches!(decision, Decision::Ignore { .. }));
    }

    #[test]
    fn test_ignore_unconfigured_severity() {
        let engine = PolicyEngine::new(config());
        let decision = engine.evaluate(&event(AnomalySeverity::Low, 0.9), &target());
        assert!(matches!(decision, Decision::Ignore { .. }));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let engine = PolicyEngine::new(config());
        let e = event(AnomalySeverity::High, 0.8);

        let Decision::AutoAct(first) = engine.evaluate(&e, &target()) else {
            panic!("expected AutoAct");
        };
        for _ in 0..10 {
            let Decision::AutoAct(request) = engine.evaluate(&e, &target()) else {
                panic!("expected AutoAct");
            };
            assert_eq!(request.action_type, first.action_type);
            assert_eq!(request.scale, first.scale);
            assert_eq!(request.reason, first.reason);
        }
    }
}
