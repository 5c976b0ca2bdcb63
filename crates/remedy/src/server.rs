//! HTTP server for the remediation engine.
//!
//! Provides REST API endpoints for:
//! - Manual remediation actions (restart, scale, rollout restart)
//! - Anomaly event intake feeding the policy engine
//! - Action history queries and health checks

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use notify::{Notifier, NotifyEvent, Severity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dispatcher::ActionDispatcher;
use crate::error::EngineError;
use crate::executor::ExecutorSet;
use crate::ledger::{ActionLedger, HistoryFilter};
use crate::policy::{Decision, PolicyEngine};
use crate::registry::TargetRegistry;
use crate::types::{
    ActionRequest, ActionStatus, ActionType, AnomalyEvent, AnomalySeverity, Platform, ScaleSpec,
    ServiceTarget, TriggeredBy,
};

/// Default page size for history queries.
const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Largest accepted page size for history queries.
const MAX_HISTORY_LIMIT: usize = 1000;

/// Server state shared across handlers.
pub struct AppState {
    /// Engine configuration
    pub config: Arc<EngineConfig>,
    /// Service target registry
    pub registry: Arc<TargetRegistry>,
    /// Policy engine
    pub policy: PolicyEngine,
    /// Action ledger
    pub ledger: Arc<dyn ActionLedger>,
    /// Action dispatcher
    pub dispatcher: ActionDispatcher,
    /// Notification dispatcher
    pub notifier: Arc<Notifier>,
}

impl AppState {
    /// Assemble the server state from its components.
    #[must_use]
    pub fn new(
        config: Arc<EngineConfig>,
        registry: Arc<TargetRegistry>,
        policy: PolicyEngine,
        ledger: Arc<dyn ActionLedger>,
        executors: ExecutorSet,
        notifier: Arc<Notifier>,
    ) -> Self {
        let dispatcher = ActionDispatcher::new(
            config.clone(),
            ledger.clone(),
            executors,
            notifier.clone(),
        );
        Self {
            config,
            registry,
            policy,
            ledger,
            dispatcher,
            notifier,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/v1/restart_deployment", post(restart_handler))
        .route("/api/v1/scale_deployment", post(scale_handler))
        .route("/api/v1/rollout_restart", post(rollout_restart_handler))
        .route("/api/v1/anomaly_events", post(anomaly_event_handler))
        .route("/api/v1/reload_targets", post(reload_targets_handler))
        .route("/api/v1/actions", get(actions_handler))
        .route("/api/v1/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve.
pub async fn run_server(state: Arc<AppState>, addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Remediation engine listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Request/Response types
// ============================================================================

/// Error envelope for all failure responses.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    detail: String,
}

/// Body for `POST /api/v1/restart_deployment`.
#[derive(Debug, Deserialize)]
pub struct RestartDeploymentRequest {
    pub service_name: String,
    pub target_type: Platform,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body for `POST /api/v1/scale_deployment`.
#[derive(Debug, Deserialize)]
pub struct ScaleDeploymentRequest {
    pub service_name: String,
    pub target_type: Platform,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub min_replicas: Option<u32>,
    #[serde(default)]
    pub max_replicas: Option<u32>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body for `POST /api/v1/rollout_restart`.
#[derive(Debug, Deserialize)]
pub struct RolloutRestartRequest {
    pub service_name: String,
    pub target_type: Platform,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Query parameters for `GET /api/v1/actions`.
#[derive(Debug, Default, Deserialize)]
pub struct ActionsQuery {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub status: Option<ActionStatus>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Response for the anomaly intake endpoint.
#[derive(Debug, Serialize)]
struct DecisionResponse {
    decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proposed: Option<ActionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<crate::types::ActionRecord>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Service banner.
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "remedy",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

/// Health check.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "remedy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    }))
}

/// Restart a deployment.
async fn restart_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RestartDeploymentRequest>,
) -> Response {
    info!(
        service = %body.service_name,
        target_type = %body.target_type,
        "Restart deployment request"
    );

    let target = match resolve_target(
        &state,
        &body.service_name,
        body.target_type,
        body.cluster_name.or(body.region),
        body.namespace,
    )
    .await
    {
        Ok(target) => target,
        Err(e) => return engine_error_response(&e),
    };

    let request = ActionRequest {
        service_name: body.service_name,
        action_type: ActionType::Restart,
        target,
        reason: body.reason,
        triggered_by: TriggeredBy::Manual,
        scale: None,
    };

    dispatch_response(&state, request).await
}

/// Scale a deployment.
async fn scale_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScaleDeploymentRequest>,
) -> Response {
    info!(
        service = %body.service_name,
        target_type = %body.target_type,
        "Scale deployment request"
    );

    let target = match resolve_target(
        &state,
        &body.service_name,
        body.target_type,
        body.cluster_name.or(body.region),
        body.namespace,
    )
    .await
    {
        Ok(target) => target,
        Err(e) => return engine_error_response(&e),
    };

    let scale = match scale_spec_from_parts(body.replicas, body.min_replicas, body.max_replicas) {
        Ok(spec) => spec,
        Err(e) => return engine_error_response(&e),
    };

    let request = ActionRequest {
        service_name: body.service_name,
        action_type: ActionType::Scale,
        target,
        reason: body.reason,
        triggered_by: TriggeredBy::Manual,
        scale: Some(scale),
    };

    dispatch_response(&state, request).await
}

/// Rollout restart a deployment (Kubernetes only).
async fn rollout_restart_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RolloutRestartRequest>,
) -> Response {
    info!(
        service = %body.service_name,
        target_type = %body.target_type,
        "Rollout restart request"
    );

    let target = match resolve_target(
        &state,
        &body.service_name,
        body.target_type,
        body.cluster_name,
        body.namespace,
    )
    .await
    {
        Ok(target) => target,
        Err(e) => return engine_error_response(&e),
    };

    let request = ActionRequest {
        service_name: body.service_name,
        action_type: ActionType::RolloutRestart,
        target,
        reason: body.reason,
        triggered_by: TriggeredBy::Manual,
        scale: None,
    };

    dispatch_response(&state, request).await
}

/// Anomaly event intake: evaluate policy and auto-dispatch when allowed.
async fn anomaly_event_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<AnomalyEvent>,
) -> Response {
    info!(
        service = %event.service_name,
        metric = %event.metric_name,
        severity = event.severity.as_str(),
        score = event.anomaly_score,
        "Anomaly event received"
    );

    let Some(target) = state.registry.resolve(&event.service_name).await else {
        return (
            StatusCode::OK,
            Json(DecisionResponse {
                decision: "ignore",
                reason: Some(format!(
                    "service {} is not registered",
                    event.service_name
                )),
                proposed: None,
                record: None,
            }),
        )
            .into_response();
    };

    match state.policy.evaluate(&event, &target) {
        Decision::Ignore { reason } => (
            StatusCode::OK,
            Json(DecisionResponse {
                decision: "ignore",
                reason: Some(reason),
                proposed: None,
                record: None,
            }),
        )
            .into_response(),

        Decision::RequireApproval(request) => {
            state.notifier.notify(incident_event(&event, "requires operator approval"));
            (
                StatusCode::OK,
                Json(DecisionResponse {
                    decision: "require_approval",
                    reason: None,
                    proposed: Some(request),
                    record: None,
                }),
            )
                .into_response()
        }

        Decision::AutoAct(request) => match state.dispatcher.dispatch(request).await {
            Ok(record) => (
                StatusCode::OK,
                Json(DecisionResponse {
                    decision: "auto",
                    reason: None,
                    proposed: None,
                    record: Some(record),
                }),
            )
                .into_response(),
            Err(e) => engine_error_response(&e),
        },
    }
}

/// Reload the target registry from its backing file.
async fn reload_targets_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.reload().await {
        Ok(count) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "targets": count })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Target registry reload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    status: "error",
                    detail: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Query action history.
async fn actions_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActionsQuery>,
) -> Response {
    let filter = HistoryFilter {
        service: query.service,
        status: query.status,
        since: query.since,
        until: query.until,
        before: query.before,
        limit: query
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT),
    };

    let records = state.ledger.history(&filter).await;
    Json(records).into_response()
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolve a service against the registry, applying per-request overrides.
async fn resolve_target(
    state: &AppState,
    service_name: &str,
    requested_platform: Platform,
    cluster_or_region: Option<String>,
    namespace: Option<String>,
) -> Result<ServiceTarget, EngineError> {
    let mut target = state
        .registry
        .resolve(service_name)
        .await
        .ok_or_else(|| EngineError::UnknownService(service_name.to_string()))?;

    if target.platform != requested_platform {
        return Err(EngineError::Validation(format!(
            "{service_name} is registered as {}, not {requested_platform}",
            target.platform
        )));
    }

    if let Some(cluster_or_region) = cluster_or_region {
        target.cluster_or_region = cluster_or_region;
    }
    if namespace.is_some() {
        target.namespace = namespace;
    }

    Ok(target)
}

/// Build a `ScaleSpec` from the request's optional fields. Exactly one of
/// the two parameter shapes must be present.
fn scale_spec_from_parts(
    replicas: Option<u32>,
    min_replicas: Option<u32>,
    max_replicas: Option<u32>,
) -> Result<ScaleSpec, EngineError> {
    match (replicas, min_replicas, max_replicas) {
        (Some(replicas), None, None) => Ok(ScaleSpec::Fixed { replicas }),
        (None, Some(min_replicas), Some(max_replicas)) => Ok(ScaleSpec::Bounds {
            min_replicas,
            max_replicas,
        }),
        (None, None, None) => Err(EngineError::Validation(
            "scale requires replicas or min_replicas/max_replicas".to_string(),
        )),
        _ => Err(EngineError::Validation(
            "provide either replicas or both min_replicas and max_replicas".to_string(),
        )),
    }
}

/// Dispatch a request and map the result to an HTTP response. Executor
/// failures are reflected in the record body, not the HTTP status.
async fn dispatch_response(state: &AppState, request: ActionRequest) -> Response {
    match state.dispatcher.dispatch(request).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

/// Map an engine error to the HTTP error envelope.
fn engine_error_response(err: &EngineError) -> Response {
    let status = match err {
        EngineError::Validation(_) | EngineError::UnknownService(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::Conflict { .. } => StatusCode::CONFLICT,
        EngineError::Unsupported { .. } => StatusCode::BAD_REQUEST,
        EngineError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorBody {
            status: "error",
            detail: err.to_string(),
        }),
    )
        .into_response()
}

/// Build the incident notification for an anomaly event.
fn incident_event(event: &AnomalyEvent, note: &str) -> NotifyEvent {
    let severity = match event.severity {
        AnomalySeverity::Critical => Severity::Critical,
        AnomalySeverity::High => Severity::Warning,
        AnomalySeverity::Medium | AnomalySeverity::Low => Severity::Info,
    };

    NotifyEvent::Incident {
        incident_id: Uuid::new_v4().to_string(),
        service_name: event.service_name.clone(),
        severity,
        title: format!("Anomaly on {}", event.service_name),
        description: format!(
            "Anomaly detected on metric {} ({}); {note}",
            event.metric_name,
            event.severity.as_str()
        ),
        metric_name: Some(event.metric_name.clone()),
        anomaly_score: Some(event.anomaly_score),
        expected_value: Some(event.expected_value),
        actual_value: Some(event.actual_value),
        metadata: std::collections::HashMap::new(),
        timestamp: event.detected_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_spec_from_parts() {
        assert!(matches!(
            scale_spec_from_parts(Some(3), None, None),
            Ok(ScaleSpec::Fixed { replicas: 3 })
        ));
        assert!(matches!(
            scale_spec_from_parts(None, Some(1), Some(5)),
            Ok(ScaleSpec::Bounds {
                min_replicas: 1,
                max_replicas: 5
            })
        ));
        assert!(scale_spec_from_parts(None, None, None).is_err());
        assert!(scale_spec_from_parts(Some(3), Some(1), Some(5)).is_err());
        assert!(scale_spec_from_parts(None, Some(1), None).is_err());
    }
}
