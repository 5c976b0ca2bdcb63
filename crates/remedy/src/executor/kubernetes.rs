//! Kubernetes target executor.
//!
//! Operates on Deployments through the Kubernetes API:
//! - restart: delete the deployment's pods so the controller recreates them
//!   with the current spec (desired replica count unchanged)
//! - scale: merge-patch `spec.replicas`
//! - rollout restart: merge-patch the pod template's restartedAt annotation,
//!   the same mechanism `kubectl rollout restart` uses

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

use super::{ExecOutcome, TargetExecutor};
use crate::error::ExecutorError;
use crate::types::{ScaleSpec, ServiceTarget};

/// Executor for Kubernetes (GKE) deployments.
pub struct KubernetesExecutor {
    client: Client,
    default_namespace: String,
}

impl KubernetesExecutor {
    /// Create an executor with an existing client.
    #[must_use]
    pub fn new(client: Client, default_namespace: impl Into<String>) -> Self {
        Self {
            client,
            default_namespace: default_namespace.into(),
        }
    }

    /// Create an executor from the ambient kubeconfig / in-cluster config.
    pub async fn try_default(default_namespace: impl Into<String>) -> Result<Self, ExecutorError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ExecutorError::Unreachable(format!("Kubernetes config: {e}")))?;
        Ok(Self::new(client, default_namespace))
    }

    fn namespace<'a>(&'a self, target: &'a ServiceTarget) -> &'a str {
        target
            .namespace
            .as_deref()
            .unwrap_or(&self.default_namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Build the label selector string from a deployment's spec selector.
    fn label_selector(deployment: &Deployment) -> Result<String, ExecutorError> {
        let labels = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.match_labels.as_ref())
            .ok_or_else(|| ExecutorError::Api {
                code: 500,
                message: "Deployment has no label selector".to_string(),
            })?;

        Ok(labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","))
    }

    fn map_kube_error(err: kube::Error) -> ExecutorError {
        match err {
            kube::Error::Api(ae) => ExecutorError::Api {
                code: ae.code,
                message: ae.message,
            },
            other => ExecutorError::Unreachable(other.to_string()),
        }
    }
}

#[async_trait]
impl TargetExecutor for KubernetesExecutor {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn restart(
        &self,
        target: &ServiceTarget,
        reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError> {
        let namespace = self.namespace(target);
        info!(
            service = %target.service_name,
            cluster = %target.cluster_or_region,
            namespace = %namespace,
            reason = reason.unwrap_or("none"),
            "Restarting deployment by pod replacement"
        );

        let deployment = self
            .deployments(namespace)
            .get(&target.service_name)
            .await
            .map_err(Self::map_kube_error)?;
        let selector = Self::label_selector(&deployment)?;

        let pods = self.pods(namespace);
        let lp = ListParams::default().labels(&selector);
        let list = pods.list(&lp).await.map_err(Self::map_kube_error)?;
        let pod_count = list.items.len();

        let dp = DeleteParams::default();
        for pod in &list.items {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            match pods.delete(name, &dp).await {
                Ok(_) => debug!(pod = name, "Pod deletion requested"),
                // Pod already gone (e.g. replaced out-of-band); restart is
                // idempotent, keep going.
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    debug!(pod = name, "Pod already deleted");
                }
                Err(e) => return Err(Self::map_kube_error(e)),
            }
        }

        Ok(ExecOutcome::ok(format!(
            "Restarted deployment {}: {pod_count} pods replaced",
            target.service_name
        )))
    }

    async fn scale(
        &self,
        target: &ServiceTarget,
        spec: ScaleSpec,
        reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError> {
        let ScaleSpec::Fixed { replicas } = spec else {
            // Shape validation happens in the dispatcher; reaching this
            // directly with bounds is a caller bug.
            return Err(ExecutorError::Unsupported);
        };

        let namespace = self.namespace(target);
        info!(
            service = %target.service_name,
            namespace = %namespace,
            replicas,
            reason = reason.unwrap_or("none"),
            "Scaling deployment"
        );

        let patch = json!({ "spec": { "replicas": replicas } });
        self.deployments(namespace)
            .patch(
                &target.service_name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(Self::map_kube_error)?;

        Ok(ExecOutcome::ok(format!(
            "Scaled deployment {} to {replicas} replicas",
            target.service_name
        )))
    }

    async fn rollout_restart(
        &self,
        target: &ServiceTarget,
        reason: Option<&str>,
    ) -> Result<ExecOutcome, ExecutorError> {
        let namespace = self.namespace(target);
        info!(
            service = %target.service_name,
            namespace = %namespace,
            reason = reason.unwrap_or("none"),
            "Rolling restart of deployment"
        );

        let patch = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            "kubectl.kubernetes.io/restartedAt": Utc::now().to_rfc3339()
                        }
                    }
                }
            }
        });
        self.deployments(namespace)
            .patch(
                &target.service_name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(Self::map_kube_error)?;

        Ok(ExecOutcome::ok(format!(
            "Rollout restart initiated for deployment {}",
            target.service_name
        )))
    }
}
