//! Kubernetes, Tekton, ArgoCD and OpenShift access.
//!
//! Custom resources are read as [`DynamicObject`]s; the suite only needs a
//! few status fields and must not pin CRD schemas.

pub mod application;
pub mod pipeline_run;
pub mod route;

pub use application::{ApplicationHealth, Applications, application_name, application_outcome};
pub use pipeline_run::{
    ChainsSignature, Evidence, PipelineRunRef, PipelineRunStatus, PipelineRuns,
    SUPPLY_CHAIN_EVIDENCE, SupplyChainEvidence, evidence_outcome, pipeline_run_outcome,
    pipeline_run_result, signature_outcome,
};
pub use route::{Routes, route_host};

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DynamicObject};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use tracing::debug;

use crate::error::BackendError;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

const STATUS_TRUE: &str = "True";
const STATUS_FALSE: &str = "False";

/// Create a client from an optional kubeconfig path with default timeouts.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, BackendError> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, BackendError> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                BackendError::Precondition(format!(
                    "failed to read kubeconfig {}: {e}",
                    path.display()
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    BackendError::Precondition(format!("failed to load kubeconfig: {e}"))
                })?
        }
        None => Config::infer().await.map_err(|e| {
            BackendError::Precondition(format!("failed to infer kubernetes config: {e}"))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| BackendError::kube("client", e))
}

/// Fail with a precondition error unless `namespace` exists.
pub async fn ensure_namespace(client: &Client, namespace: &str) -> Result<(), BackendError> {
    let api: Api<Namespace> = Api::all(client.clone());
    match api.get_opt(namespace).await {
        Ok(Some(_)) => {
            debug!(namespace, "Namespace present");
            Ok(())
        }
        Ok(None) => Err(BackendError::Precondition(format!(
            "namespace {namespace} does not exist"
        ))),
        Err(e) => Err(BackendError::kube(format!("namespace {namespace}"), e)),
    }
}

/// Build an `ApiResource` from a known apiVersion and kind.
pub fn build_api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: plural.to_string(),
    }
}

/// Namespaced API handle for a dynamic resource.
pub(crate) fn dynamic_api(client: &Client, namespace: &str, resource: &ApiResource) -> Api<DynamicObject> {
    Api::namespaced_with(client.clone(), namespace, resource)
}

/// A `status.conditions[]` entry of the given type.
pub(crate) fn find_condition<'a>(object: &'a DynamicObject, condition_type: &str) -> Option<&'a Value> {
    object
        .data
        .get("status")?
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))
}

pub(crate) fn condition_field<'a>(condition: &'a Value, field: &str) -> Option<&'a str> {
    condition.get(field).and_then(Value::as_str)
}

#[cfg(test)]
pub(crate) fn object_from_json(value: Value) -> DynamicObject {
    serde_json::from_value(value).expect("valid dynamic object")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_api_resource_splits_group() {
        let ar = build_api_resource("tekton.dev/v1", "PipelineRun", "pipelineruns");
        assert_eq!(ar.group, "tekton.dev");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "pipelineruns");

        let core = build_api_resource("v1", "Namespace", "namespaces");
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
    }

    #[test]
    fn test_find_condition_by_type() {
        let object = object_from_json(json!({
            "apiVersion": "tekton.dev/v1",
            "kind": "PipelineRun",
            "metadata": { "name": "run", "namespace": "ns" },
            "status": {
                "conditions": [
                    { "type": "Ready", "status": "True" },
                    { "type": "Succeeded", "status": "False", "reason": "Failed" }
                ]
            }
        }));
        let condition = find_condition(&object, "Succeeded").unwrap();
        assert_eq!(condition_field(condition, "status"), Some(STATUS_FALSE));
        assert_eq!(condition_field(condition, "reason"), Some("Failed"));
        assert!(find_condition(&object, "Missing").is_none());
    }
}
