//! ArgoCD `Application` sync and health.

use kube::Client;
use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use serde_json::Value;
use tap_common::poll::PollOutcome;
use tap_common::types::Environment;

use super::{build_api_resource, dynamic_api};
use crate::check::StatusCheck;
use crate::error::BackendError;

const SYNCED: &str = "Synced";
const HEALTHY: &str = "Healthy";

pub fn application_resource() -> ApiResource {
    build_api_resource("argoproj.io/v1alpha1", "Application", "applications")
}

/// ArgoCD application generated for a component in one environment.
pub fn application_name(component: &str, environment: Environment) -> String {
    format!("{component}-{environment}")
}

fn status_field<'a>(app: &'a DynamicObject, section: &str) -> Option<&'a str> {
    app.data
        .get("status")?
        .get(section)?
        .get("status")
        .and_then(Value::as_str)
}

/// Succeeded only when sync and health are both good in the same read.
pub fn application_outcome(app: &DynamicObject) -> PollOutcome {
    let sync = status_field(app, "sync");
    let health = status_field(app, "health");
    if sync == Some(SYNCED) && health == Some(HEALTHY) {
        PollOutcome::Succeeded
    } else {
        PollOutcome::Pending
    }
}

#[derive(Clone)]
pub struct Applications {
    client: Client,
    namespace: String,
    resource: ApiResource,
}

impl Applications {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            resource: application_resource(),
        }
    }

    fn api(&self) -> Api<DynamicObject> {
        dynamic_api(&self.client, &self.namespace, &self.resource)
    }

    fn describe(&self, name: &str) -> String {
        format!("application {}/{}", self.namespace, name)
    }

    pub async fn get(&self, name: &str) -> Result<Option<DynamicObject>, BackendError> {
        self.api()
            .get_opt(name)
            .await
            .map_err(|e| BackendError::kube(self.describe(name), e))
    }

    /// Delete an application. Returns `false` if it did not exist.
    pub async fn delete(&self, name: &str) -> Result<bool, BackendError> {
        match self.api().delete(name, &Default::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(BackendError::kube(self.describe(name), e)),
        }
    }

    pub fn health(&self, name: impl Into<String>) -> ApplicationHealth {
        ApplicationHealth {
            apps: self.clone(),
            name: name.into(),
        }
    }
}

pub struct ApplicationHealth {
    apps: Applications,
    name: String,
}

impl StatusCheck for ApplicationHealth {
    fn resource(&self) -> String {
        self.apps.describe(&self.name)
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        Ok(match self.apps.get(&self.name).await? {
            Some(app) => application_outcome(&app),
            None => PollOutcome::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::object_from_json;
    use serde_json::json;

    fn app(sync: &str, health: &str) -> DynamicObject {
        object_from_json(json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Application",
            "metadata": { "name": "app-development", "namespace": "tssc-gitops" },
            "status": {
                "sync": { "status": sync },
                "health": { "status": health }
            }
        }))
    }

    #[test]
    fn test_synced_and_healthy_succeeds() {
        assert_eq!(application_outcome(&app("Synced", "Healthy")), PollOutcome::Succeeded);
    }

    #[test]
    fn test_partial_states_stay_pending() {
        assert_eq!(application_outcome(&app("Synced", "Progressing")), PollOutcome::Pending);
        assert_eq!(application_outcome(&app("OutOfSync", "Healthy")), PollOutcome::Pending);
        assert_eq!(application_outcome(&app("Unknown", "Degraded")), PollOutcome::Pending);

        let bare = object_from_json(json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Application",
            "metadata": { "name": "app-stage" }
        }));
        assert_eq!(application_outcome(&bare), PollOutcome::Pending);
    }

    #[test]
    fn test_application_name() {
        assert_eq!(application_name("shop-abcdef", Environment::Stage), "shop-abcdef-stage");
    }
}
