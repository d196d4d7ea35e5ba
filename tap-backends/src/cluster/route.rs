//! OpenShift `Route` host lookup.

use kube::Client;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::Value;

use super::{build_api_resource, dynamic_api};
use crate::error::BackendError;

pub fn route_resource() -> ApiResource {
    build_api_resource("route.openshift.io/v1", "Route", "routes")
}

/// `spec.host` of a route object.
pub fn route_host(route: &DynamicObject) -> Option<&str> {
    route.data.get("spec")?.get("host").and_then(Value::as_str)
}

#[derive(Clone)]
pub struct Routes {
    client: Client,
    resource: ApiResource,
}

impl Routes {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resource: route_resource(),
        }
    }

    /// Public URL of the route `name` in `namespace`, `None` while it does not exist.
    pub async fn url(&self, namespace: &str, name: &str) -> Result<Option<String>, BackendError> {
        let resource = format!("route {namespace}/{name}");
        let route = dynamic_api(&self.client, namespace, &self.resource)
            .get_opt(name)
            .await
            .map_err(|e| BackendError::kube(resource.clone(), e))?;
        match route {
            Some(route) => route_host(&route)
                .map(|host| Some(format!("https://{host}")))
                .ok_or_else(|| BackendError::missing_field(resource, "spec.host")),
            None => Ok(None),
        }
    }
}
