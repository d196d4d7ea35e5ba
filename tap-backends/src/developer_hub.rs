//! Developer Hub scaffolder tasks and catalog lookups.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tap_common::config::DeveloperHubSettings;
use tap_common::poll::PollOutcome;
use tap_common::types::{CiProvider, GitProvider};
use tracing::info;

use crate::check::StatusCheck;
use crate::client::{Auth, RestClient};
use crate::error::BackendError;

/// Catalog owner assigned to scaffolded components.
pub const DEFAULT_OWNER: &str = "user:guest";

/// Input for one scaffolder run.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRequest {
    pub template: String,
    pub name: String,
    pub owner: String,
    pub git: GitProvider,
    pub ci: CiProvider,
    /// Hostname of the git provider (`github.com`, `gitlab.com`, ...).
    pub repo_host: String,
    /// Organization, group or workspace owning the repositories.
    pub repo_owner: String,
    pub branch: String,
    pub namespace: String,
    pub image_registry: String,
    pub image_org: String,
    /// Bitbucket only.
    pub project: Option<String>,
}

impl ComponentRequest {
    pub fn template_ref(&self) -> String {
        format!("template:default/{}", self.template)
    }

    pub fn image_repository(&self) -> String {
        format!("{}/{}/{}", self.image_registry, self.image_org, self.name)
    }

    /// Parameter map the templates read.
    pub fn values(&self) -> Value {
        let mut values = json!({
            "name": self.name,
            "owner": self.owner,
            "hostType": self.git.scaffolder_host_type(),
            "repoName": self.name,
            "repoOwner": self.repo_owner,
            "repoHost": self.repo_host,
            "branch": self.branch,
            "ciType": self.ci.scaffolder_ci_type(),
            "namespace": self.namespace,
            "imageRegistry": self.image_registry,
            "imageOrg": self.image_org,
            "imageName": self.name,
        });
        if let (Some(project), Some(map)) = (&self.project, values.as_object_mut()) {
            map.insert("bbProject".to_string(), Value::String(project.clone()));
        }
        values
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTask {
    template_ref: String,
    values: Value,
}

#[derive(Debug, Deserialize)]
struct TaskCreated {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: String,
}

/// `completed` succeeds, `failed`/`cancelled` fail, anything else is running.
pub fn task_outcome(task: &Task) -> PollOutcome {
    match task.status.as_str() {
        "completed" => PollOutcome::Succeeded,
        "failed" | "cancelled" => PollOutcome::failed(format!("scaffolder task {}", task.status)),
        _ => PollOutcome::Pending,
    }
}

#[derive(Debug, Clone)]
pub struct DeveloperHubClient {
    rest: RestClient,
}

impl DeveloperHubClient {
    pub fn new(settings: &DeveloperHubSettings) -> Result<Self, BackendError> {
        let auth = match &settings.token {
            Some(token) => Auth::Bearer(token.clone()),
            None => Auth::None,
        };
        Ok(Self::from_rest(RestClient::new(&settings.url, auth)?))
    }

    pub fn from_rest(rest: RestClient) -> Self {
        Self { rest }
    }

    /// Start a scaffolder task; returns its id.
    pub async fn create_component(&self, request: &ComponentRequest) -> Result<String, BackendError> {
        let body = CreateTask {
            template_ref: request.template_ref(),
            values: request.values(),
        };
        let created: TaskCreated = self
            .rest
            .post_json("/api/scaffolder/v2/tasks", &body)
            .await?;
        info!(
            component = %request.name,
            template = %request.template,
            task = %created.id,
            "Scaffolder task created"
        );
        Ok(created.id)
    }

    pub async fn task(&self, id: &str) -> Result<Option<Task>, BackendError> {
        self.rest
            .get_optional_json(&format!("/api/scaffolder/v2/tasks/{id}"))
            .await
    }

    fn entity_path(name: &str) -> String {
        format!("/api/catalog/entities/by-name/component/default/{name}")
    }

    pub fn task_status(&self, id: impl Into<String>) -> ScaffolderTask {
        ScaffolderTask {
            client: self.clone(),
            id: id.into(),
        }
    }

    pub fn catalog_entity(&self, name: impl Into<String>) -> CatalogEntity {
        CatalogEntity {
            client: self.clone(),
            name: name.into(),
        }
    }
}

pub struct ScaffolderTask {
    client: DeveloperHubClient,
    id: String,
}

impl StatusCheck for ScaffolderTask {
    fn resource(&self) -> String {
        format!("scaffolder task {}", self.id)
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        Ok(match self.client.task(&self.id).await? {
            Some(task) => task_outcome(&task),
            None => PollOutcome::Pending,
        })
    }
}

/// Component registered in the catalog. Registration lags the task.
pub struct CatalogEntity {
    client: DeveloperHubClient,
    name: String,
}

impl StatusCheck for CatalogEntity {
    fn resource(&self) -> String {
        format!("catalog component {}", self.name)
    }

    async fn check(&self) -> Result<PollOutcome, BackendError> {
        let path = DeveloperHubClient::entity_path(&self.name);
        let entity: Option<Value> = self.client.rest.get_optional_json(&path).await?;
        Ok(if entity.is_some() {
            PollOutcome::Succeeded
        } else {
            PollOutcome::Pending
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ComponentRequest {
        ComponentRequest {
            template: "go".into(),
            name: "e2e-go-abcdef".into(),
            owner: DEFAULT_OWNER.into(),
            git: GitProvider::Bitbucket,
            ci: CiProvider::Tekton,
            repo_host: "bitbucket.org".into(),
            repo_owner: "tap-ws".into(),
            branch: "main".into(),
            namespace: "tap-app".into(),
            image_registry: "quay.io".into(),
            image_org: "tap".into(),
            project: Some("TAP".into()),
        }
    }

    #[test]
    fn test_values_carry_provider_strings() {
        let values = request().values();
        assert_eq!(values["hostType"], "Bitbucket");
        assert_eq!(values["ciType"], "tekton");
        assert_eq!(values["repoOwner"], "tap-ws");
        assert_eq!(values["bbProject"], "TAP");
    }

    #[test]
    fn test_template_ref_and_image() {
        let request = request();
        assert_eq!(request.template_ref(), "template:default/go");
        assert_eq!(request.image_repository(), "quay.io/tap/e2e-go-abcdef");
    }

    #[test]
    fn test_task_outcome() {
        let task = |status: &str| Task {
            id: "t".into(),
            status: status.into(),
        };
        assert_eq!(task_outcome(&task("open")), PollOutcome::Pending);
        assert_eq!(task_outcome(&task("processing")), PollOutcome::Pending);
        assert_eq!(task_outcome(&task("completed")), PollOutcome::Succeeded);
        assert!(matches!(task_outcome(&task("failed")), PollOutcome::Failed { .. }));
        assert!(matches!(task_outcome(&task("cancelled")), PollOutcome::Failed { .. }));
    }
}
