//! Step executor backed by the real platform.

use std::future::Future;
use std::sync::OnceLock;

use tap_backends::cluster::{
    Applications, PipelineRunRef, PipelineRuns, Routes, SUPPLY_CHAIN_EVIDENCE, application_name,
    create_client, ensure_namespace, pipeline_run_result,
};
use tap_backends::developer_hub::{ComponentRequest, DEFAULT_OWNER};
use tap_backends::git::{BitbucketClient, DEFAULT_BRANCH, GitHubClient, GitLabClient};
use tap_backends::promotion::{extract_image, overlay_path, replace_image};
use tap_backends::{
    BackendError, DeveloperHubClient, EndpointReady, GitHost, JenkinsClient, StatusCheck, wait_for,
};
use tap_common::config::E2eConfig;
use tap_common::poll::{PollOutcome, Poller};
use tap_common::types::{CiProvider, Environment, GitProvider};
use tracing::{debug, info, warn};

use crate::context::{BuildRef, CreatedResource, ScenarioContext};
use crate::error::{StepError, expect_success};
use crate::executor::StepExecutor;
use crate::scenario::{Scenario, Step};

/// Pipelines-as-Code event type of runs started by a push.
const PUSH_EVENT: &str = "push";
/// File touched in the source repository to start a build.
const TRIGGER_FILE: &str = ".tap-e2e/trigger";

/// Hostname of a provider URL, without an `api.` prefix.
fn web_host(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = rest.split('/').next().unwrap_or(rest);
    host.strip_prefix("api.").unwrap_or(host).to_string()
}

pub struct LiveExecutor {
    config: E2eConfig,
    hub: DeveloperHubClient,
    kube: kube::Client,
    pipeline_runs: PipelineRuns,
    applications: Applications,
    routes: Routes,
    github: Option<GitHubClient>,
    gitlab: Option<GitLabClient>,
    bitbucket: Option<BitbucketClient>,
    jenkins: Option<JenkinsClient>,
}

impl LiveExecutor {
    /// Build clients for every configured provider.
    pub async fn connect(config: E2eConfig) -> Result<Self, StepError> {
        let kube = create_client(config.kubeconfig.as_deref()).await?;
        Self::with_kube_client(config, kube)
    }

    /// Use an existing cluster client; provider clients still come from `config`.
    pub fn with_kube_client(config: E2eConfig, kube: kube::Client) -> Result<Self, StepError> {
        let hub = DeveloperHubClient::new(&config.developer_hub)?;
        let github = config.github.as_ref().map(GitHubClient::new).transpose()?;
        let gitlab = config.gitlab.as_ref().map(GitLabClient::new).transpose()?;
        let bitbucket = config
            .bitbucket
            .as_ref()
            .map(BitbucketClient::new)
            .transpose()?;
        let jenkins = config.jenkins.as_ref().map(JenkinsClient::new).transpose()?;

        Ok(Self {
            pipeline_runs: PipelineRuns::new(kube.clone(), &config.namespace),
            applications: Applications::new(kube.clone(), &config.argocd_namespace),
            routes: Routes::new(kube.clone()),
            kube,
            hub,
            github,
            gitlab,
            bitbucket,
            jenkins,
            config,
        })
    }

    fn git_host(&self, provider: GitProvider) -> Result<GitHost, StepError> {
        let host = match provider {
            GitProvider::GitHub => self.github.clone().map(GitHost::GitHub),
            GitProvider::GitLab => self.gitlab.clone().map(GitHost::GitLab),
            GitProvider::Bitbucket => self.bitbucket.clone().map(GitHost::Bitbucket),
        };
        host.ok_or_else(|| missing(provider.as_str()))
    }

    fn github(&self) -> Result<&GitHubClient, StepError> {
        self.github.as_ref().ok_or_else(|| missing("GitHub"))
    }

    fn gitlab(&self) -> Result<&GitLabClient, StepError> {
        self.gitlab.as_ref().ok_or_else(|| missing("GitLab"))
    }

    fn jenkins(&self) -> Result<&JenkinsClient, StepError> {
        self.jenkins.as_ref().ok_or_else(|| missing("Jenkins"))
    }

    fn repo_host(&self, provider: GitProvider) -> String {
        match provider {
            GitProvider::GitHub => self
                .config
                .github
                .as_ref()
                .map_or_else(|| "github.com".to_string(), |s| web_host(&s.api_url)),
            GitProvider::GitLab => self
                .config
                .gitlab
                .as_ref()
                .map_or_else(|| "gitlab.com".to_string(), |s| web_host(&s.url)),
            GitProvider::Bitbucket => "bitbucket.org".to_string(),
        }
    }

    fn deployment_namespace(&self, environment: Environment) -> String {
        format!("{}-{}", self.config.namespace, environment)
    }

    async fn await_check<C: StatusCheck>(&self, check: &C) -> Result<(), StepError> {
        let outcome = wait_for(check, &self.config.poll).await?;
        expect_success(check.resource(), outcome)
    }

    /// Poll `lookup` until it finds something, then return it.
    async fn discover<T, F, Fut>(&self, resource: &str, lookup: F) -> Result<T, StepError>
    where
        T: Send + Sync,
        F: Fn() -> Fut + Sync,
        Fut: Future<Output = Result<Option<T>, BackendError>> + Send,
    {
        let found = OnceLock::new();
        let slot = &found;
        let lookup = &lookup;
        let outcome = Poller::new(resource, self.config.poll)
            .fatal_when(BackendError::is_permanent)
            .run(move || {
                let attempt = lookup();
                async move {
                    Ok(match attempt.await? {
                        Some(value) => {
                            let _ = slot.set(value);
                            PollOutcome::Succeeded
                        }
                        None => PollOutcome::Pending,
                    })
                }
            })
            .await?;
        expect_success(resource, outcome)?;
        found
            .into_inner()
            .ok_or_else(|| StepError::assertion(format!("{resource} reported found without a value")))
    }

    async fn scaffold(&self, ctx: &mut ScenarioContext) -> Result<(), StepError> {
        let host = self.git_host(ctx.git)?;
        let request = ComponentRequest {
            template: ctx.template.clone(),
            name: ctx.component.clone(),
            owner: DEFAULT_OWNER.to_string(),
            git: ctx.git,
            ci: ctx.ci,
            repo_host: self.repo_host(ctx.git),
            repo_owner: host.owner().to_string(),
            branch: DEFAULT_BRANCH.to_string(),
            namespace: self.config.namespace.clone(),
            image_registry: self.config.image.registry.clone(),
            image_org: self.config.image.organization.clone(),
            project: match ctx.git {
                GitProvider::Bitbucket => self.config.bitbucket.as_ref().map(|b| b.project.clone()),
                _ => None,
            },
        };
        let task = self.hub.create_component(&request).await?;
        ctx.task_id = Some(task.clone());

        // Track before waiting so teardown also covers half-finished tasks.
        ctx.track(CreatedResource::Repository(ctx.source_repo().to_string()));
        ctx.track(CreatedResource::Repository(ctx.gitops_repo()));
        for environment in Environment::ALL {
            ctx.track(CreatedResource::Application(application_name(
                &ctx.component,
                environment,
            )));
        }
        if ctx.ci == CiProvider::Jenkins {
            ctx.track(CreatedResource::JenkinsJob(ctx.component.clone()));
        }

        self.await_check(&self.hub.task_status(task)).await
    }

    async fn verify_repositories(&self, ctx: &ScenarioContext) -> Result<(), StepError> {
        let host = self.git_host(ctx.git)?;
        for repo in [ctx.source_repo().to_string(), ctx.gitops_repo()] {
            self.await_check(&host.repository(repo)).await?;
        }
        self.await_check(&self.hub.catalog_entity(ctx.component.clone()))
            .await
    }

    /// Newest push run for the source repository other than `previous`.
    async fn next_pipeline_run(
        &self,
        repo: &str,
        previous: Option<&str>,
    ) -> Result<PipelineRunRef, StepError> {
        let runs = &self.pipeline_runs;
        self.discover(&format!("pipelinerun for repository {repo}"), move || async move {
            Ok(runs
                .latest_for_repository(repo, PUSH_EVENT)
                .await?
                .filter(|run| Some(run.name.as_str()) != previous))
        })
        .await
    }

    async fn wait_pipeline_run(
        &self,
        ctx: &mut ScenarioContext,
        run: PipelineRunRef,
    ) -> Result<(), StepError> {
        ctx.build = Some(BuildRef::PipelineRun {
            namespace: run.namespace.clone(),
            name: run.name.clone(),
        });
        self.await_check(&self.pipeline_runs.status(run.name.clone()))
            .await?;

        if let Some(object) = self.pipeline_runs.get(&run.name).await?
            && let Some(image) = pipeline_run_result(&object, "IMAGE_URL")
        {
            let digest = pipeline_run_result(&object, "IMAGE_DIGEST");
            info!(run = %run, image, digest, "Pipeline run produced image");
            ctx.image = Some(match digest {
                Some(digest) => format!("{image}@{digest}"),
                None => image.to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_initial_build(&self, ctx: &mut ScenarioContext) -> Result<(), StepError> {
        if ctx.ci != CiProvider::Tekton {
            return Err(StepError::Precondition(format!(
                "initial on-push builds only exist for tekton, not {}",
                ctx.ci
            )));
        }
        let repo = ctx.source_repo().to_string();
        let run = self.next_pipeline_run(&repo, None).await?;
        self.wait_pipeline_run(ctx, run).await
    }

    async fn trigger_build(&self, ctx: &mut ScenarioContext) -> Result<(), StepError> {
        if ctx.ci == CiProvider::Jenkins {
            let number = self.jenkins()?.trigger(&ctx.component).await?;
            ctx.build = Some(BuildRef::Jenkins {
                job: ctx.component.clone(),
                number,
            });
            return Ok(());
        }

        let host = self.git_host(ctx.git)?;
        let stamp = chrono::Utc::now().to_rfc3339();
        let sha = host
            .write_file(
                ctx.source_repo(),
                DEFAULT_BRANCH,
                TRIGGER_FILE,
                &format!("{stamp}\n"),
                "e2e: trigger build",
            )
            .await?;
        info!(repo = ctx.source_repo(), sha = %sha, "Pushed trigger commit");
        ctx.commit_sha = Some(sha);
        Ok(())
    }

    async fn wait_for_build(&self, ctx: &mut ScenarioContext) -> Result<(), StepError> {
        let repo = ctx.source_repo().to_string();
        match ctx.ci {
            CiProvider::Tekton => {
                let previous = match &ctx.build {
                    Some(BuildRef::PipelineRun { name, .. }) => Some(name.clone()),
                    _ => None,
                };
                let run = self.next_pipeline_run(&repo, previous.as_deref()).await?;
                self.wait_pipeline_run(ctx, run).await
            }
            CiProvider::Jenkins => {
                let BuildRef::Jenkins { job, number } = ctx.require_build()?.clone() else {
                    return Err(StepError::assertion("recorded build is not a jenkins build"));
                };
                self.await_check(&self.jenkins()?.build_status(job, number))
                    .await
            }
            CiProvider::GitLabCi => {
                let gitlab = self.gitlab()?;
                let sha = ctx.require_commit()?.to_string();
                let (repo_name, commit) = (repo.as_str(), sha.as_str());
                let pipeline = self
                    .discover(&format!("gitlab pipeline for {sha}"), move || {
                        gitlab.find_pipeline(repo_name, commit)
                    })
                    .await?;
                ctx.build = Some(BuildRef::GitLab {
                    project: format!("{}/{repo}", gitlab.group()),
                    pipeline_id: pipeline.id,
                });
                self.await_check(&gitlab.pipeline_status(repo.clone(), pipeline.id))
                    .await
            }
            CiProvider::GitHubActions => {
                let github = self.github()?;
                let sha = ctx.require_commit()?.to_string();
                let (repo_name, commit) = (repo.as_str(), sha.as_str());
                let run = self
                    .discover(&format!("github actions run for {sha}"), move || {
                        github.find_workflow_run(repo_name, commit)
                    })
                    .await?;
                ctx.build = Some(BuildRef::GitHubActions {
                    owner: github.organization().to_string(),
                    repo: repo.clone(),
                    run_id: run.id,
                });
                self.await_check(&github.workflow_status(repo.clone(), run.id))
                    .await
            }
        }
    }

    async fn verify_signature(&self, ctx: &ScenarioContext) -> Result<(), StepError> {
        match ctx.require_build()? {
            BuildRef::PipelineRun { name, .. } => {
                self.await_check(&self.pipeline_runs.signature(name.clone()))
                    .await
            }
            other => Err(StepError::Precondition(format!(
                "signatures are only recorded for tekton runs, not {other}"
            ))),
        }
    }

    async fn verify_supply_chain(&self, ctx: &ScenarioContext) -> Result<(), StepError> {
        let BuildRef::PipelineRun { name, .. } = ctx.require_build()? else {
            return Err(StepError::Precondition(format!(
                "supply-chain evidence is only collected by tekton runs, not {}",
                ctx.ci
            )));
        };
        for evidence in SUPPLY_CHAIN_EVIDENCE {
            self.await_check(&self.pipeline_runs.evidence(name.clone(), evidence))
                .await?;
        }
        Ok(())
    }

    async fn verify_deployment(
        &self,
        ctx: &mut ScenarioContext,
        environment: Environment,
    ) -> Result<(), StepError> {
        let app = application_name(&ctx.component, environment);
        self.await_check(&self.applications.health(app)).await?;

        let host = self.git_host(ctx.git)?;
        let path = overlay_path(&ctx.component, environment);
        if let Some(manifest) = host.read_file(&ctx.gitops_repo(), DEFAULT_BRANCH, &path).await? {
            let deployed = extract_image(&manifest)
                .map_err(|e| StepError::assertion(format!("{path}: {e}")))?;
            match ctx.image.clone() {
                Some(expected) if environment != Environment::Development && expected != deployed => {
                    return Err(StepError::assertion(format!(
                        "{environment} runs {deployed}, expected {expected}"
                    )));
                }
                Some(_) => {}
                None => ctx.image = Some(deployed),
            }
        }

        let namespace = self.deployment_namespace(environment);
        let routes = &self.routes;
        let (ns, component) = (namespace.as_str(), ctx.component.as_str());
        let url = self
            .discover(&format!("route {ns}/{component}"), move || routes.url(ns, component))
            .await?;
        self.await_check(&EndpointReady::new(url)?).await?;

        if !ctx.verified.contains(&environment) {
            ctx.verified.push(environment);
        }
        Ok(())
    }

    async fn promote(
        &self,
        ctx: &mut ScenarioContext,
        from: Environment,
        to: Environment,
    ) -> Result<(), StepError> {
        let host = self.git_host(ctx.git)?;
        let gitops = ctx.gitops_repo();

        let source = read_overlay(&host, &gitops, &overlay_path(&ctx.component, from)).await?;
        let image = extract_image(&source)
            .map_err(|e| StepError::assertion(format!("{from} overlay: {e}")))?;
        let target_path = overlay_path(&ctx.component, to);
        let target = read_overlay(&host, &gitops, &target_path).await?;
        let promoted = replace_image(&target, &image)
            .map_err(|e| StepError::assertion(format!("{to} overlay: {e}")))?;

        if promoted == target {
            debug!(image, %to, "Target environment already runs the image");
        } else {
            let sha = host
                .write_file(
                    &gitops,
                    DEFAULT_BRANCH,
                    &target_path,
                    &promoted,
                    &format!("e2e: promote {} from {from} to {to}", ctx.component),
                )
                .await?;
            info!(image, %from, %to, sha = %sha, "Promoted image");
        }
        ctx.image = Some(image);
        Ok(())
    }
}

fn missing(provider: &str) -> StepError {
    StepError::Precondition(format!("{provider} is not configured"))
}

async fn read_overlay(host: &GitHost, repo: &str, path: &str) -> Result<String, StepError> {
    host.read_file(repo, DEFAULT_BRANCH, path)
        .await?
        .ok_or_else(|| StepError::assertion(format!("{repo} has no {path}")))
}

impl StepExecutor for LiveExecutor {
    async fn setup(&self, scenario: &Scenario, ctx: &mut ScenarioContext) -> Result<(), StepError> {
        if !scenario.ci.supports(scenario.git) {
            return Err(StepError::Precondition(format!(
                "{} cannot build repositories hosted on {}",
                scenario.ci, scenario.git
            )));
        }
        match scenario.git {
            GitProvider::GitHub => {
                self.config.github()?;
            }
            GitProvider::GitLab => {
                self.config.gitlab()?;
            }
            GitProvider::Bitbucket => {
                self.config.bitbucket()?;
            }
        }
        match scenario.ci {
            CiProvider::Jenkins => {
                self.config.jenkins()?;
            }
            CiProvider::GitLabCi => {
                self.config.gitlab()?;
            }
            CiProvider::GitHubActions => {
                self.config.github()?;
            }
            CiProvider::Tekton => {}
        }
        ensure_namespace(&self.kube, &self.config.namespace).await?;
        ensure_namespace(&self.kube, &self.config.argocd_namespace).await?;
        info!(component = %ctx.component, git = %ctx.git, ci = %ctx.ci, "Scenario setup complete");
        Ok(())
    }

    async fn execute(&self, step: &Step, ctx: &mut ScenarioContext) -> Result<(), StepError> {
        match step {
            Step::Scaffold => self.scaffold(ctx).await,
            Step::VerifyRepositories => self.verify_repositories(ctx).await,
            Step::WaitForInitialBuild => self.wait_for_initial_build(ctx).await,
            Step::TriggerBuild => self.trigger_build(ctx).await,
            Step::Settle { duration } => {
                debug!(delay = %humantime::format_duration(*duration), "Settling");
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            Step::WaitForBuild => self.wait_for_build(ctx).await,
            Step::VerifySignature => self.verify_signature(ctx).await,
            Step::VerifySupplyChain => self.verify_supply_chain(ctx).await,
            Step::VerifyDeployment { environment } => self.verify_deployment(ctx, *environment).await,
            Step::Promote { from, to } => self.promote(ctx, *from, *to).await,
        }
    }

    async fn cleanup(&self, ctx: &ScenarioContext) -> Result<(), StepError> {
        let mut first_error = None;
        for resource in ctx.created.iter().rev() {
            let result = match resource {
                CreatedResource::Repository(name) => match self.git_host(ctx.git) {
                    Ok(host) => host.delete_repository(name).await.map_err(StepError::from),
                    Err(e) => Err(e),
                },
                CreatedResource::Application(name) => {
                    self.applications.delete(name).await.map_err(StepError::from)
                }
                CreatedResource::JenkinsJob(name) => match self.jenkins() {
                    Ok(jenkins) => jenkins.delete_job(name).await.map_err(StepError::from),
                    Err(e) => Err(e),
                },
            };
            match result {
                Ok(deleted) => debug!(?resource, deleted, "Removed"),
                Err(e) => {
                    warn!(?resource, error = %e, "Failed to remove");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
