//! engine::deploy
//!
//! The deploy and destroy protocols for a single stack.
//!
//! # Flow
//!
//! ```text
//! lookup ──► failed creation? ──► delete and wait
//!    │
//!    ▼
//! resolve parameters ──► nothing changed? ──► no-op
//!    │
//!    ▼
//! template body or URL
//!    │
//!    ├── change set: create ─► wait ─► empty? ─► no-op
//!    │                                 review? ─► leave it
//!    │                                 paused?  ─► ask for rollback
//!    │                                 execute ─► wait
//!    │
//!    └── direct: update or create ─► wait
//! ```
//!
//! Paused stacks and replacements without rollback come back as
//! [`DeployStackResult`] variants, not errors. The caller decides whether to
//! roll back and try again.

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::error::ToolkitError;
use super::events::{resource_failures_since, DEPLOY_START_STATUSES};
use super::resources::EnvironmentResources;
use super::stack::{
    change_set_has_no_changes, wait_for_change_set, wait_for_stack_delete, wait_for_stack_deploy,
    CloudFormationStack, WaitPolicy,
};
use crate::cloud::{
    ChangeSetDescription, ChangeSetType, CloudError, CloudFormation, CreateChangeSetRequest,
    CreateStackRequest, DeleteStackRequest, ExecuteChangeSetRequest, ResourceToImport, Sdk,
    TemplateSource, UpdateStackRequest, DEPLOY_CAPABILITIES,
};
use crate::core::artifact::StackArtifact;
use crate::core::config::DeployDefaults;
use crate::core::parameters::{ParameterChanges, ParameterValues, TemplateParameters};
use crate::core::types::{tags_equal, Environment, Tag};

/// Change set name used when none is given.
pub const DEFAULT_CHANGE_SET_NAME: &str = "cdk-deploy-change-set";

/// Templates larger than this are uploaded instead of sent inline.
pub const LARGE_TEMPLATE_SIZE: usize = 50 * 1024;

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed.";

const REPLACING_POLICY_ACTIONS: &[&str] =
    &["ReplaceAndDelete", "ReplaceAndRetain", "ReplaceAndSnapshot"];

/// How a deployment is carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentMethod {
    /// `create-stack` / `update-stack`
    Direct,
    /// Create a change set and, unless `execute` is false, execute it
    ChangeSet {
        change_set_name: Option<String>,
        execute: bool,
        import_existing_resources: bool,
    },
}

impl Default for DeploymentMethod {
    fn default() -> Self {
        DeploymentMethod::ChangeSet {
            change_set_name: None,
            execute: true,
            import_existing_resources: false,
        }
    }
}

impl DeploymentMethod {
    fn executes(&self) -> bool {
        match self {
            DeploymentMethod::Direct => true,
            DeploymentMethod::ChangeSet { execute, .. } => *execute,
        }
    }
}

/// Why a deployment cannot go ahead until the stack is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PausedReason {
    /// The stack is paused in a failed state and rollback is enabled
    NotNoRollback,
    /// The change set replaces resources of a paused stack
    Replacement,
}

/// A deployment that reached a final state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessfulDeployStackResult {
    /// Nothing was changed
    pub no_op: bool,
    pub outputs: BTreeMap<String, String>,
    pub stack_arn: String,
}

/// Outcome of one deploy attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployStackResult {
    DidDeployStack(SuccessfulDeployStackResult),
    /// Roll the stack back, then deploy again
    FailpausedNeedRollbackFirst {
        reason: PausedReason,
        status: String,
    },
    /// Replacements cannot be made with rollback disabled
    ReplacementRequiresRollback,
}

impl DeployStackResult {
    pub fn successful(&self) -> Option<&SuccessfulDeployStackResult> {
        match self {
            DeployStackResult::DidDeployStack(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_no_op(&self) -> bool {
        self.successful().is_some_and(|r| r.no_op)
    }
}

/// What to deploy and how.
#[derive(Debug, Clone)]
pub struct DeployStackOptions {
    pub stack: StackArtifact,
    /// Deploy under this name instead of the artifact's stack name
    pub deploy_name: Option<String>,
    /// Execution role; defaults to the artifact's
    pub role_arn: Option<String>,
    pub notification_arns: Vec<String>,
    /// Replaces the artifact's tags when set
    pub tags: Option<Vec<Tag>>,
    pub deployment_method: DeploymentMethod,
    /// Explicit values; `None` falls back to the previous value or default
    pub parameters: BTreeMap<String, Option<String>>,
    pub use_previous_parameters: bool,
    /// Deploy even if nothing seems to have changed
    pub force: bool,
    pub rollback: bool,
    pub resources_to_import: Option<Vec<ResourceToImport>>,
    pub ci: bool,
}

impl DeployStackOptions {
    pub fn new(stack: StackArtifact) -> Self {
        Self::with_defaults(stack, DeployDefaults::default())
    }

    pub fn with_defaults(stack: StackArtifact, defaults: DeployDefaults) -> Self {
        Self {
            stack,
            deploy_name: None,
            role_arn: None,
            notification_arns: Vec::new(),
            tags: None,
            deployment_method: if defaults.direct {
                DeploymentMethod::Direct
            } else {
                DeploymentMethod::default()
            },
            parameters: BTreeMap::new(),
            use_previous_parameters: defaults.use_previous_parameters,
            force: false,
            rollback: defaults.rollback,
            resources_to_import: None,
            ci: defaults.ci,
        }
    }

    pub fn deploy_name(&self) -> &str {
        self.deploy_name
            .as_deref()
            .unwrap_or(&self.stack.stack_name)
    }

    fn tags(&self) -> &[Tag] {
        self.tags.as_deref().unwrap_or(&self.stack.tags)
    }
}

/// A deployment with its environment resolved.
#[derive(Clone)]
pub struct DeployStackRequest {
    /// `role_arn` must already have its placeholders replaced
    pub options: DeployStackOptions,
    pub resolved_environment: Environment,
    pub sdk: Arc<dyn Sdk>,
    pub resources: EnvironmentResources,
    pub wait: WaitPolicy,
}

impl std::fmt::Debug for DeployStackRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployStackRequest")
            .field("stack", &self.options.deploy_name())
            .field("environment", &self.resolved_environment.name)
            .finish()
    }
}

/// Deploy one stack.
pub async fn deploy_stack(request: DeployStackRequest) -> Result<DeployStackResult, ToolkitError> {
    let cfn = request.sdk.cloudformation();
    let options = &request.options;
    let deploy_name = options.deploy_name().to_string();

    let mut current = CloudFormationStack::lookup(Arc::clone(&cfn), &deploy_name, false).await?;

    if current.stack_status().is_creation_failure() {
        tracing::debug!(
            stack = %deploy_name,
            "Found existing stack that had previously failed creation. \
             Deleting it before attempting to re-create it."
        );
        cfn.delete_stack(DeleteStackRequest {
            stack_name: deploy_name.clone(),
            ..Default::default()
        })
        .await?;
        if let Some(stack) =
            wait_for_stack_delete(Arc::clone(&cfn), &deploy_name, &request.wait).await?
        {
            return Err(ToolkitError::StackFailed {
                stack_name: deploy_name,
                operation: "to delete after failing creation",
                status: stack.stack_status().to_string(),
            });
        }
        current = CloudFormationStack::does_not_exist(Arc::clone(&cfn), &deploy_name);
    }

    let template_params = TemplateParameters::from_template(&options.stack.template);
    let stack_params = if options.use_previous_parameters {
        template_params.update_existing(&options.parameters, &current.parameters())?
    } else {
        template_params.supply_all(&options.parameters)?
    };

    let parameter_changes = stack_params.has_changes(&current.parameters());
    if can_skip_deploy(options, &current, parameter_changes).await? {
        tracing::debug!(stack = %deploy_name, "skipping deployment (use --force to override)");
        return Ok(DeployStackResult::DidDeployStack(SuccessfulDeployStackResult {
            no_op: true,
            outputs: current.outputs(),
            stack_arn: current.stack_id()?.to_string(),
        }));
    }
    tracing::debug!(stack = %deploy_name, "deploying...");

    let template = make_body_parameter(&request).await?;

    let deployment = FullDeployment {
        cfn,
        stack_name: deploy_name,
        update: current.exists() && !current.stack_status().is_review_in_progress(),
        uuid: Uuid::new_v4().to_string(),
        current,
        params: stack_params,
        template,
        request: &request,
    };
    deployment.perform().await
}

struct FullDeployment<'a> {
    cfn: Arc<dyn CloudFormation>,
    stack_name: String,
    /// The stack exists and has been executed at least once
    update: bool,
    uuid: String,
    current: CloudFormationStack,
    params: ParameterValues,
    template: TemplateSource,
    request: &'a DeployStackRequest,
}

impl FullDeployment<'_> {
    fn options(&self) -> &DeployStackOptions {
        &self.request.options
    }

    async fn perform(&self) -> Result<DeployStackResult, ToolkitError> {
        match &self.options().deployment_method {
            DeploymentMethod::Direct => self.direct_deployment().await,
            DeploymentMethod::ChangeSet {
                change_set_name,
                execute,
                import_existing_resources,
            } => {
                let name = change_set_name
                    .as_deref()
                    .unwrap_or(DEFAULT_CHANGE_SET_NAME);
                self.change_set_deployment(name, *execute, *import_existing_resources).await
            }
        }
    }

    async fn change_set_deployment(
        &self,
        change_set_name: &str,
        execute: bool,
        import_existing_resources: bool,
    ) -> Result<DeployStackResult, ToolkitError> {
        let change_set = self
            .create_change_set(change_set_name, import_existing_resources)
            .await?;
        self.update_termination_protection().await?;

        if change_set_has_no_changes(&change_set) {
            tracing::debug!(stack = %self.stack_name, "No changes are to be performed");
            if execute {
                tracing::debug!(
                    change_set = %change_set.change_set_id,
                    "Deleting empty change set"
                );
                self.cfn
                    .delete_change_set(&self.stack_name, change_set_name)
                    .await?;
            }
            if self.options().force {
                tracing::warn!(
                    "You used the --force flag, but CloudFormation reported that the deployment \
                     would not make any changes. According to CloudFormation, all resources are \
                     already up-to-date with the state in your CDK app. You cannot use the \
                     --force flag to get rid of changes you made in the console. Try using \
                     CloudFormation drift detection instead."
                );
            }
            return Ok(DeployStackResult::DidDeployStack(SuccessfulDeployStackResult {
                no_op: true,
                outputs: self.current.outputs(),
                stack_arn: change_set.stack_id,
            }));
        }

        if !execute {
            tracing::info!(
                change_set = %change_set.change_set_id,
                "Changeset created and waiting in review for manual execution (--no-execute)"
            );
            return Ok(DeployStackResult::DidDeployStack(SuccessfulDeployStackResult {
                no_op: false,
                outputs: self.current.outputs(),
                stack_arn: change_set.stack_id,
            }));
        }

        let replacement = has_replacement(&change_set);
        let status = self.current.stack_status();
        let paused = status.is_rollbackable();
        let rollback = self.options().rollback;
        if paused && replacement {
            return Ok(DeployStackResult::FailpausedNeedRollbackFirst {
                reason: PausedReason::Replacement,
                status: status.name().to_string(),
            });
        }
        if paused && rollback {
            return Ok(DeployStackResult::FailpausedNeedRollbackFirst {
                reason: PausedReason::NotNoRollback,
                status: status.name().to_string(),
            });
        }
        if !rollback && replacement {
            return Ok(DeployStackResult::ReplacementRequiresRollback);
        }

        self.execute_change_set(&change_set).await
    }

    async fn create_change_set(
        &self,
        change_set_name: &str,
        import_existing_resources: bool,
    ) -> Result<ChangeSetDescription, ToolkitError> {
        self.cleanup_old_change_set(change_set_name).await?;

        let change_set_type = match (&self.options().resources_to_import, self.update) {
            (Some(_), _) => ChangeSetType::Import,
            (None, true) => ChangeSetType::Update,
            (None, false) => ChangeSetType::Create,
        };
        tracing::info!(
            stack = %self.stack_name,
            change_set = change_set_name,
            kind = %change_set_type,
            "creating CloudFormation changeset..."
        );

        let options = self.options();
        let output = self
            .cfn
            .create_change_set(CreateChangeSetRequest {
                stack_name: self.stack_name.clone(),
                change_set_name: change_set_name.to_string(),
                change_set_type,
                template: self.template.clone(),
                parameters: self.params.api_parameters.clone(),
                role_arn: options.role_arn.clone(),
                notification_arns: options.notification_arns.clone(),
                capabilities: capabilities(),
                tags: options.tags().to_vec(),
                resources_to_import: options.resources_to_import.clone().unwrap_or_default(),
                import_existing_resources,
                description: Some(format!("CDK Changeset for execution {}", self.uuid)),
                client_token: Some(format!("create{}", self.uuid)),
            })
            .await?;
        tracing::debug!(
            change_set = %output.change_set_id,
            "Initiated creation of changeset; waiting for it to finish creating..."
        );

        wait_for_change_set(
            Arc::clone(&self.cfn),
            &self.stack_name,
            change_set_name,
            &self.request.wait,
        )
        .await
    }

    async fn execute_change_set(
        &self,
        change_set: &ChangeSetDescription,
    ) -> Result<DeployStackResult, ToolkitError> {
        tracing::debug!(
            stack = %self.stack_name,
            change_set = %change_set.change_set_id,
            "Initiating execution of changeset"
        );
        self.cfn
            .execute_change_set(ExecuteChangeSetRequest {
                stack_name: self.stack_name.clone(),
                change_set_name: change_set.change_set_name.clone(),
                client_request_token: Some(format!("exec{}", self.uuid)),
                disable_rollback: !self.options().rollback,
            })
            .await?;
        self.monitor_deployment().await
    }

    async fn cleanup_old_change_set(&self, change_set_name: &str) -> Result<(), ToolkitError> {
        if self.current.exists() {
            tracing::debug!(
                change_set = change_set_name,
                "Removing existing change set with this name if it exists"
            );
            self.cfn
                .delete_change_set(&self.stack_name, change_set_name)
                .await?;
        }
        Ok(())
    }

    async fn update_termination_protection(&self) -> Result<(), ToolkitError> {
        let wanted = self.options().stack.termination_protection;
        if self.current.termination_protection() != wanted {
            tracing::debug!(
                stack = %self.stack_name,
                from = self.current.termination_protection(),
                to = wanted,
                "Updating termination protection"
            );
            self.cfn
                .update_termination_protection(&self.stack_name, wanted)
                .await?;
        }
        Ok(())
    }

    async fn direct_deployment(&self) -> Result<DeployStackResult, ToolkitError> {
        let options = self.options();
        if options.resources_to_import.is_some() {
            return Err(ToolkitError::InvalidOptions(
                "Importing resources requires a changeset deployment".into(),
            ));
        }
        tracing::info!(
            stack = %self.stack_name,
            "{} stack...",
            if self.update { "updating" } else { "creating" }
        );

        if self.update {
            self.update_termination_protection().await?;
            let result = self
                .cfn
                .update_stack(UpdateStackRequest {
                    stack_name: self.stack_name.clone(),
                    template: self.template.clone(),
                    parameters: self.params.api_parameters.clone(),
                    role_arn: options.role_arn.clone(),
                    notification_arns: options.notification_arns.clone(),
                    capabilities: capabilities(),
                    tags: options.tags().to_vec(),
                    disable_rollback: !options.rollback,
                    client_request_token: Some(format!("update{}", self.uuid)),
                })
                .await;
            match result {
                Ok(_) => {}
                Err(CloudError::Validation(message)) if message == NO_UPDATES_MESSAGE => {
                    tracing::debug!(stack = %self.stack_name, "No updates are to be performed");
                    return Ok(DeployStackResult::DidDeployStack(SuccessfulDeployStackResult {
                        no_op: true,
                        outputs: self.current.outputs(),
                        stack_arn: self.current.stack_id()?.to_string(),
                    }));
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            self.cfn
                .create_stack(CreateStackRequest {
                    stack_name: self.stack_name.clone(),
                    template: self.template.clone(),
                    parameters: self.params.api_parameters.clone(),
                    role_arn: options.role_arn.clone(),
                    notification_arns: options.notification_arns.clone(),
                    capabilities: capabilities(),
                    tags: options.tags().to_vec(),
                    enable_termination_protection: options.stack.termination_protection,
                    disable_rollback: !options.rollback,
                    client_request_token: Some(format!("create{}", self.uuid)),
                })
                .await?;
        }

        self.monitor_deployment().await
    }

    async fn monitor_deployment(&self) -> Result<DeployStackResult, ToolkitError> {
        let cfn = Arc::clone(&self.cfn);
        let stack = match wait_for_stack_deploy(cfn, &self.stack_name, &self.request.wait).await {
            Ok(stack) => stack,
            Err(err @ ToolkitError::StackFailed { .. }) => {
                if self.options().ci {
                    self.report_failures().await;
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        let Some(stack) = stack else {
            return Err(ToolkitError::Internal(
                "Stack deploy failed (the stack disappeared while we were deploying it)".into(),
            ));
        };
        tracing::debug!(stack = %self.stack_name, "Stack has completed updating");

        Ok(DeployStackResult::DidDeployStack(SuccessfulDeployStackResult {
            no_op: false,
            outputs: stack.outputs(),
            stack_arn: stack.stack_id()?.to_string(),
        }))
    }

    /// Log the resources that failed during this deployment.
    async fn report_failures(&self) {
        let cfn = Arc::clone(&self.cfn);
        let events = resource_failures_since(cfn, &self.stack_name, DEPLOY_START_STATUSES).await;
        let failures = match events {
            Ok(failures) => failures,
            Err(e) => {
                tracing::debug!(
                    stack = %self.stack_name,
                    error = %e,
                    "could not read stack events"
                );
                return;
            }
        };
        for event in failures {
            let reason = event
                .resource_status_reason
                .as_deref()
                .unwrap_or("no reason given");
            tracing::error!(
                stack = %self.stack_name,
                resource = event.logical_resource_id.as_deref().unwrap_or_default(),
                kind = event.resource_type.as_deref().unwrap_or_default(),
                status = event.resource_status.as_deref().unwrap_or_default(),
                "{reason}"
            );
        }
    }
}

fn capabilities() -> Vec<String> {
    DEPLOY_CAPABILITIES.iter().map(|c| c.to_string()).collect()
}

fn has_replacement(change_set: &ChangeSetDescription) -> bool {
    change_set.changes.iter().any(|c| {
        c.policy_action
            .as_deref()
            .is_some_and(|a| REPLACING_POLICY_ACTIONS.contains(&a))
    })
}

/// Whether a deployment would change nothing.
async fn can_skip_deploy(
    options: &DeployStackOptions,
    current: &CloudFormationStack,
    parameter_changes: ParameterChanges,
) -> Result<bool, ToolkitError> {
    let name = options.deploy_name();

    if options.force {
        tracing::debug!(stack = name, "forced deployment");
        return Ok(false);
    }
    if !options.deployment_method.executes() {
        tracing::debug!(stack = name, "--no-execute, always creating change set");
        return Ok(false);
    }
    if !current.exists() {
        tracing::debug!(stack = name, "no existing stack");
        return Ok(false);
    }
    if options.stack.template != current.template().await? {
        tracing::debug!(stack = name, "template has changed");
        return Ok(false);
    }
    if !tags_equal(current.tags(), options.tags()) {
        tracing::debug!(stack = name, "tags have changed");
        return Ok(false);
    }
    if current.notification_arns() != options.notification_arns.as_slice() {
        tracing::debug!(stack = name, "notification arns have changed");
        return Ok(false);
    }
    if current.termination_protection() != options.stack.termination_protection {
        tracing::debug!(stack = name, "termination protection has been updated");
        return Ok(false);
    }
    match parameter_changes {
        ParameterChanges::None => {}
        ParameterChanges::Ssm => {
            tracing::debug!(
                stack = name,
                "some parameters come from SSM so we have to assume they may have changed"
            );
            return Ok(false);
        }
        ParameterChanges::Changed => {
            tracing::debug!(stack = name, "parameters have changed");
            return Ok(false);
        }
    }
    if current.stack_status().is_failure() {
        tracing::debug!(stack = name, "stack is in a failure state");
        return Ok(false);
    }
    Ok(true)
}

/// Where the service should read the template from.
async fn make_body_parameter(
    request: &DeployStackRequest,
) -> Result<TemplateSource, ToolkitError> {
    let stack = &request.options.stack;

    if let Some(url) = &stack.stack_template_asset_object_url {
        let url = rest_url_from_manifest(url, &request.resolved_environment)?;
        return Ok(TemplateSource::Url(url));
    }

    let body = stack.template.to_body()?;
    if body.len() <= LARGE_TEMPLATE_SIZE {
        return Ok(TemplateSource::Body(body));
    }

    let toolkit = request.resources.lookup_toolkit().await?;
    if !toolkit.found() {
        tracing::error!(
            "Templates larger than {}KiB must be uploaded to S3. Run 'cdk bootstrap {}' to set up \
             a bucket in this environment, then re-deploy.",
            LARGE_TEMPLATE_SIZE / 1024,
            request.resolved_environment.name
        );
        return Err(ToolkitError::TemplateTooLarge {
            stack_name: stack.display_name.clone(),
            size: body.len(),
            limit: LARGE_TEMPLATE_SIZE,
        });
    }

    let hash = hex::encode(Sha256::digest(body.as_bytes()));
    let key = format!("cdk/{}/{}.json", stack.id, hash);
    let bucket = toolkit.bucket_name()?;
    request
        .sdk
        .s3()
        .put_object(&bucket, &key, body.into_bytes())
        .await?;

    let url = format!("{}/{}", toolkit.bucket_url()?, key);
    tracing::debug!(url = %url, "Storing template in S3");
    Ok(TemplateSource::Url(url))
}

/// Turn a pre-uploaded template location into a URL the service accepts.
///
/// `s3://bucket/key` becomes the bucket's regional REST endpoint.
fn rest_url_from_manifest(url: &str, environment: &Environment) -> Result<String, ToolkitError> {
    if url.contains(super::placeholders::CURRENT_PARTITION) {
        return Err(ToolkitError::InvalidOptions(
            "Cannot use '${AWS::Partition}' in the 'stackTemplateAssetObjectUrl' field".into(),
        ));
    }
    let url = url
        .replace(super::placeholders::CURRENT_ACCOUNT, &environment.account)
        .replace(super::placeholders::CURRENT_REGION, &environment.region);

    let parsed = url
        .strip_prefix("s3://")
        .and_then(|rest| rest.split_once('/'));
    let Some((bucket, key)) = parsed else {
        return Ok(url);
    };

    let suffix = if environment.region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    let region = &environment.region;
    Ok(format!("https://s3.{region}.{suffix}/{bucket}/{key}"))
}

/// What to destroy.
#[derive(Debug, Clone)]
pub struct DestroyStackOptions {
    pub stack: StackArtifact,
    pub deploy_name: Option<String>,
    pub role_arn: Option<String>,
}

impl DestroyStackOptions {
    pub fn new(stack: StackArtifact) -> Self {
        Self {
            stack,
            deploy_name: None,
            role_arn: None,
        }
    }

    fn deploy_name(&self) -> &str {
        self.deploy_name
            .as_deref()
            .unwrap_or(&self.stack.stack_name)
    }
}

/// Delete a stack and wait for it to be gone.
///
/// A stack that does not exist is left alone. Failures are not retried.
pub async fn destroy_stack(
    cfn: Arc<dyn CloudFormation>,
    options: &DestroyStackOptions,
    wait: &WaitPolicy,
) -> Result<(), ToolkitError> {
    let deploy_name = options.deploy_name();

    let current = CloudFormationStack::lookup(Arc::clone(&cfn), deploy_name, false).await?;
    if !current.exists() {
        tracing::debug!(
            stack = deploy_name,
            "stack does not exist, nothing to destroy"
        );
        return Ok(());
    }

    cfn.delete_stack(DeleteStackRequest {
        stack_name: deploy_name.to_string(),
        role_arn: options.role_arn.clone(),
        client_request_token: None,
    })
    .await?;

    if let Some(stack) = wait_for_stack_delete(cfn, deploy_name, wait).await? {
        return Err(ToolkitError::StackFailed {
            stack_name: deploy_name.to_string(),
            operation: "to destroy",
            status: stack.stack_status().to_string(),
        });
    }
    Ok(())
}
