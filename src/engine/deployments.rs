//! engine::deployments
//!
//! The entry point for operating on stacks.
//!
//! [`Deployments`] resolves the environment and credentials for each
//! stack, checks the bootstrap version the stack declares, fills in
//! `${AWS::*}` placeholders, and hands off to the deploy, rollback and
//! destroy protocols.
//!
//! # Example
//!
//! ```ignore
//! let deployments = Deployments::from_config(provider, &config);
//! let options = DeployStackOptions::with_defaults(stack, config.deploy_defaults());
//!
//! match deployments.deploy_stack(options).await? {
//!     DeployStackResult::DidDeployStack(result) => println!("{}", result.stack_arn),
//!     DeployStackResult::FailpausedNeedRollbackFirst { .. } => { /* roll back, then retry */ }
//!     DeployStackResult::ReplacementRequiresRollback => { /* retry with rollback */ }
//! }
//! ```

use std::sync::Arc;

use super::deploy::{
    self, DeployStackOptions, DeployStackRequest, DeployStackResult, DestroyStackOptions,
};
use super::environment::{EnvironmentAccess, TargetEnvironment};
use super::error::ToolkitError;
use super::nested::{self, RootTemplateWithNestedStacks};
use super::rollback::{
    self, RollbackStackOptions, RollbackStackResult, BOOTSTRAP_STACK_VERSION_FOR_ROLLBACK,
};
use super::sdk_provider::SdkProvider;
use super::stack::{CloudFormationStack, WaitPolicy};
use crate::core::artifact::StackArtifact;
use crate::core::config::Config;
use crate::core::template::Template;
use crate::core::types::Environment;

/// Deploy, roll back, destroy and inspect stacks.
#[derive(Debug)]
pub struct Deployments {
    access: EnvironmentAccess,
    wait: WaitPolicy,
}

impl Deployments {
    pub fn new(provider: Arc<SdkProvider>, toolkit_stack_name: Option<String>) -> Self {
        Self {
            access: EnvironmentAccess::new(provider, toolkit_stack_name),
            wait: WaitPolicy::default(),
        }
    }

    /// Toolkit stack name and wait policy taken from `config`.
    pub fn from_config(provider: Arc<SdkProvider>, config: &Config) -> Self {
        Self::new(provider, Some(config.toolkit_stack_name().to_string()))
            .with_wait_policy(WaitPolicy::from_config(config))
    }

    pub fn with_wait_policy(self, wait: WaitPolicy) -> Self {
        Self {
            access: self.access.with_wait_policy(wait),
            wait,
        }
    }

    pub fn environment_access(&self) -> &EnvironmentAccess {
        &self.access
    }

    pub async fn resolve_environment(
        &self,
        stack: &StackArtifact,
    ) -> Result<Environment, ToolkitError> {
        self.access.resolve_stack_environment(stack).await
    }

    /// Deploy a stack.
    ///
    /// # Errors
    ///
    /// Fails, naming the stack, if the stack requires a bootstrap version
    /// the environment does not have.
    pub async fn deploy_stack(
        &self,
        mut options: DeployStackOptions,
    ) -> Result<DeployStackResult, ToolkitError> {
        let target = self.access.access_stack_for_mutable(&options.stack).await?;

        let required = options.stack.requires_bootstrap_stack_version;
        validate_bootstrap(&target, required, &options.stack).await?;

        let explicit_role = options.role_arn.as_deref();
        options.role_arn = execution_role(&target, explicit_role, &options.stack).await?;

        deploy::deploy_stack(DeployStackRequest {
            options,
            resolved_environment: target.resolved_environment.clone(),
            sdk: Arc::clone(&target.sdk),
            resources: target.resources.clone(),
            wait: self.wait,
        })
        .await
    }

    /// Roll back a stack paused in a failed state.
    pub async fn rollback_stack(
        &self,
        mut options: RollbackStackOptions,
    ) -> Result<RollbackStackResult, ToolkitError> {
        options.check()?;
        let target = self.access.access_stack_for_mutable(&options.stack).await?;

        if options.validate_bootstrap_stack_version {
            let required = Some(BOOTSTRAP_STACK_VERSION_FOR_ROLLBACK);
            validate_bootstrap(&target, required, &options.stack).await?;
        }

        let explicit_role = options.role_arn.as_deref();
        options.role_arn = execution_role(&target, explicit_role, &options.stack).await?;

        rollback::rollback_stack(target.sdk.cloudformation(), &options, &self.wait).await
    }

    /// Delete a stack. Failures are surfaced as they are.
    pub async fn destroy_stack(
        &self,
        mut options: DestroyStackOptions,
    ) -> Result<(), ToolkitError> {
        let target = self.access.access_stack_for_mutable(&options.stack).await?;
        let explicit_role = options.role_arn.as_deref();
        options.role_arn = execution_role(&target, explicit_role, &options.stack).await?;

        deploy::destroy_stack(target.sdk.cloudformation(), &options, &self.wait).await
    }

    /// Whether the stack is deployed. Never mutates anything.
    pub async fn stack_exists(
        &self,
        stack: &StackArtifact,
        deploy_name: Option<&str>,
        try_lookup_role: bool,
    ) -> Result<bool, ToolkitError> {
        let access = &self.access;
        let target = if try_lookup_role {
            access.access_stack_for_lookup_best_effort(stack).await?
        } else {
            access.access_stack_for_readonly(stack).await?
        };
        let name = deploy_name.unwrap_or(&stack.stack_name);
        let current = CloudFormationStack::lookup(target.sdk.cloudformation(), name, false).await?;
        Ok(current.exists())
    }

    /// The deployed template, empty if the stack was never deployed.
    pub async fn read_current_template(
        &self,
        stack: &StackArtifact,
    ) -> Result<Template, ToolkitError> {
        tracing::debug!(stack = %stack.stack_name, "reading existing template");
        let target = self
            .access
            .access_stack_for_lookup_best_effort(stack)
            .await?;
        nested::load_current_template(stack, target.sdk.cloudformation(), false).await
    }

    /// Deployed and generated templates of the stack and its nested stacks.
    pub async fn read_current_template_with_nested_stacks(
        &self,
        stack: &StackArtifact,
        retrieve_processed_template: bool,
    ) -> Result<RootTemplateWithNestedStacks, ToolkitError> {
        let target = self
            .access
            .access_stack_for_lookup_best_effort(stack)
            .await?;
        let cfn = target.sdk.cloudformation();
        nested::load_current_template_with_nested_stacks(stack, cfn, retrieve_processed_template)
            .await
    }
}

/// Check the environment's bootstrap version, naming the stack on failure.
async fn validate_bootstrap(
    target: &TargetEnvironment,
    required: Option<u32>,
    stack: &StackArtifact,
) -> Result<(), ToolkitError> {
    let ssm_parameter = stack.bootstrap_stack_version_ssm_parameter.as_deref();
    let ssm_parameter = target.replace_optional_placeholders(ssm_parameter).await?;
    target
        .resources
        .validate_version(required, ssm_parameter.as_deref())
        .await
        .map_err(|e| e.in_stack(&stack.display_name))
}

/// The execution role to pass to the service, placeholders filled in.
async fn execution_role(
    target: &TargetEnvironment,
    explicit: Option<&str>,
    stack: &StackArtifact,
) -> Result<Option<String>, ToolkitError> {
    let role = explicit.or(stack.cloudformation_execution_role_arn.as_deref());
    target.replace_optional_placeholders(role).await
}
