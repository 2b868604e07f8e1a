//! engine::bootstrap
//!
//! Deploying and upgrading the bootstrap stack.
//!
//! The bootstrap stack provides the bucket, roles and version parameter
//! other deployments rely on, so deploying it cannot itself rely on them:
//! it goes through the change-set protocol with
//! [`EnvironmentResources::without_bootstrap`].
//!
//! An existing bootstrap stack is never replaced by a template of another
//! variant or an older version unless forced. Both cases are reported as a
//! no-op with a warning.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::deploy::{
    deploy_stack, DeployStackOptions, DeployStackRequest, DeployStackResult, DeploymentMethod,
    SuccessfulDeployStackResult,
};
use super::error::ToolkitError;
use super::resources::EnvironmentResources;
use super::sdk_provider::SdkProvider;
use super::stack::WaitPolicy;
use super::toolkit_info::ToolkitInfo;
use crate::cloud::Sdk;
use crate::core::artifact::{CloudAssembly, StackArtifact};
use crate::core::config::{BootstrapConfig, DEFAULT_TOOLKIT_STACK_NAME};
use crate::core::template::{Template, DEFAULT_BOOTSTRAP_VARIANT};
use crate::core::types::{Environment, Mode, Tag};

/// `FileAssetsBucketKmsKeyId` value asking the template to create a key.
pub const CREATE_NEW_KEY: &str = "";

/// `FileAssetsBucketKmsKeyId` value selecting the AWS-managed key.
pub const USE_AWS_MANAGED_KEY: &str = "AWS_MANAGED_KEY";

const DEFAULT_PARTITION: &str = "aws";

const KMS_KEY_CONFLICT: &str = "You cannot pass '--bootstrap-kms-key-id' and \
    '--bootstrap-customer-key' together. Specify one or the other";

/// Template parameters a bootstrap can set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrappingParameters {
    pub bucket_name: Option<String>,
    pub kms_key_id: Option<String>,
    /// `Some(true)` creates a customer managed key, `Some(false)` uses the AWS-managed one
    pub create_customer_master_key: Option<bool>,
    pub qualifier: Option<String>,
    /// Block public access to the bucket; defaults to true
    pub public_access_block_configuration: Option<bool>,
    /// Accounts trusted to deploy; `None` keeps the current value
    pub trusted_accounts: Option<Vec<String>>,
    /// Accounts trusted to look up values; `None` keeps the current value
    pub trusted_accounts_for_lookup: Option<Vec<String>>,
    /// Accounts removed from both trust lists
    pub untrusted_accounts: Vec<String>,
    pub cloudformation_execution_policies: Option<Vec<String>>,
}

impl From<&BootstrapConfig> for BootstrappingParameters {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            qualifier: config.qualifier.clone(),
            trusted_accounts: config.trust.clone(),
            trusted_accounts_for_lookup: config.trust_for_lookup.clone(),
            cloudformation_execution_policies: config.cloudformation_execution_policies.clone(),
            ..Default::default()
        }
    }
}

/// How to deploy the bootstrap stack.
#[derive(Debug, Clone)]
pub struct BootstrapEnvironmentOptions {
    /// Name of the bootstrap stack; defaults to [`DEFAULT_TOOLKIT_STACK_NAME`]
    pub toolkit_stack_name: Option<String>,
    pub role_arn: Option<String>,
    pub parameters: BootstrappingParameters,
    /// Overwrite a stack of another variant or a newer version
    pub force: bool,
    /// `None` keeps the current setting
    pub termination_protection: Option<bool>,
    /// Create the change set but leave it for review
    pub execute: bool,
    pub tags: Vec<Tag>,
    pub use_previous_parameters: bool,
}

impl Default for BootstrapEnvironmentOptions {
    fn default() -> Self {
        Self {
            toolkit_stack_name: None,
            role_arn: None,
            parameters: BootstrappingParameters::default(),
            force: false,
            termination_protection: None,
            execute: true,
            tags: Vec::new(),
            use_previous_parameters: true,
        }
    }
}

impl BootstrapEnvironmentOptions {
    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self {
            parameters: BootstrappingParameters::from(config),
            termination_protection: config.termination_protection,
            ..Default::default()
        }
    }
}

/// The deployed bootstrap stack of one environment.
pub struct BootstrapStack {
    provider: Arc<SdkProvider>,
    sdk: Arc<dyn Sdk>,
    resolved_environment: Environment,
    toolkit_stack_name: String,
    current: ToolkitInfo,
    wait: WaitPolicy,
}

impl std::fmt::Debug for BootstrapStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapStack")
            .field("environment", &self.resolved_environment.name)
            .field("toolkit_stack_name", &self.toolkit_stack_name)
            .field("found", &self.current.found())
            .finish()
    }
}

impl BootstrapStack {
    /// Look up the bootstrap stack of `environment` with write credentials.
    pub async fn lookup(
        provider: Arc<SdkProvider>,
        environment: &Environment,
        toolkit_stack_name: Option<&str>,
        wait: WaitPolicy,
    ) -> Result<Self, ToolkitError> {
        let toolkit_stack_name = toolkit_stack_name
            .unwrap_or(DEFAULT_TOOLKIT_STACK_NAME)
            .to_string();
        let resolved_environment = provider.resolve_environment(environment).await?;
        let sdk = provider
            .for_environment(&resolved_environment, Mode::ForWriting, None)
            .await?
            .sdk;
        let current = ToolkitInfo::lookup(sdk.cloudformation(), &toolkit_stack_name, &wait).await?;

        Ok(Self {
            provider,
            sdk,
            resolved_environment,
            toolkit_stack_name,
            current,
            wait,
        })
    }

    pub fn exists(&self) -> bool {
        self.current.found()
    }

    pub fn parameters(&self) -> BTreeMap<String, String> {
        self.current.parameters()
    }

    pub fn termination_protection(&self) -> bool {
        self.current.termination_protection()
    }

    pub fn version(&self) -> u32 {
        self.current.version()
    }

    pub fn variant(&self) -> String {
        self.current.variant()
    }

    /// Partition of the credentials used to deploy.
    pub async fn partition(&self) -> Result<String, ToolkitError> {
        Ok(self
            .provider
            .base_credentials_partition(&self.resolved_environment, Mode::ForWriting)
            .await?
            .unwrap_or_else(|| DEFAULT_PARTITION.to_string()))
    }

    /// Deploy `template` as the bootstrap stack.
    ///
    /// Returns a no-op without touching the stack if the template is of
    /// another variant or older than what is deployed, unless `force` is set.
    pub async fn update(
        &self,
        template: &Template,
        parameters: BTreeMap<String, Option<String>>,
        options: &BootstrapEnvironmentOptions,
    ) -> Result<SuccessfulDeployStackResult, ToolkitError> {
        if self.current.found() && !options.force {
            let new_version = template.bootstrap_version().unwrap_or(0);
            let new_variant = template
                .bootstrap_variant()
                .unwrap_or(DEFAULT_BOOTSTRAP_VARIANT.to_string());
            let current_version = self.current.version();
            let current_variant = self.current.variant();

            if new_variant != current_variant {
                tracing::warn!(
                    "Bootstrap stack already exists, containing '{current_variant}'. \
                     Not overwriting it with a template containing '{new_variant}' \
                     (use --force if you intend to overwrite)"
                );
                return self.no_op();
            }

            if new_version < current_version {
                tracing::warn!(
                    "Bootstrap stack already at version {current_version}. \
                     Not downgrading it to version {new_version} \
                     (use --force if you intend to downgrade)"
                );
                if new_version == 0 {
                    tracing::warn!(
                        "(Did you set the '@aws-cdk/core:newStyleStackSynthesis' \
                         feature flag in cdk.json?)"
                    );
                }
                return self.no_op();
            }
        }

        let mut stack = StackArtifact::new(
            self.toolkit_stack_name.clone(),
            self.resolved_environment.clone(),
            template.clone(),
        );
        stack.termination_protection = options
            .termination_protection
            .unwrap_or_else(|| self.current.termination_protection());
        let assembly = CloudAssembly::single_stack(stack);
        let stack = assembly
            .stack_by_name(&self.toolkit_stack_name)
            .cloned()
            .ok_or_else(|| ToolkitError::Internal("bootstrap assembly lost its stack".into()))?;

        let mut deploy_options = DeployStackOptions::new(stack);
        deploy_options.role_arn = options.role_arn.clone();
        deploy_options.tags = Some(options.tags.clone());
        deploy_options.parameters = parameters;
        deploy_options.use_previous_parameters = options.use_previous_parameters;
        deploy_options.force = options.force;
        deploy_options.deployment_method = DeploymentMethod::ChangeSet {
            change_set_name: None,
            execute: options.execute,
            import_existing_resources: false,
        };

        let environment = &self.resolved_environment;
        let resources = EnvironmentResources::without_bootstrap(environment, Arc::clone(&self.sdk));
        let request = DeployStackRequest {
            options: deploy_options,
            resolved_environment: self.resolved_environment.clone(),
            sdk: Arc::clone(&self.sdk),
            resources,
            wait: self.wait,
        };

        match deploy_stack(request).await? {
            DeployStackResult::DidDeployStack(result) => Ok(result),
            other => Err(ToolkitError::Internal(format!(
                "Unexpected deployment result for the bootstrap stack: {other:?}"
            ))),
        }
    }

    fn no_op(&self) -> Result<SuccessfulDeployStackResult, ToolkitError> {
        let stack = self.current.stack()?;
        Ok(SuccessfulDeployStackResult {
            no_op: true,
            outputs: stack.outputs(),
            stack_arn: stack.stack_id()?.to_string(),
        })
    }
}

/// Deploys a given bootstrap template into environments.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    template: Template,
    wait: WaitPolicy,
}

impl Bootstrapper {
    pub fn new(template: Template) -> Self {
        Self {
            template,
            wait: WaitPolicy::default(),
        }
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Bootstrap `environment`, carrying over what the current stack has
    /// where `options` leaves it open.
    pub async fn bootstrap_environment(
        &self,
        environment: &Environment,
        provider: Arc<SdkProvider>,
        options: &BootstrapEnvironmentOptions,
    ) -> Result<SuccessfulDeployStackResult, ToolkitError> {
        let params = &options.parameters;
        if params.create_customer_master_key.is_some() && params.kms_key_id.is_some() {
            return Err(ToolkitError::InvalidOptions(KMS_KEY_CONFLICT.into()));
        }

        let current = BootstrapStack::lookup(
            provider,
            environment,
            options.toolkit_stack_name.as_deref(),
            self.wait,
        )
        .await?;
        let partition = current.partition().await?;
        let current_params = current.parameters();

        let trusted_accounts = trust_list(
            params.trusted_accounts.as_deref(),
            current_params.get("TrustedAccounts"),
            &params.untrusted_accounts,
        );
        let accounts = list_or_none(&trusted_accounts);
        tracing::info!("Trusted accounts for deployment: {accounts}");

        let trusted_accounts_for_lookup = trust_list(
            params.trusted_accounts_for_lookup.as_deref(),
            current_params.get("TrustedAccountsForLookup"),
            &params.untrusted_accounts,
        );
        let accounts = list_or_none(&trusted_accounts_for_lookup);
        tracing::info!("Trusted accounts for lookup: {accounts}");

        let policies = match &params.cloudformation_execution_policies {
            Some(policies) => policies.clone(),
            None => split_cfn_array(current_params.get("CloudFormationExecutionPolicies")),
        };
        let policies = if policies.is_empty() && trusted_accounts.is_empty() {
            let implicit = format!("arn:{partition}:iam::aws:policy/AdministratorAccess");
            tracing::warn!(
                "Using default execution policy of '{implicit}'. \
                 Pass '--cloudformation-execution-policies' to customize."
            );
            vec![implicit]
        } else if policies.is_empty() {
            return Err(ToolkitError::InvalidOptions(format!(
                "Please pass '--cloudformation-execution-policies' when using '--trust' \
                 to specify deployment permissions. Try a managed policy of the form \
                 'arn:{partition}:iam::aws:policy/<PolicyName>'."
            )));
        } else {
            tracing::info!("Execution policies: {}", policies.join(", "));
            policies
        };

        let kms_key_id = match (&params.kms_key_id, params.create_customer_master_key) {
            (Some(id), _) => Some(id.clone()),
            (None, Some(true)) => Some(CREATE_NEW_KEY.to_string()),
            (None, Some(false)) => Some(USE_AWS_MANAGED_KEY.to_string()),
            (None, None) if !current_params.contains_key("FileAssetsBucketKmsKeyId") => {
                Some(USE_AWS_MANAGED_KEY.to_string())
            }
            (None, None) => None,
        };

        let lookup_accounts = trusted_accounts_for_lookup.join(",");
        let policies = policies.join(",");
        let block_public = params
            .public_access_block_configuration
            .unwrap_or(true)
            .to_string();
        let parameters = BTreeMap::from([
            parameter("FileAssetsBucketName", params.bucket_name.clone()),
            parameter("FileAssetsBucketKmsKeyId", kms_key_id),
            parameter("TrustedAccounts", Some(trusted_accounts.join(","))),
            parameter("TrustedAccountsForLookup", Some(lookup_accounts)),
            parameter("CloudFormationExecutionPolicies", Some(policies)),
            parameter("Qualifier", params.qualifier.clone()),
            parameter("PublicAccessBlockConfiguration", Some(block_public)),
        ]);

        let mut options = options.clone();
        options.termination_protection = Some(
            options
                .termination_protection
                .unwrap_or_else(|| current.termination_protection()),
        );

        current.update(&self.template, parameters, &options).await
    }
}

fn parameter(name: &str, value: Option<String>) -> (String, Option<String>) {
    (name.to_string(), value)
}

/// Split a comma-separated list parameter.
fn split_cfn_array(value: Option<&String>) -> Vec<String> {
    match value {
        Some(value) if !value.is_empty() => value.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

fn trust_list(
    explicit: Option<&[String]>,
    current: Option<&String>,
    untrusted: &[String],
) -> Vec<String> {
    let candidates = match explicit {
        Some(accounts) => accounts.to_vec(),
        None => split_cfn_array(current),
    };
    let mut accounts: Vec<String> = Vec::new();
    for account in candidates {
        if !untrusted.contains(&account) && !accounts.contains(&account) {
            accounts.push(account);
        }
    }
    accounts
}

fn list_or_none(accounts: &[String]) -> String {
    if accounts.is_empty() {
        "(none)".to_string()
    } else {
        accounts.join(", ")
    }
}
