//! engine::environment
//!
//! Access to the environment a stack targets.
//!
//! # Roles
//!
//! Stack operations use the stack's deploy role. Lookups use the lookup
//! role when the stack declares one; a lookup role that was not actually
//! assumed is reported as fallback credentials.
//!
//! # Caching
//!
//! Clients are cached per `(account, region, mode, role, external id)` for
//! the lifetime of the [`EnvironmentAccess`], which is one command
//! invocation. Failed attempts are not cached.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use super::error::ToolkitError;
use super::placeholders::{replace_env_placeholders, replace_optional};
use super::resources::{EnvironmentResources, EnvironmentResourcesRegistry};
use super::sdk_provider::{AssumeRoleOptions, SdkForEnvironment, SdkProvider};
use super::stack::WaitPolicy;
use crate::cloud::Sdk;
use crate::core::artifact::StackArtifact;
use crate::core::types::{Environment, Mode};

/// Partition assumed when no credentials can tell us better.
const DEFAULT_PARTITION: &str = "aws";

/// An authenticated view of a stack's environment.
#[derive(Clone)]
pub struct TargetEnvironment {
    pub sdk: Arc<dyn Sdk>,
    pub resolved_environment: Environment,
    pub resources: EnvironmentResources,
    /// A role was requested and assumed
    pub did_assume_role: bool,
    /// A role was requested but the base credentials are used instead
    pub is_fallback_credentials: bool,
    provider: Arc<SdkProvider>,
}

impl fmt::Debug for TargetEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetEnvironment")
            .field("resolved_environment", &self.resolved_environment)
            .field("did_assume_role", &self.did_assume_role)
            .field("is_fallback_credentials", &self.is_fallback_credentials)
            .finish()
    }
}

impl TargetEnvironment {
    /// Replace `${AWS::*}` placeholders with this environment's values.
    pub async fn replace_placeholders(&self, value: &str) -> Result<String, ToolkitError> {
        replace_env_placeholders(value, &self.resolved_environment, || {
            partition(&self.provider, &self.resolved_environment)
        })
        .await
    }

    pub async fn replace_optional_placeholders(
        &self,
        value: Option<&str>,
    ) -> Result<Option<String>, ToolkitError> {
        replace_optional(value, &self.resolved_environment, || {
            partition(&self.provider, &self.resolved_environment)
        })
        .await
    }
}

async fn partition(
    provider: &SdkProvider,
    environment: &Environment,
) -> Result<String, ToolkitError> {
    Ok(provider
        .base_credentials_partition(environment, Mode::ForReading)
        .await?
        .unwrap_or_else(|| DEFAULT_PARTITION.to_string()))
}

struct PrepareSdk<'a> {
    environment: &'a Environment,
    mode: Mode,
    role_arn: Option<&'a str>,
    external_id: Option<&'a str>,
}

/// Resolves stacks to authenticated environments.
pub struct EnvironmentAccess {
    provider: Arc<SdkProvider>,
    resources: EnvironmentResourcesRegistry,
    sdk_cache: Mutex<HashMap<String, Arc<OnceCell<SdkForEnvironment>>>>,
}

impl fmt::Debug for EnvironmentAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentAccess")
            .field("provider", &self.provider)
            .field("resources", &self.resources)
            .finish()
    }
}

impl EnvironmentAccess {
    pub fn new(provider: Arc<SdkProvider>, toolkit_stack_name: Option<String>) -> Self {
        Self {
            provider,
            resources: EnvironmentResourcesRegistry::new(toolkit_stack_name),
            sdk_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.resources = self.resources.with_wait_policy(wait);
        self
    }

    pub fn sdk_provider(&self) -> &Arc<SdkProvider> {
        &self.provider
    }

    pub fn toolkit_stack_name(&self) -> &str {
        self.resources.toolkit_stack_name()
    }

    pub async fn resolve_stack_environment(
        &self,
        stack: &StackArtifact,
    ) -> Result<Environment, ToolkitError> {
        self.provider.resolve_environment(&stack.environment).await
    }

    /// Access for read-only stack operations, using the deploy role.
    pub async fn access_stack_for_readonly(
        &self,
        stack: &StackArtifact,
    ) -> Result<TargetEnvironment, ToolkitError> {
        self.access_stack_for_operations(stack, Mode::ForReading).await
    }

    /// Access for deploying, rolling back or destroying, using the deploy role.
    pub async fn access_stack_for_mutable(
        &self,
        stack: &StackArtifact,
    ) -> Result<TargetEnvironment, ToolkitError> {
        self.access_stack_for_operations(stack, Mode::ForWriting).await
    }

    /// Access through the stack's lookup role.
    ///
    /// # Errors
    ///
    /// Fails if the lookup role was assumed but its bootstrap stack is
    /// older than the stack requires.
    pub async fn access_stack_for_lookup(
        &self,
        stack: &StackArtifact,
    ) -> Result<TargetEnvironment, ToolkitError> {
        let lookup_role = stack.lookup_role.as_ref();
        let target = self
            .prepare_sdk(PrepareSdk {
                environment: &stack.environment,
                mode: Mode::ForReading,
                role_arn: lookup_role.map(|r| r.arn.as_str()),
                external_id: lookup_role.and_then(|r| r.external_id.as_deref()),
            })
            .await?;

        if let Some(role) = lookup_role {
            if let (true, Some(required), Some(parameter)) = (
                target.did_assume_role,
                role.requires_bootstrap_stack_version,
                role.bootstrap_stack_version_ssm_parameter.as_deref(),
            ) {
                let found = target
                    .resources
                    .version_from_ssm_parameter(parameter)
                    .await?;
                if found < required {
                    return Err(ToolkitError::LookupRoleVersion { required, found });
                }
            }

            if target.is_fallback_credentials {
                let arn = target.replace_placeholders(&role.arn).await?;
                tracing::warn!(
                    "Lookup role {arn} was not assumed. Proceeding with default credentials."
                );
            }
        }

        Ok(target)
    }

    /// Access through the lookup role, or else read-only stack access.
    ///
    /// Expired credentials always propagate.
    pub async fn access_stack_for_lookup_best_effort(
        &self,
        stack: &StackArtifact,
    ) -> Result<TargetEnvironment, ToolkitError> {
        match self.access_stack_for_lookup(stack).await {
            Ok(target) => return Ok(target),
            Err(e) if e.is_expired_token() => return Err(e),
            Err(e) if e.is_bootstrap_requirement_error() => {
                tracing::warn!(
                    stack = %stack.stack_name,
                    "{}. Falling back to the deploy role for lookups.",
                    e
                );
            }
            Err(e) => {
                tracing::warn!(
                    stack = %stack.stack_name,
                    "Could not use the lookup role ({}). \
                     Falling back to the deploy role for lookups.",
                    e
                );
            }
        }
        self.access_stack_for_readonly(stack).await
    }

    async fn access_stack_for_operations(
        &self,
        stack: &StackArtifact,
        mode: Mode,
    ) -> Result<TargetEnvironment, ToolkitError> {
        self.prepare_sdk(PrepareSdk {
            environment: &stack.environment,
            mode,
            role_arn: stack.assume_role_arn.as_deref(),
            external_id: stack.assume_role_external_id.as_deref(),
        })
        .await
    }

    async fn prepare_sdk(
        &self,
        options: PrepareSdk<'_>,
    ) -> Result<TargetEnvironment, ToolkitError> {
        let resolved = self
            .provider
            .resolve_environment(options.environment)
            .await?;

        let current_partition = || partition(&self.provider, &resolved);
        let role_arn = replace_optional(options.role_arn, &resolved, current_partition).await?;
        let external_id = options.external_id.map(str::to_string);
        let role = role_arn.map(|arn| AssumeRoleOptions::new(arn).with_external_id(external_id));

        let stack_sdk = self
            .cached_sdk_for_environment(&resolved, options.mode, role.as_ref())
            .await?;
        let sdk = stack_sdk.sdk;

        Ok(TargetEnvironment {
            resources: self.resources.for_environment(&resolved, Arc::clone(&sdk)),
            is_fallback_credentials: !stack_sdk.did_assume_role && role.is_some(),
            did_assume_role: stack_sdk.did_assume_role,
            sdk,
            resolved_environment: resolved,
            provider: Arc::clone(&self.provider),
        })
    }

    async fn cached_sdk_for_environment(
        &self,
        environment: &Environment,
        mode: Mode,
        role: Option<&AssumeRoleOptions>,
    ) -> Result<SdkForEnvironment, ToolkitError> {
        let key = [
            environment.account.as_str(),
            environment.region.as_str(),
            mode.to_string().as_str(),
            role.map(|r| r.role_arn.as_str()).unwrap_or_default(),
            role.and_then(|r| r.external_id.as_deref()).unwrap_or_default(),
        ]
        .join(":");

        let cell = {
            let mut cache = self
                .sdk_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cache.entry(key).or_default())
        };

        let sdk = cell
            .get_or_try_init(|| self.provider.for_environment(environment, mode, role))
            .await?;
        Ok(sdk.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::mock::{MockClientFactory, MockCredentialSource, MockParameterStore};
    use crate::cloud::CloudError;
    use crate::core::artifact::LookupRole;
    use crate::core::template::Template;

    const ACCOUNT: &str = "111111111111";
    const VERSION_PARAMETER: &str = "/cdk-bootstrap/hnb659fds/version";
    const LOOKUP_ROLE: &str =
        "arn:${AWS::Partition}:iam::${AWS::AccountId}:role/cdk-lookup-${AWS::Region}";
    const DEPLOY_ROLE: &str =
        "arn:${AWS::Partition}:iam::${AWS::AccountId}:role/cdk-deploy-${AWS::Region}";

    fn access(factory: &MockClientFactory) -> EnvironmentAccess {
        let provider = SdkProvider::new(
            Arc::new(MockCredentialSource::with_credentials("AKIADEFAULT")),
            Arc::new(factory.clone()),
        );
        EnvironmentAccess::new(Arc::new(provider), None).with_wait_policy(WaitPolicy::immediate())
    }

    fn stack() -> StackArtifact {
        let env = Environment::new(ACCOUNT, "eu-west-1");
        let mut stack = StackArtifact::new("Stack", env, Template::new());
        stack.assume_role_arn = Some(DEPLOY_ROLE.into());
        stack.lookup_role = Some(LookupRole {
            arn: LOOKUP_ROLE.into(),
            external_id: None,
            requires_bootstrap_stack_version: Some(8),
            bootstrap_stack_version_ssm_parameter: Some(VERSION_PARAMETER.into()),
        });
        stack
    }

    #[tokio::test]
    async fn deploy_role_placeholders_are_replaced() {
        let factory = MockClientFactory::new().with_account("AKIADEFAULT", ACCOUNT);
        let target = access(&factory)
            .access_stack_for_mutable(&stack())
            .await
            .unwrap();

        assert!(target.did_assume_role);
        assert!(!target.is_fallback_credentials);
        assert_eq!(
            factory.assumed_roles()[0].request.role_arn,
            "arn:aws:iam::111111111111:role/cdk-deploy-eu-west-1"
        );
    }

    #[tokio::test]
    async fn sdks_are_cached_per_mode_and_role() {
        let factory = MockClientFactory::new().with_account("AKIADEFAULT", ACCOUNT);
        let access = access(&factory);

        access.access_stack_for_mutable(&stack()).await.unwrap();
        access.access_stack_for_mutable(&stack()).await.unwrap();
        assert_eq!(factory.assumed_roles().len(), 1);

        access.access_stack_for_readonly(&stack()).await.unwrap();
        assert_eq!(factory.assumed_roles().len(), 2);
    }

    #[tokio::test]
    async fn lookup_role_with_old_bootstrap_is_rejected() {
        let factory = MockClientFactory::new()
            .with_account("AKIADEFAULT", ACCOUNT)
            .with_ssm(MockParameterStore::new().with_parameter(VERSION_PARAMETER, "7"));

        let err = access(&factory)
            .access_stack_for_lookup(&stack())
            .await
            .unwrap_err();
        let ToolkitError::LookupRoleVersion { required, found } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!((required, found), (8, 7));
    }

    #[tokio::test]
    async fn unassumable_lookup_role_same_account_is_fallback() {
        let factory = MockClientFactory::new()
            .with_account("AKIADEFAULT", ACCOUNT)
            .with_role_failure(
                "arn:aws:iam::111111111111:role/cdk-lookup-eu-west-1",
                CloudError::AccessDenied("no".into()),
            );

        let target = access(&factory)
            .access_stack_for_lookup(&stack())
            .await
            .unwrap();
        assert!(target.is_fallback_credentials);
        assert!(!target.did_assume_role);
    }

    #[tokio::test]
    async fn best_effort_lookup_falls_back_to_deploy_role() {
        let factory = MockClientFactory::new()
            .with_account("AKIADEFAULT", ACCOUNT)
            .with_ssm(MockParameterStore::new().with_parameter(VERSION_PARAMETER, "7"));

        let target = access(&factory)
            .access_stack_for_lookup_best_effort(&stack())
            .await
            .unwrap();
        assert!(target.did_assume_role);
        let roles: Vec<_> = factory
            .assumed_roles()
            .into_iter()
            .map(|r| r.request.role_arn)
            .collect();
        assert_eq!(
            roles,
            [
                "arn:aws:iam::111111111111:role/cdk-lookup-eu-west-1",
                "arn:aws:iam::111111111111:role/cdk-deploy-eu-west-1",
            ]
        );
    }

    #[tokio::test]
    async fn best_effort_lookup_propagates_expired_credentials() {
        let factory = MockClientFactory::new()
            .with_account("AKIADEFAULT", ACCOUNT)
            .with_role_failure(
                "arn:aws:iam::111111111111:role/cdk-lookup-eu-west-1",
                CloudError::ExpiredToken("old".into()),
            );

        let err = access(&factory)
            .access_stack_for_lookup_best_effort(&stack())
            .await
            .unwrap_err();
        assert!(err.is_expired_token());
    }

    #[tokio::test]
    async fn replace_placeholders_uses_resolved_environment() {
        let factory = MockClientFactory::new()
            .with_account("AKIADEFAULT", ACCOUNT)
            .with_partition("aws-cn");
        let target = access(&factory)
            .access_stack_for_readonly(&stack())
            .await
            .unwrap();

        let replaced = target
            .replace_placeholders("${AWS::Partition}/${AWS::AccountId}/${AWS::Region}")
            .await
            .unwrap();
        assert_eq!(replaced, "aws-cn/111111111111/eu-west-1");
    }
}
