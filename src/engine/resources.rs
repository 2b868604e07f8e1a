//! engine::resources
//!
//! Per-environment bootstrap resources: the toolkit stack and the version
//! parameter that advertises it.
//!
//! # Caching
//!
//! [`EnvironmentResourcesRegistry`] keeps one cache per `account:region`.
//! The toolkit stack is looked up at most once per environment and each
//! SSM version parameter is read at most once. The registry belongs to one
//! [`Deployments`](super::Deployments) instance and lives as long as it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use super::error::ToolkitError;
use super::stack::WaitPolicy;
use super::toolkit_info::ToolkitInfo;
use crate::cloud::{CloudError, Sdk};
use crate::core::config::DEFAULT_TOOLKIT_STACK_NAME;
use crate::core::types::Environment;

/// First bootstrap template version that grants `ssm:GetParameter` on its
/// own version parameter.
pub const BOOTSTRAP_VERSION_INTRODUCING_GET_PARAMETER: u32 = 5;

#[derive(Debug, Default)]
struct EnvironmentCache {
    toolkit_info: OnceCell<Arc<ToolkitInfo>>,
    ssm_versions: Mutex<HashMap<String, u32>>,
}

impl EnvironmentCache {
    fn ssm_versions(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.ssm_versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out [`EnvironmentResources`] that share a cache per environment.
#[derive(Debug)]
pub struct EnvironmentResourcesRegistry {
    toolkit_stack_name: String,
    wait: WaitPolicy,
    caches: Mutex<HashMap<String, Arc<EnvironmentCache>>>,
}

impl EnvironmentResourcesRegistry {
    pub fn new(toolkit_stack_name: Option<String>) -> Self {
        let toolkit_stack_name =
            toolkit_stack_name.unwrap_or_else(|| DEFAULT_TOOLKIT_STACK_NAME.to_string());
        Self {
            toolkit_stack_name,
            wait: WaitPolicy::default(),
            caches: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn toolkit_stack_name(&self) -> &str {
        &self.toolkit_stack_name
    }

    /// Resources of `environment`, accessed through `sdk`.
    pub fn for_environment(
        &self,
        environment: &Environment,
        sdk: Arc<dyn Sdk>,
    ) -> EnvironmentResources {
        let key = format!("{}:{}", environment.account, environment.region);
        let cache = {
            let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(caches.entry(key).or_default())
        };
        EnvironmentResources {
            environment: environment.clone(),
            sdk,
            toolkit_stack_name: Some(self.toolkit_stack_name.clone()),
            wait: self.wait,
            cache,
        }
    }
}

/// Bootstrap resources of one environment.
#[derive(Clone)]
pub struct EnvironmentResources {
    environment: Environment,
    sdk: Arc<dyn Sdk>,
    /// `None` when the environment is being bootstrapped
    toolkit_stack_name: Option<String>,
    wait: WaitPolicy,
    cache: Arc<EnvironmentCache>,
}

impl std::fmt::Debug for EnvironmentResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentResources")
            .field("environment", &self.environment.name)
            .field("toolkit_stack_name", &self.toolkit_stack_name)
            .finish()
    }
}

impl EnvironmentResources {
    /// Resources for an environment that has no usable bootstrap stack,
    /// because it is the one being deployed.
    pub fn without_bootstrap(environment: &Environment, sdk: Arc<dyn Sdk>) -> Self {
        Self {
            environment: environment.clone(),
            sdk,
            toolkit_stack_name: None,
            wait: WaitPolicy::default(),
            cache: Arc::default(),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn sdk(&self) -> &Arc<dyn Sdk> {
        &self.sdk
    }

    /// The bootstrap stack of this environment.
    ///
    /// # Errors
    ///
    /// Only for resources created with [`without_bootstrap`](Self::without_bootstrap).
    /// A missing stack is reported through the returned [`ToolkitInfo`].
    pub async fn lookup_toolkit(&self) -> Result<Arc<ToolkitInfo>, ToolkitError> {
        let Some(stack_name) = &self.toolkit_stack_name else {
            return Err(ToolkitError::Internal(format!(
                "Trying to look up the bootstrap stack of {} while bootstrapping it",
                self.environment
            )));
        };

        let info = self
            .cache
            .toolkit_info
            .get_or_init(|| async {
                let cfn = self.sdk.cloudformation();
                let info = ToolkitInfo::lookup_or_error(cfn, stack_name, &self.wait).await;
                Arc::new(info)
            })
            .await;
        Ok(Arc::clone(info))
    }

    /// Check that the environment is bootstrapped with at least `expected`.
    ///
    /// The SSM parameter is authoritative when given. If it cannot be read
    /// for lack of permissions and the bootstrap stack predates the
    /// permission, the stack output version is used instead.
    pub async fn validate_version(
        &self,
        expected: Option<u32>,
        ssm_parameter: Option<&str>,
    ) -> Result<(), ToolkitError> {
        let Some(expected) = expected else {
            return Ok(());
        };

        let toolkit = self.lookup_toolkit().await?;

        if let Some(parameter) = ssm_parameter {
            match self.version_from_ssm_parameter(parameter).await {
                Ok(version) => return check_version(expected, version),
                Err(ToolkitError::Ssm {
                    source: source @ CloudError::AccessDenied(_),
                    ..
                }) => {
                    if toolkit.found()
                        && toolkit.version() < BOOTSTRAP_VERSION_INTRODUCING_GET_PARAMETER
                    {
                        tracing::warn!(
                            "Could not read SSM parameter {}: {}, falling back to version from {}",
                            parameter,
                            source,
                            toolkit.stack_name()
                        );
                        return check_version(expected, toolkit.version());
                    }
                    return Err(ToolkitError::BootstrapVersionUnverifiable {
                        required: expected,
                        parameter: parameter.to_string(),
                        source,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        toolkit.stack()?;
        check_version(expected, toolkit.version())
    }

    /// Bootstrap version advertised by an SSM parameter.
    pub async fn version_from_ssm_parameter(&self, parameter: &str) -> Result<u32, ToolkitError> {
        if let Some(version) = self.cache.ssm_versions().get(parameter) {
            return Ok(*version);
        }

        let value = self
            .sdk
            .ssm()
            .get_parameter(parameter)
            .await
            .map_err(|source| ToolkitError::Ssm {
                parameter: parameter.to_string(),
                source,
            })?;
        let version: u32 = value
            .trim()
            .parse()
            .map_err(|_| ToolkitError::InvalidSsmVersion {
                parameter: parameter.to_string(),
                value: value.clone(),
            })?;

        self.cache
            .ssm_versions()
            .insert(parameter.to_string(), version);
        Ok(version)
    }
}

fn check_version(required: u32, found: u32) -> Result<(), ToolkitError> {
    if required > found {
        return Err(ToolkitError::BootstrapVersion { required, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::mock::{MockCloudFormation, MockParameterStore, MockSdk, MockStack};

    const VERSION_PARAMETER: &str = "/cdk-bootstrap/hnb659fds/version";

    fn toolkit(version: &str) -> MockCloudFormation {
        let stack = MockStack::new("CDKToolkit", "CREATE_COMPLETE");
        MockCloudFormation::new().with_stack(stack.with_output("BootstrapVersion", version))
    }

    fn resources(cfn: MockCloudFormation, ssm: MockParameterStore) -> EnvironmentResources {
        let env = Environment::new("123456789012", "us-east-1");
        let sdk = MockSdk::new("123456789012", "us-east-1")
            .with_cloudformation(cfn)
            .with_ssm(ssm);
        EnvironmentResourcesRegistry::new(None)
            .with_wait_policy(WaitPolicy::immediate())
            .for_environment(&env, Arc::new(sdk))
    }

    #[tokio::test]
    async fn no_requirement_skips_lookup() {
        let cfn = MockCloudFormation::new();
        resources(cfn.clone(), MockParameterStore::new())
            .validate_version(None, None)
            .await
            .unwrap();
        assert!(cfn.operations().is_empty());
    }

    #[tokio::test]
    async fn too_old_bootstrap_stack_names_both_versions() {
        let err = resources(toolkit("5"), MockParameterStore::new())
            .validate_version(Some(99), None)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'99'"), "{}", message);
        assert!(message.contains("'5'"), "{}", message);
    }

    #[tokio::test]
    async fn ssm_parameter_wins_over_outputs() {
        let ssm = MockParameterStore::new().with_parameter(VERSION_PARAMETER, "21");
        let res = resources(toolkit("1"), ssm.clone());

        let parameter = Some(VERSION_PARAMETER);
        res.validate_version(Some(20), parameter).await.unwrap();
        res.validate_version(Some(20), parameter).await.unwrap();
        assert_eq!(ssm.reads().len(), 1);
    }

    #[tokio::test]
    async fn access_denied_falls_back_for_old_stacks() {
        let ssm = MockParameterStore::new().fail_with(CloudError::AccessDenied("no".into()));
        resources(toolkit("4"), ssm)
            .validate_version(Some(3), Some(VERSION_PARAMETER))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn access_denied_on_new_stacks_is_an_error() {
        let ssm = MockParameterStore::new().fail_with(CloudError::AccessDenied("no".into()));
        let err = resources(toolkit("10"), ssm)
            .validate_version(Some(3), Some(VERSION_PARAMETER))
            .await
            .unwrap_err();
        let ToolkitError::BootstrapVersionUnverifiable { required, .. } = err else {
            panic!("expected an unverifiable version, got {err:?}");
        };
        assert_eq!(required, 3);
    }

    #[tokio::test]
    async fn access_denied_without_toolkit_stack_names_required_version() {
        let ssm = MockParameterStore::new().fail_with(CloudError::AccessDenied("no".into()));
        let err = resources(MockCloudFormation::new(), ssm)
            .validate_version(Some(8), Some(VERSION_PARAMETER))
            .await
            .unwrap_err();
        let expected = "This CDK deployment requires bootstrap stack version '8'";
        assert!(err.to_string().starts_with(expected));
    }

    #[tokio::test]
    async fn missing_parameter_is_a_bootstrap_requirement_error() {
        let err = resources(toolkit("10"), MockParameterStore::new())
            .validate_version(Some(3), Some(VERSION_PARAMETER))
            .await
            .unwrap_err();
        assert!(err.is_bootstrap_requirement_error());
    }

    #[tokio::test]
    async fn non_numeric_parameter_is_rejected() {
        let ssm = MockParameterStore::new().with_parameter(VERSION_PARAMETER, "latest");
        let err = resources(toolkit("10"), ssm)
            .version_from_ssm_parameter(VERSION_PARAMETER)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolkitError::InvalidSsmVersion { .. }));
    }

    #[tokio::test]
    async fn missing_toolkit_stack_fails_validation() {
        let err = resources(MockCloudFormation::new(), MockParameterStore::new())
            .validate_version(Some(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolkitError::BootstrapStackNotFound { .. }));
    }

    #[tokio::test]
    async fn toolkit_lookup_is_cached_per_environment() {
        let cfn = toolkit("21");
        let env = Environment::new("123456789012", "us-east-1");
        let registry =
            EnvironmentResourcesRegistry::new(None).with_wait_policy(WaitPolicy::immediate());
        let sdk = MockSdk::new("123456789012", "us-east-1").with_cloudformation(cfn.clone());
        let sdk: Arc<dyn Sdk> = Arc::new(sdk);

        let first = registry.for_environment(&env, Arc::clone(&sdk));
        let second = registry.for_environment(&env, sdk);
        first.lookup_toolkit().await.unwrap();
        second.lookup_toolkit().await.unwrap();
        assert_eq!(cfn.operations().len(), 1);
    }

    #[tokio::test]
    async fn without_bootstrap_refuses_lookup() {
        let env = Environment::new("123456789012", "us-east-1");
        let sdk = Arc::new(MockSdk::new("123456789012", "us-east-1"));
        let res = EnvironmentResources::without_bootstrap(&env, sdk);
        let result = res.lookup_toolkit().await;
        assert!(matches!(result, Err(ToolkitError::Internal(_))));
    }
}
