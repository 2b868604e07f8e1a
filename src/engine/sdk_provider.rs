//! engine::sdk_provider
//!
//! Turns a target environment into authenticated clients.
//!
//! # Credential Ladder
//!
//! Base credentials for an account are chosen in this order:
//! 1. Default credentials, if they belong to the target account
//! 2. The first credential plugin that can serve the account
//! 3. Default credentials for another account (usable only to assume a role)
//! 4. None
//!
//! When a role is requested it is assumed with the base credentials. If
//! that fails, the base credentials are used directly only when they are
//! already for the right account (rungs 1 and 2), with a warning. Expired
//! credentials always fail.
//!
//! The default account lookup is cached for the lifetime of the provider,
//! which is one command invocation.

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::error::ToolkitError;
use crate::cloud::{
    AssumeRoleRequest, ClientFactory, CredentialPlugin, CredentialSource, Credentials, Sdk,
};
use crate::core::types::{Account, Environment, Mode};

/// Region used when nothing else configures one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Session name for assumed roles.
const ROLE_SESSION_NAME: &str = "stackshift-session";

const UNKNOWN_ACCOUNT: &str = "Unable to resolve AWS account to use. It must be either configured \
    when you define your CDK Stack, or through the environment";

/// A role to assume for an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleOptions {
    pub role_arn: String,
    pub external_id: Option<String>,
}

impl AssumeRoleOptions {
    pub fn new(role_arn: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
            external_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }
}

/// Clients for an environment.
#[derive(Clone)]
pub struct SdkForEnvironment {
    pub sdk: Arc<dyn Sdk>,
    /// Whether the requested role was actually assumed
    pub did_assume_role: bool,
}

impl fmt::Debug for SdkForEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkForEnvironment")
            .field("region", &self.sdk.region())
            .field("did_assume_role", &self.did_assume_role)
            .finish()
    }
}

/// Where the base credentials for an account came from.
#[derive(Debug, Clone)]
pub enum BaseCredentials {
    /// Default credentials for the target account
    CorrectDefault { credentials: Credentials },
    /// Returned by a credential plugin
    Plugin {
        plugin: String,
        credentials: Credentials,
    },
    /// Default credentials for a different account
    IncorrectDefault {
        account_id: String,
        credentials: Credentials,
        unused_plugins: Vec<String>,
    },
    None { unused_plugins: Vec<String> },
}

impl BaseCredentials {
    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            BaseCredentials::CorrectDefault { credentials }
            | BaseCredentials::Plugin { credentials, .. }
            | BaseCredentials::IncorrectDefault { credentials, .. } => Some(credentials),
            BaseCredentials::None { .. } => None,
        }
    }

    /// Whether these credentials are known to be for the target account.
    pub fn is_for_target_account(&self) -> bool {
        matches!(
            self,
            BaseCredentials::CorrectDefault { .. } | BaseCredentials::Plugin { .. }
        )
    }

    /// Error for using these credentials directly against `target_account`.
    fn obtain_error(&self, target_account: &str) -> ToolkitError {
        let mut parts = vec![format!("Need to perform AWS calls for account {target_account}")];
        let unused = match self {
            BaseCredentials::IncorrectDefault {
                account_id,
                unused_plugins,
                ..
            } => {
                parts.push(format!("but the current credentials are for {account_id}"));
                unused_plugins.as_slice()
            }
            BaseCredentials::None { unused_plugins } => {
                parts.push("but no credentials have been configured".to_string());
                unused_plugins.as_slice()
            }
            _ => &[],
        };
        if !unused.is_empty() {
            let names = unused.join(", ");
            parts.push(format!("and none of these plugins found any: {names}"));
        }
        ToolkitError::Authentication(parts.join(", "))
    }
}

impl fmt::Display for BaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseCredentials::CorrectDefault { .. } => write!(f, "current credentials"),
            BaseCredentials::Plugin { plugin, .. } => {
                write!(f, "credentials returned by plugin '{}'", plugin)
            }
            BaseCredentials::IncorrectDefault { account_id, .. } => write!(
                f,
                "current credentials (which are for account {account_id})"
            ),
            BaseCredentials::None { .. } => write!(f, "no credentials"),
        }
    }
}

/// Creates authenticated clients for environments.
pub struct SdkProvider {
    default_credentials: Arc<dyn CredentialSource>,
    plugins: Vec<Arc<dyn CredentialPlugin>>,
    factory: Arc<dyn ClientFactory>,
    default_region: String,
    default_account: OnceCell<Option<Account>>,
}

impl fmt::Debug for SdkProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkProvider")
            .field("default_region", &self.default_region)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl SdkProvider {
    pub fn new(
        default_credentials: Arc<dyn CredentialSource>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let default_region = default_credentials
            .default_region()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        Self {
            default_credentials,
            plugins: Vec::new(),
            factory,
            default_region,
            default_account: OnceCell::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn CredentialPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// Account of the default credentials, if there are any.
    ///
    /// Looked up once. Failures are logged and treated as "no default account".
    pub async fn default_account(&self) -> Option<Account> {
        self.default_account
            .get_or_init(|| async {
                let credentials = match self.default_credentials.default_credentials().await {
                    Ok(Some(credentials)) => credentials,
                    Ok(None) => {
                        tracing::debug!("no default credentials available");
                        return None;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "unable to load default credentials");
                        return None;
                    }
                };
                let sdk = self.factory.sdk(&credentials, &self.default_region);
                match sdk.current_account().await {
                    Ok(account) => {
                        tracing::debug!(account = %account.account_id, "default account");
                        Some(account)
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "unable to determine the default AWS account");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Replace unknown account and region markers with concrete values.
    ///
    /// # Errors
    ///
    /// Fails if the account is unknown and there are no default credentials.
    pub async fn resolve_environment(
        &self,
        environment: &Environment,
    ) -> Result<Environment, ToolkitError> {
        let region = if environment.is_region_unknown() {
            self.default_region.clone()
        } else {
            environment.region.clone()
        };

        let account = if environment.is_account_unknown() {
            match self.default_account().await {
                Some(account) => account.account_id,
                None => return Err(ToolkitError::Authentication(UNKNOWN_ACCOUNT.into())),
            }
        } else {
            environment.account.clone()
        };

        Ok(Environment::new(account, region))
    }

    /// Base credentials for `account_id`, following the credential ladder.
    pub async fn obtain_base_credentials(
        &self,
        account_id: &str,
        mode: Mode,
    ) -> Result<BaseCredentials, ToolkitError> {
        let default_account = self.default_account().await;

        if let Some(default) = &default_account {
            if default.account_id == account_id {
                if let Some(credentials) = self.default_credentials.default_credentials().await? {
                    return Ok(BaseCredentials::CorrectDefault { credentials });
                }
            }
        }

        let mut unused_plugins = Vec::new();
        for plugin in &self.plugins {
            if !plugin.is_available().await || !plugin.can_provide_credentials(account_id).await {
                unused_plugins.push(plugin.name().to_string());
                continue;
            }
            match plugin.get_credentials(account_id, mode).await {
                Ok(credentials) => {
                    tracing::debug!(
                        plugin = plugin.name(),
                        account = account_id,
                        %mode,
                        "using plugin credentials"
                    );
                    return Ok(BaseCredentials::Plugin {
                        plugin: plugin.name().to_string(),
                        credentials,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        plugin = plugin.name(),
                        error = %e,
                        "plugin failed to provide credentials"
                    );
                    unused_plugins.push(plugin.name().to_string());
                }
            }
        }

        if let Some(default) = default_account {
            if let Some(credentials) = self.default_credentials.default_credentials().await? {
                return Ok(BaseCredentials::IncorrectDefault {
                    account_id: default.account_id,
                    credentials,
                    unused_plugins,
                });
            }
        }

        Ok(BaseCredentials::None { unused_plugins })
    }

    /// Clients for `environment`, assuming a role if one is given.
    pub async fn for_environment(
        &self,
        environment: &Environment,
        mode: Mode,
        assume_role: Option<&AssumeRoleOptions>,
    ) -> Result<SdkForEnvironment, ToolkitError> {
        let env = self.resolve_environment(environment).await?;
        let base = self.obtain_base_credentials(&env.account, mode).await?;

        let Some(role) = assume_role else {
            if !base.is_for_target_account() {
                return Err(base.obtain_error(&env.account));
            }
            let credentials = base
                .credentials()
                .ok_or_else(|| base.obtain_error(&env.account))?;
            return Ok(SdkForEnvironment {
                sdk: self.factory.sdk(credentials, &env.region),
                did_assume_role: false,
            });
        };

        let Some(base_credentials) = base.credentials() else {
            return Err(base.obtain_error(&env.account));
        };

        let request = AssumeRoleRequest {
            role_arn: role.role_arn.clone(),
            external_id: role.external_id.clone(),
            session_name: ROLE_SESSION_NAME.to_string(),
        };

        match self
            .factory
            .assume_role(base_credentials, &env.region, &request)
            .await
        {
            Ok(role_credentials) => {
                tracing::debug!(role = %role.role_arn, "assumed role");
                Ok(SdkForEnvironment {
                    sdk: self.factory.sdk(&role_credentials, &env.region),
                    did_assume_role: true,
                })
            }
            Err(e) if e.is_expired_token() => Err(e.into()),
            Err(e) if base.is_for_target_account() => {
                tracing::debug!(error = %e, role = %role.role_arn, "assume role failed");
                tracing::warn!(
                    "{} could not be used to assume '{}', but are for the right account. \
                     Proceeding anyway.",
                    base,
                    role.role_arn
                );
                Ok(SdkForEnvironment {
                    sdk: self.factory.sdk(base_credentials, &env.region),
                    did_assume_role: false,
                })
            }
            Err(e) => Err(ToolkitError::Authentication(format!(
                "Could not assume role '{}' using {}: {}",
                role.role_arn, base, e
            ))),
        }
    }

    /// Partition of the base credentials for `environment`.
    ///
    /// Returns `None` if there are no credentials to ask with.
    pub async fn base_credentials_partition(
        &self,
        environment: &Environment,
        mode: Mode,
    ) -> Result<Option<String>, ToolkitError> {
        let env = self.resolve_environment(environment).await?;
        let base = self.obtain_base_credentials(&env.account, mode).await?;
        let Some(credentials) = base.credentials() else {
            return Ok(None);
        };
        let account = self
            .factory
            .sdk(credentials, &env.region)
            .current_account()
            .await?;
        Ok(Some(account.partition))
    }
}
