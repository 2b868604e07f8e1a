//! cloud::credentials
//!
//! Credential sources and client construction.
//!
//! # Design
//!
//! Credentials reach the engine from three places:
//! - The default credential chain ([`CredentialSource`])
//! - Credential plugins that can vend credentials for specific accounts
//!   ([`CredentialPlugin`])
//! - Role assumption performed through a [`ClientFactory`]
//!
//! The factory also turns a set of credentials into an [`Sdk`]. Plugin
//! discovery and the concrete AWS clients live outside this crate; the
//! engine only sees these traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::traits::{CloudError, Sdk};
use crate::core::types::Mode;

/// A set of AWS credentials.
///
/// The `Debug` impl redacts the secret parts.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expiration: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// The default credential chain (environment, profile, instance metadata).
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Default credentials, or `None` if none are configured.
    async fn default_credentials(&self) -> Result<Option<Credentials>, CloudError>;

    /// Default region, if one is configured.
    fn default_region(&self) -> Option<String>;
}

/// A plugin that can vend credentials for particular accounts.
#[async_trait]
pub trait CredentialPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn can_provide_credentials(&self, account_id: &str) -> bool;

    async fn get_credentials(&self, account_id: &str, mode: Mode)
        -> Result<Credentials, CloudError>;
}

/// Parameters for assuming a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub external_id: Option<String>,
    pub session_name: String,
}

/// Builds authenticated clients.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Clients authenticated with `credentials` in `region`.
    fn sdk(&self, credentials: &Credentials, region: &str) -> Arc<dyn Sdk>;

    /// Assume a role using `credentials`, returning the role's credentials.
    async fn assume_role(
        &self,
        credentials: &Credentials,
        region: &str,
        request: &AssumeRoleRequest,
    ) -> Result<Credentials, CloudError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::new("AKIAEXAMPLE", "very-secret").with_session_token("tok");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("AKIAEXAMPLE"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("tok\""));
    }
}
