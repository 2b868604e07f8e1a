//! cloud::mock
//!
//! Mock cloud clients for deterministic testing.
//!
//! # Design
//!
//! Every capability trait has an in-memory implementation that records the
//! calls made against it and can be told to fail a specific operation.
//! Mocks are cheap to clone and clones share state, so a test can hand one
//! clone to the engine and keep another for assertions.
//!
//! [`MockClientFactory`] ties them together: it owns one shared set of
//! service mocks and reports the account behind a set of credentials from
//! a table the test fills in, so account-matching and role-assumption
//! paths can be exercised without a network.
//!
//! # Example
//!
//! ```
//! use stackshift::cloud::mock::MockClientFactory;
//! use stackshift::cloud::{ClientFactory, Credentials, Sdk};
//!
//! # tokio_test::block_on(async {
//! let factory = MockClientFactory::new().with_account("AKIADEFAULT", "111111111111");
//! let sdk = factory.sdk(&Credentials::new("AKIADEFAULT", "secret"), "eu-west-1");
//!
//! let account = sdk.current_account().await.unwrap();
//! assert_eq!(account.account_id, "111111111111");
//! assert_eq!(sdk.region(), "eu-west-1");
//! # });
//! ```

mod cloudformation;

pub use cloudformation::{CfnOp, MockCfnOperation, MockCloudFormation, MockStack, NO_CHANGES_REASON};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::credentials::{
    AssumeRoleRequest, ClientFactory, CredentialPlugin, CredentialSource, Credentials,
};
use super::traits::{CloudError, CloudFormation, ObjectStore, ParameterStore, Sdk};
use crate::core::types::{Account, Mode};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Parameter store
// =============================================================================

#[derive(Debug, Default)]
struct MockParameterStoreInner {
    parameters: HashMap<String, String>,
    fail_with: Option<CloudError>,
    reads: Vec<String>,
}

/// Mock parameter store.
#[derive(Debug, Clone, Default)]
pub struct MockParameterStore {
    inner: Arc<Mutex<MockParameterStoreInner>>,
}

impl MockParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_parameter(name, value);
        self
    }

    pub fn set_parameter(&self, name: impl Into<String>, value: impl Into<String>) {
        lock(&self.inner)
            .parameters
            .insert(name.into(), value.into());
    }

    /// Fail every read with `error`.
    pub fn fail_with(self, error: CloudError) -> Self {
        lock(&self.inner).fail_with = Some(error);
        self
    }

    /// Names read so far, in order.
    pub fn reads(&self) -> Vec<String> {
        lock(&self.inner).reads.clone()
    }
}

#[async_trait]
impl ParameterStore for MockParameterStore {
    async fn get_parameter(&self, name: &str) -> Result<String, CloudError> {
        let mut inner = lock(&self.inner);
        inner.reads.push(name.to_string());
        if let Some(e) = &inner.fail_with {
            return Err(e.clone());
        }
        inner
            .parameters
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::ParameterNotFound(name.to_string()))
    }
}

// =============================================================================
// Object store
// =============================================================================

#[derive(Debug, Default)]
struct MockObjectStoreInner {
    objects: Vec<(String, String, Vec<u8>)>,
    fail_with: Option<CloudError>,
}

/// Mock object store; keeps every uploaded object.
#[derive(Debug, Clone, Default)]
pub struct MockObjectStore {
    inner: Arc<Mutex<MockObjectStoreInner>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(self, error: CloudError) -> Self {
        lock(&self.inner).fail_with = Some(error);
        self
    }

    /// Uploaded objects as `(bucket, key, body)`.
    pub fn objects(&self) -> Vec<(String, String, Vec<u8>)> {
        lock(&self.inner).objects.clone()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CloudError> {
        let mut inner = lock(&self.inner);
        if let Some(e) = &inner.fail_with {
            return Err(e.clone());
        }
        inner.objects.retain(|(b, k, _)| b != bucket || k != key);
        let object = (bucket.to_string(), key.to_string(), body);
        inner.objects.push(object);
        Ok(())
    }
}

// =============================================================================
// SDK
// =============================================================================

/// Mock SDK bundling the service mocks with a fixed identity.
#[derive(Debug, Clone)]
pub struct MockSdk {
    pub cloudformation: MockCloudFormation,
    pub ssm: MockParameterStore,
    pub s3: MockObjectStore,
    region: String,
    account: Result<Account, CloudError>,
}

impl MockSdk {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        let s3 = MockObjectStore::new();
        Self {
            cloudformation: MockCloudFormation::new().with_object_store(s3.clone()),
            ssm: MockParameterStore::new(),
            s3,
            region: region.into(),
            account: Ok(Account::new(account_id, "aws")),
        }
    }

    pub fn with_cloudformation(mut self, cfn: MockCloudFormation) -> Self {
        self.cloudformation = cfn.with_object_store(self.s3.clone());
        self
    }

    pub fn with_ssm(mut self, ssm: MockParameterStore) -> Self {
        self.ssm = ssm;
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        if let Ok(account) = &mut self.account {
            account.partition = partition.into();
        }
        self
    }

    /// Identity lookups fail with `error`.
    pub fn with_identity_error(mut self, error: CloudError) -> Self {
        self.account = Err(error);
        self
    }
}

#[async_trait]
impl Sdk for MockSdk {
    fn region(&self) -> &str {
        &self.region
    }

    fn cloudformation(&self) -> Arc<dyn CloudFormation> {
        Arc::new(self.cloudformation.clone())
    }

    fn ssm(&self) -> Arc<dyn ParameterStore> {
        Arc::new(self.ssm.clone())
    }

    fn s3(&self) -> Arc<dyn ObjectStore> {
        Arc::new(self.s3.clone())
    }

    async fn current_account(&self) -> Result<Account, CloudError> {
        self.account.clone()
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Mock default credential chain.
#[derive(Debug, Clone, Default)]
pub struct MockCredentialSource {
    credentials: Option<Credentials>,
    region: Option<String>,
    error: Option<CloudError>,
}

impl MockCredentialSource {
    /// No default credentials and no default region.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_credentials(access_key_id: impl Into<String>) -> Self {
        Self {
            credentials: Some(Credentials::new(access_key_id, "mock-secret")),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_error(mut self, error: CloudError) -> Self {
        self.error = Some(error);
        self
    }
}

#[async_trait]
impl CredentialSource for MockCredentialSource {
    async fn default_credentials(&self) -> Result<Option<Credentials>, CloudError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(self.credentials.clone()),
        }
    }

    fn default_region(&self) -> Option<String> {
        self.region.clone()
    }
}

/// Mock credential plugin serving a fixed set of accounts.
#[derive(Debug, Clone)]
pub struct MockCredentialPlugin {
    name: String,
    accounts: HashMap<String, Credentials>,
    requests: Arc<Mutex<Vec<(String, Mode)>>>,
}

impl MockCredentialPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accounts: HashMap::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Serve `account_id` with credentials whose access key is `access_key_id`.
    pub fn with_account(
        mut self,
        account_id: impl Into<String>,
        access_key_id: impl Into<String>,
    ) -> Self {
        let credentials = Credentials::new(access_key_id, "plugin-secret");
        self.accounts.insert(account_id.into(), credentials);
        self
    }

    /// Credential requests served so far.
    pub fn requests(&self) -> Vec<(String, Mode)> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl CredentialPlugin for MockCredentialPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn can_provide_credentials(&self, account_id: &str) -> bool {
        self.accounts.contains_key(account_id)
    }

    async fn get_credentials(
        &self,
        account_id: &str,
        mode: Mode,
    ) -> Result<Credentials, CloudError> {
        lock(&self.requests).push((account_id.to_string(), mode));
        self.accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| CloudError::AccessDenied(format!("no credentials for {account_id}")))
    }
}

/// Recorded role assumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockAssumeRole {
    /// Access key of the credentials used to assume the role
    pub source_access_key_id: String,
    pub request: AssumeRoleRequest,
}

#[derive(Debug, Default)]
struct MockClientFactoryInner {
    /// access key id -> account id
    accounts: HashMap<String, String>,
    /// role ARN -> error to fail assumption with
    role_failures: HashMap<String, CloudError>,
    assumed: Vec<MockAssumeRole>,
    sdks: Vec<(String, String)>,
}

/// Mock client factory.
///
/// Every SDK it builds shares the same service mocks, so a test sees all
/// calls in one place regardless of which identity made them.
#[derive(Debug, Clone)]
pub struct MockClientFactory {
    pub cloudformation: MockCloudFormation,
    pub ssm: MockParameterStore,
    pub s3: MockObjectStore,
    partition: String,
    inner: Arc<Mutex<MockClientFactoryInner>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        let s3 = MockObjectStore::new();
        Self {
            cloudformation: MockCloudFormation::new().with_object_store(s3.clone()),
            ssm: MockParameterStore::new(),
            s3,
            partition: "aws".into(),
            inner: Arc::new(Mutex::new(MockClientFactoryInner::default())),
        }
    }

    pub fn with_cloudformation(mut self, cfn: MockCloudFormation) -> Self {
        self.cloudformation = cfn.with_object_store(self.s3.clone());
        self
    }

    pub fn with_ssm(mut self, ssm: MockParameterStore) -> Self {
        self.ssm = ssm;
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    /// Credentials with this access key belong to `account_id`.
    pub fn with_account(
        self,
        access_key_id: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        lock(&self.inner)
            .accounts
            .insert(access_key_id.into(), account_id.into());
        self
    }

    /// Assuming `role_arn` fails with `error`.
    pub fn with_role_failure(self, role_arn: impl Into<String>, error: CloudError) -> Self {
        lock(&self.inner)
            .role_failures
            .insert(role_arn.into(), error);
        self
    }

    /// Role assumptions performed so far.
    pub fn assumed_roles(&self) -> Vec<MockAssumeRole> {
        lock(&self.inner).assumed.clone()
    }

    /// SDKs built so far as `(access key id, region)`.
    pub fn sdks_built(&self) -> Vec<(String, String)> {
        lock(&self.inner).sdks.clone()
    }
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    fn sdk(&self, credentials: &Credentials, region: &str) -> Arc<dyn Sdk> {
        let mut inner = lock(&self.inner);
        inner
            .sdks
            .push((credentials.access_key_id.clone(), region.to_string()));

        let account = match inner.accounts.get(&credentials.access_key_id) {
            Some(account_id) => Ok(Account::new(account_id.clone(), self.partition.clone())),
            None => Err(CloudError::AccessDenied(format!(
                "unknown access key {}",
                credentials.access_key_id
            ))),
        };

        Arc::new(MockSdk {
            cloudformation: self.cloudformation.clone(),
            ssm: self.ssm.clone(),
            s3: self.s3.clone(),
            region: region.to_string(),
            account,
        })
    }

    async fn assume_role(
        &self,
        credentials: &Credentials,
        _region: &str,
        request: &AssumeRoleRequest,
    ) -> Result<Credentials, CloudError> {
        let mut inner = lock(&self.inner);
        inner.assumed.push(MockAssumeRole {
            source_access_key_id: credentials.access_key_id.clone(),
            request: request.clone(),
        });

        if let Some(e) = inner.role_failures.get(&request.role_arn) {
            return Err(e.clone());
        }

        // arn:<partition>:iam::<account>:role/<name>
        let role_arn = &request.role_arn;
        let account_id = role_arn
            .split(':')
            .nth(4)
            .filter(|a| !a.is_empty())
            .ok_or_else(|| CloudError::Validation(format!("invalid role ARN {role_arn}")))?
            .to_string();

        let access_key_id = format!("ASIA-{role_arn}");
        inner.accounts.insert(access_key_id.clone(), account_id);
        Ok(Credentials::new(access_key_id, "role-secret").with_session_token("role-session"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parameter_store_reports_missing_parameters() {
        let ssm = MockParameterStore::new().with_parameter("/cdk/version", "21");
        assert_eq!(ssm.get_parameter("/cdk/version").await.unwrap(), "21");
        assert_eq!(
            ssm.get_parameter("/missing").await,
            Err(CloudError::ParameterNotFound("/missing".into()))
        );
        assert_eq!(ssm.reads(), ["/cdk/version", "/missing"]);
    }

    #[tokio::test]
    async fn assumed_role_credentials_belong_to_role_account() {
        let factory = MockClientFactory::new().with_account("AKIADEFAULT", "111111111111");
        let base = Credentials::new("AKIADEFAULT", "secret");

        let role = factory
            .assume_role(
                &base,
                "us-east-1",
                &AssumeRoleRequest {
                    role_arn: "arn:aws:iam::222222222222:role/deploy".into(),
                    external_id: None,
                    session_name: "test".into(),
                },
            )
            .await
            .unwrap();

        let sdk = factory.sdk(&role, "us-east-1");
        let account = sdk.current_account().await.unwrap();
        assert_eq!(account.account_id, "222222222222");
        assert_eq!(factory.assumed_roles().len(), 1);
    }

    #[tokio::test]
    async fn role_failure_is_injected() {
        let denied = CloudError::AccessDenied("nope".into());
        let factory = MockClientFactory::new().with_role_failure("arn:aws:iam::2:role/x", denied);
        let result = factory
            .assume_role(
                &Credentials::new("A", "B"),
                "us-east-1",
                &AssumeRoleRequest {
                    role_arn: "arn:aws:iam::2:role/x".into(),
                    external_id: None,
                    session_name: "s".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(CloudError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn object_store_overwrites_same_key() {
        let s3 = MockObjectStore::new();
        s3.put_object("b", "k", b"one".to_vec()).await.unwrap();
        s3.put_object("b", "k", b"two".to_vec()).await.unwrap();
        let expected = vec![("b".to_string(), "k".to_string(), b"two".to_vec())];
        assert_eq!(s3.objects(), expected);
    }
}
