//! Integration tests for resolving environments and credentials through
//! the `Deployments` entry point.

use std::sync::Arc;

use serde_json::json;

use stackshift::cloud::mock::{
    MockClientFactory, MockCloudFormation, MockCredentialSource, MockStack,
};
use stackshift::cloud::CloudError;
use stackshift::core::artifact::{LookupRole, StackArtifact};
use stackshift::core::template::Template;
use stackshift::core::types::Environment;
use stackshift::engine::{DeployStackOptions, Deployments, SdkProvider, ToolkitError, WaitPolicy};

const DEFAULT_ACCOUNT: &str = "111111111111";
const OTHER_ACCOUNT: &str = "222222222222";
const REGION: &str = "eu-west-1";

// =============================================================================
// Test Helpers
// =============================================================================

fn deployments(factory: &MockClientFactory, credentials: MockCredentialSource) -> Deployments {
    let provider = SdkProvider::new(Arc::new(credentials), Arc::new(factory.clone()));
    Deployments::new(Arc::new(provider), None).with_wait_policy(WaitPolicy::immediate())
}

fn default_deployments(factory: &MockClientFactory) -> Deployments {
    let credentials = MockCredentialSource::with_credentials("AKIADEFAULT");
    deployments(factory, credentials)
}

fn factory() -> MockClientFactory {
    MockClientFactory::new().with_account("AKIADEFAULT", DEFAULT_ACCOUNT)
}

fn stack(account: &str) -> StackArtifact {
    let resources = json!({ "Queue": { "Type": "AWS::SQS::Queue" } });
    let template = Template::from_value(json!({ "Resources": resources })).unwrap();
    StackArtifact::new("S", Environment::new(account, REGION), template)
}

fn stack_with_lookup_role(role: &str) -> StackArtifact {
    let mut stack = stack(DEFAULT_ACCOUNT);
    stack.lookup_role = Some(LookupRole {
        arn: role.into(),
        external_id: None,
        requires_bootstrap_stack_version: None,
        bootstrap_stack_version_ssm_parameter: None,
    });
    stack
}

// =============================================================================
// Deploy roles
// =============================================================================

#[tokio::test]
async fn other_account_without_role_is_refused() {
    let factory = factory();

    let err = default_deployments(&factory)
        .deploy_stack(DeployStackOptions::new(stack(OTHER_ACCOUNT)))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains(OTHER_ACCOUNT), "{message}");
    assert!(message.contains(DEFAULT_ACCOUNT), "{message}");
    assert!(factory.cloudformation.operations().is_empty());
}

#[tokio::test]
async fn other_account_is_reached_through_deploy_role() {
    let factory = factory();
    let mut stack = stack(OTHER_ACCOUNT);
    let role = "arn:${AWS::Partition}:iam::222222222222:role/cdk-deploy-${AWS::Region}";
    stack.assume_role_arn = Some(role.into());

    let result = default_deployments(&factory)
        .deploy_stack(DeployStackOptions::new(stack))
        .await
        .unwrap();

    assert!(!result.is_no_op());
    let assumed = factory.assumed_roles();
    assert_eq!(assumed.len(), 1);
    assert_eq!(assumed[0].source_access_key_id, "AKIADEFAULT");
    let expected = "arn:aws:iam::222222222222:role/cdk-deploy-eu-west-1";
    assert_eq!(assumed[0].request.role_arn, expected);
    let role_regions: Vec<_> = factory
        .sdks_built()
        .into_iter()
        .filter(|(key, _)| key.starts_with("ASIA-"))
        .map(|(_, region)| region)
        .collect();
    assert!(role_regions.iter().any(|region| region == REGION));
}

#[tokio::test]
async fn unassumable_role_in_other_account_fails() {
    let role = "arn:aws:iam::222222222222:role/cdk-deploy";
    let denied = CloudError::AccessDenied("not trusted".into());
    let factory = factory().with_role_failure(role, denied);
    let mut stack = stack(OTHER_ACCOUNT);
    stack.assume_role_arn = Some(role.into());

    let err = default_deployments(&factory)
        .deploy_stack(DeployStackOptions::new(stack))
        .await
        .unwrap_err();

    assert!(matches!(err, ToolkitError::Authentication(_)), "{err}");
    assert!(err.to_string().contains(role), "{err}");
    assert!(factory.cloudformation.mutating_operations().is_empty());
}

#[tokio::test]
async fn unassumable_role_in_same_account_falls_back() {
    let role = "arn:aws:iam::111111111111:role/cdk-deploy";
    let denied = CloudError::AccessDenied("not trusted".into());
    let factory = factory().with_role_failure(role, denied);
    let mut stack = stack(DEFAULT_ACCOUNT);
    stack.assume_role_arn = Some(role.into());

    let result = default_deployments(&factory)
        .deploy_stack(DeployStackOptions::new(stack))
        .await
        .unwrap();

    assert!(!result.is_no_op());
    assert!(factory.sdks_built().iter().all(|(key, _)| key == "AKIADEFAULT"));
}

#[tokio::test]
async fn expired_credentials_stop_the_deploy() {
    let role = "arn:aws:iam::111111111111:role/cdk-deploy";
    let expired = CloudError::ExpiredToken("session expired".into());
    let factory = factory().with_role_failure(role, expired);
    let mut stack = stack(DEFAULT_ACCOUNT);
    stack.assume_role_arn = Some(role.into());

    let err = default_deployments(&factory)
        .deploy_stack(DeployStackOptions::new(stack))
        .await
        .unwrap_err();

    assert!(err.is_expired_token(), "{err}");
}

// =============================================================================
// Environment resolution
// =============================================================================

#[tokio::test]
async fn unknown_account_and_region_come_from_defaults() {
    let factory = factory();
    let deployments = deployments(
        &factory,
        MockCredentialSource::with_credentials("AKIADEFAULT").with_region("ap-south-1"),
    );
    let stack = StackArtifact::new("S", Environment::unknown(), Template::new());

    let resolved = deployments.resolve_environment(&stack).await.unwrap();

    assert_eq!(resolved, Environment::new(DEFAULT_ACCOUNT, "ap-south-1"));
}

#[tokio::test]
async fn unknown_account_without_credentials_fails() {
    let factory = factory();
    let deployments = deployments(&factory, MockCredentialSource::none());
    let stack = StackArtifact::new("S", Environment::unknown(), Template::new());

    let err = deployments.resolve_environment(&stack).await.unwrap_err();

    assert!(matches!(err, ToolkitError::Authentication(_)), "{err}");
}

// =============================================================================
// Lookup roles
// =============================================================================

#[tokio::test]
async fn lookup_role_failure_falls_back_to_deploy_access() {
    let role = "arn:aws:iam::111111111111:role/cdk-lookup";
    let existing = MockStack::new("S", "UPDATE_COMPLETE");
    let denied = CloudError::AccessDenied("no".into());
    let factory = factory()
        .with_role_failure(role, denied)
        .with_cloudformation(MockCloudFormation::new().with_stack(existing));

    let exists = default_deployments(&factory)
        .stack_exists(&stack_with_lookup_role(role), None, true)
        .await
        .unwrap();

    assert!(exists);
    assert_eq!(factory.assumed_roles().len(), 1);
}

#[tokio::test]
async fn lookup_role_is_used_when_assumable() {
    let role = "arn:aws:iam::111111111111:role/cdk-lookup";
    let factory = factory();

    let exists = default_deployments(&factory)
        .stack_exists(&stack_with_lookup_role(role), None, true)
        .await
        .unwrap();

    assert!(!exists);
    assert_eq!(factory.assumed_roles()[0].request.role_arn, role);
}

#[tokio::test]
async fn lookup_role_expired_credentials_propagate() {
    let role = "arn:aws:iam::111111111111:role/cdk-lookup";
    let expired = CloudError::ExpiredToken("expired".into());
    let factory = factory().with_role_failure(role, expired);

    let err = default_deployments(&factory)
        .read_current_template(&stack_with_lookup_role(role))
        .await
        .unwrap_err();

    assert!(err.is_expired_token(), "{err}");
}

#[tokio::test]
async fn without_lookup_flag_no_role_is_assumed() {
    let role = "arn:aws:iam::111111111111:role/cdk-lookup";
    let factory = factory();

    default_deployments(&factory)
        .stack_exists(&stack_with_lookup_role(role), None, false)
        .await
        .unwrap();

    assert!(factory.assumed_roles().is_empty());
}
