//! Integration tests for rolling back paused stacks.

use std::sync::Arc;

use stackshift::cloud::mock::{
    MockCfnOperation, MockClientFactory, MockCloudFormation, MockCredentialSource, MockStack,
};
use stackshift::core::artifact::StackArtifact;
use stackshift::core::template::Template;
use stackshift::core::types::Environment;
use stackshift::engine::{Deployments, RollbackStackOptions, SdkProvider, ToolkitError, WaitPolicy};

const ACCOUNT: &str = "111111111111";
const STACK_TYPE: &str = "AWS::CloudFormation::Stack";

// =============================================================================
// Test Helpers
// =============================================================================

fn setup(cfn: MockCloudFormation) -> (MockClientFactory, Deployments) {
    let factory = MockClientFactory::new()
        .with_account("AKIADEFAULT", ACCOUNT)
        .with_cloudformation(cfn);
    let provider = SdkProvider::new(
        Arc::new(MockCredentialSource::with_credentials("AKIADEFAULT")),
        Arc::new(factory.clone()),
    );
    let deployments =
        Deployments::new(Arc::new(provider), None).with_wait_policy(WaitPolicy::immediate());
    (factory, deployments)
}

/// An environment bootstrapped for rollbacks, holding `existing`.
fn bootstrapped(existing: MockStack) -> MockCloudFormation {
    MockCloudFormation::new()
        .with_stack(toolkit("23"))
        .with_stack(existing)
}

fn toolkit(version: &str) -> MockStack {
    MockStack::new("CDKToolkit", "UPDATE_COMPLETE").with_output("BootstrapVersion", version)
}

fn options(name: &str) -> RollbackStackOptions {
    let env = Environment::new(ACCOUNT, "eu-west-1");
    RollbackStackOptions::new(StackArtifact::new(name, env, Template::new()))
}

/// A stack whose rollback got stuck on `Xyz`.
fn stuck_stack() -> MockStack {
    MockStack::new("S", "UPDATE_ROLLBACK_FAILED")
        .with_event("S", STACK_TYPE, "UPDATE_IN_PROGRESS")
        .with_event("Fn", "AWS::Lambda::Function", "UPDATE_FAILED")
        .with_event("S", STACK_TYPE, "UPDATE_ROLLBACK_IN_PROGRESS")
        .with_event("Xyz", "AWS::SQS::Queue", "UPDATE_FAILED")
        .with_event("S", STACK_TYPE, "UPDATE_ROLLBACK_FAILED")
}

fn status_of(factory: &MockClientFactory, stack_name: &str) -> String {
    let stack = factory.cloudformation.stack(stack_name).unwrap();
    stack.description.stack_status
}

/// The resources skipped by each continue-update-rollback call.
fn skipped_resources(factory: &MockClientFactory) -> Vec<Vec<String>> {
    let ops = factory.cloudformation.mutating_operations();
    ops.into_iter()
        .filter_map(|op| match op {
            MockCfnOperation::ContinueUpdateRollback(request) => Some(request.resources_to_skip),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn paused_update_is_rolled_back() {
    let existing = MockStack::new("S", "UPDATE_FAILED");
    let (factory, deployments) = setup(bootstrapped(existing));

    let result = deployments.rollback_stack(options("S")).await.unwrap();

    assert!(result.success);
    assert!(!result.not_in_rollbackable_state);
    assert_eq!(status_of(&factory, "S"), "UPDATE_ROLLBACK_COMPLETE");
}

#[tokio::test]
async fn failed_creation_is_rolled_back() {
    let existing = MockStack::new("S", "CREATE_FAILED");
    let (factory, deployments) = setup(bootstrapped(existing));

    let result = deployments.rollback_stack(options("S")).await.unwrap();

    assert!(result.success);
    assert_eq!(status_of(&factory, "S"), "ROLLBACK_COMPLETE");
}

#[tokio::test]
async fn orphaning_skips_resources_that_failed_during_rollback() {
    let cfn = bootstrapped(stuck_stack()).with_events_page_size(2);
    let (factory, deployments) = setup(cfn);

    let mut options = options("S");
    options.orphan_failed_resources = true;
    let result = deployments.rollback_stack(options).await.unwrap();

    assert!(result.success);
    assert_eq!(skipped_resources(&factory), [["Xyz"]]);
}

#[tokio::test]
async fn orphaning_retries_until_rollback_completes() {
    let cfn = bootstrapped(stuck_stack());
    cfn.push_outcome("S", "UPDATE_ROLLBACK_FAILED");
    let (factory, deployments) = setup(cfn);

    let mut options = options("S");
    options.orphan_failed_resources = true;
    let result = deployments.rollback_stack(options).await.unwrap();

    assert!(result.success);
    assert_eq!(skipped_resources(&factory).len(), 2);
}

#[tokio::test]
async fn rollback_that_keeps_failing_stalls() {
    let cfn = bootstrapped(stuck_stack());
    for _ in 0..10 {
        cfn.push_outcome("S", "UPDATE_ROLLBACK_FAILED");
    }
    let (factory, deployments) = setup(cfn);

    let mut options = options("S");
    options.orphan_failed_resources = true;
    let err = deployments.rollback_stack(options).await.unwrap_err();

    let ToolkitError::RollbackStalled { status, .. } = &err else {
        panic!("expected a stalled rollback, got {err}");
    };
    assert_eq!(status, "UPDATE_ROLLBACK_FAILED");
    assert!(err.to_string().contains("after 10 attempts"));
    assert_eq!(skipped_resources(&factory).len(), 10);
}

#[tokio::test]
async fn old_bootstrap_stack_blocks_rollback() {
    let cfn = MockCloudFormation::new()
        .with_stack(toolkit("22"))
        .with_stack(MockStack::new("S", "UPDATE_FAILED"));
    let (factory, deployments) = setup(cfn);

    let err = deployments.rollback_stack(options("S")).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("'23'"), "{message}");
    assert!(message.contains("'22'"), "{message}");
    assert!(factory.cloudformation.mutating_operations().is_empty());
}

#[tokio::test]
async fn stable_stack_is_left_alone() {
    let existing = MockStack::new("S", "UPDATE_COMPLETE");
    let (factory, deployments) = setup(bootstrapped(existing));

    let result = deployments.rollback_stack(options("S")).await.unwrap();

    assert!(result.not_in_rollbackable_state);
    assert!(!result.success);
    assert!(factory.cloudformation.mutating_operations().is_empty());
}

#[tokio::test]
async fn orphan_conflict_is_rejected_before_any_call() {
    let (factory, deployments) = setup(MockCloudFormation::new().with_stack(stuck_stack()));

    let mut options = options("S");
    options.orphan_failed_resources = true;
    options.orphan_logical_ids = vec!["Xyz".into()];
    let err = deployments.rollback_stack(options).await.unwrap_err();

    assert!(matches!(err, ToolkitError::InvalidOptions(_)));
    assert!(factory.cloudformation.operations().is_empty());
}
