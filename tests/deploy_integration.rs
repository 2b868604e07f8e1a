//! Integration tests for the deploy protocol.
//!
//! These tests drive `Deployments::deploy_stack` against the in-memory
//! CloudFormation mock and check both the result and the operations issued.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use stackshift::cloud::mock::{
    MockCfnOperation, MockClientFactory, MockCloudFormation, MockCredentialSource, MockStack,
};
use stackshift::cloud::{
    ChangeSetType, CreateChangeSetRequest, ResourceToImport, TemplateSource, DEPLOY_CAPABILITIES,
};
use stackshift::core::artifact::StackArtifact;
use stackshift::core::template::Template;
use stackshift::core::types::Environment;
use stackshift::engine::{
    DeployStackOptions, DeployStackResult, DeploymentMethod, Deployments, PausedReason,
    SdkProvider, ToolkitError, WaitPolicy,
};

const ACCOUNT: &str = "111111111111";
const REGION: &str = "eu-west-1";

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

fn setup_with(existing: MockStack) -> (MockClientFactory, Deployments) {
    setup(MockCloudFormation::new().with_stack(existing))
}

fn template(resources: Value) -> Template {
    Template::from_value(json!({ "Resources": resources })).unwrap()
}

fn queue_template() -> Template {
    template(json!({ "Queue": { "Type": "AWS::SQS::Queue" } }))
}

fn queue_and_topic_template() -> Template {
    template(json!({
        "Queue": { "Type": "AWS::SQS::Queue" },
        "Topic": { "Type": "AWS::SNS::Topic" }
    }))
}

fn fifo_queue_template() -> Template {
    template(json!({
        "Queue": { "Type": "AWS::SQS::Queue", "Properties": { "FifoQueue": true } }
    }))
}

fn stack(name: &str, template: Template) -> StackArtifact {
    StackArtifact::new(name, Environment::new(ACCOUNT, REGION), template)
}

fn deployed(name: &str, status: &str, template: &Template) -> MockStack {
    MockStack::new(name, status).with_template(Value::Object(template.as_map().clone()))
}

fn toolkit_stack(version: &str) -> MockStack {
    MockStack::new("CDKToolkit", "UPDATE_COMPLETE")
        .with_output("BootstrapVersion", version)
        .with_output("BucketName", "cdk-assets")
        .with_output("BucketDomainName", "cdk-assets.s3.amazonaws.com")
}

fn change_set_requests(factory: &MockClientFactory) -> Vec<CreateChangeSetRequest> {
    factory
        .cloudformation
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            MockCfnOperation::CreateChangeSet(request) => Some(request),
            _ => None,
        })
        .collect()
}

fn stack_status(factory: &MockClientFactory, name: &str) -> String {
    let deployed = factory.cloudformation.stack(name).unwrap();
    deployed.description.stack_status
}

fn executed(factory: &MockClientFactory) -> bool {
    factory
        .cloudformation
        .operations()
        .iter()
        .any(|op| matches!(op, MockCfnOperation::ExecuteChangeSet(_)))
}

// =============================================================================
// Change set deployments
// =============================================================================

#[tokio::test]
async fn new_stack_is_created_through_change_set() {
    let (factory, deployments) = setup(MockCloudFormation::new());

    let result = deployments
        .deploy_stack(DeployStackOptions::new(stack("S", queue_template())))
        .await
        .unwrap();

    let success = result.successful().expect("deployed");
    assert!(!success.no_op);
    assert!(success.stack_arn.contains(":stack/S/"));
    assert_eq!(stack_status(&factory, "S"), "CREATE_COMPLETE");

    let requests = change_set_requests(&factory);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].change_set_type, ChangeSetType::Create);
    assert_eq!(requests[0].change_set_name, "cdk-deploy-change-set");
    assert_eq!(requests[0].capabilities, DEPLOY_CAPABILITIES);
    assert!(requests[0]
        .description
        .as_deref()
        .unwrap()
        .starts_with("CDK Changeset for execution "));
    assert!(executed(&factory));
}

#[tokio::test]
async fn unchanged_stack_is_skipped() {
    let (factory, deployments) = setup_with(deployed("S", "UPDATE_COMPLETE", &queue_template()));

    let result = deployments
        .deploy_stack(DeployStackOptions::new(stack("S", queue_template())))
        .await
        .unwrap();

    assert!(result.is_no_op());
    assert!(factory.cloudformation.mutating_operations().is_empty());
}

#[tokio::test]
async fn forced_deploy_without_changes_removes_empty_change_set() {
    let (factory, deployments) = setup_with(deployed("S", "UPDATE_COMPLETE", &queue_template()));

    let mut options = DeployStackOptions::new(stack("S", queue_template()));
    options.force = true;
    let result = deployments.deploy_stack(options).await.unwrap();

    assert!(result.is_no_op());
    assert!(!executed(&factory));
    assert!(matches!(
        factory.cloudformation.mutating_operations().last(),
        Some(MockCfnOperation::DeleteChangeSet { .. })
    ));
}

#[tokio::test]
async fn changed_template_updates_stack() {
    let (factory, deployments) = setup_with(deployed("S", "UPDATE_COMPLETE", &queue_template()));

    let result = deployments
        .deploy_stack(DeployStackOptions::new(stack("S", queue_and_topic_template())))
        .await
        .unwrap();

    assert!(!result.is_no_op());
    assert_eq!(
        change_set_requests(&factory)[0].change_set_type,
        ChangeSetType::Update
    );
    let deployed = factory.cloudformation.stack("S").unwrap();
    assert_eq!(deployed.description.stack_status, "UPDATE_COMPLETE");
    assert!(deployed.template_body.contains("AWS::SNS::Topic"));
}

#[tokio::test]
async fn tag_change_forces_deploy() {
    let (factory, deployments) = setup_with(deployed("S", "UPDATE_COMPLETE", &queue_template()));

    let mut options = DeployStackOptions::new(stack("S", queue_template()));
    options.tags = Some(vec![stackshift::core::types::Tag::new("team", "infra")]);
    let result = deployments.deploy_stack(options).await.unwrap();

    assert!(!result.is_no_op());
    let deployed = factory.cloudformation.stack("S").unwrap();
    assert_eq!(deployed.description.tags.len(), 1);
}

#[tokio::test]
async fn no_execute_leaves_change_set_for_review() {
    let (factory, deployments) = setup(MockCloudFormation::new());

    let mut options = DeployStackOptions::new(stack("S", queue_template()));
    options.deployment_method = DeploymentMethod::ChangeSet {
        change_set_name: Some("review-me".into()),
        execute: false,
        import_existing_resources: false,
    };
    let result = deployments.deploy_stack(options).await.unwrap();

    assert!(!result.is_no_op());
    assert!(!executed(&factory));
    let requests = change_set_requests(&factory);
    assert_eq!(requests[0].change_set_name, "review-me");
    assert_eq!(stack_status(&factory, "S"), "REVIEW_IN_PROGRESS");
}

#[tokio::test]
async fn parameters_are_sent_with_change_set() {
    let (factory, deployments) = setup(MockCloudFormation::new());
    let template = Template::from_value(json!({
        "Parameters": {
            "Stage": { "Type": "String" },
            "Size": { "Type": "Number", "Default": "1" }
        },
        "Resources": { "Queue": { "Type": "AWS::SQS::Queue" } }
    }))
    .unwrap();

    let mut options = DeployStackOptions::new(stack("S", template.clone()));
    options.parameters = BTreeMap::from([("Stage".to_string(), Some("prod".to_string()))]);
    deployments.deploy_stack(options).await.unwrap();

    let parameters = &change_set_requests(&factory)[0].parameters;
    assert!(parameters
        .iter()
        .any(|p| p.key == "Stage" && p.value.as_deref() == Some("prod")));

    let err = deployments
        .deploy_stack(DeployStackOptions::new(stack("T", template)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Stage"), "{err}");
}

// =============================================================================
// Paused stacks and replacements
// =============================================================================

#[tokio::test]
async fn paused_stack_needs_rollback_first() {
    let (factory, deployments) = setup_with(deployed("S", "UPDATE_FAILED", &queue_template()));

    let result = deployments
        .deploy_stack(DeployStackOptions::new(stack("S", queue_and_topic_template())))
        .await
        .unwrap();

    assert_eq!(
        result,
        DeployStackResult::FailpausedNeedRollbackFirst {
            reason: PausedReason::NotNoRollback,
            status: "UPDATE_FAILED".into(),
        }
    );
    assert!(!executed(&factory));
}

#[tokio::test]
async fn paused_stack_with_replacement_needs_rollback_first() {
    let existing = deployed("S", "UPDATE_FAILED", &queue_template());
    let cfn = MockCloudFormation::new().with_stack(existing);
    cfn.require_replacement("Queue");
    let (factory, deployments) = setup(cfn);

    let mut options = DeployStackOptions::new(stack("S", fifo_queue_template()));
    options.rollback = false;
    let result = deployments.deploy_stack(options).await.unwrap();

    assert!(matches!(
        result,
        DeployStackResult::FailpausedNeedRollbackFirst {
            reason: PausedReason::Replacement,
            ..
        }
    ));
    assert!(!executed(&factory));
}

#[tokio::test]
async fn paused_stack_without_rollback_is_deployed() {
    let (factory, deployments) = setup_with(deployed("S", "UPDATE_FAILED", &queue_template()));

    let mut options = DeployStackOptions::new(stack("S", queue_and_topic_template()));
    options.rollback = false;
    let result = deployments.deploy_stack(options).await.unwrap();

    assert!(!result.is_no_op());
    let execute = factory
        .cloudformation
        .operations()
        .into_iter()
        .find_map(|op| match op {
            MockCfnOperation::ExecuteChangeSet(request) => Some(request),
            _ => None,
        });
    assert!(execute.unwrap().disable_rollback);
}

#[tokio::test]
async fn replacement_requires_rollback() {
    let existing = deployed("S", "UPDATE_COMPLETE", &queue_template());
    let cfn = MockCloudFormation::new().with_stack(existing);
    cfn.require_replacement("Queue");
    let (factory, deployments) = setup(cfn);

    let mut options = DeployStackOptions::new(stack("S", fifo_queue_template()));
    options.rollback = false;
    let result = deployments.deploy_stack(options).await.unwrap();

    assert_eq!(result, DeployStackResult::ReplacementRequiresRollback);
    assert!(!executed(&factory));
}

// =============================================================================
// Direct deployments
// =============================================================================

#[tokio::test]
async fn direct_create_then_update_without_changes() {
    let (factory, deployments) = setup(MockCloudFormation::new());

    let mut artifact = stack("S", queue_template());
    artifact.termination_protection = true;
    let mut options = DeployStackOptions::new(artifact);
    options.deployment_method = DeploymentMethod::Direct;

    let result = deployments.deploy_stack(options.clone()).await.unwrap();
    assert!(!result.is_no_op());
    match &factory.cloudformation.mutating_operations()[..] {
        [MockCfnOperation::CreateStack(request)] => {
            assert!(request.enable_termination_protection);
            let token = request.client_request_token.as_deref().unwrap();
            assert!(token.starts_with("create"));
        }
        other => panic!("unexpected operations: {other:?}"),
    }

    factory.cloudformation.clear_operations();
    options.force = true;
    let result = deployments.deploy_stack(options).await.unwrap();
    assert!(result.is_no_op());
    assert!(factory
        .cloudformation
        .mutating_operations()
        .iter()
        .any(|op| matches!(op, MockCfnOperation::UpdateStack(_))));
}

#[tokio::test]
async fn direct_import_is_rejected() {
    let (factory, deployments) = setup(MockCloudFormation::new());

    let mut options = DeployStackOptions::new(stack("S", queue_template()));
    options.deployment_method = DeploymentMethod::Direct;
    options.resources_to_import = Some(vec![ResourceToImport {
        resource_type: "AWS::SQS::Queue".into(),
        logical_resource_id: "Queue".into(),
        resource_identifier: BTreeMap::from([("QueueUrl".to_string(), "https://q".to_string())]),
    }]);

    let err = deployments.deploy_stack(options).await.unwrap_err();
    assert!(
        err.to_string().contains("requires a changeset deployment"),
        "{err}"
    );
    assert!(factory.cloudformation.mutating_operations().is_empty());
}

fn events_read(factory: &MockClientFactory) -> usize {
    factory
        .cloudformation
        .operations()
        .iter()
        .filter(|op| matches!(op, MockCfnOperation::DescribeStackEvents { .. }))
        .count()
}

async fn failing_update(ci: bool) -> (MockClientFactory, ToolkitError) {
    let existing = deployed("S", "UPDATE_COMPLETE", &queue_template());
    let cfn = MockCloudFormation::new().with_stack(existing);
    cfn.add_event("S", "Topic", "AWS::SNS::Topic", "UPDATE_FAILED");
    cfn.push_outcome("S", "UPDATE_ROLLBACK_COMPLETE");
    let (factory, deployments) = setup(cfn);

    let mut options = DeployStackOptions::new(stack("S", queue_and_topic_template()));
    options.ci = ci;
    let err = deployments.deploy_stack(options).await.unwrap_err();
    (factory, err)
}

#[tokio::test]
async fn failed_deploy_in_ci_reads_failure_events() {
    let (factory, err) = failing_update(true).await;

    assert!(err.to_string().contains("UPDATE_ROLLBACK_COMPLETE"));
    assert_eq!(events_read(&factory), 1);
}

#[tokio::test]
async fn failed_deploy_outside_ci_reports_status_only() {
    let (factory, err) = failing_update(false).await;

    assert!(err.to_string().contains("UPDATE_ROLLBACK_COMPLETE"));
    assert_eq!(events_read(&factory), 0);
}

// =============================================================================
// Recovery and bootstrap requirements
// =============================================================================

#[tokio::test]
async fn failed_creation_is_deleted_and_recreated() {
    let (factory, deployments) = setup_with(deployed("S", "ROLLBACK_COMPLETE", &queue_template()));

    let result = deployments
        .deploy_stack(DeployStackOptions::new(stack("S", queue_template())))
        .await
        .unwrap();

    assert!(!result.is_no_op());
    let ops = factory.cloudformation.mutating_operations();
    assert!(matches!(ops.first(), Some(MockCfnOperation::DeleteStack(_))));
    assert_eq!(
        change_set_requests(&factory)[0].change_set_type,
        ChangeSetType::Create
    );
    assert_eq!(stack_status(&factory, "S"), "CREATE_COMPLETE");
}

#[tokio::test]
async fn bootstrap_version_too_old_is_rejected() {
    let (factory, deployments) = setup_with(toolkit_stack("5"));

    let mut artifact = stack("S", queue_template());
    artifact.requires_bootstrap_stack_version = Some(99);
    let err = deployments
        .deploy_stack(DeployStackOptions::new(artifact))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("'99'"), "{message}");
    assert!(message.contains("'5'"), "{message}");
    assert!(message.starts_with("S:"), "{message}");
    assert!(factory.cloudformation.mutating_operations().is_empty());
}

#[tokio::test]
async fn missing_bootstrap_stack_is_rejected() {
    let (factory, deployments) = setup(MockCloudFormation::new());

    let mut artifact = stack("S", queue_template());
    artifact.requires_bootstrap_stack_version = Some(6);
    let err = deployments
        .deploy_stack(DeployStackOptions::new(artifact))
        .await
        .unwrap_err();

    let ToolkitError::InStack { source, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(matches!(**source, ToolkitError::BootstrapStackNotFound { .. }));
    assert!(factory.cloudformation.mutating_operations().is_empty());
}

// =============================================================================
// Template location
// =============================================================================

fn large_template() -> Template {
    template(json!({
        "Function": {
            "Type": "AWS::Lambda::Function",
            "Properties": { "Code": { "ZipFile": "x".repeat(60 * 1024) } }
        }
    }))
}

#[tokio::test]
async fn large_template_is_uploaded_to_bootstrap_bucket() {
    let (factory, deployments) = setup_with(toolkit_stack("20"));

    deployments
        .deploy_stack(DeployStackOptions::new(stack("S", large_template())))
        .await
        .unwrap();

    let objects = factory.s3.objects();
    assert_eq!(objects.len(), 1);
    let (bucket, key, _) = &objects[0];
    assert_eq!(bucket, "cdk-assets");
    assert!(key.starts_with("cdk/S/") && key.ends_with(".json"), "{key}");

    let expected = format!("https://cdk-assets.s3.amazonaws.com/{key}");
    let requests = change_set_requests(&factory);
    assert_eq!(requests[0].template, TemplateSource::Url(expected));
}

#[tokio::test]
async fn large_template_without_bootstrap_stack_fails() {
    let (factory, deployments) = setup(MockCloudFormation::new());

    let err = deployments
        .deploy_stack(DeployStackOptions::new(stack("S", large_template())))
        .await
        .unwrap_err();

    assert!(matches!(err, ToolkitError::TemplateTooLarge { .. }));
    assert!(factory.s3.objects().is_empty());
}

#[tokio::test]
async fn published_template_url_is_used() {
    let (factory, deployments) = setup(MockCloudFormation::new());

    let mut artifact = stack("S", queue_template());
    let url = "s3://cdk-${AWS::AccountId}-${AWS::Region}/t.json";
    artifact.stack_template_asset_object_url = Some(url.into());
    deployments
        .deploy_stack(DeployStackOptions::new(artifact))
        .await
        .unwrap();

    let expected = "https://s3.eu-west-1.amazonaws.com/cdk-111111111111-eu-west-1/t.json";
    let requests = change_set_requests(&factory);
    assert_eq!(requests[0].template, TemplateSource::Url(expected.into()));
}
