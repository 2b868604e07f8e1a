//! cloud::mock::cloudformation
//!
//! In-memory CloudFormation for deterministic testing.
//!
//! # Design
//!
//! Stacks, change sets and events live in memory. Every mutation settles
//! immediately into its natural terminal status (`CREATE_COMPLETE`,
//! `UPDATE_COMPLETE`, ...) unless the test queued a different outcome with
//! [`MockCloudFormation::push_outcome`]. Intermediate statuses seen while
//! polling can be scripted with [`MockCloudFormation::push_statuses`].
//!
//! Change sets are computed by diffing the `Resources` sections of the old
//! and new templates, so a redeploy of an identical template produces the
//! service's "didn't contain changes" failure.
//!
//! # Example
//!
//! ```
//! use stackshift::cloud::mock::{MockCloudFormation, MockStack};
//! use stackshift::cloud::CloudFormation;
//!
//! # tokio_test::block_on(async {
//! let cfn = MockCloudFormation::new()
//!     .with_stack(MockStack::new("MyStack", "UPDATE_FAILED"));
//!
//! let stacks = cfn.describe_stacks("MyStack").await.unwrap();
//! assert_eq!(stacks[0].stack_status, "UPDATE_FAILED");
//! assert!(cfn.describe_stacks("Other").await.is_err());
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::MockObjectStore;
use crate::cloud::model::{
    ChangeSetDescription, ChangeSetType, ContinueUpdateRollbackRequest, CreateChangeSetOutput,
    CreateChangeSetRequest, CreateStackRequest, DeleteStackRequest, ExecuteChangeSetRequest,
    ResourceChange, RollbackStackRequest, StackDescription, StackEvent, StackEventsPage,
    StackOutput, StackParameter, StackResourceSummary, TemplateSource, TemplateStage,
    UpdateStackRequest,
};
use crate::cloud::traits::{CloudError, CloudFormation};
use crate::core::parameters::ApiParameter;
use crate::core::template::Template;
use crate::core::types::{tags_equal, Tag};

const MOCK_ACCOUNT: &str = "123456789012";
const MOCK_REGION: &str = "us-east-1";

/// Status reason of a change set with nothing in it.
pub const NO_CHANGES_REASON: &str = "The submitted information didn't contain changes. \
    Submit different information to create a change set.";

/// CloudFormation operations, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfnOp {
    DescribeStacks,
    ListStackResources,
    DescribeStackEvents,
    GetTemplate,
    CreateStack,
    UpdateStack,
    DeleteStack,
    UpdateTerminationProtection,
    CreateChangeSet,
    DescribeChangeSet,
    ExecuteChangeSet,
    DeleteChangeSet,
    RollbackStack,
    ContinueUpdateRollback,
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCfnOperation {
    DescribeStacks {
        stack_name: String,
    },
    ListStackResources {
        stack_name: String,
    },
    DescribeStackEvents {
        stack_name: String,
        next_token: Option<String>,
    },
    GetTemplate {
        stack_name: String,
        stage: TemplateStage,
    },
    CreateStack(CreateStackRequest),
    UpdateStack(UpdateStackRequest),
    DeleteStack(DeleteStackRequest),
    UpdateTerminationProtection {
        stack_name: String,
        enabled: bool,
    },
    CreateChangeSet(CreateChangeSetRequest),
    DescribeChangeSet {
        stack_name: String,
        change_set_name: String,
    },
    ExecuteChangeSet(ExecuteChangeSetRequest),
    DeleteChangeSet {
        stack_name: String,
        change_set_name: String,
    },
    RollbackStack(RollbackStackRequest),
    ContinueUpdateRollback(ContinueUpdateRollbackRequest),
}

impl MockCfnOperation {
    /// Whether this operation changes remote state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            MockCfnOperation::DescribeStacks { .. }
                | MockCfnOperation::ListStackResources { .. }
                | MockCfnOperation::DescribeStackEvents { .. }
                | MockCfnOperation::GetTemplate { .. }
                | MockCfnOperation::DescribeChangeSet { .. }
        )
    }
}

/// A stack held by the mock.
#[derive(Debug, Clone)]
pub struct MockStack {
    pub description: StackDescription,
    pub template_body: String,
    pub resources: Vec<StackResourceSummary>,
    /// Oldest first
    pub events: Vec<StackEvent>,
}

impl MockStack {
    pub fn new(stack_name: impl Into<String>, status: impl Into<String>) -> Self {
        let stack_name = stack_name.into();
        Self {
            description: StackDescription {
                stack_id: stack_id(&stack_name, 0),
                stack_name,
                stack_status: status.into(),
                ..Default::default()
            },
            template_body: String::new(),
            resources: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: Value) -> Self {
        self.template_body = template.to_string();
        self
    }

    /// A raw template body (YAML bodies are allowed).
    pub fn with_template_body(mut self, body: impl Into<String>) -> Self {
        self.template_body = body.into();
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.description.outputs.push(StackOutput {
            output_key: key.into(),
            output_value: Some(value.into()),
        });
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.description.parameters.push(StackParameter {
            parameter_key: key.into(),
            parameter_value: Some(value.into()),
            resolved_value: None,
        });
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.description.tags.push(Tag::new(key, value));
        self
    }

    pub fn with_termination_protection(mut self, enabled: bool) -> Self {
        self.description.enable_termination_protection = enabled;
        self
    }

    pub fn with_status_reason(mut self, reason: impl Into<String>) -> Self {
        self.description.stack_status_reason = Some(reason.into());
        self
    }

    pub fn with_resource(
        mut self,
        logical_id: impl Into<String>,
        physical_id: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        self.resources.push(StackResourceSummary {
            logical_resource_id: logical_id.into(),
            physical_resource_id: Some(physical_id.into()),
            resource_type: resource_type.into(),
            resource_status: "CREATE_COMPLETE".into(),
        });
        self
    }

    /// Add a resource event (appended as the newest event).
    pub fn with_event(
        mut self,
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        let n = self.events.len() as i64;
        self.events.push(StackEvent {
            event_id: format!("{}-event-{}", self.description.stack_name, n),
            stack_id: self.description.stack_id.clone(),
            stack_name: self.description.stack_name.clone(),
            logical_resource_id: Some(logical_id.into()),
            physical_resource_id: None,
            resource_type: Some(resource_type.into()),
            resource_status: Some(status.into()),
            resource_status_reason: None,
            timestamp: event_time(n),
        });
        self
    }

    fn template(&self) -> Template {
        Template::parse(&self.template_body).unwrap_or_default()
    }

    fn push_stack_event(&mut self, status: &str) {
        let n = self.events.len() as i64;
        self.events.push(StackEvent {
            event_id: format!("{}-event-{}", self.description.stack_name, n),
            stack_id: self.description.stack_id.clone(),
            stack_name: self.description.stack_name.clone(),
            logical_resource_id: Some(self.description.stack_name.clone()),
            physical_resource_id: Some(self.description.stack_id.clone()),
            resource_type: Some("AWS::CloudFormation::Stack".into()),
            resource_status: Some(status.to_string()),
            resource_status_reason: None,
            timestamp: event_time(n),
        });
    }

    fn settle(&mut self, status: String) {
        self.push_stack_event(&status);
        self.description.stack_status = status;
    }

    /// Rebuild resource summaries from the current template, keeping
    /// physical ids of resources that already exist.
    fn sync_resources(&mut self) {
        let template = self.template();
        let Some(resources) = template.resources() else {
            self.resources.clear();
            return;
        };
        let existing: HashMap<String, StackResourceSummary> = self
            .resources
            .drain(..)
            .map(|r| (r.logical_resource_id.clone(), r))
            .collect();

        for (logical_id, resource) in resources {
            let summary = existing.get(logical_id).cloned().unwrap_or_else(|| {
                StackResourceSummary {
                    logical_resource_id: logical_id.clone(),
                    physical_resource_id: Some(format!(
                        "{}-{}",
                        self.description.stack_name, logical_id
                    )),
                    resource_type: resource
                        .get("Type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    resource_status: "CREATE_COMPLETE".into(),
                }
            });
            self.resources.push(summary);
        }
    }
}

#[derive(Debug, Clone)]
struct MockChangeSet {
    description: ChangeSetDescription,
    request: CreateChangeSetRequest,
}

#[derive(Debug)]
struct MockCfnInner {
    stacks: HashMap<String, MockStack>,
    change_sets: HashMap<(String, String), MockChangeSet>,
    scripted_statuses: HashMap<String, VecDeque<String>>,
    outcomes: HashMap<String, VecDeque<String>>,
    replacements: Vec<String>,
    failures: HashMap<CfnOp, CloudError>,
    operations: Vec<MockCfnOperation>,
    events_page_size: usize,
    object_store: Option<MockObjectStore>,
    next_id: u64,
}

/// Mock CloudFormation for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone)]
pub struct MockCloudFormation {
    inner: Arc<Mutex<MockCfnInner>>,
}

impl MockCloudFormation {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockCfnInner {
                stacks: HashMap::new(),
                change_sets: HashMap::new(),
                scripted_statuses: HashMap::new(),
                outcomes: HashMap::new(),
                replacements: Vec::new(),
                failures: HashMap::new(),
                operations: Vec::new(),
                events_page_size: 100,
                object_store: None,
                next_id: 1,
            })),
        }
    }

    /// Add a pre-existing stack.
    pub fn with_stack(self, stack: MockStack) -> Self {
        self.put_stack(stack);
        self
    }

    /// Resolve template URLs against this object store.
    pub fn with_object_store(self, store: MockObjectStore) -> Self {
        self.lock().object_store = Some(store);
        self
    }

    /// Serve stack events in pages of `size`.
    pub fn with_events_page_size(self, size: usize) -> Self {
        self.lock().events_page_size = size.max(1);
        self
    }

    /// Configure the mock to fail on a specific operation.
    ///
    /// # Example
    ///
    /// ```
    /// use stackshift::cloud::mock::{CfnOp, MockCloudFormation};
    /// use stackshift::cloud::CloudError;
    ///
    /// let cfn = MockCloudFormation::new()
    ///     .fail_on(CfnOp::GetTemplate, CloudError::Throttled);
    /// ```
    pub fn fail_on(self, op: CfnOp, error: CloudError) -> Self {
        self.lock().failures.insert(op, error);
        self
    }

    pub fn clear_fail_on(&self) {
        self.lock().failures.clear();
    }

    pub fn put_stack(&self, stack: MockStack) {
        self.lock()
            .stacks
            .insert(stack.description.stack_name.clone(), stack);
    }

    /// A stack by name (for test verification).
    pub fn stack(&self, stack_name: &str) -> Option<MockStack> {
        self.lock().stacks.get(stack_name).cloned()
    }

    /// Statuses describe-stacks reports for `stack_name` before the settled one.
    pub fn push_statuses(&self, stack_name: &str, statuses: &[&str]) {
        self.lock()
            .scripted_statuses
            .entry(stack_name.to_string())
            .or_default()
            .extend(statuses.iter().map(|s| s.to_string()));
    }

    /// Status the next mutation of `stack_name` ends in, instead of its
    /// natural terminal status.
    pub fn push_outcome(&self, stack_name: &str, status: &str) {
        self.lock()
            .outcomes
            .entry(stack_name.to_string())
            .or_default()
            .push_back(status.to_string());
    }

    /// Modifications of this logical id require replacement.
    pub fn require_replacement(&self, logical_id: &str) {
        self.lock().replacements.push(logical_id.to_string());
    }

    /// Add a resource event to an existing stack.
    pub fn add_event(
        &self,
        stack_name: &str,
        logical_id: &str,
        resource_type: &str,
        status: &str,
    ) {
        let mut inner = self.lock();
        if let Some(stack) = inner.stacks.remove(stack_name) {
            let stack = stack.with_event(logical_id, resource_type, status);
            inner.stacks.insert(stack_name.to_string(), stack);
        }
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockCfnOperation> {
        self.lock().operations.clone()
    }

    /// Recorded operations that change remote state.
    pub fn mutating_operations(&self) -> Vec<MockCfnOperation> {
        self.operations()
            .into_iter()
            .filter(MockCfnOperation::is_mutating)
            .collect()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Number of list-stack-resources calls for `stack_name`.
    pub fn list_resources_calls(&self, stack_name: &str) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|op| match op {
                MockCfnOperation::ListStackResources { stack_name: s } => s == stack_name,
                _ => false,
            })
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MockCfnInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, op: MockCfnOperation) {
        self.lock().operations.push(op);
    }

    fn check_fail(&self, op: CfnOp) -> Result<(), CloudError> {
        match self.lock().failures.get(&op) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl Default for MockCloudFormation {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCfnInner {
    fn find_stack_name(&self, name_or_id: &str) -> Option<String> {
        if self.stacks.contains_key(name_or_id) {
            return Some(name_or_id.to_string());
        }
        self.stacks
            .values()
            .find(|s| s.description.stack_id == name_or_id)
            .map(|s| s.description.stack_name.clone())
    }

    fn outcome(&mut self, stack_name: &str, natural: &str) -> String {
        self.outcomes
            .get_mut(stack_name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| natural.to_string())
    }

    fn next_stack_id(&mut self, stack_name: &str) -> String {
        let id = stack_id(stack_name, self.next_id);
        self.next_id += 1;
        id
    }

    fn resolve_body(&self, source: &TemplateSource) -> String {
        match source {
            TemplateSource::Body(body) => body.clone(),
            TemplateSource::Url(url) => self
                .object_store
                .as_ref()
                .and_then(|store| {
                    store
                        .objects()
                        .into_iter()
                        .find(|(bucket, key, _)| url.ends_with(&format!("{}/{}", bucket, key)))
                })
                .map(|(_, _, body)| String::from_utf8_lossy(&body).into_owned())
                .unwrap_or_else(|| "{}".to_string()),
        }
    }

    fn compute_changes(
        &self,
        existing: Option<&MockStack>,
        request: &CreateChangeSetRequest,
        new_body: &str,
    ) -> Vec<ResourceChange> {
        let new_template = Template::parse(new_body).unwrap_or_default();
        let empty = Map::new();
        let new_resources = new_template.resources().unwrap_or(&empty);

        if request.change_set_type == ChangeSetType::Import {
            return request
                .resources_to_import
                .iter()
                .map(|r| ResourceChange {
                    logical_resource_id: r.logical_resource_id.clone(),
                    resource_type: r.resource_type.clone(),
                    action: "Import".into(),
                    replacement: None,
                    policy_action: None,
                })
                .collect();
        }

        let old_template = existing.map(MockStack::template).unwrap_or_default();
        let old_resources = old_template.resources().unwrap_or(&empty);

        let resource_type = |r: &Value| {
            r.get("Type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let mut changes = Vec::new();
        for (logical_id, resource) in new_resources {
            match old_resources.get(logical_id) {
                None => changes.push(ResourceChange {
                    logical_resource_id: logical_id.clone(),
                    resource_type: resource_type(resource),
                    action: "Add".into(),
                    replacement: None,
                    policy_action: None,
                }),
                Some(old) if old != resource => {
                    changes.push(self.modify_change(logical_id, resource_type(resource)))
                }
                Some(_) => {}
            }
        }
        for (logical_id, resource) in old_resources {
            if !new_resources.contains_key(logical_id) {
                changes.push(ResourceChange {
                    logical_resource_id: logical_id.clone(),
                    resource_type: resource_type(resource),
                    action: "Remove".into(),
                    replacement: None,
                    policy_action: Some("Delete".into()),
                });
            }
        }

        if changes.is_empty() {
            if let Some(stack) = existing {
                let params_changed =
                    parameters_changed(&stack.description.parameters, &request.parameters);
                let tags_changed = !tags_equal(&stack.description.tags, &request.tags);
                if params_changed || tags_changed {
                    changes = new_resources
                        .iter()
                        .map(|(logical_id, resource)| {
                            self.modify_change(logical_id, resource_type(resource))
                        })
                        .collect();
                }
            }
        }

        changes
    }

    fn modify_change(&self, logical_id: &str, resource_type: String) -> ResourceChange {
        let replaced = self.replacements.iter().any(|r| r == logical_id);
        ResourceChange {
            logical_resource_id: logical_id.to_string(),
            resource_type,
            action: "Modify".into(),
            replacement: Some(if replaced { "True" } else { "False" }.into()),
            policy_action: replaced.then(|| "ReplaceAndDelete".to_string()),
        }
    }
}

#[async_trait]
impl CloudFormation for MockCloudFormation {
    async fn describe_stacks(&self, stack_name: &str) -> Result<Vec<StackDescription>, CloudError> {
        self.record(MockCfnOperation::DescribeStacks {
            stack_name: stack_name.to_string(),
        });
        self.check_fail(CfnOp::DescribeStacks)?;

        let mut inner = self.lock();
        let name = inner
            .find_stack_name(stack_name)
            .ok_or_else(|| not_found(stack_name))?;

        let scripted = inner
            .scripted_statuses
            .get_mut(&name)
            .and_then(VecDeque::pop_front);

        let stack = inner
            .stacks
            .get(&name)
            .ok_or_else(|| not_found(stack_name))?;
        let mut description = stack.description.clone();
        if let Some(status) = scripted {
            description.stack_status = status;
        }
        Ok(vec![description])
    }

    async fn list_stack_resources(
        &self,
        stack_name: &str,
    ) -> Result<Vec<StackResourceSummary>, CloudError> {
        self.record(MockCfnOperation::ListStackResources {
            stack_name: stack_name.to_string(),
        });
        self.check_fail(CfnOp::ListStackResources)?;

        let inner = self.lock();
        let name = inner
            .find_stack_name(stack_name)
            .ok_or_else(|| not_found(stack_name))?;
        Ok(inner
            .stacks
            .get(&name)
            .map(|s| s.resources.clone())
            .unwrap_or_default())
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<String>,
    ) -> Result<StackEventsPage, CloudError> {
        self.record(MockCfnOperation::DescribeStackEvents {
            stack_name: stack_name.to_string(),
            next_token: next_token.clone(),
        });
        self.check_fail(CfnOp::DescribeStackEvents)?;

        let inner = self.lock();
        let name = inner
            .find_stack_name(stack_name)
            .ok_or_else(|| not_found(stack_name))?;
        let newest_first: Vec<StackEvent> = inner
            .stacks
            .get(&name)
            .map(|s| s.events.iter().rev().cloned().collect())
            .unwrap_or_default();

        let start: usize = next_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let end = (start + inner.events_page_size).min(newest_first.len());
        let events = newest_first
            .get(start..end)
            .map(<[_]>::to_vec)
            .unwrap_or_default();
        let next_token = (end < newest_first.len()).then(|| end.to_string());

        Ok(StackEventsPage { events, next_token })
    }

    async fn get_template(
        &self,
        stack_name: &str,
        stage: TemplateStage,
    ) -> Result<String, CloudError> {
        self.record(MockCfnOperation::GetTemplate {
            stack_name: stack_name.to_string(),
            stage,
        });
        self.check_fail(CfnOp::GetTemplate)?;

        let inner = self.lock();
        let name = inner
            .find_stack_name(stack_name)
            .ok_or_else(|| not_found(stack_name))?;
        Ok(inner
            .stacks
            .get(&name)
            .map(|s| s.template_body.clone())
            .unwrap_or_default())
    }

    async fn create_stack(&self, request: CreateStackRequest) -> Result<String, CloudError> {
        self.record(MockCfnOperation::CreateStack(request.clone()));
        self.check_fail(CfnOp::CreateStack)?;

        let mut inner = self.lock();
        if inner.stacks.contains_key(&request.stack_name) {
            return Err(CloudError::Service {
                code: "AlreadyExistsException".into(),
                message: format!("Stack [{}] already exists", request.stack_name),
            });
        }

        let stack_id = inner.next_stack_id(&request.stack_name);
        let status = inner.outcome(&request.stack_name, "CREATE_COMPLETE");
        let body = inner.resolve_body(&request.template);

        let mut stack = MockStack::new(request.stack_name.clone(), "CREATE_IN_PROGRESS");
        stack.description.stack_id = stack_id.clone();
        stack.description.parameters = apply_parameters(&[], &request.parameters);
        stack.description.tags = request.tags;
        stack.description.notification_arns = request.notification_arns;
        stack.description.enable_termination_protection = request.enable_termination_protection;
        stack.template_body = body;
        stack.sync_resources();
        stack.settle(status);

        inner.stacks.insert(request.stack_name, stack);
        Ok(stack_id)
    }

    async fn update_stack(&self, request: UpdateStackRequest) -> Result<String, CloudError> {
        self.record(MockCfnOperation::UpdateStack(request.clone()));
        self.check_fail(CfnOp::UpdateStack)?;

        let mut inner = self.lock();
        let name = inner
            .find_stack_name(&request.stack_name)
            .ok_or_else(|| not_found(&request.stack_name))?;
        let body = inner.resolve_body(&request.template);
        let status = {
            let stack = inner.stacks.get(&name).ok_or_else(|| not_found(&name))?;
            let same_template = Template::parse(&body).unwrap_or_default() == stack.template();
            let same_params =
                !parameters_changed(&stack.description.parameters, &request.parameters);
            let same_tags = tags_equal(&stack.description.tags, &request.tags);
            if same_template && same_params && same_tags {
                return Err(CloudError::Validation("No updates are to be performed.".into()));
            }
            inner.outcome(&name, "UPDATE_COMPLETE")
        };

        let stack = inner.stacks.get_mut(&name).ok_or_else(|| not_found(&name))?;
        stack.description.parameters =
            apply_parameters(&stack.description.parameters, &request.parameters);
        stack.description.tags = request.tags;
        stack.description.notification_arns = request.notification_arns;
        stack.template_body = body;
        stack.sync_resources();
        stack.settle(status);
        Ok(stack.description.stack_id.clone())
    }

    async fn delete_stack(&self, request: DeleteStackRequest) -> Result<(), CloudError> {
        self.record(MockCfnOperation::DeleteStack(request.clone()));
        self.check_fail(CfnOp::DeleteStack)?;

        let mut inner = self.lock();
        let Some(name) = inner.find_stack_name(&request.stack_name) else {
            return Ok(());
        };
        let status = inner.outcome(&name, "DELETE_COMPLETE");
        if status == "DELETE_COMPLETE" {
            inner.stacks.remove(&name);
            inner.change_sets.retain(|(stack, _), _| stack != &name);
        } else if let Some(stack) = inner.stacks.get_mut(&name) {
            stack.settle(status);
        }
        Ok(())
    }

    async fn update_termination_protection(
        &self,
        stack_name: &str,
        enabled: bool,
    ) -> Result<(), CloudError> {
        self.record(MockCfnOperation::UpdateTerminationProtection {
            stack_name: stack_name.to_string(),
            enabled,
        });
        self.check_fail(CfnOp::UpdateTerminationProtection)?;

        let mut inner = self.lock();
        let name = inner
            .find_stack_name(stack_name)
            .ok_or_else(|| not_found(stack_name))?;
        if let Some(stack) = inner.stacks.get_mut(&name) {
            stack.description.enable_termination_protection = enabled;
        }
        Ok(())
    }

    async fn create_change_set(
        &self,
        request: CreateChangeSetRequest,
    ) -> Result<CreateChangeSetOutput, CloudError> {
        self.record(MockCfnOperation::CreateChangeSet(request.clone()));
        self.check_fail(CfnOp::CreateChangeSet)?;

        let mut inner = self.lock();
        let stack_name = request.stack_name.clone();
        let key = (stack_name.clone(), request.change_set_name.clone());
        if inner.change_sets.contains_key(&key) {
            return Err(CloudError::Service {
                code: "AlreadyExistsException".into(),
                message: format!("ChangeSet {} already exists", request.change_set_name),
            });
        }

        let existing_status = inner
            .stacks
            .get(&stack_name)
            .map(|s| s.description.stack_status.clone());
        match (request.change_set_type, existing_status.as_deref()) {
            (ChangeSetType::Create, Some(status)) if status != "REVIEW_IN_PROGRESS" => {
                return Err(CloudError::Service {
                    code: "AlreadyExistsException".into(),
                    message: format!("Stack [{}] already exists", stack_name),
                });
            }
            (ChangeSetType::Create, None) => {
                let stack_id = inner.next_stack_id(&stack_name);
                let mut stack = MockStack::new(stack_name.clone(), "REVIEW_IN_PROGRESS");
                stack.description.stack_id = stack_id;
                inner.stacks.insert(stack_name.clone(), stack);
            }
            (ChangeSetType::Update | ChangeSetType::Import, None) => {
                return Err(not_found(&stack_name));
            }
            _ => {}
        }

        let body = inner.resolve_body(&request.template);
        let existing = inner
            .stacks
            .get(&stack_name)
            .filter(|s| s.description.stack_status != "REVIEW_IN_PROGRESS");
        let changes = inner.compute_changes(existing, &request, &body);
        let stack_id = inner
            .stacks
            .get(&stack_name)
            .map(|s| s.description.stack_id.clone())
            .unwrap_or_default();

        let (status, status_reason) = if changes.is_empty() {
            ("FAILED".to_string(), Some(NO_CHANGES_REASON.to_string()))
        } else {
            ("CREATE_COMPLETE".to_string(), None)
        };

        let change_set_id = format!(
            "arn:aws:cloudformation:{}:{}:changeSet/{}/{}",
            MOCK_REGION, MOCK_ACCOUNT, request.change_set_name, inner.next_id
        );
        inner.next_id += 1;

        let description = ChangeSetDescription {
            change_set_id: change_set_id.clone(),
            change_set_name: request.change_set_name.clone(),
            stack_id: stack_id.clone(),
            execution_status: Some(
                if changes.is_empty() { "UNAVAILABLE" } else { "AVAILABLE" }.into(),
            ),
            status,
            status_reason,
            changes,
        };
        inner.change_sets.insert(
            key,
            MockChangeSet {
                description,
                request,
            },
        );

        Ok(CreateChangeSetOutput {
            change_set_id,
            stack_id,
        })
    }

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<ChangeSetDescription, CloudError> {
        self.record(MockCfnOperation::DescribeChangeSet {
            stack_name: stack_name.to_string(),
            change_set_name: change_set_name.to_string(),
        });
        self.check_fail(CfnOp::DescribeChangeSet)?;

        let inner = self.lock();
        inner
            .change_sets
            .get(&(stack_name.to_string(), change_set_name.to_string()))
            .map(|cs| cs.description.clone())
            .ok_or_else(|| change_set_not_found(change_set_name))
    }

    async fn execute_change_set(&self, request: ExecuteChangeSetRequest) -> Result<(), CloudError> {
        self.record(MockCfnOperation::ExecuteChangeSet(request.clone()));
        self.check_fail(CfnOp::ExecuteChangeSet)?;

        let mut inner = self.lock();
        let key = (request.stack_name.clone(), request.change_set_name.clone());
        let change_set = inner
            .change_sets
            .remove(&key)
            .ok_or_else(|| change_set_not_found(&request.change_set_name))?;
        if change_set.description.status != "CREATE_COMPLETE" {
            return Err(CloudError::Service {
                code: "InvalidChangeSetStatus".into(),
                message: format!(
                    "ChangeSet [{}] cannot be executed in its current status of [{}]",
                    change_set.description.change_set_id, change_set.description.status
                ),
            });
        }

        let name = request.stack_name.clone();
        let stack = inner.stacks.get(&name).ok_or_else(|| not_found(&name))?;
        let natural = match change_set.request.change_set_type {
            ChangeSetType::Import => "IMPORT_COMPLETE",
            _ if stack.description.stack_status == "REVIEW_IN_PROGRESS" => "CREATE_COMPLETE",
            _ => "UPDATE_COMPLETE",
        };
        let status = inner.outcome(&name, natural);
        let body = inner.resolve_body(&change_set.request.template);

        let stack = inner.stacks.get_mut(&name).ok_or_else(|| not_found(&name))?;
        stack.description.parameters = apply_parameters(
            &stack.description.parameters,
            &change_set.request.parameters,
        );
        stack.description.tags = change_set.request.tags;
        stack.description.notification_arns = change_set.request.notification_arns;
        stack.template_body = body;
        stack.sync_resources();
        stack.settle(status);
        Ok(())
    }

    async fn delete_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<(), CloudError> {
        self.record(MockCfnOperation::DeleteChangeSet {
            stack_name: stack_name.to_string(),
            change_set_name: change_set_name.to_string(),
        });
        self.check_fail(CfnOp::DeleteChangeSet)?;

        self.lock()
            .change_sets
            .remove(&(stack_name.to_string(), change_set_name.to_string()));
        Ok(())
    }

    async fn rollback_stack(&self, request: RollbackStackRequest) -> Result<(), CloudError> {
        self.record(MockCfnOperation::RollbackStack(request.clone()));
        self.check_fail(CfnOp::RollbackStack)?;

        let mut inner = self.lock();
        let name = inner
            .find_stack_name(&request.stack_name)
            .ok_or_else(|| not_found(&request.stack_name))?;
        let natural = match inner.stacks.get(&name) {
            Some(s) if s.description.stack_status.starts_with("CREATE") => "ROLLBACK_COMPLETE",
            _ => "UPDATE_ROLLBACK_COMPLETE",
        };
        let status = inner.outcome(&name, natural);
        if let Some(stack) = inner.stacks.get_mut(&name) {
            stack.settle(status);
        }
        Ok(())
    }

    async fn continue_update_rollback(
        &self,
        request: ContinueUpdateRollbackRequest,
    ) -> Result<(), CloudError> {
        self.record(MockCfnOperation::ContinueUpdateRollback(request.clone()));
        self.check_fail(CfnOp::ContinueUpdateRollback)?;

        let mut inner = self.lock();
        let name = inner
            .find_stack_name(&request.stack_name)
            .ok_or_else(|| not_found(&request.stack_name))?;
        let status = inner.outcome(&name, "UPDATE_ROLLBACK_COMPLETE");
        if let Some(stack) = inner.stacks.get_mut(&name) {
            stack.settle(status);
        }
        Ok(())
    }
}

fn stack_id(stack_name: &str, n: u64) -> String {
    format!(
        "arn:aws:cloudformation:{}:{}:stack/{}/{:08}",
        MOCK_REGION, MOCK_ACCOUNT, stack_name, n
    )
}

fn event_time(n: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + n, 0).unwrap_or_default()
}

fn not_found(stack_name: &str) -> CloudError {
    CloudError::Validation(format!("Stack with id {} does not exist", stack_name))
}

fn change_set_not_found(change_set_name: &str) -> CloudError {
    CloudError::Service {
        code: "ChangeSetNotFound".into(),
        message: format!("ChangeSet [{}] does not exist", change_set_name),
    }
}

fn apply_parameters(
    previous: &[StackParameter],
    requested: &[ApiParameter],
) -> Vec<StackParameter> {
    requested
        .iter()
        .map(|p| {
            let value = if p.use_previous_value {
                previous
                    .iter()
                    .find(|prev| prev.parameter_key == p.key)
                    .and_then(|prev| prev.parameter_value.clone())
            } else {
                p.value.clone()
            };
            StackParameter {
                parameter_key: p.key.clone(),
                parameter_value: value,
                resolved_value: None,
            }
        })
        .collect()
}

fn parameters_changed(previous: &[StackParameter], requested: &[ApiParameter]) -> bool {
    apply_parameters(previous, requested) != previous
}
