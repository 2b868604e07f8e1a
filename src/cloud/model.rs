//! cloud::model
//!
//! Request and response shapes for the cloud capability traits.
//!
//! These mirror the subset of the CloudFormation, SSM and S3 APIs the
//! engine consumes. Field names follow the service's own vocabulary so
//! adapters can map them one-to-one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::core::parameters::ApiParameter;
use crate::core::types::Tag;

/// Capabilities every deployment acknowledges.
pub const DEPLOY_CAPABILITIES: &[&str] = &[
    "CAPABILITY_IAM",
    "CAPABILITY_NAMED_IAM",
    "CAPABILITY_AUTO_EXPAND",
];

/// A stack as returned by describe-stacks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackDescription {
    pub stack_name: String,
    pub stack_id: String,
    pub stack_status: String,
    pub stack_status_reason: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub outputs: Vec<StackOutput>,
    pub parameters: Vec<StackParameter>,
    pub tags: Vec<Tag>,
    pub notification_arns: Vec<String>,
    pub enable_termination_protection: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackOutput {
    pub output_key: String,
    pub output_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackParameter {
    pub parameter_key: String,
    pub parameter_value: Option<String>,
    /// Value an SSM-typed parameter resolved to
    pub resolved_value: Option<String>,
}

/// One entry of list-stack-resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackResourceSummary {
    pub logical_resource_id: String,
    pub physical_resource_id: Option<String>,
    pub resource_type: String,
    pub resource_status: String,
}

/// One entry of describe-stack-events.
#[derive(Debug, Clone, PartialEq)]
pub struct StackEvent {
    pub event_id: String,
    pub stack_id: String,
    pub stack_name: String,
    pub logical_resource_id: Option<String>,
    pub physical_resource_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_status: Option<String>,
    pub resource_status_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One page of stack events, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackEventsPage {
    pub events: Vec<StackEvent>,
    pub next_token: Option<String>,
}

/// Which version of a deployed template to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateStage {
    /// The template as submitted
    #[default]
    Original,
    /// The template after transforms were expanded
    Processed,
}

/// How a template is handed to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Body(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateStackRequest {
    pub stack_name: String,
    pub template: TemplateSource,
    pub parameters: Vec<ApiParameter>,
    pub role_arn: Option<String>,
    pub notification_arns: Vec<String>,
    pub capabilities: Vec<String>,
    pub tags: Vec<Tag>,
    pub enable_termination_protection: bool,
    pub disable_rollback: bool,
    pub client_request_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStackRequest {
    pub stack_name: String,
    pub template: TemplateSource,
    pub parameters: Vec<ApiParameter>,
    pub role_arn: Option<String>,
    pub notification_arns: Vec<String>,
    pub capabilities: Vec<String>,
    pub tags: Vec<Tag>,
    pub disable_rollback: bool,
    pub client_request_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteStackRequest {
    pub stack_name: String,
    pub role_arn: Option<String>,
    pub client_request_token: Option<String>,
}

/// Kind of change set to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetType {
    Create,
    Update,
    Import,
}

impl std::fmt::Display for ChangeSetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeSetType::Create => write!(f, "CREATE"),
            ChangeSetType::Update => write!(f, "UPDATE"),
            ChangeSetType::Import => write!(f, "IMPORT"),
        }
    }
}

/// A resource to adopt into a stack through an import change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceToImport {
    pub resource_type: String,
    pub logical_resource_id: String,
    pub resource_identifier: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateChangeSetRequest {
    pub stack_name: String,
    pub change_set_name: String,
    pub change_set_type: ChangeSetType,
    pub template: TemplateSource,
    pub parameters: Vec<ApiParameter>,
    pub role_arn: Option<String>,
    pub notification_arns: Vec<String>,
    pub capabilities: Vec<String>,
    pub tags: Vec<Tag>,
    pub resources_to_import: Vec<ResourceToImport>,
    pub import_existing_resources: bool,
    pub description: Option<String>,
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateChangeSetOutput {
    pub change_set_id: String,
    pub stack_id: String,
}

/// A change set as returned by describe-change-set (all pages merged).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSetDescription {
    pub change_set_id: String,
    pub change_set_name: String,
    pub stack_id: String,
    /// `CREATE_PENDING`, `CREATE_IN_PROGRESS`, `CREATE_COMPLETE`, `FAILED`, ...
    pub status: String,
    pub status_reason: Option<String>,
    pub execution_status: Option<String>,
    pub changes: Vec<ResourceChange>,
}

/// One resource change inside a change set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceChange {
    pub logical_resource_id: String,
    pub resource_type: String,
    /// `Add`, `Modify`, `Remove`, `Import`, ...
    pub action: String,
    /// `True`, `False` or `Conditional`
    pub replacement: Option<String>,
    /// `ReplaceAndDelete`, `ReplaceAndRetain`, ...
    pub policy_action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteChangeSetRequest {
    pub stack_name: String,
    pub change_set_name: String,
    pub client_request_token: Option<String>,
    pub disable_rollback: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackStackRequest {
    pub stack_name: String,
    pub role_arn: Option<String>,
    pub client_request_token: Option<String>,
    pub retain_except_on_create: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinueUpdateRollbackRequest {
    pub stack_name: String,
    pub role_arn: Option<String>,
    pub resources_to_skip: Vec<String>,
    pub client_request_token: Option<String>,
}
