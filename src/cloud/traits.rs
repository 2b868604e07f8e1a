//! cloud::traits
//!
//! Capability traits for the cloud services the engine talks to.
//!
//! # Design
//!
//! Each service gets one narrow trait holding only the operations the
//! engine actually consumes. The traits are async because every call is a
//! network round trip, and `Send + Sync` so clients can be shared across
//! tasks behind an `Arc`.
//!
//! Service errors are carried as [`CloudError`], classified by the error
//! code the service returned. The engine only branches on a handful of
//! codes (stack-not-found, access denied, parameter not found, expired
//! credentials); everything else is surfaced verbatim.
//!
//! # Example
//!
//! ```ignore
//! use stackshift::cloud::{CloudFormation, CloudError};
//!
//! async fn status(cfn: &dyn CloudFormation, name: &str) -> Result<Option<String>, CloudError> {
//!     match cfn.describe_stacks(name).await {
//!         Ok(stacks) => Ok(stacks.into_iter().next().map(|s| s.stack_status)),
//!         Err(e) if e.is_stack_not_found(name) => Ok(None),
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::model::{
    ChangeSetDescription, ContinueUpdateRollbackRequest, CreateChangeSetOutput,
    CreateChangeSetRequest, CreateStackRequest, DeleteStackRequest, ExecuteChangeSetRequest,
    RollbackStackRequest, StackDescription, StackEventsPage, StackResourceSummary, TemplateStage,
    UpdateStackRequest,
};
use crate::core::types::Account;

/// Errors from cloud service calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    /// `ValidationError`: the request was rejected as invalid.
    #[error("{0}")]
    Validation(String),

    /// `AccessDenied` / `AccessDeniedException`.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// `ParameterNotFound` from the parameter store.
    #[error("parameter not found: {0}")]
    ParameterNotFound(String),

    /// `ExpiredToken`: the credentials in use have expired.
    #[error("credentials expired: {0}")]
    ExpiredToken(String),

    /// The service throttled the request.
    #[error("rate limited")]
    Throttled,

    /// Network or connection error.
    #[error("network error: {0}")]
    Network(String),

    /// Any other service error.
    #[error("{code}: {message}")]
    Service {
        /// Error code returned by the service
        code: String,
        /// Error message from the service
        message: String,
    },
}

impl CloudError {
    /// The service error code this error corresponds to.
    pub fn code(&self) -> &str {
        match self {
            CloudError::Validation(_) => "ValidationError",
            CloudError::AccessDenied(_) => "AccessDeniedException",
            CloudError::ParameterNotFound(_) => "ParameterNotFound",
            CloudError::ExpiredToken(_) => "ExpiredToken",
            CloudError::Throttled => "Throttling",
            CloudError::Network(_) => "NetworkingError",
            CloudError::Service { code, .. } => code,
        }
    }

    /// Whether this is the service's "stack does not exist" error for `stack_name`.
    pub fn is_stack_not_found(&self, stack_name: &str) -> bool {
        match self {
            CloudError::Validation(message) => {
                message == &format!("Stack with id {} does not exist", stack_name)
            }
            _ => false,
        }
    }

    /// Whether the credentials used for the call have expired.
    pub fn is_expired_token(&self) -> bool {
        matches!(self, CloudError::ExpiredToken(_))
    }
}

/// The CloudFormation operations the engine consumes.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Error Handling
///
/// A stack that does not exist is reported by the service as a
/// `ValidationError` with the message `Stack with id <name> does not exist`;
/// implementations must preserve that message so
/// [`CloudError::is_stack_not_found`] works.
#[async_trait]
pub trait CloudFormation: Send + Sync {
    /// Describe a stack by name or id.
    async fn describe_stacks(&self, stack_name: &str) -> Result<Vec<StackDescription>, CloudError>;

    /// All resource summaries of a stack (every page).
    async fn list_stack_resources(
        &self,
        stack_name: &str,
    ) -> Result<Vec<StackResourceSummary>, CloudError>;

    /// One page of stack events, newest first.
    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<String>,
    ) -> Result<StackEventsPage, CloudError>;

    /// The deployed template body (JSON or YAML).
    async fn get_template(&self, stack_name: &str, stage: TemplateStage)
        -> Result<String, CloudError>;

    /// Create a stack. Returns the stack id.
    async fn create_stack(&self, request: CreateStackRequest) -> Result<String, CloudError>;

    /// Update a stack. Returns the stack id.
    ///
    /// An update with nothing to change fails with the validation message
    /// `No updates are to be performed.`.
    async fn update_stack(&self, request: UpdateStackRequest) -> Result<String, CloudError>;

    async fn delete_stack(&self, request: DeleteStackRequest) -> Result<(), CloudError>;

    async fn update_termination_protection(
        &self,
        stack_name: &str,
        enabled: bool,
    ) -> Result<(), CloudError>;

    async fn create_change_set(
        &self,
        request: CreateChangeSetRequest,
    ) -> Result<CreateChangeSetOutput, CloudError>;

    /// Describe a change set with all pages of changes merged.
    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<ChangeSetDescription, CloudError>;

    async fn execute_change_set(&self, request: ExecuteChangeSetRequest) -> Result<(), CloudError>;

    async fn delete_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<(), CloudError>;

    /// Roll back a stack paused in a failed state.
    async fn rollback_stack(&self, request: RollbackStackRequest) -> Result<(), CloudError>;

    /// Continue a rollback that got stuck in `UPDATE_ROLLBACK_FAILED`.
    async fn continue_update_rollback(
        &self,
        request: ContinueUpdateRollbackRequest,
    ) -> Result<(), CloudError>;
}

/// Parameter store reads.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Read a parameter's value.
    ///
    /// Fails with [`CloudError::ParameterNotFound`] if it does not exist.
    async fn get_parameter(&self, name: &str) -> Result<String, CloudError>;
}

/// Object store writes (large template uploads).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CloudError>;
}

/// A set of clients authenticated as one identity in one region.
#[async_trait]
pub trait Sdk: Send + Sync {
    fn region(&self) -> &str;

    fn cloudformation(&self) -> Arc<dyn CloudFormation>;

    fn ssm(&self) -> Arc<dyn ParameterStore>;

    fn s3(&self) -> Arc<dyn ObjectStore>;

    /// Account and partition of the identity behind these clients.
    async fn current_account(&self) -> Result<Account, CloudError>;
}
