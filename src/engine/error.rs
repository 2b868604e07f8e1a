//! engine::error
//!
//! Errors from orchestration.
//!
//! Only structural and precondition failures are errors. Safety aborts,
//! paused deployments and stacks that are not rollbackable come back as
//! data (see [`DeployStackResult`](super::DeployStackResult) and
//! [`RollbackStackResult`](super::RollbackStackResult)).

use thiserror::Error;

use crate::cloud::CloudError;
use crate::core::artifact::SelectionError;
use crate::core::parameters::ParameterError;
use crate::core::template::TemplateError;
use crate::core::types::TypeError;

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// The environment's bootstrap stack is older than required.
    #[error(
        "This CDK deployment requires bootstrap stack version '{required}', found '{found}'. \
         Please run 'cdk bootstrap'."
    )]
    BootstrapVersion { required: u32, found: u32 },

    /// A bootstrap stack is required but none exists.
    #[error("{message}")]
    BootstrapStackNotFound { message: String },

    /// The lookup role was assumed but its bootstrap stack is too old.
    #[error(
        "Bootstrap stack version '{required}' is required, found version '{found}'. \
         To get rid of this error, please upgrade to bootstrap version >= {required}"
    )]
    LookupRoleVersion { required: u32, found: u32 },

    /// The bootstrap stack lacks an output the operation needs.
    #[error(
        "The CDK toolkit stack ({stack_name}) does not have an output named {output}. \
         Use 'cdk bootstrap' to update it."
    )]
    MissingOutput { stack_name: String, output: String },

    /// The bootstrap version parameter could not be read.
    #[error("Unable to read SSM parameter '{parameter}': {source}")]
    Ssm {
        parameter: String,
        source: CloudError,
    },

    /// The bootstrap version parameter exists but could not be read, and the
    /// stack outputs are too new to fall back on.
    #[error(
        "This CDK deployment requires bootstrap stack version '{required}', \
         but during the confirmation via SSM parameter {parameter} \
         the following error occurred: {source}"
    )]
    BootstrapVersionUnverifiable {
        required: u32,
        parameter: String,
        source: CloudError,
    },

    /// The SSM parameter holds something that is not a version number.
    #[error("SSM parameter '{parameter}' does not contain a version number: {value}")]
    InvalidSsmVersion { parameter: String, value: String },

    /// No usable credentials for the target account.
    #[error("{0}")]
    Authentication(String),

    /// A stack ended in a failed state.
    #[error("The stack named {stack_name} failed {operation}: {status}")]
    StackFailed {
        stack_name: String,
        /// What was attempted, e.g. "to deploy"
        operation: &'static str,
        /// Final status with reason
        status: String,
    },

    /// A change set could not be created.
    #[error("Failed to create ChangeSet {change_set_name} on {stack_name}: {status}, {reason}")]
    ChangeSet {
        change_set_name: String,
        stack_name: String,
        status: String,
        reason: String,
    },

    /// The template is too large to deploy without a staging bucket.
    #[error(
        "The template for stack \"{stack_name}\" is {size} bytes, \
         larger than the limit of {limit} bytes. \
         Bootstrap the environment to deploy large templates."
    )]
    TemplateTooLarge {
        stack_name: String,
        size: usize,
        limit: usize,
    },

    /// Options that cannot be combined, or are missing a requirement.
    #[error("{0}")]
    InvalidOptions(String),

    /// The service did not settle within the configured timeout.
    #[error("timed out waiting for {0}")]
    WaitTimeout(String),

    /// An error attributed to a particular stack.
    #[error("{stack_name}: {source}")]
    InStack {
        stack_name: String,
        source: Box<ToolkitError>,
    },

    /// A rollback kept landing in a failed state.
    #[error("{stack_name}: rollback did not complete after {attempts} attempts ({status})")]
    RollbackStalled {
        stack_name: String,
        attempts: u32,
        status: String,
    },

    /// A bug or misconfiguration inside the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolkitError {
    /// Attribute this error to `stack_name`.
    pub fn in_stack(self, stack_name: impl Into<String>) -> Self {
        match self {
            already @ ToolkitError::InStack { .. } => already,
            other => ToolkitError::InStack {
                stack_name: stack_name.into(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying cloud error, if any.
    pub fn cloud_error(&self) -> Option<&CloudError> {
        match self {
            ToolkitError::Cloud(e) => Some(e),
            ToolkitError::Ssm { source, .. }
            | ToolkitError::BootstrapVersionUnverifiable { source, .. } => Some(source),
            ToolkitError::InStack { source, .. } => source.cloud_error(),
            _ => None,
        }
    }

    /// Whether this error means the bootstrap stack version could not be
    /// established (as opposed to, say, a network failure).
    pub fn is_bootstrap_requirement_error(&self) -> bool {
        match self {
            ToolkitError::BootstrapVersion { .. }
            | ToolkitError::LookupRoleVersion { .. }
            | ToolkitError::BootstrapStackNotFound { .. }
            | ToolkitError::BootstrapVersionUnverifiable { .. }
            | ToolkitError::InvalidSsmVersion { .. } => true,
            ToolkitError::Ssm {
                source: CloudError::ParameterNotFound(_) | CloudError::AccessDenied(_),
                ..
            } => true,
            ToolkitError::InStack { source, .. } => source.is_bootstrap_requirement_error(),
            _ => false,
        }
    }

    /// Whether the credentials in use have expired.
    pub fn is_expired_token(&self) -> bool {
        self.cloud_error().is_some_and(CloudError::is_expired_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_version_message_names_both_versions() {
        let err = ToolkitError::BootstrapVersion {
            required: 99,
            found: 5,
        };
        let message = err.to_string();
        assert!(message.contains("'99'"));
        assert!(message.contains("'5'"));
    }

    #[test]
    fn in_stack_does_not_nest_twice() {
        let err = ToolkitError::Internal("boom".into())
            .in_stack("A")
            .in_stack("B");
        assert_eq!(err.to_string(), "A: internal error: boom");
    }

    #[test]
    fn classification_sees_through_stack_attribution() {
        let err = ToolkitError::Ssm {
            parameter: "/cdk-bootstrap/hnb659fds/version".into(),
            source: CloudError::ParameterNotFound("x".into()),
        }
        .in_stack("S");
        assert!(err.is_bootstrap_requirement_error());

        let err = ToolkitError::Cloud(CloudError::ExpiredToken("old".into())).in_stack("S");
        assert!(err.is_expired_token());
        assert!(!err.is_bootstrap_requirement_error());
    }
}
