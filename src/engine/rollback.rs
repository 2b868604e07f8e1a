//! engine::rollback
//!
//! Bringing a stack paused in a failed state back to a stable one.
//!
//! # Decision
//!
//! The stack's [`RollbackChoice`] drives what happens:
//!
//! | Choice                     | Action                                       |
//! |----------------------------|----------------------------------------------|
//! | `StartRollback`            | rollback-stack                               |
//! | `ContinueUpdateRollback`   | continue-update-rollback, optionally skipping |
//! | `RollbackFailed`           | nothing; needs manual cleanup                |
//! | `None`                     | nothing; not in a rollbackable state         |
//!
//! With `orphan_failed_resources` set, a continued rollback that fails again
//! is retried with the newly failed resources skipped, up to
//! [`MAX_ROLLBACK_ATTEMPTS`] times.

use std::sync::Arc;

use uuid::Uuid;

use super::error::ToolkitError;
use super::events::{failed_resources_since, ROLLBACK_START_STATUSES};
use super::stack::{stabilize_stack, CloudFormationStack, WaitPolicy};
use crate::cloud::{CloudFormation, ContinueUpdateRollbackRequest, RollbackStackRequest};
use crate::core::artifact::StackArtifact;
use crate::core::status::RollbackChoice;

/// Oldest bootstrap stack whose deploy role may roll stacks back.
pub const BOOTSTRAP_STACK_VERSION_FOR_ROLLBACK: u32 = 23;

/// Upper bound on continue-rollback attempts.
pub const MAX_ROLLBACK_ATTEMPTS: u32 = 10;

/// What to roll back and how.
#[derive(Debug, Clone)]
pub struct RollbackStackOptions {
    pub stack: StackArtifact,
    /// Execution role; defaults to the artifact's
    pub role_arn: Option<String>,
    /// Skip whatever resources block a continued rollback
    pub orphan_failed_resources: bool,
    /// Skip exactly these resources
    pub orphan_logical_ids: Vec<String>,
    pub validate_bootstrap_stack_version: bool,
}

impl RollbackStackOptions {
    pub fn new(stack: StackArtifact) -> Self {
        Self {
            stack,
            role_arn: None,
            orphan_failed_resources: false,
            orphan_logical_ids: Vec::new(),
            validate_bootstrap_stack_version: true,
        }
    }

    pub(crate) fn check(&self) -> Result<(), ToolkitError> {
        if self.orphan_failed_resources && !self.orphan_logical_ids.is_empty() {
            return Err(ToolkitError::InvalidOptions(
                "Cannot combine --force with --orphan".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackStackResult {
    /// The stack was not in a state that can be rolled back; nothing was done
    pub not_in_rollbackable_state: bool,
    pub success: bool,
}

impl RollbackStackResult {
    fn not_rollbackable() -> Self {
        Self {
            not_in_rollbackable_state: true,
            success: false,
        }
    }

    fn succeeded() -> Self {
        Self {
            not_in_rollbackable_state: false,
            success: true,
        }
    }
}

/// Roll `options.stack` back. `role_arn` must already have its placeholders
/// replaced.
pub async fn rollback_stack(
    cfn: Arc<dyn CloudFormation>,
    options: &RollbackStackOptions,
    wait: &WaitPolicy,
) -> Result<RollbackStackResult, ToolkitError> {
    options.check()?;
    let stack_name = options.stack.stack_name.as_str();

    for attempt in 1..=MAX_ROLLBACK_ATTEMPTS {
        let current = CloudFormationStack::lookup(Arc::clone(&cfn), stack_name, false).await?;
        let status = current.stack_status();

        match status.rollback_choice() {
            RollbackChoice::None => {
                tracing::warn!(
                    stack = stack_name,
                    "Stack {stack_name} does not need a rollback: {status}"
                );
                return Ok(RollbackStackResult::not_rollbackable());
            }
            RollbackChoice::RollbackFailed => {
                tracing::warn!(
                    stack = stack_name,
                    "Stack {} failed creation and rollback. This state cannot be rolled back. \
                     You can recreate this stack by running 'cdk deploy'.",
                    stack_name
                );
                return Ok(RollbackStackResult::not_rollbackable());
            }
            RollbackChoice::StartRollback => {
                tracing::info!(
                    stack = stack_name,
                    attempt,
                    "Initiating rollback of stack {stack_name}"
                );
                cfn.rollback_stack(RollbackStackRequest {
                    stack_name: stack_name.to_string(),
                    role_arn: options.role_arn.clone(),
                    client_request_token: Some(Uuid::new_v4().to_string()),
                    retain_except_on_create: true,
                })
                .await?;
            }
            RollbackChoice::ContinueUpdateRollback => {
                let resources_to_skip = if options.orphan_failed_resources {
                    let cfn = Arc::clone(&cfn);
                    failed_resources_since(cfn, stack_name, ROLLBACK_START_STATUSES).await?
                } else {
                    options.orphan_logical_ids.clone()
                };
                if !resources_to_skip.is_empty() {
                    tracing::warn!(
                        stack = stack_name,
                        "Continuing rollback of stack {} (orphaning: {})",
                        stack_name,
                        resources_to_skip.join(", ")
                    );
                } else {
                    tracing::info!(
                        stack = stack_name,
                        attempt,
                        "Continuing rollback of stack {stack_name}"
                    );
                }
                cfn.continue_update_rollback(ContinueUpdateRollbackRequest {
                    stack_name: stack_name.to_string(),
                    role_arn: options.role_arn.clone(),
                    resources_to_skip,
                    client_request_token: Some(Uuid::new_v4().to_string()),
                })
                .await?;
            }
        }

        let Some(settled) = stabilize_stack(Arc::clone(&cfn), stack_name, wait).await? else {
            return Err(ToolkitError::Internal(format!(
                "Stack {stack_name} disappeared while rolling back"
            )));
        };
        let status = settled.stack_status();

        if status.is_rollback_success() {
            return Ok(RollbackStackResult::succeeded());
        }
        if status.rollback_choice() == RollbackChoice::ContinueUpdateRollback
            && options.orphan_failed_resources
        {
            tracing::debug!(stack = stack_name, %status, "rollback failed again, retrying");
            continue;
        }
        if status.is_failure() {
            return Err(ToolkitError::StackFailed {
                stack_name: stack_name.to_string(),
                operation: "to roll back",
                status: status.to_string(),
            });
        }
        return Ok(RollbackStackResult::succeeded());
    }

    let status = CloudFormationStack::lookup(cfn, stack_name, false)
        .await?
        .stack_status()
        .to_string();
    Err(ToolkitError::RollbackStalled {
        stack_name: stack_name.to_string(),
        attempts: MAX_ROLLBACK_ATTEMPTS,
        status,
    })
}
