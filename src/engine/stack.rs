//! engine::stack
//!
//! Read view of a deployed stack and the waiters that poll it.
//!
//! # Design
//!
//! [`CloudFormationStack`] is a snapshot taken by one describe-stacks call.
//! A stack that does not exist is represented by the same type with every
//! accessor returning an empty value, so callers branch on
//! [`CloudFormationStack::exists`] instead of on errors.
//!
//! The waiters poll at the interval a [`WaitPolicy`] gives them and give
//! up with [`ToolkitError::WaitTimeout`] once its timeout has passed. There
//! is no timeout by default.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;

use super::error::ToolkitError;
use crate::cloud::{ChangeSetDescription, CloudFormation, StackDescription, TemplateStage};
use crate::core::config::Config;
use crate::core::status::StackStatus;
use crate::core::template::Template;
use crate::core::types::Tag;

/// Status reasons that mean a change set is empty.
const NO_CHANGE_REASON_PREFIXES: &[&str] = &[
    "The submitted information didn't contain changes.",
    "No updates are to be performed.",
];

/// How long and how often to poll the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    /// Unbounded when `None`
    pub timeout: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: None,
        }
    }
}

impl WaitPolicy {
    /// Poll without sleeping.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            timeout: config.wait_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sleep until the next poll, or fail if the timeout has passed.
    async fn pause(
        &self,
        started: Instant,
        what: impl FnOnce() -> String,
    ) -> Result<(), ToolkitError> {
        if let Some(timeout) = self.timeout {
            if started.elapsed() >= timeout {
                return Err(ToolkitError::WaitTimeout(what()));
            }
        }
        if self.poll_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }
}

/// A snapshot of a deployed stack (or of its absence).
pub struct CloudFormationStack {
    cfn: Arc<dyn CloudFormation>,
    stack_name: String,
    stack: Option<StackDescription>,
    retrieve_processed_template: bool,
    template: OnceCell<Template>,
}

impl fmt::Debug for CloudFormationStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudFormationStack")
            .field("stack_name", &self.stack_name)
            .field("stack", &self.stack)
            .finish()
    }
}

impl CloudFormationStack {
    /// Describe `stack_name`.
    ///
    /// A stack that does not exist is not an error.
    pub async fn lookup(
        cfn: Arc<dyn CloudFormation>,
        stack_name: &str,
        retrieve_processed_template: bool,
    ) -> Result<Self, ToolkitError> {
        let stack = match cfn.describe_stacks(stack_name).await {
            Ok(stacks) => stacks.into_iter().next(),
            Err(e) if e.is_stack_not_found(stack_name) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            cfn,
            stack_name: stack_name.to_string(),
            stack,
            retrieve_processed_template,
            template: OnceCell::new(),
        })
    }

    /// A handle for a stack known not to exist.
    pub fn does_not_exist(cfn: Arc<dyn CloudFormation>, stack_name: &str) -> Self {
        Self {
            cfn,
            stack_name: stack_name.to_string(),
            stack: None,
            retrieve_processed_template: false,
            template: OnceCell::new(),
        }
    }

    pub fn exists(&self) -> bool {
        self.stack.is_some()
    }

    pub fn stack_name(&self) -> &str {
        self.stack
            .as_ref()
            .map(|s| s.stack_name.as_str())
            .unwrap_or(&self.stack_name)
    }

    /// The stack's ARN.
    ///
    /// # Errors
    ///
    /// Fails if the stack does not exist.
    pub fn stack_id(&self) -> Result<&str, ToolkitError> {
        self.stack
            .as_ref()
            .map(|s| s.stack_id.as_str())
            .ok_or_else(|| {
                ToolkitError::Internal(format!(
                    "Cannot retrieve the id of nonexistent stack {}",
                    self.stack_name
                ))
            })
    }

    /// The deployed template; empty if the stack does not exist.
    ///
    /// Fetched once and cached.
    pub async fn template(&self) -> Result<Template, ToolkitError> {
        if !self.exists() {
            return Ok(Template::new());
        }
        let stage = if self.retrieve_processed_template {
            TemplateStage::Processed
        } else {
            TemplateStage::Original
        };
        let template = self
            .template
            .get_or_try_init(|| async {
                let body = self.cfn.get_template(self.stack_name(), stage).await?;
                Ok::<_, ToolkitError>(Template::parse(&body)?)
            })
            .await?;
        Ok(template.clone())
    }

    /// Stack outputs by key.
    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.stack
            .iter()
            .flat_map(|s| s.outputs.iter())
            .filter_map(|o| Some((o.output_key.clone(), o.output_value.clone()?)))
            .collect()
    }

    /// Current parameter values, preferring the resolved value of SSM parameters.
    pub fn parameters(&self) -> BTreeMap<String, String> {
        self.stack
            .iter()
            .flat_map(|s| s.parameters.iter())
            .filter_map(|p| {
                let value = p.resolved_value.as_ref().or(p.parameter_value.as_ref())?;
                Some((p.parameter_key.clone(), value.clone()))
            })
            .collect()
    }

    pub fn tags(&self) -> &[Tag] {
        self.stack
            .as_ref()
            .map(|s| s.tags.as_slice())
            .unwrap_or(&[])
    }

    pub fn notification_arns(&self) -> &[String] {
        self.stack
            .as_ref()
            .map(|s| s.notification_arns.as_slice())
            .unwrap_or(&[])
    }

    pub fn termination_protection(&self) -> bool {
        self.stack
            .as_ref()
            .is_some_and(|s| s.enable_termination_protection)
    }

    /// Current status, or the `NOT_FOUND` sentinel.
    pub fn stack_status(&self) -> StackStatus {
        match &self.stack {
            Some(s) => StackStatus::new(s.stack_status.clone(), s.stack_status_reason.clone()),
            None => StackStatus::not_found(),
        }
    }
}

/// Whether a change set failed only because it contained nothing.
pub fn change_set_has_no_changes(description: &ChangeSetDescription) -> bool {
    let reason = description.status_reason.as_deref().unwrap_or_default();
    description.status == "FAILED"
        && NO_CHANGE_REASON_PREFIXES
            .iter()
            .any(|prefix| reason.starts_with(prefix))
}

/// Wait until no operation is in progress on the stack.
///
/// Returns `None` if the stack does not exist. `REVIEW_IN_PROGRESS` counts
/// as stable: a change set that was never executed will not resolve on its
/// own.
pub async fn stabilize_stack(
    cfn: Arc<dyn CloudFormation>,
    stack_name: &str,
    policy: &WaitPolicy,
) -> Result<Option<CloudFormationStack>, ToolkitError> {
    let started = Instant::now();
    loop {
        let stack = CloudFormationStack::lookup(Arc::clone(&cfn), stack_name, false).await?;
        if !stack.exists() {
            return Ok(None);
        }

        let status = stack.stack_status();
        if status.is_in_progress() {
            tracing::debug!(stack = stack_name, %status, "operation in progress, waiting");
            policy
                .pause(started, || format!("stack {stack_name} to stabilize"))
                .await?;
            continue;
        }
        if status.is_review_in_progress() {
            tracing::debug!(
                stack = stack_name,
                "stack is in REVIEW_IN_PROGRESS, treating as stable"
            );
        }
        return Ok(Some(stack));
    }
}

/// Wait for a deployment to finish.
///
/// # Errors
///
/// Fails if the stack ends in anything but a deploy success status.
pub async fn wait_for_stack_deploy(
    cfn: Arc<dyn CloudFormation>,
    stack_name: &str,
    policy: &WaitPolicy,
) -> Result<Option<CloudFormationStack>, ToolkitError> {
    let Some(stack) = stabilize_stack(cfn, stack_name, policy).await? else {
        return Ok(None);
    };

    let status = stack.stack_status();
    if status.is_creation_failure() {
        return Err(ToolkitError::StackFailed {
            stack_name: stack_name.to_string(),
            operation: "creation, it may need to be manually deleted from the AWS console",
            status: status.to_string(),
        });
    }
    if !status.is_deploy_success() {
        return Err(ToolkitError::StackFailed {
            stack_name: stack_name.to_string(),
            operation: "to deploy",
            status: status.to_string(),
        });
    }
    Ok(Some(stack))
}

/// Wait for a deletion to finish.
///
/// Returns `None` once the stack is gone.
pub async fn wait_for_stack_delete(
    cfn: Arc<dyn CloudFormation>,
    stack_name: &str,
    policy: &WaitPolicy,
) -> Result<Option<CloudFormationStack>, ToolkitError> {
    let Some(stack) = stabilize_stack(cfn, stack_name, policy).await? else {
        return Ok(None);
    };

    let status = stack.stack_status();
    if status.is_failure() {
        return Err(ToolkitError::StackFailed {
            stack_name: stack_name.to_string(),
            operation: "to delete, you may need to delete it from the AWS console",
            status: status.to_string(),
        });
    }
    if status.is_deleted() {
        return Ok(None);
    }
    Ok(Some(stack))
}

/// Wait for a change set to finish computing.
///
/// An empty change set is returned rather than treated as a failure.
pub async fn wait_for_change_set(
    cfn: Arc<dyn CloudFormation>,
    stack_name: &str,
    change_set_name: &str,
    policy: &WaitPolicy,
) -> Result<ChangeSetDescription, ToolkitError> {
    let started = Instant::now();
    loop {
        let description = cfn.describe_change_set(stack_name, change_set_name).await?;
        match description.status.as_str() {
            "CREATE_PENDING" | "CREATE_IN_PROGRESS" => {
                tracing::debug!(
                    stack = stack_name,
                    change_set = change_set_name,
                    "change set not ready"
                );
                let what = || format!("change set {change_set_name} on {stack_name}");
                policy.pause(started, what).await?;
            }
            "CREATE_COMPLETE" => return Ok(description),
            _ if change_set_has_no_changes(&description) => return Ok(description),
            status => {
                return Err(ToolkitError::ChangeSet {
                    change_set_name: change_set_name.to_string(),
                    stack_name: stack_name.to_string(),
                    status: if status.is_empty() { "NO_STATUS" } else { status }.to_string(),
                    reason: description
                        .status_reason
                        .clone()
                        .unwrap_or_else(|| "no reason provided".to_string()),
                })
            }
        }
    }
}
