//! engine::events
//!
//! Reading a stack's event history.

use std::sync::Arc;

use super::error::ToolkitError;
use crate::cloud::{CloudFormation, StackEvent};

/// Stack statuses that open a rollback.
pub const ROLLBACK_START_STATUSES: &[&str] =
    &["ROLLBACK_IN_PROGRESS", "UPDATE_ROLLBACK_IN_PROGRESS"];

const RESOURCE_FAILED_STATUS: &str = "UPDATE_FAILED";

/// Whether `event` is about the stack itself rather than one of its resources.
pub fn is_stack_event(event: &StackEvent) -> bool {
    event.logical_resource_id.as_deref() == Some(event.stack_name.as_str())
        || event.physical_resource_id.as_deref() == Some(event.stack_id.as_str())
}

/// Stack statuses that open a deployment.
pub const DEPLOY_START_STATUSES: &[&str] = &[
    "CREATE_IN_PROGRESS",
    "UPDATE_IN_PROGRESS",
    "IMPORT_IN_PROGRESS",
];

/// Resource events since the stack last entered one of `since_statuses`,
/// newest first.
///
/// Reads events back in time, one page at a time, until the stack event
/// with one of those statuses or the start of the history.
async fn resource_events_since(
    cfn: Arc<dyn CloudFormation>,
    stack_name: &str,
    since_statuses: &[&str],
) -> Result<Vec<StackEvent>, ToolkitError> {
    let mut events = Vec::new();
    let mut next_token = None;

    loop {
        let page = cfn.describe_stack_events(stack_name, next_token).await?;

        for event in page.events {
            if is_stack_event(&event) {
                let status = event.resource_status.as_deref().unwrap_or_default();
                if since_statuses.contains(&status) {
                    tracing::debug!(stack = stack_name, status, "reached start of operation");
                    return Ok(events);
                }
                continue;
            }
            events.push(event);
        }

        match page.next_token {
            Some(token) => next_token = Some(token),
            None => return Ok(events),
        }
    }
}

/// Logical ids of resources that failed to update since the stack last
/// entered one of `since_statuses`, newest first and without duplicates.
pub async fn failed_resources_since(
    cfn: Arc<dyn CloudFormation>,
    stack_name: &str,
    since_statuses: &[&str],
) -> Result<Vec<String>, ToolkitError> {
    let mut failed: Vec<String> = Vec::new();
    for event in resource_events_since(cfn, stack_name, since_statuses).await? {
        if event.resource_status.as_deref() != Some(RESOURCE_FAILED_STATUS) {
            continue;
        }
        if let Some(logical_id) = event.logical_resource_id {
            if !failed.contains(&logical_id) {
                failed.push(logical_id);
            }
        }
    }
    Ok(failed)
}

/// Resource events with any failed status since the stack last entered one
/// of `since_statuses`, newest first.
pub async fn resource_failures_since(
    cfn: Arc<dyn CloudFormation>,
    stack_name: &str,
    since_statuses: &[&str],
) -> Result<Vec<StackEvent>, ToolkitError> {
    let events = resource_events_since(cfn, stack_name, since_statuses).await?;
    Ok(events
        .into_iter()
        .filter(|event| {
            event
                .resource_status
                .as_deref()
                .is_some_and(|status| status.ends_with("_FAILED"))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::mock::{MockCloudFormation, MockStack};

    const STACK_TYPE: &str = "AWS::CloudFormation::Stack";

    #[tokio::test]
    async fn stops_at_rollback_start() {
        let stack = MockStack::new("S", "UPDATE_ROLLBACK_FAILED")
            .with_event("Old", "AWS::SQS::Queue", "UPDATE_FAILED")
            .with_event("S", STACK_TYPE, "UPDATE_ROLLBACK_IN_PROGRESS")
            .with_event("Xyz", "AWS::Lambda::Function", "UPDATE_FAILED")
            .with_event("Abc", "AWS::SQS::Queue", "UPDATE_COMPLETE")
            .with_event("Xyz", "AWS::Lambda::Function", "UPDATE_FAILED")
            .with_event("S", STACK_TYPE, "UPDATE_ROLLBACK_FAILED");
        let cfn = MockCloudFormation::new()
            .with_stack(stack)
            .with_events_page_size(2);

        let failed = failed_resources_since(Arc::new(cfn), "S", ROLLBACK_START_STATUSES)
            .await
            .unwrap();
        assert_eq!(failed, ["Xyz"]);
    }

    #[tokio::test]
    async fn reads_whole_history_without_rollback_start() {
        let stack = MockStack::new("S", "UPDATE_ROLLBACK_FAILED")
            .with_event("A", "AWS::SQS::Queue", "UPDATE_FAILED")
            .with_event("B", "AWS::SQS::Queue", "UPDATE_FAILED");
        let cfn = MockCloudFormation::new()
            .with_stack(stack)
            .with_events_page_size(1);

        let failed = failed_resources_since(Arc::new(cfn), "S", ROLLBACK_START_STATUSES)
            .await
            .unwrap();
        assert_eq!(failed, ["B", "A"]);
    }

    #[tokio::test]
    async fn failures_of_any_kind_since_deploy_start() {
        let stack = MockStack::new("S", "ROLLBACK_COMPLETE")
            .with_event("Old", "AWS::SQS::Queue", "CREATE_FAILED")
            .with_event("S", STACK_TYPE, "CREATE_IN_PROGRESS")
            .with_event("Queue", "AWS::SQS::Queue", "CREATE_COMPLETE")
            .with_event("Topic", "AWS::SNS::Topic", "CREATE_FAILED")
            .with_event("Queue", "AWS::SQS::Queue", "DELETE_FAILED");
        let cfn = MockCloudFormation::new()
            .with_stack(stack)
            .with_events_page_size(2);

        let failures = resource_failures_since(Arc::new(cfn), "S", DEPLOY_START_STATUSES)
            .await
            .unwrap();
        let ids: Vec<_> = failures
            .iter()
            .filter_map(|e| e.logical_resource_id.as_deref())
            .collect();
        assert_eq!(ids, ["Queue", "Topic"]);
    }
}
