//! engine::toolkit_info
//!
//! What is known about an environment's bootstrap stack.
//!
//! A lookup never fails outright: a missing stack, a stack whose creation
//! failed and a lookup that errored are all values of [`ToolkitInfo`].
//! Accessors that need a usable stack return an error describing why there
//! is none.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::ToolkitError;
use super::stack::{stabilize_stack, CloudFormationStack, WaitPolicy};
use crate::cloud::CloudFormation;
use crate::core::template::{
    BOOTSTRAP_VARIANT_PARAMETER, BOOTSTRAP_VERSION_OUTPUT, DEFAULT_BOOTSTRAP_VARIANT,
};

pub const BUCKET_NAME_OUTPUT: &str = "BucketName";
pub const BUCKET_DOMAIN_NAME_OUTPUT: &str = "BucketDomainName";

/// The bootstrap stack of an environment, or why there is none.
#[derive(Debug)]
pub enum ToolkitInfo {
    Found(CloudFormationStack),
    NotFound { stack_name: String },
    LookupError { stack_name: String, message: String },
}

impl ToolkitInfo {
    /// Look up `stack_name`, waiting for any operation in progress.
    ///
    /// A stack whose creation failed counts as not found.
    pub async fn lookup(
        cfn: Arc<dyn CloudFormation>,
        stack_name: &str,
        policy: &WaitPolicy,
    ) -> Result<Self, ToolkitError> {
        let Some(stack) = stabilize_stack(cfn, stack_name, policy).await? else {
            tracing::debug!(stack = stack_name, "bootstrap stack not found");
            return Ok(ToolkitInfo::NotFound {
                stack_name: stack_name.to_string(),
            });
        };

        let status = stack.stack_status();
        if status.is_creation_failure() {
            tracing::debug!(
                stack = stack_name,
                %status,
                "bootstrap stack failed to create, treating it as absent"
            );
            return Ok(ToolkitInfo::NotFound {
                stack_name: stack_name.to_string(),
            });
        }

        Ok(ToolkitInfo::Found(stack))
    }

    /// Like [`lookup`](Self::lookup), but errors become [`ToolkitInfo::LookupError`].
    pub async fn lookup_or_error(
        cfn: Arc<dyn CloudFormation>,
        stack_name: &str,
        policy: &WaitPolicy,
    ) -> Self {
        match Self::lookup(cfn, stack_name, policy).await {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(stack = stack_name, error = %e, "bootstrap stack lookup failed");
                ToolkitInfo::LookupError {
                    stack_name: stack_name.to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    pub fn found(&self) -> bool {
        matches!(self, ToolkitInfo::Found(_))
    }

    pub fn stack_name(&self) -> &str {
        match self {
            ToolkitInfo::Found(stack) => stack.stack_name(),
            ToolkitInfo::NotFound { stack_name }
            | ToolkitInfo::LookupError { stack_name, .. } => stack_name,
        }
    }

    /// The deployed stack.
    pub fn stack(&self) -> Result<&CloudFormationStack, ToolkitError> {
        let message = match self {
            ToolkitInfo::Found(stack) => return Ok(stack),
            ToolkitInfo::NotFound { stack_name } => format!(
                "The CDK toolkit stack ('{stack_name}') is not installed in this environment. \
                 Run 'cdk bootstrap' to set it up."
            ),
            ToolkitInfo::LookupError {
                stack_name,
                message,
            } => format!("Could not look up the CDK toolkit stack ('{stack_name}'): {message}"),
        };
        Err(ToolkitError::BootstrapStackNotFound { message })
    }

    /// Version from the `BootstrapVersion` output, 0 when absent.
    pub fn version(&self) -> u32 {
        let ToolkitInfo::Found(stack) = self else {
            return 0;
        };
        match stack.outputs().get(BOOTSTRAP_VERSION_OUTPUT) {
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                let stack = stack.stack_name();
                tracing::debug!(stack, %value, "non-numeric bootstrap version output");
                0
            }),
            None => 0,
        }
    }

    pub fn variant(&self) -> String {
        match self {
            ToolkitInfo::Found(stack) => stack
                .parameters()
                .get(BOOTSTRAP_VARIANT_PARAMETER)
                .cloned()
                .unwrap_or_else(|| DEFAULT_BOOTSTRAP_VARIANT.to_string()),
            _ => DEFAULT_BOOTSTRAP_VARIANT.to_string(),
        }
    }

    pub fn parameters(&self) -> BTreeMap<String, String> {
        match self {
            ToolkitInfo::Found(stack) => stack.parameters(),
            _ => BTreeMap::new(),
        }
    }

    pub fn termination_protection(&self) -> bool {
        match self {
            ToolkitInfo::Found(stack) => stack.termination_protection(),
            _ => false,
        }
    }

    pub fn bucket_name(&self) -> Result<String, ToolkitError> {
        self.required_output(BUCKET_NAME_OUTPUT)
    }

    pub fn bucket_url(&self) -> Result<String, ToolkitError> {
        let domain = self.required_output(BUCKET_DOMAIN_NAME_OUTPUT)?;
        Ok(format!("https://{domain}"))
    }

    fn required_output(&self, output: &str) -> Result<String, ToolkitError> {
        let stack = self.stack()?;
        stack
            .outputs()
            .get(output)
            .cloned()
            .ok_or_else(|| ToolkitError::MissingOutput {
                stack_name: stack.stack_name().to_string(),
                output: output.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::mock::{CfnOp, MockCloudFormation, MockStack};
    use crate::cloud::CloudError;

    async fn lookup(mock: &MockCloudFormation) -> ToolkitInfo {
        let cfn = Arc::new(mock.clone());
        ToolkitInfo::lookup_or_error(cfn, "CDKToolkit", &WaitPolicy::immediate()).await
    }

    #[tokio::test]
    async fn found_stack_exposes_outputs() {
        let mock = MockCloudFormation::new().with_stack(
            MockStack::new("CDKToolkit", "UPDATE_COMPLETE")
                .with_output("BootstrapVersion", "21")
                .with_output("BucketName", "cdk-assets")
                .with_output("BucketDomainName", "cdk-assets.s3.amazonaws.com")
                .with_parameter("BootstrapVariant", "JoeSchmoe")
                .with_termination_protection(true),
        );
        let info = lookup(&mock).await;

        assert!(info.found());
        assert_eq!(info.version(), 21);
        assert_eq!(info.variant(), "JoeSchmoe");
        assert!(info.termination_protection());
        assert_eq!(info.bucket_name().unwrap(), "cdk-assets");
        assert_eq!(
            info.bucket_url().unwrap(),
            "https://cdk-assets.s3.amazonaws.com"
        );
    }

    #[tokio::test]
    async fn missing_stack_has_version_zero_and_default_variant() {
        let info = lookup(&MockCloudFormation::new()).await;

        assert!(!info.found());
        assert_eq!(info.version(), 0);
        assert_eq!(info.variant(), DEFAULT_BOOTSTRAP_VARIANT);
        assert!(matches!(
            info.bucket_name(),
            Err(ToolkitError::BootstrapStackNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failed_creation_counts_as_missing() {
        let existing =
            MockStack::new("CDKToolkit", "ROLLBACK_COMPLETE").with_output("BootstrapVersion", "5");
        let mock = MockCloudFormation::new().with_stack(existing);
        assert!(!lookup(&mock).await.found());
    }

    #[tokio::test]
    async fn lookup_failure_is_captured() {
        let denied = CloudError::AccessDenied("denied".into());
        let mock = MockCloudFormation::new().fail_on(CfnOp::DescribeStacks, denied);

        let info = lookup(&mock).await;
        assert!(matches!(info, ToolkitInfo::LookupError { .. }));
        assert!(info.bucket_name().unwrap_err().to_string().contains("denied"));
    }

    #[tokio::test]
    async fn missing_output_is_named() {
        let existing = MockStack::new("CDKToolkit", "CREATE_COMPLETE");
        let mock = MockCloudFormation::new().with_stack(existing);
        let err = lookup(&mock).await.bucket_name().unwrap_err();
        let ToolkitError::MissingOutput { output, .. } = err else {
            panic!("expected a missing output error, got {err:?}");
        };
        assert_eq!(output, "BucketName");
    }
}
