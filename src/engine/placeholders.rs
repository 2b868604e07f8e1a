//! engine::placeholders
//!
//! Substitution of environment placeholders in role ARNs and similar strings.
//!
//! Synthesized artifacts refer to the target account, region and partition
//! through `${AWS::AccountId}`, `${AWS::Region}` and `${AWS::Partition}`.
//! These are replaced once the environment is resolved. The partition is
//! only looked up when a string actually contains its placeholder.

use std::future::Future;

use super::error::ToolkitError;
use crate::core::types::Environment;

pub const CURRENT_ACCOUNT: &str = "${AWS::AccountId}";
pub const CURRENT_REGION: &str = "${AWS::Region}";
pub const CURRENT_PARTITION: &str = "${AWS::Partition}";

/// Whether `value` contains any environment placeholder.
pub fn has_placeholders(value: &str) -> bool {
    [CURRENT_ACCOUNT, CURRENT_REGION, CURRENT_PARTITION]
        .iter()
        .any(|p| value.contains(p))
}

/// Replace environment placeholders in `value`.
///
/// `partition` is called at most once, and only if the partition
/// placeholder appears.
pub async fn replace_env_placeholders<F, Fut>(
    value: &str,
    environment: &Environment,
    partition: F,
) -> Result<String, ToolkitError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String, ToolkitError>>,
{
    let mut result = value
        .replace(CURRENT_ACCOUNT, &environment.account)
        .replace(CURRENT_REGION, &environment.region);

    if result.contains(CURRENT_PARTITION) {
        let partition = partition().await?;
        result = result.replace(CURRENT_PARTITION, &partition);
    }

    Ok(result)
}

/// Replace placeholders in an optional value.
pub async fn replace_optional<F, Fut>(
    value: Option<&str>,
    environment: &Environment,
    partition: F,
) -> Result<Option<String>, ToolkitError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String, ToolkitError>>,
{
    match value {
        Some(v) => Ok(Some(replace_env_placeholders(v, environment, partition).await?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn replaces_account_region_and_partition() {
        let env = Environment::new("123456789012", "eu-west-1");
        let arn = "arn:${AWS::Partition}:iam::${AWS::AccountId}:role/cdk-deploy-${AWS::Region}";

        let replaced = replace_env_placeholders(arn, &env, || async { Ok("aws-cn".to_string()) })
            .await
            .unwrap();
        let expected = "arn:aws-cn:iam::123456789012:role/cdk-deploy-eu-west-1";
        assert_eq!(replaced, expected);
        assert!(!has_placeholders(&replaced));
    }

    #[tokio::test]
    async fn partition_only_resolved_when_needed() {
        let env = Environment::new("1", "r");
        let calls = AtomicUsize::new(0);

        let replaced = replace_env_placeholders("${AWS::AccountId}-x", &env, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("aws".to_string())
        })
        .await
        .unwrap();

        assert_eq!(replaced, "1-x");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn optional_none_stays_none() {
        let env = Environment::new("1", "r");
        let replaced = replace_optional(None, &env, || async { Ok("aws".to_string()) })
            .await
            .unwrap();
        assert!(replaced.is_none());
    }
}
