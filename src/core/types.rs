//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Environment`] - Target account/region pair (`aws://ACCOUNT/REGION`)
//! - [`Mode`] - Whether credentials are needed for reading or writing
//! - [`Tag`] - Stack tag key/value pair
//! - [`Account`] - Account id and partition discovered for a set of credentials
//!
//! # Validation
//!
//! Environments are validated at parse time. Invalid values cannot be
//! represented, so the orchestration layers never see a malformed target.
//!
//! # Examples
//!
//! ```
//! use stackshift::core::types::Environment;
//!
//! let env = Environment::parse("aws://123456789012/eu-west-1").unwrap();
//! assert_eq!(env.account, "123456789012");
//! assert_eq!(env.region, "eu-west-1");
//! assert_eq!(env.name, "aws://123456789012/eu-west-1");
//!
//! assert!(Environment::parse("123456789012/eu-west-1").is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker used in place of an account that must be resolved from credentials.
pub const UNKNOWN_ACCOUNT: &str = "unknown-account";

/// Marker used in place of a region that must be resolved from configuration.
pub const UNKNOWN_REGION: &str = "unknown-region";

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("invalid ARN: {0}")]
    InvalidArn(String),
}

/// A deployment target: one account in one region.
///
/// The `name` is the canonical `aws://ACCOUNT/REGION` form and is what
/// users see in messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    /// Account id, or [`UNKNOWN_ACCOUNT`]
    pub account: String,
    /// Region, or [`UNKNOWN_REGION`]
    pub region: String,
    /// Display name (`aws://ACCOUNT/REGION`)
    pub name: String,
}

impl Environment {
    /// Create an environment from an account and region.
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        let account = account.into();
        let region = region.into();
        let name = format!("aws://{}/{}", account, region);
        Self {
            account,
            region,
            name,
        }
    }

    /// An environment whose account and region are both resolved at deploy time.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_ACCOUNT, UNKNOWN_REGION)
    }

    /// Parse an `aws://ACCOUNT/REGION` string.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidEnvironment` if the scheme is missing or
    /// either component is empty.
    pub fn parse(value: &str) -> Result<Self, TypeError> {
        let rest = value.strip_prefix("aws://").ok_or_else(|| {
            TypeError::InvalidEnvironment(format!(
                "'{}' must be of the form aws://ACCOUNT/REGION",
                value
            ))
        })?;

        let (account, region) = rest.split_once('/').ok_or_else(|| {
            TypeError::InvalidEnvironment(format!("'{}' is missing a region", value))
        })?;

        if account.is_empty() || region.is_empty() || region.contains('/') {
            return Err(TypeError::InvalidEnvironment(format!(
                "'{}' must be of the form aws://ACCOUNT/REGION",
                value
            )));
        }

        Ok(Self::new(account, region))
    }

    /// Whether the account still needs to be resolved.
    pub fn is_account_unknown(&self) -> bool {
        self.account == UNKNOWN_ACCOUNT
    }

    /// Whether the region still needs to be resolved.
    pub fn is_region_unknown(&self) -> bool {
        self.region == UNKNOWN_REGION
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// What the credentials will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Read-only calls (lookups, diffs, existence checks)
    ForReading,
    /// Mutating calls (deploy, rollback, destroy)
    ForWriting,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::ForReading => write!(f, "for-reading"),
            Mode::ForWriting => write!(f, "for-writing"),
        }
    }
}

/// A stack tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Compare two tag sets ignoring order.
///
/// Two sets are equal when they have the same length and every key in `a`
/// maps to the same value in `b`.
pub fn tags_equal(a: &[Tag], b: &[Tag]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|a_tag| {
        b.iter()
            .find(|b_tag| b_tag.key == a_tag.key)
            .is_some_and(|b_tag| b_tag.value == a_tag.value)
    })
}

/// Account information discovered for a set of credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Account {
    /// 12-digit account id
    pub account_id: String,
    /// Partition (`aws`, `aws-cn`, `aws-us-gov`, ...)
    pub partition: String,
}

impl Account {
    pub fn new(account_id: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            partition: partition.into(),
        }
    }
}

/// Extract the stack name from a CloudFormation stack ARN.
///
/// Stack ARNs have the form
/// `arn:aws:cloudformation:REGION:ACCOUNT:stack/NAME/UUID`; the name sits
/// between the first and last `/`.
///
/// # Errors
///
/// Returns `TypeError::InvalidArn` if the ARN does not contain a
/// `stack/NAME/ID` suffix.
///
/// # Example
///
/// ```
/// use stackshift::core::types::stack_name_from_arn;
///
/// let arn = "arn:aws:cloudformation:us-east-1:123456789012:stack/Parent-Child-1AB2/abc-123";
/// assert_eq!(stack_name_from_arn(arn).unwrap(), "Parent-Child-1AB2");
/// ```
pub fn stack_name_from_arn(arn: &str) -> Result<&str, TypeError> {
    match (arn.find('/'), arn.rfind('/')) {
        (Some(first), Some(last)) if last > first + 1 => Ok(&arn[first + 1..last]),
        _ => Err(TypeError::InvalidArn(arn.to_string())),
    }
}
