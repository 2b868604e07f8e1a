//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Global Config
//!
//! Located at (in order of precedence):
//! 1. `$STACKSHIFT_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/stackshift/config.toml`
//! 3. `~/.stackshift/config.toml` (canonical write location)
//!
//! # Project Config
//!
//! Located at `<project>/stackshift.toml`.
//!
//! # Validation
//!
//! Config values are validated after parsing so that a typo in a
//! deployment method or a zero poll interval fails at load time rather than
//! in the middle of a deployment.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Valid values for `deployment_method`.
pub const DEPLOYMENT_METHODS: &[&str] = &["change-set", "direct"];

/// Settings shared by the global and project scopes.
///
/// # Example
///
/// ```toml
/// toolkit_stack_name = "CDKToolkit"
/// deployment_method = "change-set"
/// rollback = true
/// use_previous_parameters = true
/// ci = false
///
/// [wait]
/// poll_interval_ms = 5000
/// timeout_secs = 3600
///
/// [bootstrap]
/// qualifier = "hnb659fds"
/// trust = ["222222222222"]
/// cloudformation_execution_policies = ["arn:aws:iam::aws:policy/AdministratorAccess"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Name of the bootstrap stack
    pub toolkit_stack_name: Option<String>,

    /// Default deployment method ("change-set" or "direct")
    pub deployment_method: Option<String>,

    /// Roll back failed deployments automatically
    pub rollback: Option<bool>,

    /// Keep previous parameter values that are not supplied again
    pub use_previous_parameters: Option<bool>,

    /// Non-interactive (CI) output
    pub ci: Option<bool>,

    /// Polling behavior while waiting for the service
    pub wait: Option<WaitConfig>,

    /// Bootstrap defaults
    pub bootstrap: Option<BootstrapConfig>,
}

impl ConfigFile {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(method) = &self.deployment_method {
            if !DEPLOYMENT_METHODS.contains(&method.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid deployment_method '{}', must be one of: {}",
                    method,
                    DEPLOYMENT_METHODS.join(", ")
                )));
            }
        }

        if let Some(name) = &self.toolkit_stack_name {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "toolkit_stack_name cannot be empty".into(),
                ));
            }
        }

        if let Some(wait) = &self.wait {
            wait.validate()?;
        }

        Ok(())
    }

    /// Overlay `other` on top of `self`; values set in `other` win.
    pub fn merged_with(&self, other: &ConfigFile) -> ConfigFile {
        ConfigFile {
            toolkit_stack_name: other
                .toolkit_stack_name
                .clone()
                .or_else(|| self.toolkit_stack_name.clone()),
            deployment_method: other
                .deployment_method
                .clone()
                .or_else(|| self.deployment_method.clone()),
            rollback: other.rollback.or(self.rollback),
            use_previous_parameters: other
                .use_previous_parameters
                .or(self.use_previous_parameters),
            ci: other.ci.or(self.ci),
            wait: match (&self.wait, &other.wait) {
                (Some(base), Some(over)) => Some(WaitConfig {
                    poll_interval_ms: over.poll_interval_ms.or(base.poll_interval_ms),
                    timeout_secs: over.timeout_secs.or(base.timeout_secs),
                }),
                (base, over) => over.clone().or_else(|| base.clone()),
            },
            bootstrap: match (&self.bootstrap, &other.bootstrap) {
                (Some(base), Some(over)) => Some(base.merged_with(over)),
                (base, over) => over.clone().or_else(|| base.clone()),
            },
        }
    }
}

/// Polling configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WaitConfig {
    /// Delay between status polls
    pub poll_interval_ms: Option<u64>,
    /// Give up after this long (unbounded when unset)
    pub timeout_secs: Option<u64>,
}

impl WaitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == Some(0) {
            return Err(ConfigError::InvalidValue(
                "wait.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "wait.timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Bootstrap defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    pub qualifier: Option<String>,
    /// Accounts trusted to deploy into the environment
    pub trust: Option<Vec<String>>,
    /// Accounts trusted to look up values in the environment
    pub trust_for_lookup: Option<Vec<String>>,
    pub cloudformation_execution_policies: Option<Vec<String>>,
    pub termination_protection: Option<bool>,
}

impl BootstrapConfig {
    fn merged_with(&self, other: &BootstrapConfig) -> BootstrapConfig {
        BootstrapConfig {
            qualifier: other.qualifier.clone().or_else(|| self.qualifier.clone()),
            trust: other.trust.clone().or_else(|| self.trust.clone()),
            trust_for_lookup: other
                .trust_for_lookup
                .clone()
                .or_else(|| self.trust_for_lookup.clone()),
            cloudformation_execution_policies: other
                .cloudformation_execution_policies
                .clone()
                .or_else(|| self.cloudformation_execution_policies.clone()),
            termination_protection: other.termination_protection.or(self.termination_protection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unknown_method() {
        let config = ConfigFile {
            deployment_method: Some("hotswap".into()),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hotswap"));
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let config = ConfigFile {
            wait: Some(WaitConfig {
                poll_interval_ms: Some(0),
                timeout_secs: None,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_prefers_overlay_values() {
        let base = ConfigFile {
            toolkit_stack_name: Some("Base".into()),
            rollback: Some(true),
            wait: Some(WaitConfig {
                poll_interval_ms: Some(1000),
                timeout_secs: Some(60),
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            rollback: Some(false),
            wait: Some(WaitConfig {
                poll_interval_ms: Some(250),
                timeout_secs: None,
            }),
            ..Default::default()
        };

        let merged = base.merged_with(&overlay);
        assert_eq!(merged.toolkit_stack_name.as_deref(), Some("Base"));
        assert_eq!(merged.rollback, Some(false));
        assert_eq!(
            merged.wait,
            Some(WaitConfig {
                poll_interval_ms: Some(250),
                timeout_secs: Some(60),
            })
        );
    }

    #[test]
    fn parses_full_example() {
        let config: ConfigFile = toml::from_str(
            r#"
            toolkit_stack_name = "CustomToolkit"
            deployment_method = "direct"

            [wait]
            poll_interval_ms = 100

            [bootstrap]
            trust = ["222222222222"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.toolkit_stack_name.as_deref(), Some("CustomToolkit"));
        assert_eq!(
            config.bootstrap.unwrap().trust,
            Some(vec!["222222222222".to_string()])
        );
    }
}
