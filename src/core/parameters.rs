//! core::parameters
//!
//! Resolution of stack parameter values against a template's formal
//! parameters.
//!
//! # Precedence
//!
//! For every formal parameter, in template order:
//! 1. An explicitly supplied value
//! 2. The previous value of the deployed stack (sent as `UsePreviousValue`)
//! 3. The parameter's `Default`
//!
//! A parameter with none of these is missing, and all missing parameters
//! are reported together. Supplied values for parameters the template does
//! not declare are passed through so the service can reject typos.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use super::template::Template;

/// Description marker that opts an SSM-typed parameter out of forced redeploys.
pub const SSM_PARAM_NO_INVALIDATE: &str = "[cdk:skip]";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("The following CloudFormation Parameters are missing a value: {}", .0.join(", "))]
    MissingValues(Vec<String>),
}

/// A parameter as sent to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiParameter {
    pub key: String,
    pub value: Option<String>,
    pub use_previous_value: bool,
}

impl ApiParameter {
    pub fn value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            use_previous_value: false,
        }
    }

    pub fn use_previous(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            use_previous_value: true,
        }
    }
}

/// Whether a parameter set would change a deployed stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChanges {
    None,
    Changed,
    /// Values come from SSM and cannot be compared; always redeploy.
    Ssm,
}

impl ParameterChanges {
    pub fn any(self) -> bool {
        !matches!(self, ParameterChanges::None)
    }
}

/// Formal parameters declared by a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateParameters {
    formal: Map<String, Value>,
}

impl TemplateParameters {
    pub fn from_template(template: &Template) -> Self {
        Self {
            formal: template.parameters().cloned().unwrap_or_default(),
        }
    }

    /// Resolve values without considering a deployed stack.
    pub fn supply_all(
        &self,
        updates: &BTreeMap<String, Option<String>>,
    ) -> Result<ParameterValues, ParameterError> {
        ParameterValues::resolve(&self.formal, updates, None)
    }

    /// Resolve values, reusing the deployed stack's values where none is supplied.
    pub fn update_existing(
        &self,
        updates: &BTreeMap<String, Option<String>>,
        previous: &BTreeMap<String, String>,
    ) -> Result<ParameterValues, ParameterError> {
        ParameterValues::resolve(&self.formal, updates, Some(previous))
    }
}

/// Resolved parameter values.
#[derive(Debug, Clone, Default)]
pub struct ParameterValues {
    formal: Map<String, Value>,
    /// Effective value of every parameter
    pub values: BTreeMap<String, String>,
    /// What to send to the service
    pub api_parameters: Vec<ApiParameter>,
}

impl ParameterValues {
    fn resolve(
        formal: &Map<String, Value>,
        updates: &BTreeMap<String, Option<String>>,
        previous: Option<&BTreeMap<String, String>>,
    ) -> Result<Self, ParameterError> {
        let mut values = BTreeMap::new();
        let mut api_parameters = Vec::new();
        let mut missing = Vec::new();

        for (key, formal_param) in formal {
            if let Some(Some(updated)) = updates.get(key) {
                values.insert(key.clone(), updated.clone());
                api_parameters.push(ApiParameter::value(key, updated));
                continue;
            }

            if let Some(prev) = previous.and_then(|p| p.get(key)) {
                values.insert(key.clone(), prev.clone());
                api_parameters.push(ApiParameter::use_previous(key));
                continue;
            }

            if let Some(default) = formal_param.get("Default") {
                values.insert(key.clone(), default_to_string(default));
                continue;
            }

            missing.push(key.clone());
        }

        if !missing.is_empty() {
            return Err(ParameterError::MissingValues(missing));
        }

        for (key, value) in updates {
            if formal.contains_key(key) {
                continue;
            }
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                values.insert(key.clone(), value.clone());
                api_parameters.push(ApiParameter::value(key, value));
            }
        }

        Ok(Self {
            formal: formal.clone(),
            values,
            api_parameters,
        })
    }

    /// Whether deploying these values would change the stack's current values.
    pub fn has_changes(&self, current: &BTreeMap<String, String>) -> ParameterChanges {
        let has_ssm = self.formal.values().any(|p| {
            let is_ssm = p
                .get("Type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.starts_with("AWS::SSM::Parameter::"));
            let opted_out = p
                .get("Description")
                .and_then(Value::as_str)
                .is_some_and(|d| d.contains(SSM_PARAM_NO_INVALIDATE));
            is_ssm && !opted_out
        });
        if has_ssm {
            return ParameterChanges::Ssm;
        }

        let removed_or_changed = current
            .iter()
            .any(|(key, value)| self.values.get(key) != Some(value));
        let added = self.values.keys().any(|key| !current.contains_key(key));

        if removed_or_changed || added {
            ParameterChanges::Changed
        } else {
            ParameterChanges::None
        }
    }
}

fn default_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(default_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
