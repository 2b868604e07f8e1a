//! core::template
//!
//! CloudFormation template documents.
//!
//! # Design
//!
//! A [`Template`] is an opaque JSON object. Key order is preserved so that
//! serialized templates and diffs are stable for a fixed input. Template
//! bodies returned by the service may be JSON or YAML; both parse into the
//! same representation.
//!
//! The bootstrap version and variant are read through explicit resolvers
//! returning [`TemplateValue`], so "absent" and "zero" stay distinguishable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Resource type of a nested stack.
pub const NESTED_STACK_TYPE: &str = "AWS::CloudFormation::Stack";

/// Metadata key recording where a synthesized nested template lives in the assembly.
pub const ASSET_PATH_METADATA_KEY: &str = "aws:asset:path";

/// Output carrying the bootstrap template version.
pub const BOOTSTRAP_VERSION_OUTPUT: &str = "BootstrapVersion";

/// Resource (an SSM parameter) carrying the bootstrap template version.
pub const BOOTSTRAP_VERSION_RESOURCE: &str = "CdkBootstrapVersion";

/// Template parameter naming the bootstrap variant.
pub const BOOTSTRAP_VARIANT_PARAMETER: &str = "BootstrapVariant";

/// Variant assumed when a bootstrap template does not declare one.
pub const DEFAULT_BOOTSTRAP_VARIANT: &str = "AWS CDK: Default Resources";

/// Errors from reading or parsing templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to parse template: {0}")]
    Parse(String),

    #[error("template must be an object, found {0}")]
    NotAnObject(&'static str),

    #[error("failed to read template '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize template: {0}")]
    Serialize(String),
}

/// Outcome of resolving a value from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue<T> {
    Found(T),
    NotFound,
}

impl<T> TemplateValue<T> {
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            TemplateValue::Found(value) => value,
            TemplateValue::NotFound => default,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, TemplateValue::Found(_))
    }
}

/// A CloudFormation template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(Map<String, Value>);

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `TemplateError::NotAnObject` unless the value is an object.
    pub fn from_value(value: Value) -> Result<Self, TemplateError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Err(TemplateError::NotAnObject("null")),
            Value::Bool(_) => Err(TemplateError::NotAnObject("a boolean")),
            Value::Number(_) => Err(TemplateError::NotAnObject("a number")),
            Value::String(_) => Err(TemplateError::NotAnObject("a string")),
            Value::Array(_) => Err(TemplateError::NotAnObject("an array")),
        }
    }

    /// Parse a template body in JSON or YAML form.
    ///
    /// An empty body yields an empty template.
    pub fn parse(body: &str) -> Result<Self, TemplateError> {
        if body.trim().is_empty() {
            return Ok(Self::new());
        }

        let value = match serde_json::from_str::<Value>(body) {
            Ok(value) => value,
            Err(_) => serde_yaml::from_str::<Value>(body)
                .map_err(|e| TemplateError::Parse(e.to_string()))?,
        };

        Self::from_value(value)
    }

    /// Read a template file from disk.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let contents = std::fs::read_to_string(path).map_err(|e| TemplateError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&contents)
    }

    /// Serialize to the body sent to the service.
    pub fn to_body(&self) -> Result<String, TemplateError> {
        serde_json::to_string_pretty(&self.0).map_err(|e| TemplateError::Serialize(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// A top-level section such as `Resources` or `Outputs`.
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.0.get(name).and_then(Value::as_object)
    }

    /// A top-level section, created empty if it does not exist yet.
    pub fn section_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        let entry = self
            .0
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("section was just replaced with an object"),
        }
    }

    pub fn resources(&self) -> Option<&Map<String, Value>> {
        self.section("Resources")
    }

    pub fn outputs(&self) -> Option<&Map<String, Value>> {
        self.section("Outputs")
    }

    pub fn parameters(&self) -> Option<&Map<String, Value>> {
        self.section("Parameters")
    }

    /// Nested stack resources this tool synthesized, as `(logical id, asset path)`
    /// pairs in template order.
    ///
    /// Resources of the nested stack type without asset-path metadata are
    /// not included.
    pub fn nested_stack_asset_paths(&self) -> Vec<(String, String)> {
        self.resources()
            .map(|resources| {
                resources
                    .iter()
                    .filter_map(|(logical_id, resource)| {
                        nested_stack_asset_path(resource)
                            .map(|path| (logical_id.clone(), path.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bootstrap version declared by this template.
    ///
    /// Looks at the `BootstrapVersion` output first, then at the
    /// `CdkBootstrapVersion` resource's `Value` property. Numbers and
    /// numeric strings are accepted; anything else counts as absent.
    pub fn bootstrap_version(&self) -> TemplateValue<u32> {
        let sources = [
            self.outputs()
                .and_then(|o| o.get(BOOTSTRAP_VERSION_OUTPUT))
                .and_then(|o| o.get("Value")),
            self.resources()
                .and_then(|r| r.get(BOOTSTRAP_VERSION_RESOURCE))
                .and_then(|r| r.get("Properties"))
                .and_then(|p| p.get("Value")),
        ];

        sources
            .into_iter()
            .flatten()
            .find_map(version_from_value)
            .map_or(TemplateValue::NotFound, TemplateValue::Found)
    }

    /// Bootstrap variant declared by this template (the `BootstrapVariant`
    /// parameter's default).
    pub fn bootstrap_variant(&self) -> TemplateValue<String> {
        self.parameters()
            .and_then(|p| p.get(BOOTSTRAP_VARIANT_PARAMETER))
            .and_then(|p| p.get("Default"))
            .and_then(Value::as_str)
            .map_or(TemplateValue::NotFound, |v| TemplateValue::Found(v.into()))
    }
}

impl From<Map<String, Value>> for Template {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Template {
    type Error = TemplateError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

/// Asset path of a synthesized nested stack resource, if it is one.
fn nested_stack_asset_path(resource: &Value) -> Option<&str> {
    if resource.get("Type").and_then(Value::as_str) != Some(NESTED_STACK_TYPE) {
        return None;
    }
    resource
        .get("Metadata")
        .and_then(|m| m.get(ASSET_PATH_METADATA_KEY))
        .and_then(Value::as_str)
        .filter(|path| !path.is_empty())
}

fn version_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => leading_integer(s),
        _ => None,
    }
}

/// Integer prefix of a string (`"12"` and `"12.0"` both give 12).
fn leading_integer(s: &str) -> Option<u32> {
    let trimmed = s.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
