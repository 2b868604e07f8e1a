//! core::artifact
//!
//! Synthesized stacks and the cloud assembly that holds them.
//!
//! A [`StackArtifact`] is everything the orchestrator knows about one stack
//! before touching the cloud: its target environment, its generated
//! template, the roles to use, and the bootstrap version it needs. Nested
//! stack templates live as files next to the root template, under the
//! assembly directory.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::template::{Template, TemplateError};
use super::types::{Environment, Tag};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No stacks match the name(s) {}", .0.join(", "))]
    NoMatch(Vec<String>),

    #[error("This app contains no stacks")]
    EmptyAssembly,
}

/// Role used for read-only lookups in the target environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupRole {
    pub arn: String,
    pub external_id: Option<String>,
    /// Minimum bootstrap version the lookup role needs
    pub requires_bootstrap_stack_version: Option<u32>,
    /// SSM parameter holding the deployed bootstrap version
    pub bootstrap_stack_version_ssm_parameter: Option<String>,
}

/// A stack ready to be deployed.
#[derive(Debug, Clone, PartialEq)]
pub struct StackArtifact {
    /// Artifact id within the assembly (used for upload keys)
    pub id: String,
    /// Name of the deployed stack
    pub stack_name: String,
    /// Human-readable name for messages
    pub display_name: String,
    pub environment: Environment,
    /// Generated template
    pub template: Template,
    /// Directory containing this stack's template and its nested templates
    pub assembly_dir: Option<PathBuf>,
    /// Role to assume for stack operations
    pub assume_role_arn: Option<String>,
    pub assume_role_external_id: Option<String>,
    /// Role CloudFormation uses to provision resources
    pub cloudformation_execution_role_arn: Option<String>,
    pub lookup_role: Option<LookupRole>,
    pub requires_bootstrap_stack_version: Option<u32>,
    pub bootstrap_stack_version_ssm_parameter: Option<String>,
    pub tags: Vec<Tag>,
    pub termination_protection: bool,
    /// Where the template was already published, if it was (`s3://bucket/key`)
    pub stack_template_asset_object_url: Option<String>,
}

impl StackArtifact {
    pub fn new(
        stack_name: impl Into<String>,
        environment: Environment,
        template: Template,
    ) -> Self {
        let stack_name = stack_name.into();
        Self {
            id: stack_name.clone(),
            display_name: stack_name.clone(),
            stack_name,
            environment,
            template,
            assembly_dir: None,
            assume_role_arn: None,
            assume_role_external_id: None,
            cloudformation_execution_role_arn: None,
            lookup_role: None,
            requires_bootstrap_stack_version: None,
            bootstrap_stack_version_ssm_parameter: None,
            tags: Vec::new(),
            termination_protection: false,
            stack_template_asset_object_url: None,
        }
    }

    pub fn with_assembly_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assembly_dir = Some(dir.into());
        self
    }

    /// Load a nested stack's generated template by its asset path.
    pub fn load_nested_template(&self, asset_path: &str) -> Result<Template, TemplateError> {
        let dir = self.assembly_dir.as_deref().unwrap_or(Path::new("."));
        Template::load(&dir.join(asset_path))
    }
}

/// A set of synthesized stacks.
#[derive(Debug, Clone, Default)]
pub struct CloudAssembly {
    pub directory: Option<PathBuf>,
    stacks: Vec<StackArtifact>,
}

impl CloudAssembly {
    pub fn new(directory: Option<PathBuf>) -> Self {
        Self {
            directory,
            stacks: Vec::new(),
        }
    }

    /// An in-memory assembly containing exactly one stack.
    pub fn single_stack(stack: StackArtifact) -> Self {
        Self {
            directory: stack.assembly_dir.clone(),
            stacks: vec![stack],
        }
    }

    pub fn add_stack(&mut self, mut stack: StackArtifact) {
        if stack.assembly_dir.is_none() {
            stack.assembly_dir = self.directory.clone();
        }
        self.stacks.push(stack);
    }

    pub fn stacks(&self) -> &[StackArtifact] {
        &self.stacks
    }

    pub fn stack_by_name(&self, name: &str) -> Option<&StackArtifact> {
        self.stacks.iter().find(|s| s.stack_name == name)
    }

    /// Select stacks whose name matches any pattern (`*` matches any run of
    /// characters).
    ///
    /// # Errors
    ///
    /// Fails if the assembly is empty or nothing matches.
    pub fn select_stacks(&self, patterns: &[&str]) -> Result<Vec<&StackArtifact>, SelectionError> {
        if self.stacks.is_empty() {
            return Err(SelectionError::EmptyAssembly);
        }
        if patterns.is_empty() {
            return Ok(self.stacks.iter().collect());
        }

        let selected: Vec<&StackArtifact> = self
            .stacks
            .iter()
            .filter(|s| patterns.iter().any(|p| glob_match(p, &s.stack_name)))
            .collect();

        if selected.is_empty() {
            return Err(SelectionError::NoMatch(
                patterns.iter().map(|p| p.to_string()).collect(),
            ));
        }
        Ok(selected)
    }
}

fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}
