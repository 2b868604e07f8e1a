//! engine::nested
//!
//! Deployed and generated templates of a stack and its nested stacks.
//!
//! # Traversal
//!
//! Starting from the generated root template, every resource of type
//! `AWS::CloudFormation::Stack` carrying `aws:asset:path` metadata is a
//! nested stack we synthesized. Its generated template is read from the
//! cloud assembly; its deployed template is fetched from the physical stack
//! the parent's resource list points at. The walk is depth-first in the
//! order resources appear in the parent template.
//!
//! Nested stack resources in the returned templates carry the child
//! template under `Properties.NestedTemplate`, so a diff of the root shows
//! nested changes. The artifact itself is never modified.
//!
//! A parent's resource list is fetched once per traversal however many
//! nested stacks it has. A parent that was never deployed lists no
//! resources; its children are then compared against an empty template.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::error::ToolkitError;
use super::stack::CloudFormationStack;
use crate::cloud::{CloudFormation, StackResourceSummary};
use crate::core::artifact::StackArtifact;
use crate::core::template::Template;
use crate::core::types::stack_name_from_arn;

/// Property that nested templates are attached under.
pub const NESTED_TEMPLATE_PROPERTY: &str = "NestedTemplate";

/// One nested stack and its descendants.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedStackTemplates {
    /// `None` if the nested stack has not been deployed
    pub physical_name: Option<String>,
    pub deployed_template: Template,
    pub generated_template: Template,
    pub nested_stack_templates: BTreeMap<String, NestedStackTemplates>,
}

/// A root stack's templates with its nested stacks attached.
#[derive(Debug, Clone, PartialEq)]
pub struct RootTemplateWithNestedStacks {
    pub deployed_root_template: Template,
    pub generated_root_template: Template,
    pub nested_stacks: BTreeMap<String, NestedStackTemplates>,
}

/// The deployed template of `stack`, empty if it was never deployed.
pub async fn load_current_template(
    stack: &StackArtifact,
    cfn: Arc<dyn CloudFormation>,
    retrieve_processed_template: bool,
) -> Result<Template, ToolkitError> {
    CloudFormationStack::lookup(cfn, &stack.stack_name, retrieve_processed_template)
        .await?
        .template()
        .await
}

/// Deployed and generated templates of `stack` and all its nested stacks.
pub async fn load_current_template_with_nested_stacks(
    stack: &StackArtifact,
    cfn: Arc<dyn CloudFormation>,
    retrieve_processed_template: bool,
) -> Result<RootTemplateWithNestedStacks, ToolkitError> {
    let retrieve = retrieve_processed_template;
    let deployed = load_current_template(stack, Arc::clone(&cfn), retrieve).await?;

    let mut loader = NestedStackLoader {
        root: stack,
        cfn,
        resources: HashMap::new(),
    };
    let root_name = Some(stack.stack_name.clone());
    let level = loader
        .load_level(stack.template.clone(), deployed, root_name)
        .await?;

    Ok(RootTemplateWithNestedStacks {
        deployed_root_template: level.deployed,
        generated_root_template: level.generated,
        nested_stacks: level.nested,
    })
}

type LevelFuture<'a> = Pin<Box<dyn Future<Output = Result<Level, ToolkitError>> + Send + 'a>>;

struct Level {
    generated: Template,
    deployed: Template,
    nested: BTreeMap<String, NestedStackTemplates>,
}

struct NestedStackLoader<'a> {
    root: &'a StackArtifact,
    cfn: Arc<dyn CloudFormation>,
    /// parent physical name -> resource summaries
    resources: HashMap<String, Vec<StackResourceSummary>>,
}

impl<'a> NestedStackLoader<'a> {
    fn load_level(
        &mut self,
        mut generated: Template,
        mut deployed: Template,
        deployed_stack_name: Option<String>,
    ) -> LevelFuture<'_> {
        Box::pin(async move {
            let mut nested = BTreeMap::new();

            for (logical_id, asset_path) in generated.nested_stack_asset_paths() {
                let child_generated = self.root.load_nested_template(&asset_path)?;
                let physical_name = match &deployed_stack_name {
                    Some(parent) => self.physical_name(parent, &logical_id).await?,
                    None => None,
                };
                let child_deployed = match &physical_name {
                    Some(name) => {
                        CloudFormationStack::lookup(Arc::clone(&self.cfn), name, false)
                            .await?
                            .template()
                            .await?
                    }
                    None => Template::new(),
                };

                tracing::debug!(
                    nested_stack = %logical_id,
                    physical_name = ?physical_name,
                    "loaded nested stack templates"
                );

                let child = self
                    .load_level(child_generated, child_deployed, physical_name.clone())
                    .await?;

                attach_nested_template(&mut generated, &logical_id, &child.generated);
                let in_deployed = deployed
                    .resources()
                    .is_some_and(|r| r.contains_key(&logical_id));
                if in_deployed {
                    attach_nested_template(&mut deployed, &logical_id, &child.deployed);
                }

                nested.insert(
                    logical_id,
                    NestedStackTemplates {
                        physical_name,
                        deployed_template: child.deployed,
                        generated_template: child.generated,
                        nested_stack_templates: child.nested,
                    },
                );
            }

            Ok(Level {
                generated,
                deployed,
                nested,
            })
        })
    }

    /// Physical stack name of nested stack `logical_id` under `parent`.
    async fn physical_name(
        &mut self,
        parent: &str,
        logical_id: &str,
    ) -> Result<Option<String>, ToolkitError> {
        if !self.resources.contains_key(parent) {
            let summaries = match self.cfn.list_stack_resources(parent).await {
                Ok(summaries) => summaries,
                Err(e) if e.is_stack_not_found(parent) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            self.resources.insert(parent.to_string(), summaries);
        }

        let arn = self
            .resources
            .get(parent)
            .and_then(|all| all.iter().find(|s| s.logical_resource_id == logical_id))
            .and_then(|s| s.physical_resource_id.as_deref());

        match arn {
            Some(arn) => Ok(Some(stack_name_from_arn(arn)?.to_string())),
            None => Ok(None),
        }
    }
}

fn attach_nested_template(parent: &mut Template, logical_id: &str, nested: &Template) {
    let Some(Value::Object(resource)) = parent.section_mut("Resources").get_mut(logical_id) else {
        return;
    };
    let properties = resource
        .entry("Properties")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(properties) = properties {
        properties.insert(
            NESTED_TEMPLATE_PROPERTY.to_string(),
            Value::Object(nested.as_map().clone()),
        );
    }
}
