//! engine
//!
//! Decides which operations to issue against a stack and issues them.
//!
//! # Architecture
//!
//! The engine sits between the pure [`crate::core`] model and the
//! [`crate::cloud`] capability traits:
//!
//! 1. **Resolve**: pick credentials and clients for the stack's environment
//! 2. **Validate**: check the bootstrap version the stack requires
//! 3. **Decide**: compare desired and deployed state, pick a method
//! 4. **Apply**: create or execute change sets, update, roll back, delete
//! 5. **Wait**: poll until the stack settles
//!
//! ```text
//! Deployments ─► EnvironmentAccess ─► SdkProvider ─► ClientFactory
//!      │                │
//!      │                └─► EnvironmentResources ─► ToolkitInfo
//!      │
//!      ├─► deploy (change set | direct) ─► CloudFormationStack waiters
//!      ├─► rollback ─► events
//!      └─► nested
//! ```
//!
//! # Invariants
//!
//! - Nothing is mutated before the environment and bootstrap version check
//! - Paused stacks and safety aborts are returned as data, not errors
//! - Credentials for another account are never used without a role
//! - Expired credentials always surface as errors

pub mod bootstrap;
pub mod deploy;
pub mod deployments;
pub mod environment;
pub mod error;
pub mod events;
pub mod nested;
pub mod placeholders;
pub mod resources;
pub mod rollback;
pub mod sdk_provider;
pub mod stack;
pub mod toolkit_info;

// Re-exports for convenience
pub use bootstrap::{
    BootstrapEnvironmentOptions, BootstrapStack, Bootstrapper, BootstrappingParameters,
};
pub use deploy::{
    DeployStackOptions, DeployStackRequest, DeployStackResult, DeploymentMethod,
    DestroyStackOptions, PausedReason, SuccessfulDeployStackResult,
};
pub use deployments::Deployments;
pub use environment::{EnvironmentAccess, TargetEnvironment};
pub use error::ToolkitError;
pub use nested::{NestedStackTemplates, RootTemplateWithNestedStacks};
pub use resources::{EnvironmentResources, EnvironmentResourcesRegistry};
pub use rollback::{RollbackStackOptions, RollbackStackResult};
pub use sdk_provider::{AssumeRoleOptions, BaseCredentials, SdkForEnvironment, SdkProvider};
pub use stack::{CloudFormationStack, WaitPolicy};
pub use toolkit_info::ToolkitInfo;
