//! cloud
//!
//! Abstraction over the cloud services the engine consumes.
//!
//! # Architecture
//!
//! The engine never talks to a concrete AWS client. Each service is a
//! narrow capability trait holding only the operations the engine uses:
//!
//! - [`CloudFormation`]: stack introspection and mutation
//! - [`ParameterStore`]: SSM reads for bootstrap version checks
//! - [`ObjectStore`]: uploads of templates too large to send inline
//! - [`Sdk`]: one identity's clients plus the whoami lookup
//!
//! Credentials enter through [`CredentialSource`] and [`CredentialPlugin`];
//! a [`ClientFactory`] assumes roles and turns credentials into an [`Sdk`].
//!
//! # Modules
//!
//! - `traits`: Capability traits and [`CloudError`]
//! - `model`: Request and response shapes
//! - `credentials`: Credential seams and the client factory trait
//! - [`mock`]: In-memory implementations for deterministic testing

mod credentials;
pub mod mock;
mod model;
mod traits;

pub use credentials::*;
pub use model::*;
pub use traits::*;
