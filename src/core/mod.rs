//! core
//!
//! Core domain types, schemas, and pure logic for Stackshift.
//!
//! # Modules
//!
//! - [`types`] - Strong types: Environment, Mode, Tag, Account
//! - [`status`] - Stack status classification and rollback decisions
//! - [`template`] - Template documents and bootstrap version resolution
//! - [`parameters`] - Parameter resolution against a template
//! - [`artifact`] - Synthesized stacks and stack selection
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Nothing in this layer talks to the cloud
//! - Schemas are strict and self-describing
//! - Classification is deterministic

pub mod artifact;
pub mod config;
pub mod parameters;
pub mod status;
pub mod template;
pub mod types;
