//! Stackshift - stack deployment orchestration for CloudFormation-based tooling
//!
//! Stackshift decides, for a target cloud environment, whether and how to
//! converge a synthesized template with what is actually deployed:
//! change set or direct update, rollback, destroy, bootstrap upgrades, and
//! the nested stacks a diff needs to see.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`core`] - Domain types, status classification, templates, parameters, config
//! - [`cloud`] - Capability traits for the cloud services, plus in-memory mocks
//! - [`engine`] - Credential resolution, deploy/rollback/destroy protocols, bootstrap
//! - [`logging`] - Log subscriber setup for embedding tools
//!
//! # Correctness Invariants
//!
//! Stackshift maintains the following invariants:
//!
//! 1. A stack is never mutated before its bootstrap requirements are checked
//! 2. Safety aborts and paused deployments are returned as data
//! 3. Credentials for one account are never silently used for another
//! 4. Every fallback and every abort is logged as a warning

pub mod cloud;
pub mod core;
pub mod engine;
pub mod logging;
