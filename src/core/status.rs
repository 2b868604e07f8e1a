//! core::status
//!
//! Classification of remote stack status strings.
//!
//! # Design
//!
//! A [`StackStatus`] is constructed fresh from every status poll and never
//! mutated. All facets are pure functions of the status name; the optional
//! reason is carried for display only.
//!
//! Unrecognized status names fall through to the conservative defaults:
//! not in progress, not a success, and [`RollbackChoice::None`].
//!
//! # Example
//!
//! ```
//! use stackshift::core::status::{RollbackChoice, StackStatus};
//!
//! let status = StackStatus::new("UPDATE_ROLLBACK_FAILED", None);
//! assert!(status.is_failure());
//! assert_eq!(status.rollback_choice(), RollbackChoice::ContinueUpdateRollback);
//! assert!(status.is_rollbackable());
//! ```

/// Synthetic status for a stack that does not exist.
pub const NOT_FOUND: &str = "NOT_FOUND";

/// Status of a stack that was created via a change set that has not been executed.
pub const REVIEW_IN_PROGRESS: &str = "REVIEW_IN_PROGRESS";

/// What can be done to bring a failed stack back to a stable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollbackChoice {
    /// The stack is paused in a failed create/update; a rollback can be started.
    StartRollback,
    /// A previous update rollback failed; it can be continued.
    ContinueUpdateRollback,
    /// The original create and its rollback both failed. Needs manual fixup.
    RollbackFailed,
    /// No rollback applies.
    None,
}

impl std::fmt::Display for RollbackChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackChoice::StartRollback => write!(f, "START_ROLLBACK"),
            RollbackChoice::ContinueUpdateRollback => write!(f, "CONTINUE_UPDATE_ROLLBACK"),
            RollbackChoice::RollbackFailed => write!(f, "ROLLBACK_FAILED"),
            RollbackChoice::None => write!(f, "NONE"),
        }
    }
}

/// A remote stack status with its derived facets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackStatus {
    name: String,
    reason: Option<String>,
}

impl StackStatus {
    pub fn new(name: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            name: name.into(),
            reason,
        }
    }

    /// The status of a stack that could not be found.
    pub fn not_found() -> Self {
        Self::new(NOT_FOUND, Some("Stack not found during lookup".to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// The original create failed; a redeploy must delete and recreate.
    pub fn is_creation_failure(&self) -> bool {
        self.name == "ROLLBACK_COMPLETE" || self.name == "ROLLBACK_FAILED"
    }

    pub fn is_deleted(&self) -> bool {
        self.name.starts_with("DELETE_")
    }

    pub fn is_failure(&self) -> bool {
        self.name.ends_with("FAILED")
    }

    /// An operation is running. A stack in review has never executed and is
    /// not considered in progress.
    pub fn is_in_progress(&self) -> bool {
        self.name.ends_with("_IN_PROGRESS") && !self.is_review_in_progress()
    }

    pub fn is_review_in_progress(&self) -> bool {
        self.name == REVIEW_IN_PROGRESS
    }

    pub fn is_not_found(&self) -> bool {
        self.name == NOT_FOUND
    }

    pub fn is_deploy_success(&self) -> bool {
        !self.is_not_found()
            && matches!(
                self.name.as_str(),
                "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "IMPORT_COMPLETE"
            )
    }

    pub fn is_rollback_success(&self) -> bool {
        self.name == "ROLLBACK_COMPLETE" || self.name == "UPDATE_ROLLBACK_COMPLETE"
    }

    pub fn rollback_choice(&self) -> RollbackChoice {
        match self.name.as_str() {
            "CREATE_FAILED" | "UPDATE_FAILED" => RollbackChoice::StartRollback,
            "UPDATE_ROLLBACK_FAILED" => RollbackChoice::ContinueUpdateRollback,
            "ROLLBACK_FAILED" => RollbackChoice::RollbackFailed,
            _ => RollbackChoice::None,
        }
    }

    pub fn is_rollbackable(&self) -> bool {
        matches!(
            self.rollback_choice(),
            RollbackChoice::StartRollback | RollbackChoice::ContinueUpdateRollback
        )
    }
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reason {
            Some(reason) if !reason.is_empty() => write!(f, "{} ({})", self.name, reason),
            _ => write!(f, "{}", self.name),
        }
    }
}
