//! Error types for kubediag-core
//!
//! This module provides error types and user-friendly error formatting.
//! Step-local failures (safety denials, confirmation timeouts, tool errors)
//! never surface here: they are recorded on the step's result instead.

use crate::confirmation::ConfirmationStatus;
use crate::plan::StepId;
use crate::validator::ValidationError;
use thiserror::Error;
use uuid::Uuid;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Plan failed structural validation
    #[error("plan rejected: {0}")]
    Validation(#[from] ValidationError),

    /// Plan document could not be parsed
    #[error("malformed plan document: {0}")]
    PlanDocument(String),

    /// Unknown environment id
    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    /// Unknown session id
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Session task stopped without producing a report
    #[error("session {0} ended without a report")]
    SessionAborted(Uuid),

    /// No pending confirmation for this step
    #[error("no pending confirmation for step {step_id}")]
    ConfirmationNotFound {
        /// Step the operator tried to resolve
        step_id: StepId,
    },

    /// The step's confirmation was already settled
    #[error("confirmation for step {step_id} already settled ({status:?})")]
    ConfirmationAlreadyResolved {
        /// Step the operator tried to resolve
        step_id: StepId,
        /// How it was settled
        status: ConfirmationStatus,
    },

    /// Planning collaborator failed
    #[error("planning error: {0}")]
    Planning(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Tool layer error
    #[error("tool error: {0}")]
    Tool(#[from] kubediag_tools::Error),

    /// Skill catalog error
    #[error("skill error: {0}")]
    Skill(#[from] kubediag_skills::Error),

    /// IO error (audit log, documents)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::Validation(e) => format!("📋 The diagnostic plan was rejected: {}", e),
            Error::PlanDocument(msg) => format!("📋 Could not read the plan: {}", msg),
            Error::EnvironmentNotFound(id) => format!("🌐 Unknown environment '{}'.", id),
            Error::SessionNotFound(id) => format!("🔎 No diagnosis session {}.", id),
            Error::SessionAborted(id) => format!("💥 Diagnosis session {} stopped unexpectedly.", id),
            Error::ConfirmationNotFound { step_id } => {
                format!("✋ Step {} is not waiting for confirmation.", step_id)
            }
            Error::ConfirmationAlreadyResolved { step_id, status } => {
                format!("✋ Step {} was already settled ({:?}).", step_id, status)
            }
            Error::Planning(msg) => format!("📋 Planning failed: {}", msg),
            Error::Configuration(msg) => format!("⚙️ Configuration error: {}", msg),
            Error::Tool(e) => format!("🔧 Tool error: {}", e),
            Error::Skill(e) => format!("🧩 Skill catalog error: {}", e),
            Error::Io(e) => format!("❌ IO error: {}", e),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::Validation(_) | Error::PlanDocument(_) => Some(
                "💡 Check step ids, depends_on references and params against `kubediag catalog`."
                    .to_string(),
            ),
            Error::EnvironmentNotFound(_) => {
                Some("💡 Run `kubediag envs` to list configured environments.".to_string())
            }
            Error::ConfirmationNotFound { .. } => Some(
                "💡 Only blocked steps can be approved; check the session status.".to_string(),
            ),
            Error::ConfirmationAlreadyResolved { .. } => Some(
                "💡 A decision can be given once; the first answer stands.".to_string(),
            ),
            Error::Configuration(_) => Some(
                "💡 Check config/default.toml or KUBEDIAG_* environment variables.".to_string(),
            ),
            Error::Skill(_) => {
                Some("💡 Every skill must reference a registered tool.".to_string())
            }
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = String::new();

    output.push_str(&error.user_message());
    output.push('\n');

    if let Some(suggestion) = error.suggestion() {
        output.push('\n');
        output.push_str(&suggestion);
        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_not_found_message() {
        let error = Error::EnvironmentNotFound("prod-eu".to_string());
        assert!(error.user_message().contains("prod-eu"));
        assert!(error.suggestion().unwrap().contains("kubediag envs"));
    }

    #[test]
    fn test_format_error_for_cli() {
        let error = Error::Configuration("executor.max_in_flight must be positive".to_string());
        let output = format_error_for_cli(&error);
        assert!(output.contains("max_in_flight"));
        assert!(output.contains("KUBEDIAG_"));
    }

    #[test]
    fn test_tool_error_converts() {
        let error: Error = kubediag_tools::Error::NotFound("drain_node".to_string()).into();
        assert!(matches!(error, Error::Tool(_)));
        assert!(error.suggestion().is_none());
    }
}
