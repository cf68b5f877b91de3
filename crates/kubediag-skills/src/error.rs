//! Error types for kubediag-skills

use thiserror::Error;

/// Skill catalog error type
#[derive(Debug, Error)]
pub enum Error {
    /// Skill not found
    #[error("skill not found: {0}")]
    SkillNotFound(String),

    /// Skill references a tool the registry does not know
    #[error("skill '{skill}' references unknown tool '{tool}'")]
    UnknownTool {
        /// Skill id
        skill: String,
        /// Referenced tool name
        tool: String,
    },

    /// Skill declaration is inconsistent with its tool
    #[error("invalid skill '{skill}': {reason}")]
    Validation {
        /// Skill id
        skill: String,
        /// What is wrong
        reason: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
