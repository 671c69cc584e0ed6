//! Error types for meridian-core.

use thiserror::Error;

/// Result type alias using meridian-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory, sandbox, and retrieval operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed arguments to a store operation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Static policy violation found before execution
    #[error("Sandbox violation: {construct}")]
    SandboxViolation { construct: String },

    /// Agent code could not be parsed
    #[error("Syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// Agent code failed while running
    #[error("Script error: {0}")]
    Script(String),

    /// Too many recursive queries in one session
    #[error("Maximum iterations ({max_iterations}) exceeded")]
    MaxIterations { max_iterations: u32 },

    /// A query would push the session past its cost budget
    #[error("Cost budget exceeded: ${attempted:.6} would exceed budget ${budget:.6}")]
    CostBudgetExceeded { budget: f64, attempted: f64 },

    /// Execution ran longer than the configured bound
    #[error("Execution timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Session used out of order (double FINAL, execute after completion)
    #[error("Session misuse: {0}")]
    SessionMisuse(String),

    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// Chunk, index, or cache storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a sandbox violation naming the offending construct.
    pub fn sandbox_violation(construct: impl Into<String>) -> Self {
        Self::SandboxViolation {
            construct: construct.into(),
        }
    }

    /// Create a syntax error.
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    /// Create a script runtime error.
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script(message.into())
    }

    /// Create a max iterations error.
    pub fn max_iterations(max_iterations: u32) -> Self {
        Self::MaxIterations { max_iterations }
    }

    /// Create a cost budget error.
    pub fn cost_budget_exceeded(budget: f64, attempted: f64) -> Self {
        Self::CostBudgetExceeded { budget, attempted }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a session misuse error.
    pub fn session_misuse(message: impl Into<String>) -> Self {
        Self::SessionMisuse(message.into())
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Whether this error is a resource-budget violation.
    pub fn is_budget(&self) -> bool {
        matches!(
            self,
            Self::MaxIterations { .. } | Self::CostBudgetExceeded { .. } | Self::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_classification() {
        assert!(Error::max_iterations(3).is_budget());
        assert!(Error::cost_budget_exceeded(1.0, 1.5).is_budget());
        assert!(Error::timeout(10).is_budget());
        assert!(!Error::sandbox_violation("import os").is_budget());
        assert!(!Error::session_misuse("FINAL twice").is_budget());
    }

    #[test]
    fn test_messages_name_the_construct() {
        let err = Error::sandbox_violation("Import of 'os' is not allowed");
        assert!(err.to_string().contains("'os'"));

        let err = Error::cost_budget_exceeded(0.004, 0.005);
        assert!(err.to_string().contains("budget"));
    }
}
