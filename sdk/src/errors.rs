//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Pilot engine.
//! All errors implement the `PilotErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Task status is the only failure signal a user observes directly, so the
//! hints here are what the CLI prints next to a failed or stalled task.

use thiserror::Error;

/// Trait for Pilot error extensions
///
/// Provides a user-facing hint and recoverability information for an error.
pub trait PilotErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint never contains secrets (API keys, tokens) or raw provider
    /// payloads.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors need a configuration change before the task can make progress.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: SQLite operation failures
/// - **LLM Provider**: API failures, unknown provider keys
/// - **Orchestration**: interrupted calls, missing tasks
/// - **Actuation**: transport failures talking to the desktop endpoint
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, PilotErrorExt};
///
/// let error = EngineError::Transport("connection refused".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::ProviderMissing("mistral".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("No service found for model provider: {0}")]
    ProviderMissing(String),

    // Orchestration errors
    #[error("Operation interrupted")]
    Interrupted,

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task has no user message: {0}")]
    MissingInitialMessage(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    // Actuation errors
    #[error("Actuation transport failure: {0}")]
    Transport(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True when the error only signals that a cancellation token fired.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl PilotErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Database operation failed. Check the data directory",

            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",
            Self::ProviderMissing(_) => "The task's model provider is not configured",

            Self::Interrupted => "The task was interrupted and can be resumed",
            Self::TaskNotFound(_) => "No task with that id exists",
            Self::MissingInitialMessage(_) => "The task has no instructions to plan from",

            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::InvalidToolInput(_) => "The model sent malformed tool arguments",

            Self::Transport(_) => "The desktop endpoint is unreachable. Is it running?",
            Self::Network(_) => "Network operation failed. Check your connection",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::ProviderMissing(_) | Self::TaskNotFound(_) => false,
            _ => true,
        }
    }
}
