//! Error types for career-nav.

use std::time::Duration;

use crate::agents::Prerequisite;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Reroute error: {0}")]
    Reroute(#[from] RerouteError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Context persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("No context stored for user {user_id}")]
    NotFound { user_id: String },

    #[error("Version conflict for user {user_id}: expected {expected}, found {found}")]
    Conflict {
        user_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Generation service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Non-success status that is neither a rate limit nor retryable.
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Transport failure talking to {provider}: {reason}")]
    Transport { provider: String, reason: String },

    #[error("Request to {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Errors raised while running a stage agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Missing prerequisite: {0} has not been completed")]
    MissingPrerequisite(Prerequisite),

    #[error("Action {action_id} not found in the current roadmap")]
    ActionNotFound { action_id: String },

    #[error("Action {action_id} is not ready: {reason}")]
    ActionNotReady { action_id: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reroute(#[from] RerouteError),
}

/// Rerouting state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum RerouteError {
    #[error("Cannot apply {event} while reroute state is {state}")]
    InvalidTransition { state: String, event: String },

    #[error("Reroute option {0} does not exist")]
    UnknownOption(String),

    #[error("Failure analysis proposed no alternatives")]
    NoOptions,

    #[error("Rerouted roadmap is unfinished: {completed} of {total} steps done")]
    RoadmapUnfinished { completed: usize, total: usize },
}

/// Orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid command input: {0}")]
    InvalidInput(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
