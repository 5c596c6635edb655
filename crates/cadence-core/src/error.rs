use thiserror::Error;

/// A convenience `Result` alias using [`CadenceError`].
pub type CadenceResult<T> = Result<T, CadenceError>;

/// Top-level error type for the Cadence control plane.
///
/// Only admission, validation and not-found errors are meant to reach callers
/// with distinct status semantics. Agent failures are recorded on the task
/// itself and never surface through this type past the orchestrator.
#[derive(Error, Debug)]
pub enum CadenceError {
    /// The caller exceeded the request budget for a rate-limit scope.
    #[error(
        "Rate limit exceeded for scope '{scope}': {request_count}/{limit}, \
         retry after {retry_after_seconds}s"
    )]
    RateLimitExceeded {
        /// Scope whose policy rejected the request.
        scope: String,
        /// Configured request limit for the window.
        limit: u32,
        /// Seconds until the current window resets (at least 1).
        retry_after_seconds: u64,
        /// Post-increment request count in the current window.
        request_count: u32,
    },

    /// Malformed identifiers or input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An unknown task, session or agent id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The agent pool was empty when a primitive task needed an agent.
    #[error("No available agents")]
    NoAvailableAgents,

    /// An agent executor raised an error.
    #[error("Executor error: {0}")]
    Executor(String),

    /// A task or agent repository failure.
    #[error("Store error: {0}")]
    Store(String),

    /// The retrieval collaborator failed.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// The episodic memory sink failed.
    #[error("Memory error: {0}")]
    Memory(String),

    /// An outbound HTTP request failed (e.g. LLM API call).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration parsing or validation failed.
    #[error("Config error: {0}")]
    Config(String),

    /// A task status change that would move backwards or leave a terminal state.
    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// An error from the orchestration engine itself.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceError {
    /// Whether the error should be reported to the caller as a 4xx-style failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CadenceError::RateLimitExceeded { .. }
                | CadenceError::Validation(_)
                | CadenceError::NotFound(_)
        )
    }

    /// Retry hint in seconds, present only for admission rejections.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            CadenceError::RateLimitExceeded {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}
