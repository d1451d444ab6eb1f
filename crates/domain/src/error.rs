/// Shared error type used across all Switchboard crates.
///
/// The variants mirror the failure taxonomy surfaced to run subscribers:
/// anything that terminates a run maps to one of these, and `code()` is the
/// stable string carried in `run.failed` payloads.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Configuration(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("llm ({kind}): {message}")]
    Llm { kind: LlmErrorKind, message: String },

    #[error("iteration limit exceeded after {0} turns")]
    IterationLimitExceeded(u32),

    #[error("all {0} tool calls in the cycle failed")]
    AllToolsFailed(usize),
}

/// Subtype of an LLM-layer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    Network,
    RateLimit,
    Authentication,
    InvalidRequest,
    FinishReason,
    Other,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::FinishReason => "finish_reason",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Construct an LLM-layer error.
    pub fn llm(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self::Llm {
            kind,
            message: message.into(),
        }
    }

    /// Stable machine-readable code for `run.failed` payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Configuration(_) => "configuration",
            Self::InvalidState(_) => "invalid_state",
            Self::Validation(_) => "validation",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::Storage(_) => "storage",
            Self::Llm {
                kind: LlmErrorKind::FinishReason,
                ..
            } => "llm_finish_reason_error",
            Self::Llm { .. } => "llm",
            Self::IterationLimitExceeded(_) => "iteration_limit_exceeded",
            Self::AllToolsFailed(_) => "all_tools_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
