use thiserror::Error;

/// Failure taxonomy for one conversation turn.
///
/// Every failure a caller can observe maps to exactly one of these kinds.
/// The `kind()` string is part of the wire format and must stay stable.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The analyzer could not turn the question into a usable intent.
    #[error("could not work out what the question is asking: {0}")]
    IntentUnresolved(String),

    /// No safe statement was produced within the attempt budget, or the
    /// synthesizer emitted something that is not SQL at all.
    #[error("could not produce a safe query: {0}")]
    UnsafeOrInvalidQuery(String),

    /// The completion service timed out, rate-limited us, or errored.
    #[error("language model unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The store rejected or failed the accepted statement.
    #[error("query execution failed: {0}")]
    ExecutionError(String),

    /// The turn was cancelled before it completed.
    #[error("the request was cancelled")]
    Cancelled,

    /// The request itself was unusable (empty question, bad session id).
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl PipelineError {
    /// Stable machine-readable kind, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::IntentUnresolved(_) => "IntentUnresolved",
            PipelineError::UnsafeOrInvalidQuery(_) => "UnsafeOrInvalidQuery",
            PipelineError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            PipelineError::ExecutionError(_) => "ExecutionError",
            PipelineError::Cancelled => "Cancelled",
            PipelineError::MalformedRequest(_) => "MalformedRequest",
        }
    }
}
