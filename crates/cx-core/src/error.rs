use thiserror::Error;

/// Errors surfaced by the cortex engine and its collaborator seams.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A prompt is already being processed on this session; the caller must retry.
    #[error("already processing a prompt")]
    AlreadyProcessing,

    /// Nothing new to send and no ephemeral context.
    #[error("no new content to send")]
    NoContent,

    /// Collapse was requested with an empty registry.
    #[error("no candidate answers registered")]
    NoCandidates,

    /// Embedding or vector-store lookup failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// The strategy-decision collaborator failed.
    #[error("strategy decision failed: {0}")]
    Strategy(String),

    /// Writing records to the vector store failed.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The token counter could not count.
    #[error("token counter unavailable: {0}")]
    TokenCounter(String),

    /// A cognitive core failed to produce an answer.
    #[error("core '{origin}' failed: {message}")]
    Core { origin: String, message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
