use thiserror::Error;

/// Top-level error type for Haven.
#[derive(Debug, Error)]
pub enum HavenError {
    /// Error from a reply-generation provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// Error from a messaging channel (SMS, email).
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Memory/storage error.
    #[error("memory error: {0}")]
    Memory(String),

    /// A workflow step could not complete and should be retried.
    #[error("workflow error: {0}")]
    Workflow(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
