use thiserror::Error;

/// Main error type for the evaluation harness
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Referential mismatch between the corpus and the label set.
    /// Aborts the whole run.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// The embedding capability failed, timed out or returned malformed vectors
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON source errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl HarnessError {
    /// Whether this error must abort the run rather than exclude one control.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HarnessError::EmbeddingUnavailable(_))
    }
}

/// Convenient Result type using HarnessError
pub type Result<T> = std::result::Result<T, HarnessError>;
