//! Tokenizer error types.

use thiserror::Error;

/// Tokenization errors
#[derive(Debug, Error)]
pub enum TokenizationError {
    #[error("Invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    #[error("Special token `{0}` embedded in raw text")]
    SpecialTokenInText(String),

    #[error("Invalid token ID: {0}")]
    InvalidTokenId(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tokenizer operations
pub type Result<T> = std::result::Result<T, TokenizationError>;
