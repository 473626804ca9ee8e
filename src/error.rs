//! Crate-level error type.

use thiserror::Error;

use crate::mask::MaskAlignmentError;
use crate::tokenizer::TokenizationError;
use crate::vision::ImageTransformError;

/// Errors surfaced by the input-preparation pipeline.
///
/// Each pipeline stage has its own error enum; this type unifies them for
/// callers of the end-to-end transform. Loss computation reports its own
/// [`crate::preference::ShapeMismatchError`] and does not route through
/// this enum.
#[derive(Debug, Error)]
pub enum Error {
    /// Text tokenization failed
    #[error(transparent)]
    Tokenization(#[from] TokenizationError),

    /// Image tiling failed
    #[error(transparent)]
    ImageTransform(#[from] ImageTransformError),

    /// Cross-attention mask construction failed
    #[error(transparent)]
    MaskAlignment(#[from] MaskAlignmentError),

    /// Invalid construction parameters
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
