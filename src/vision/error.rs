//! Image transform error types.

use thiserror::Error;

/// Image tiling errors
#[derive(Debug, Error)]
pub enum ImageTransformError {
    #[error("Degenerate image dimensions {width}x{height}")]
    EmptyImage { width: u32, height: u32 },

    #[error("Tile size must be non-zero")]
    ZeroTileSize,

    #[error("Maximum tile count must be non-zero")]
    ZeroTileCount,
}

/// Result type for image transform operations
pub type Result<T> = std::result::Result<T, ImageTransformError>;
