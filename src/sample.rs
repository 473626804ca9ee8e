//! Staged pipeline records.
//!
//! The pipeline never mutates a shared record in place: each stage
//! consumes the previous stage's record and produces a new one with its
//! fields added. [`Sample`] is the caller-built input,
//! [`TransformedSample`] the fully populated output.

use ndarray::{Array2, Array4};

use crate::message::Message;
use crate::vision::{TileGrid, TiledImage};

/// Pipeline input: an ordered conversation.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Ordered messages, owned by the caller and read-only to the pipeline
    pub messages: Vec<Message>,
}

impl Sample {
    /// Wrap a message list as a pipeline input.
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

/// Processed images in encounter order.
///
/// `images` and `aspect_ratio` are parallel sequences: entry `i` of each
/// describes the `i`-th image encountered while scanning messages
/// top-to-bottom and media left-to-right within a message.
#[derive(Debug, Clone, Default)]
pub struct EncoderInput {
    /// One `[n_tiles, 3, tile, tile]` tensor per source image
    pub images: Vec<Array4<f32>>,
    /// One tile-grid descriptor per source image
    pub aspect_ratio: Vec<TileGrid>,
}

impl EncoderInput {
    /// Append one tiled image, preserving the parallel-sequence invariant.
    pub fn push(&mut self, tiled: TiledImage) {
        self.images.push(tiled.tiles);
        self.aspect_ratio.push(tiled.aspect_ratio);
    }

    /// Number of source images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether the sample carried no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Tile count of each image, in encounter order.
    pub fn tile_counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.images.iter().map(|tiles| tiles.shape()[0])
    }
}

/// Fully populated pipeline output.
#[derive(Debug, Clone)]
pub struct TransformedSample {
    /// The caller's messages, carried through unchanged
    pub messages: Vec<Message>,
    /// Processed image tiles and grids, encounter-ordered
    pub encoder_input: EncoderInput,
    /// Token ids
    pub tokens: Vec<u32>,
    /// Loss-visibility mask, parallel to `tokens`
    pub mask: Vec<bool>,
    /// Cross-attention mask, `[tokens.len(), n_images * image_seq_len]`;
    /// absent when the sample carries no images
    pub encoder_mask: Option<Array2<bool>>,
}
