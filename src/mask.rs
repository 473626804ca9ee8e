//! Cross-attention mask construction.
//!
//! Aligns image-token occurrences in the text stream with the embedding
//! slots of the processed image tiles. Each occurrence attends from its
//! own position through the following text, up to the next image token;
//! consecutive image tokens share the extended interval. Every image is
//! given a fixed block of `image_seq_len` embedding columns, of which the
//! first `n_tiles * (patches_per_tile + 1)` are real; the remainder cover
//! tile padding and stay unattended.

use ndarray::{s, Array2};
use thiserror::Error;

use crate::sample::EncoderInput;
use crate::tokenizer::TokenId;

/// Mask alignment errors
#[derive(Debug, Error)]
pub enum MaskAlignmentError {
    /// More image tokens in the text than images in the sample. Fatal:
    /// the sample is corrupt or mismatched. The opposite direction
    /// (images without surviving tokens, e.g. after tail truncation) is
    /// tolerated and yields a partially-attended mask.
    #[error("{occurrences} image token occurrences but only {images} images in sample")]
    TooManyImageTokens { occurrences: usize, images: usize },
}

/// Builds the text-position x image-slot attention mask.
#[derive(Debug, Clone)]
pub struct CrossAttentionMaskBuilder {
    patches_per_tile: usize,
    max_num_tiles: usize,
    image_id: TokenId,
}

impl CrossAttentionMaskBuilder {
    /// Create a builder for the given tiling geometry and image token.
    ///
    /// # Errors
    /// Returns a configuration error when the tile size is not an exact
    /// multiple of the patch size.
    pub fn new(
        tile_size: u32,
        patch_size: u32,
        max_num_tiles: usize,
        image_id: TokenId,
    ) -> crate::Result<Self> {
        if patch_size == 0 {
            return Err(crate::Error::Config("patch size must be non-zero".into()));
        }
        if tile_size % patch_size != 0 {
            return Err(crate::Error::Config(format!(
                "tile size {tile_size} is not divisible by patch size {patch_size}"
            )));
        }
        let patches_per_side = (tile_size / patch_size) as usize;
        Ok(Self {
            patches_per_tile: patches_per_side * patches_per_side,
            max_num_tiles,
            image_id,
        })
    }

    /// Patch count per tile, derived from tile and patch size.
    #[must_use]
    pub fn patches_per_tile(&self) -> usize {
        self.patches_per_tile
    }

    /// Embedding columns reserved per image: patches plus one aggregate
    /// slot per tile, at the maximum tile count.
    #[must_use]
    pub fn image_seq_len(&self) -> usize {
        self.max_num_tiles * (self.patches_per_tile + 1)
    }

    /// Attach the cross-attention mask for a tokenized sample.
    ///
    /// Returns `None` when the sample carries no images. Trailing images
    /// with no surviving image token get an all-false block rather than an
    /// error; they are not pruned here.
    ///
    /// # Errors
    /// Returns [`MaskAlignmentError::TooManyImageTokens`] when the text
    /// has more image-token occurrences than the sample has images.
    pub fn build(
        &self,
        tokens: &[TokenId],
        encoder_input: &EncoderInput,
    ) -> Result<Option<Array2<bool>>, MaskAlignmentError> {
        let intervals = self.attention_intervals(tokens);
        let n_images = encoder_input.len();
        if intervals.len() > n_images {
            return Err(MaskAlignmentError::TooManyImageTokens {
                occurrences: intervals.len(),
                images: n_images,
            });
        }
        if n_images == 0 {
            return Ok(None);
        }

        let image_seq_len = self.image_seq_len();
        let mut mask = Array2::from_elem((tokens.len(), n_images * image_seq_len), false);
        for (index, (&(start, stop), n_tiles)) in
            intervals.iter().zip(encoder_input.tile_counts()).enumerate()
        {
            let col_start = index * image_seq_len;
            let col_stop = col_start + n_tiles * (self.patches_per_tile + 1);
            mask.slice_mut(s![start..stop, col_start..col_stop]).fill(true);
        }
        Ok(Some(mask))
    }

    /// Half-open `[start, stop)` text interval attending to each image
    /// token occurrence, in occurrence order. An occurrence attends until
    /// the next image token or the end of the sequence; a run of
    /// consecutive image tokens shares the run's final interval end.
    fn attention_intervals(&self, tokens: &[TokenId]) -> Vec<(usize, usize)> {
        let locations: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|(_, &token)| token == self.image_id)
            .map(|(position, _)| position)
            .collect();
        if locations.is_empty() {
            return Vec::new();
        }

        let mut intervals: Vec<(usize, usize)> =
            locations.windows(2).map(|pair| (pair[0], pair[1])).collect();
        intervals.push((locations[locations.len() - 1], tokens.len()));

        let mut following_stop = tokens.len();
        for interval in intervals.iter_mut().rev() {
            if interval.0 + 1 == interval.1 {
                interval.1 = following_stop;
            }
            following_stop = interval.1;
        }
        intervals
    }
}
