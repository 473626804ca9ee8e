//! End-to-end multimodal transform.
//!
//! [`MultimodalTransform`] composes the conversation tokenizer, the image
//! tile transform, and the cross-attention mask builder into one
//! deterministic sample-level call. It also exposes the full tokenization
//! surface by delegation, so recipes can use it wherever a tokenizer is
//! expected.
//!
//! # Example
//!
//! ```
//! use preparar::{
//!     Message, MultimodalTransform, Role, Sample, TransformConfig, Vocabulary,
//! };
//!
//! # fn main() -> preparar::Result<()> {
//! let vocab = Vocabulary::new(vec!["hello".into(), " world".into()])?;
//! let transform = MultimodalTransform::new(vocab, TransformConfig::new(224, 14))?;
//!
//! let sample = Sample::new(vec![
//!     Message::text(Role::User, "hello world"),
//!     Message::text(Role::Assistant, "hello"),
//! ]);
//! let out = transform.apply(sample, false)?;
//! assert_eq!(out.tokens.len(), out.mask.len());
//! assert!(out.encoder_mask.is_none());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::mask::CrossAttentionMaskBuilder;
use crate::message::Message;
use crate::sample::{EncoderInput, Sample, TransformedSample};
use crate::tokenizer::{
    ConversationTokenizer, MessageTokenizer, PromptTemplate, TokenId, TokenizedOutput, Vocabulary,
};
use crate::vision::TileTransform;

/// Construction parameters for [`MultimodalTransform`].
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// Vision-encoder patch edge length in pixels
    pub patch_size: u32,
    /// Maximum tiles an image may be split into
    pub max_num_tiles: usize,
    /// Truncate tokenized samples to this length
    pub max_seq_len: Option<usize>,
    /// Per-channel normalization mean
    pub image_mean: Option<[f32; 3]>,
    /// Per-channel normalization std
    pub image_std: Option<[f32; 3]>,
    /// Structured text wrapped around message content
    pub prompt_template: Option<PromptTemplate>,
}

impl TransformConfig {
    /// Config with the given tiling geometry and default limits.
    #[must_use]
    pub fn new(tile_size: u32, patch_size: u32) -> Self {
        Self {
            tile_size,
            patch_size,
            max_num_tiles: 4,
            max_seq_len: None,
            image_mean: None,
            image_std: None,
            prompt_template: None,
        }
    }

    /// Set the maximum tile count.
    #[must_use]
    pub fn with_max_num_tiles(mut self, max_num_tiles: usize) -> Self {
        self.max_num_tiles = max_num_tiles;
        self
    }

    /// Set the truncation length.
    #[must_use]
    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = Some(max_seq_len);
        self
    }

    /// Set per-channel normalization statistics.
    #[must_use]
    pub fn with_normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.image_mean = Some(mean);
        self.image_std = Some(std);
        self
    }

    /// Set the prompt template.
    #[must_use]
    pub fn with_prompt_template(mut self, template: PromptTemplate) -> Self {
        self.prompt_template = Some(template);
        self
    }
}

/// Orchestrates tokenization, image tiling, and mask construction.
///
/// Holds no interior mutability: applying the transform from multiple
/// threads through a shared reference is safe as long as callers restrict
/// themselves to read-only transform application.
#[derive(Debug, Clone)]
pub struct MultimodalTransform {
    tokenizer: ConversationTokenizer,
    tile_transform: TileTransform,
    mask_builder: CrossAttentionMaskBuilder,
    max_num_tiles: usize,
    image_seq_len: usize,
}

impl MultimodalTransform {
    /// Build the transform around an already-loaded vocabulary.
    ///
    /// # Errors
    /// Returns a configuration error on invalid tiling geometry.
    pub fn new(vocab: Vocabulary, config: TransformConfig) -> Result<Self> {
        Self::assemble(ConversationTokenizer::new(vocab)?, config)
    }

    /// Load the vocabulary (and optional special-token list) from JSON
    /// files and build the transform.
    ///
    /// # Errors
    /// Returns an error if a file cannot be read or parsed, or the
    /// geometry is invalid.
    pub fn from_file(
        vocab_path: impl AsRef<Path>,
        special_tokens_path: Option<impl AsRef<Path>>,
        config: TransformConfig,
    ) -> Result<Self> {
        Self::assemble(
            ConversationTokenizer::from_file(vocab_path, special_tokens_path)?,
            config,
        )
    }

    fn assemble(mut tokenizer: ConversationTokenizer, config: TransformConfig) -> Result<Self> {
        if let Some(max_seq_len) = config.max_seq_len {
            tokenizer = tokenizer.with_max_seq_len(max_seq_len);
        }
        if let Some(template) = config.prompt_template.clone() {
            tokenizer = tokenizer.with_prompt_template(template);
        }

        let tile_transform = TileTransform::new(
            config.tile_size,
            config.max_num_tiles,
            config.image_mean,
            config.image_std,
        )?;
        let mask_builder = CrossAttentionMaskBuilder::new(
            config.tile_size,
            config.patch_size,
            config.max_num_tiles,
            tokenizer.image_id(),
        )?;
        let image_seq_len = mask_builder.image_seq_len();

        Ok(Self {
            tokenizer,
            tile_transform,
            mask_builder,
            max_num_tiles: config.max_num_tiles,
            image_seq_len,
        })
    }

    /// Run the full pipeline over one sample.
    ///
    /// Images are tiled in encounter order, the conversation is tokenized
    /// (with template application and tail truncation), and the
    /// cross-attention mask is attached. The caller's messages come back
    /// unchanged in the output record. When truncation drops trailing
    /// image tokens the corresponding images stay in `encoder_input`
    /// unattended; they are not pruned here.
    ///
    /// # Errors
    /// Propagates the failing stage's error; any failure aborts the whole
    /// sample.
    pub fn apply(&self, sample: Sample, inference: bool) -> Result<TransformedSample> {
        let mut encoder_input = EncoderInput::default();
        for message in &sample.messages {
            for image in message.media() {
                encoder_input.push(self.tile_transform.apply(image, inference)?);
            }
        }
        debug!(images = encoder_input.len(), "collected encoder input");

        let TokenizedOutput { tokens, mask } =
            self.tokenizer.tokenize_sample(&sample.messages, inference)?;
        debug!(tokens = tokens.len(), "tokenized sample");

        let encoder_mask = self.mask_builder.build(&tokens, &encoder_input)?;

        Ok(TransformedSample {
            messages: sample.messages,
            encoder_input,
            tokens,
            mask,
            encoder_mask,
        })
    }

    /// Encode raw text, optionally wrapped in sequence boundary tokens.
    ///
    /// # Errors
    /// Propagates tokenizer failures.
    pub fn encode(
        &self,
        text: &str,
        add_bos: bool,
        add_eos: bool,
    ) -> crate::tokenizer::Result<Vec<TokenId>> {
        self.tokenizer.encode(text, add_bos, add_eos)
    }

    /// Decode token ids back into text.
    ///
    /// # Errors
    /// Propagates tokenizer failures.
    pub fn decode(
        &self,
        ids: &[TokenId],
        truncate_at_eos: bool,
        skip_special_tokens: bool,
    ) -> crate::tokenizer::Result<String> {
        self.tokenizer.decode(ids, truncate_at_eos, skip_special_tokens)
    }

    /// Tokenize a single message.
    ///
    /// # Errors
    /// Propagates tokenizer failures.
    pub fn tokenize_message(
        &self,
        message: &Message,
        add_start_tokens: bool,
        add_end_tokens: bool,
    ) -> crate::tokenizer::Result<Vec<TokenId>> {
        self.tokenizer
            .tokenize_message(message, add_start_tokens, add_end_tokens)
    }

    /// Tokenize a message list into ids plus the loss-visibility mask.
    ///
    /// # Errors
    /// Propagates tokenizer failures.
    pub fn tokenize_messages(
        &self,
        messages: &[Message],
        add_end_tokens: bool,
    ) -> crate::tokenizer::Result<(Vec<TokenId>, Vec<bool>)> {
        self.tokenizer.tokenize_messages(messages, add_end_tokens)
    }

    /// Count of text and byte tokens. Live read-through to the tokenizer.
    #[must_use]
    pub fn base_vocab_size(&self) -> usize {
        self.tokenizer.base_vocab_size()
    }

    /// Total id count including special tokens. Live read-through.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.vocab_size()
    }

    /// Ids that terminate generation. Live read-through.
    #[must_use]
    pub fn stop_tokens(&self) -> Vec<TokenId> {
        self.tokenizer.stop_tokens()
    }

    /// Registered special tokens and their ids. Live read-through.
    #[must_use]
    pub fn special_tokens(&self) -> &HashMap<String, TokenId> {
        self.tokenizer.special_tokens()
    }

    /// Padding token id. Live read-through.
    #[must_use]
    pub fn pad_id(&self) -> TokenId {
        self.tokenizer.pad_id()
    }

    /// Configured truncation length, if any. Live read-through.
    #[must_use]
    pub fn max_seq_len(&self) -> Option<usize> {
        self.tokenizer.max_seq_len()
    }

    /// Maximum tiles an image may be split into.
    #[must_use]
    pub fn max_num_tiles(&self) -> usize {
        self.max_num_tiles
    }

    /// Embedding slots reserved per image:
    /// `max_num_tiles * (patches_per_tile + 1)`.
    #[must_use]
    pub fn image_seq_len(&self) -> usize {
        self.image_seq_len
    }

    /// Configured prompt template, if any. Live read-through.
    #[must_use]
    pub fn prompt_template(&self) -> Option<&PromptTemplate> {
        self.tokenizer.prompt_template()
    }
}

impl MessageTokenizer for MultimodalTransform {
    fn encode(
        &self,
        text: &str,
        add_bos: bool,
        add_eos: bool,
    ) -> crate::tokenizer::Result<Vec<TokenId>> {
        MultimodalTransform::encode(self, text, add_bos, add_eos)
    }

    fn decode(
        &self,
        ids: &[TokenId],
        truncate_at_eos: bool,
        skip_special_tokens: bool,
    ) -> crate::tokenizer::Result<String> {
        MultimodalTransform::decode(self, ids, truncate_at_eos, skip_special_tokens)
    }

    fn tokenize_message(
        &self,
        message: &Message,
        add_start_tokens: bool,
        add_end_tokens: bool,
    ) -> crate::tokenizer::Result<Vec<TokenId>> {
        MultimodalTransform::tokenize_message(self, message, add_start_tokens, add_end_tokens)
    }

    fn tokenize_messages(
        &self,
        messages: &[Message],
        add_end_tokens: bool,
    ) -> crate::tokenizer::Result<(Vec<TokenId>, Vec<bool>)> {
        MultimodalTransform::tokenize_messages(self, messages, add_end_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Content, Role};
    use image::DynamicImage;

    fn transform() -> MultimodalTransform {
        let vocab = Vocabulary::new(vec!["hello".into(), " world".into()]).unwrap();
        // 28/14 -> patches_per_tile = 4
        MultimodalTransform::new(vocab, TransformConfig::new(28, 14)).unwrap()
    }

    #[test]
    fn test_image_seq_len_formula() {
        let t = transform();
        assert_eq!(t.image_seq_len(), t.max_num_tiles() * (4 + 1));
    }

    #[test]
    fn test_read_through_accessors() {
        let t = transform();
        assert_eq!(t.base_vocab_size(), 2 + 256);
        assert_eq!(t.vocab_size(), 2 + 256 + 8);
        assert_eq!(t.stop_tokens().len(), 3);
        assert_eq!(t.special_tokens().len(), 8);
        assert!(t.max_seq_len().is_none());
        assert!(t.prompt_template().is_none());
        assert_eq!(t.max_num_tiles(), 4);
    }

    #[test]
    fn test_config_builders() {
        let config = TransformConfig::new(28, 14)
            .with_max_num_tiles(2)
            .with_max_seq_len(64)
            .with_normalization([0.5; 3], [0.5; 3]);
        assert_eq!(config.max_num_tiles, 2);
        assert_eq!(config.max_seq_len, Some(64));
        let vocab = Vocabulary::new(vec![]).unwrap();
        let t = MultimodalTransform::new(vocab, config).unwrap();
        assert_eq!(t.max_seq_len(), Some(64));
        assert_eq!(t.image_seq_len(), 2 * (4 + 1));
    }

    #[test]
    fn test_invalid_geometry_is_config_error() {
        let vocab = Vocabulary::new(vec![]).unwrap();
        let err = MultimodalTransform::new(vocab, TransformConfig::new(30, 14)).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_apply_without_images() {
        let t = transform();
        let sample = Sample::new(vec![
            Message::text(Role::User, "hello"),
            Message::text(Role::Assistant, " world"),
        ]);
        let out = t.apply(sample, false).unwrap();
        assert!(out.encoder_input.is_empty());
        assert!(out.encoder_input.aspect_ratio.is_empty());
        assert!(out.encoder_mask.is_none());
        assert_eq!(out.tokens.len(), out.mask.len());
        assert_eq!(out.messages.len(), 2);
    }

    #[test]
    fn test_apply_collects_images_in_encounter_order() {
        let t = transform();
        let wide = DynamicImage::new_rgb8(56, 28);
        let square = DynamicImage::new_rgb8(28, 28);
        let sample = Sample::new(vec![
            Message::new(
                Role::User,
                vec![
                    Content::Text("hello".into()),
                    Content::Image(wide),
                    Content::Image(square),
                ],
            ),
            Message::text(Role::Assistant, " world"),
        ]);
        let out = t.apply(sample, false).unwrap();

        assert_eq!(out.encoder_input.len(), 2);
        assert_eq!(
            out.encoder_input.images.len(),
            out.encoder_input.aspect_ratio.len()
        );
        // wide image first: 1x2 grid, then the single-tile square
        assert_eq!(out.encoder_input.aspect_ratio[0].n_tiles(), 2);
        assert_eq!(out.encoder_input.aspect_ratio[1].n_tiles(), 1);

        let mask = out.encoder_mask.unwrap();
        assert_eq!(mask.shape(), &[out.tokens.len(), 2 * t.image_seq_len()]);
    }

    #[test]
    fn test_apply_is_deterministic_in_inference_mode() {
        let t = transform();
        let img = DynamicImage::new_rgb8(40, 40);
        let build = || {
            Sample::new(vec![Message::new(
                Role::User,
                vec![Content::Text("hello".into()), Content::Image(img.clone())],
            )])
        };
        let a = t.apply(build(), true).unwrap();
        let b = t.apply(build(), true).unwrap();
        assert_eq!(a.tokens, b.tokens);
        assert_eq!(a.encoder_mask, b.encoder_mask);
    }

    #[test]
    fn test_truncation_leaves_encoder_input_untouched() {
        let vocab = Vocabulary::new(vec![]).unwrap();
        let t = MultimodalTransform::new(
            vocab,
            TransformConfig::new(28, 14).with_max_seq_len(4),
        )
        .unwrap();
        let sample = Sample::new(vec![Message::new(
            Role::User,
            vec![
                Content::Text("a long run of text that will be cut".into()),
                Content::Image(DynamicImage::new_rgb8(28, 28)),
            ],
        )]);
        // the image token is truncated away; the image itself survives
        let out = t.apply(sample, false).unwrap();
        assert_eq!(out.tokens.len(), 4);
        assert_eq!(out.encoder_input.len(), 1);
        let mask = out.encoder_mask.unwrap();
        assert_eq!(mask.shape(), &[4, t.image_seq_len()]);
        assert!(mask.iter().all(|&m| !m));
    }

    #[test]
    fn test_trait_delegation_matches_inherent() {
        let t = transform();
        let via_trait =
            <MultimodalTransform as MessageTokenizer>::encode(&t, "hello", true, true).unwrap();
        let direct = t.encode("hello", true, true).unwrap();
        assert_eq!(via_trait, direct);
        assert_eq!(t.decode(&direct, true, true).unwrap(), "hello");
    }
}
