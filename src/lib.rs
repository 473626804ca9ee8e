//! Multimodal input preparation for vision-language model training.
//!
//! `preparar` turns role-tagged conversations with embedded images into
//! the exact arrays a vision+text model consumes:
//!
//! - **token ids** and a **loss-visibility mask** from the conversation
//!   tokenizer,
//! - **normalized image tiles** and their **tile-grid descriptors** from
//!   the fixed-grid image transform,
//! - a **cross-attention mask** aligning each image-token occurrence in
//!   the text with its image's embedding slots.
//!
//! [`MultimodalTransform`] composes the three stages into one
//! deterministic sample-level call; each stage can also be used on its
//! own. The [`preference`] module ships the preference-optimization
//! losses used by alignment recipes and shares no call path with the
//! pipeline.
//!
//! # Example
//!
//! ```
//! use preparar::{Message, MultimodalTransform, Role, Sample, TransformConfig, Vocabulary};
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
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Every operation is synchronous and stateless across invocations; the
//! only I/O happens at construction when vocabulary files are loaded. A
//! shared `&MultimodalTransform` may be applied from multiple worker
//! threads, provided callers restrict themselves to read-only transform
//! application.

mod error;
mod message;
mod sample;

pub mod mask;
pub mod preference;
pub mod tokenizer;
pub mod transform;
pub mod vision;

pub use error::{Error, Result};
pub use mask::{CrossAttentionMaskBuilder, MaskAlignmentError};
pub use message::{Content, Message, Role};
pub use preference::{
    ChosenRejectedOutputs, DpoLoss, PreferenceLoss, PreferenceLossOutput, RsoLoss,
    ShapeMismatchError,
};
pub use sample::{EncoderInput, Sample, TransformedSample};
pub use tokenizer::{
    ConversationTokenizer, MessageTokenizer, PromptTemplate, TokenId, TokenizationError,
    TokenizedOutput, Vocabulary,
};
pub use transform::{MultimodalTransform, TransformConfig};
pub use vision::{ImageTransformError, TileGrid, TileTransform, TiledImage};
