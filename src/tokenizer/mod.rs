//! Conversation tokenization.
//!
//! [`ConversationTokenizer`] turns role-tagged messages into token ids and
//! a loss-visibility mask. Messages are framed with a role header and
//! closed with an end-of-turn marker (end-of-message for tool output);
//! embedded images contribute a single image placeholder token at their
//! position in the content stream. An optional [`PromptTemplate`] wraps
//! message text with structured plain text, and an optional maximum
//! sequence length truncates the sample-level output tail.
//!
//! # Example
//!
//! ```
//! use preparar::tokenizer::{ConversationTokenizer, Vocabulary};
//! use preparar::{Message, Role};
//!
//! # fn main() -> Result<(), preparar::tokenizer::TokenizationError> {
//! let vocab = Vocabulary::new(vec!["hello".into(), " world".into()])?;
//! let tokenizer = ConversationTokenizer::new(vocab)?;
//!
//! let messages = vec![
//!     Message::text(Role::User, "hello world"),
//!     Message::text(Role::Assistant, "hello"),
//! ];
//! let (tokens, mask) = tokenizer.tokenize_messages(&messages, true)?;
//! assert_eq!(tokens.len(), mask.len());
//! # Ok(())
//! # }
//! ```

mod error;
mod template;
mod vocab;

pub use error::{Result, TokenizationError};
pub use template::{PromptTemplate, RoleTemplate};
pub use vocab::{TokenId, Vocabulary};

use std::collections::HashMap;
use std::path::Path;

use crate::message::{Content, Message, Role};
use vocab::Piece;

/// Tokenization capability surface.
///
/// Implemented by [`ConversationTokenizer`] and, by delegation, by
/// [`crate::transform::MultimodalTransform`]; callers that only tokenize
/// can depend on this trait instead of the full transform.
pub trait MessageTokenizer: Send + Sync {
    /// Encode raw text, optionally wrapped in sequence boundary tokens.
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Result<Vec<TokenId>>;

    /// Decode token ids back into text.
    fn decode(
        &self,
        ids: &[TokenId],
        truncate_at_eos: bool,
        skip_special_tokens: bool,
    ) -> Result<String>;

    /// Tokenize a single message.
    fn tokenize_message(
        &self,
        message: &Message,
        add_start_tokens: bool,
        add_end_tokens: bool,
    ) -> Result<Vec<TokenId>>;

    /// Tokenize a message list into ids plus the loss-visibility mask.
    fn tokenize_messages(
        &self,
        messages: &[Message],
        add_end_tokens: bool,
    ) -> Result<(Vec<TokenId>, Vec<bool>)>;
}

/// Sample-level tokenization output: parallel ids and loss mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedOutput {
    /// Token ids
    pub tokens: Vec<TokenId>,
    /// `true` where the loss is computed for the corresponding token
    pub mask: Vec<bool>,
}

/// Message-aware tokenizer over a fixed [`Vocabulary`].
#[derive(Debug, Clone)]
pub struct ConversationTokenizer {
    vocab: Vocabulary,
    max_seq_len: Option<usize>,
    template: Option<PromptTemplate>,
    bos_id: TokenId,
    eos_id: TokenId,
    start_header_id: TokenId,
    end_header_id: TokenId,
    eot_id: TokenId,
    eom_id: TokenId,
    image_id: TokenId,
    pad_id: TokenId,
}

impl ConversationTokenizer {
    /// Wrap a vocabulary, resolving the control-token ids once.
    ///
    /// # Errors
    /// Returns [`TokenizationError::InvalidVocabulary`] if a canonical
    /// special token is missing from the vocabulary's registry.
    pub fn new(vocab: Vocabulary) -> Result<Self> {
        let resolve = |name: &str| {
            vocab.special_id(name).ok_or_else(|| {
                TokenizationError::InvalidVocabulary(format!("missing special token `{name}`"))
            })
        };
        Ok(Self {
            bos_id: resolve(vocab::BEGIN_OF_TEXT)?,
            eos_id: resolve(vocab::END_OF_TEXT)?,
            start_header_id: resolve(vocab::START_HEADER)?,
            end_header_id: resolve(vocab::END_HEADER)?,
            eot_id: resolve(vocab::END_OF_TURN)?,
            eom_id: resolve(vocab::END_OF_MESSAGE)?,
            image_id: resolve(vocab::IMAGE)?,
            pad_id: resolve(vocab::PAD)?,
            vocab,
            max_seq_len: None,
            template: None,
        })
    }

    /// Load the vocabulary from a JSON token list, with an optional JSON
    /// list of additional special tokens.
    ///
    /// # Errors
    /// Returns an error if either file cannot be read or parsed.
    pub fn from_file(
        vocab_path: impl AsRef<Path>,
        special_tokens_path: Option<impl AsRef<Path>>,
    ) -> Result<Self> {
        let mut vocab = Vocabulary::from_file(vocab_path)?;
        if let Some(path) = special_tokens_path {
            let json = std::fs::read_to_string(path.as_ref())?;
            let extra: Vec<String> = serde_json::from_str(&json)?;
            vocab = vocab.with_special_tokens(extra)?;
        }
        Self::new(vocab)
    }

    /// Truncate sample-level output to this many tokens.
    #[must_use]
    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = Some(max_seq_len);
        self
    }

    /// Wrap message text with a prompt template.
    #[must_use]
    pub fn with_prompt_template(mut self, template: PromptTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Count of text and byte tokens.
    #[must_use]
    pub fn base_vocab_size(&self) -> usize {
        self.vocab.base_vocab_size()
    }

    /// Total id count including special tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab.vocab_size()
    }

    /// Ids that terminate generation.
    #[must_use]
    pub fn stop_tokens(&self) -> Vec<TokenId> {
        vec![self.eos_id, self.eot_id, self.eom_id]
    }

    /// Registered special tokens and their ids.
    #[must_use]
    pub fn special_tokens(&self) -> &HashMap<String, TokenId> {
        self.vocab.special_tokens()
    }

    /// Padding token id.
    #[must_use]
    pub fn pad_id(&self) -> TokenId {
        self.pad_id
    }

    /// Image placeholder token id.
    #[must_use]
    pub fn image_id(&self) -> TokenId {
        self.image_id
    }

    /// Configured truncation length, if any.
    #[must_use]
    pub fn max_seq_len(&self) -> Option<usize> {
        self.max_seq_len
    }

    /// Configured prompt template, if any.
    #[must_use]
    pub fn prompt_template(&self) -> Option<&PromptTemplate> {
        self.template.as_ref()
    }

    /// Encode raw text, optionally wrapped in sequence boundary tokens.
    ///
    /// # Errors
    /// Returns [`TokenizationError::SpecialTokenInText`] on embedded
    /// special-token literals.
    pub fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Result<Vec<TokenId>> {
        let mut ids = Vec::new();
        if add_bos {
            ids.push(self.bos_id);
        }
        ids.extend(self.vocab.encode_text(text)?);
        if add_eos {
            ids.push(self.eos_id);
        }
        Ok(ids)
    }

    /// Decode token ids back into text.
    ///
    /// With `truncate_at_eos`, output stops before the first
    /// end-of-sequence token; with `skip_special_tokens`, special tokens
    /// are omitted from the output.
    ///
    /// # Errors
    /// Returns [`TokenizationError::InvalidTokenId`] on out-of-range ids.
    pub fn decode(
        &self,
        ids: &[TokenId],
        truncate_at_eos: bool,
        skip_special_tokens: bool,
    ) -> Result<String> {
        let cut = if truncate_at_eos {
            ids.iter().position(|&id| id == self.eos_id).unwrap_or(ids.len())
        } else {
            ids.len()
        };

        let mut bytes = Vec::new();
        for &id in &ids[..cut] {
            match self.vocab.piece(id)? {
                Piece::Text(s) => bytes.extend_from_slice(s.as_bytes()),
                Piece::Byte(b) => bytes.push(b),
                Piece::Special(s) => {
                    if !skip_special_tokens {
                        bytes.extend_from_slice(s.as_bytes());
                    }
                }
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Tokenize one message.
    ///
    /// With `add_start_tokens`, the message opens with its role header
    /// `<|start_header_id|>{role}<|end_header_id|>\n\n`. Content items are
    /// emitted in order: text runs are encoded (wrapped by the prompt
    /// template when one is configured), each image contributes one image
    /// placeholder token. With `add_end_tokens`, the message closes with
    /// the end-of-turn marker, or end-of-message for tool output.
    ///
    /// # Errors
    /// Propagates text-encoding failures.
    pub fn tokenize_message(
        &self,
        message: &Message,
        add_start_tokens: bool,
        add_end_tokens: bool,
    ) -> Result<Vec<TokenId>> {
        let mut ids = Vec::new();
        if add_start_tokens {
            ids.push(self.start_header_id);
            ids.extend(self.vocab.encode_text(message.role.as_str())?);
            ids.push(self.end_header_id);
            ids.extend(self.vocab.encode_text("\n\n")?);
        }

        let role_template = self
            .template
            .as_ref()
            .and_then(|template| template.role(message.role));
        if let Some(entry) = role_template {
            ids.extend(self.vocab.encode_text(&entry.prefix)?);
        }
        for item in &message.content {
            match item {
                Content::Text(text) => ids.extend(self.vocab.encode_text(text)?),
                Content::Image(_) => ids.push(self.image_id),
            }
        }
        if let Some(entry) = role_template {
            ids.extend(self.vocab.encode_text(&entry.suffix)?);
        }

        if add_end_tokens {
            ids.push(match message.role {
                Role::Tool => self.eom_id,
                _ => self.eot_id,
            });
        }
        Ok(ids)
    }

    /// Tokenize a message list into ids plus the loss-visibility mask.
    ///
    /// The sequence opens with the begin-of-text token. Every message
    /// except the last is always closed; the last message's end marker and
    /// the trailing end-of-sequence token are governed by
    /// `add_end_tokens`, leaving the final turn open for generation when
    /// disabled. `mask[i]` is `true` where token `i` belongs to an
    /// unmasked message.
    ///
    /// # Errors
    /// Propagates text-encoding failures.
    pub fn tokenize_messages(
        &self,
        messages: &[Message],
        add_end_tokens: bool,
    ) -> Result<(Vec<TokenId>, Vec<bool>)> {
        let first_visible = messages.first().map_or(false, |m| !m.masked);
        let mut tokens = vec![self.bos_id];
        let mut mask = vec![first_visible];

        for (index, message) in messages.iter().enumerate() {
            let last = index + 1 == messages.len();
            let ids = self.tokenize_message(message, true, add_end_tokens || !last)?;
            mask.extend(std::iter::repeat(!message.masked).take(ids.len()));
            tokens.extend(ids);
        }

        if add_end_tokens {
            tokens.push(self.eos_id);
            mask.push(messages.last().map_or(false, |m| !m.masked));
        }
        Ok((tokens, mask))
    }

    /// Sample-level tokenization: all messages, end tokens suppressed in
    /// inference mode, output truncated to the configured maximum length.
    ///
    /// # Errors
    /// Propagates text-encoding failures.
    pub fn tokenize_sample(&self, messages: &[Message], inference: bool) -> Result<TokenizedOutput> {
        let (mut tokens, mut mask) = self.tokenize_messages(messages, !inference)?;
        if let Some(max_seq_len) = self.max_seq_len {
            tokens.truncate(max_seq_len);
            mask.truncate(max_seq_len);
        }
        Ok(TokenizedOutput { tokens, mask })
    }
}

impl MessageTokenizer for ConversationTokenizer {
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Result<Vec<TokenId>> {
        ConversationTokenizer::encode(self, text, add_bos, add_eos)
    }

    fn decode(
        &self,
        ids: &[TokenId],
        truncate_at_eos: bool,
        skip_special_tokens: bool,
    ) -> Result<String> {
        ConversationTokenizer::decode(self, ids, truncate_at_eos, skip_special_tokens)
    }

    fn tokenize_message(
        &self,
        message: &Message,
        add_start_tokens: bool,
        add_end_tokens: bool,
    ) -> Result<Vec<TokenId>> {
        ConversationTokenizer::tokenize_message(self, message, add_start_tokens, add_end_tokens)
    }

    fn tokenize_messages(
        &self,
        messages: &[Message],
        add_end_tokens: bool,
    ) -> Result<(Vec<TokenId>, Vec<bool>)> {
        ConversationTokenizer::tokenize_messages(self, messages, add_end_tokens)
    }
}
