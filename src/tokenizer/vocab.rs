//! Token vocabulary with byte fallback and a special-token registry.
//!
//! The vocabulary is a fixed table of text tokens loaded from a JSON list,
//! extended with 256 implicit byte tokens and a registered set of special
//! tokens. Encoding is greedy longest-match over the text tokens with byte
//! fallback, so it is total over valid UTF-8 and decoding is an exact
//! inverse.
//!
//! Id layout: text tokens first, then the 256 byte tokens, then special
//! tokens. `base_vocab_size` counts text and byte tokens; `vocab_size`
//! additionally counts the specials.

use std::collections::HashMap;
use std::path::Path;

use super::error::{Result, TokenizationError};

/// Token ID type
pub type TokenId = u32;

/// Sequence start marker
pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
/// Sequence end marker
pub const END_OF_TEXT: &str = "<|end_of_text|>";
/// Opens a role header
pub const START_HEADER: &str = "<|start_header_id|>";
/// Closes a role header
pub const END_HEADER: &str = "<|end_header_id|>";
/// End of a completed turn
pub const END_OF_TURN: &str = "<|eot_id|>";
/// End of a message that does not end the turn
pub const END_OF_MESSAGE: &str = "<|eom_id|>";
/// Placeholder for one embedded image
pub const IMAGE: &str = "<|image|>";
/// Padding token
pub const PAD: &str = "<|pad|>";

/// Canonical special tokens, in id-assignment order.
const CANONICAL_SPECIAL_TOKENS: [&str; 8] = [
    BEGIN_OF_TEXT,
    END_OF_TEXT,
    START_HEADER,
    END_HEADER,
    END_OF_TURN,
    END_OF_MESSAGE,
    IMAGE,
    PAD,
];

/// A decoded unit of the id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Piece<'a> {
    /// A text token from the loaded table
    Text(&'a str),
    /// A single raw byte from the fallback range
    Byte(u8),
    /// A registered special token
    Special(&'a str),
}

/// Fixed token table with byte fallback and special tokens.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    token_to_id: HashMap<String, TokenId>,
    tokens: Vec<String>,
    special_to_id: HashMap<String, TokenId>,
    special_names: Vec<String>,
    max_token_bytes: usize,
}

impl Vocabulary {
    /// Build a vocabulary from a list of text tokens, with the canonical
    /// special-token set registered.
    ///
    /// # Errors
    /// Returns [`TokenizationError::InvalidVocabulary`] on empty or
    /// duplicate tokens, or tokens that collide with the reserved byte or
    /// special ranges.
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        let mut token_to_id = HashMap::with_capacity(tokens.len());
        let mut max_token_bytes = 0;
        for (id, token) in tokens.iter().enumerate() {
            if token.is_empty() {
                return Err(TokenizationError::InvalidVocabulary(
                    "empty token string".into(),
                ));
            }
            if is_byte_token(token) || CANONICAL_SPECIAL_TOKENS.contains(&token.as_str()) {
                return Err(TokenizationError::InvalidVocabulary(format!(
                    "token `{token}` collides with a reserved token"
                )));
            }
            if token_to_id.insert(token.clone(), id as TokenId).is_some() {
                return Err(TokenizationError::InvalidVocabulary(format!(
                    "duplicate token `{token}`"
                )));
            }
            max_token_bytes = max_token_bytes.max(token.len());
        }

        let mut vocab = Self {
            token_to_id,
            tokens,
            special_to_id: HashMap::new(),
            special_names: Vec::new(),
            max_token_bytes,
        };
        for name in CANONICAL_SPECIAL_TOKENS {
            vocab.register_special(name)?;
        }
        Ok(vocab)
    }

    /// Load the token list from a JSON file containing an array of strings.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or the token
    /// list is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let tokens: Vec<String> = serde_json::from_str(&json)?;
        Self::new(tokens)
    }

    /// Register additional special tokens after the canonical set.
    ///
    /// # Errors
    /// Returns [`TokenizationError::InvalidVocabulary`] on duplicates or
    /// collisions with existing tokens.
    pub fn with_special_tokens(mut self, extra: Vec<String>) -> Result<Self> {
        for name in &extra {
            self.register_special(name)?;
        }
        Ok(self)
    }

    fn register_special(&mut self, name: &str) -> Result<()> {
        if name.is_empty() || is_byte_token(name) || self.token_to_id.contains_key(name) {
            return Err(TokenizationError::InvalidVocabulary(format!(
                "special token `{name}` collides with an existing token"
            )));
        }
        let id = self.base_vocab_size() as TokenId + self.special_names.len() as TokenId;
        if self.special_to_id.insert(name.to_string(), id).is_some() {
            return Err(TokenizationError::InvalidVocabulary(format!(
                "duplicate special token `{name}`"
            )));
        }
        self.special_names.push(name.to_string());
        Ok(())
    }

    /// Count of text and byte tokens.
    #[must_use]
    pub fn base_vocab_size(&self) -> usize {
        self.tokens.len() + 256
    }

    /// Total id count including special tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.base_vocab_size() + self.special_names.len()
    }

    /// Registered special tokens and their ids.
    #[must_use]
    pub fn special_tokens(&self) -> &HashMap<String, TokenId> {
        &self.special_to_id
    }

    /// Id of a registered special token.
    #[must_use]
    pub fn special_id(&self, name: &str) -> Option<TokenId> {
        self.special_to_id.get(name).copied()
    }

    /// Whether an id falls in the special range.
    #[must_use]
    pub fn is_special(&self, id: TokenId) -> bool {
        (id as usize) >= self.base_vocab_size() && (id as usize) < self.vocab_size()
    }

    /// Encode raw text by greedy longest-match with byte fallback.
    ///
    /// Special tokens are never produced from raw text; text containing a
    /// registered special-token literal is rejected so that untrusted
    /// content cannot forge control tokens.
    ///
    /// # Errors
    /// Returns [`TokenizationError::SpecialTokenInText`] on embedded
    /// special-token literals.
    pub fn encode_text(&self, text: &str) -> Result<Vec<TokenId>> {
        for name in &self.special_names {
            if text.contains(name.as_str()) {
                return Err(TokenizationError::SpecialTokenInText(name.clone()));
            }
        }

        let mut ids = Vec::new();
        let mut rest = text;
        while !rest.is_empty() {
            match self.longest_match(rest) {
                Some((id, len)) => {
                    ids.push(id);
                    rest = &rest[len..];
                }
                None => {
                    let Some(ch) = rest.chars().next() else { break };
                    let mut buf = [0u8; 4];
                    for &byte in ch.encode_utf8(&mut buf).as_bytes() {
                        ids.push(self.byte_id(byte));
                    }
                    rest = &rest[ch.len_utf8()..];
                }
            }
        }
        Ok(ids)
    }

    /// Longest text token matching a prefix of `rest`, if any.
    fn longest_match(&self, rest: &str) -> Option<(TokenId, usize)> {
        let mut end = rest.len().min(self.max_token_bytes);
        while end > 0 {
            if rest.is_char_boundary(end) {
                if let Some(&id) = self.token_to_id.get(&rest[..end]) {
                    return Some((id, end));
                }
            }
            end -= 1;
        }
        None
    }

    /// Id of the byte-fallback token for `byte`.
    #[must_use]
    pub fn byte_id(&self, byte: u8) -> TokenId {
        self.tokens.len() as TokenId + TokenId::from(byte)
    }

    /// Resolve an id to its decoded unit.
    pub(crate) fn piece(&self, id: TokenId) -> Result<Piece<'_>> {
        let idx = id as usize;
        if idx < self.tokens.len() {
            Ok(Piece::Text(&self.tokens[idx]))
        } else if idx < self.base_vocab_size() {
            Ok(Piece::Byte((idx - self.tokens.len()) as u8))
        } else if idx < self.vocab_size() {
            Ok(Piece::Special(&self.special_names[idx - self.base_vocab_size()]))
        } else {
            Err(TokenizationError::InvalidTokenId(id))
        }
    }
}

/// Reserved `<0xNN>` byte-token spelling, rejected in loaded tables.
fn is_byte_token(token: &str) -> bool {
    token.len() == 6 && token.starts_with("<0x") && token.ends_with('>')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::new(vec![
            "hello".into(),
            "hell".into(),
            " world".into(),
            "lo".into(),
        ])
        .unwrap()
    }

    #[test]
    fn test_id_layout() {
        let v = vocab();
        assert_eq!(v.base_vocab_size(), 4 + 256);
        assert_eq!(v.vocab_size(), 4 + 256 + 8);
        assert_eq!(v.special_id(BEGIN_OF_TEXT), Some(260));
        assert_eq!(v.special_id(PAD), Some(267));
    }

    #[test]
    fn test_longest_match_wins() {
        let v = vocab();
        // "hello" must match as one token, not "hell" + byte fallback
        assert_eq!(v.encode_text("hello").unwrap(), vec![0]);
        assert_eq!(v.encode_text("hello world").unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_byte_fallback_progresses() {
        let v = vocab();
        let ids = v.encode_text("hi").unwrap();
        assert_eq!(ids, vec![v.byte_id(b'h'), v.byte_id(b'i')]);
    }

    #[test]
    fn test_multibyte_char_fallback() {
        let v = vocab();
        let ids = v.encode_text("é").unwrap();
        // U+00E9 is two UTF-8 bytes
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_special_literal_rejected() {
        let v = vocab();
        let err = v.encode_text("hi <|image|> there").unwrap_err();
        assert!(matches!(err, TokenizationError::SpecialTokenInText(_)));
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let err = Vocabulary::new(vec!["a".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, TokenizationError::InvalidVocabulary(_)));
    }

    #[test]
    fn test_reserved_spelling_rejected() {
        assert!(Vocabulary::new(vec!["<0x41>".into()]).is_err());
        assert!(Vocabulary::new(vec!["<|image|>".into()]).is_err());
        assert!(Vocabulary::new(vec![String::new()]).is_err());
    }

    #[test]
    fn test_extra_special_tokens() {
        let v = vocab().with_special_tokens(vec!["<|tool_call|>".into()]).unwrap();
        assert_eq!(v.special_id("<|tool_call|>"), Some(268));
        assert_eq!(v.vocab_size(), 4 + 256 + 9);
    }

    #[test]
    fn test_piece_resolution() {
        let v = vocab();
        assert_eq!(v.piece(0).unwrap(), Piece::Text("hello"));
        assert_eq!(v.piece(v.byte_id(b'A')).unwrap(), Piece::Byte(b'A'));
        let image_id = v.special_id(IMAGE).unwrap();
        assert_eq!(v.piece(image_id).unwrap(), Piece::Special(IMAGE));
        assert!(matches!(
            v.piece(v.vocab_size() as TokenId),
            Err(TokenizationError::InvalidTokenId(_))
        ));
    }
}
