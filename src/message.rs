//! Conversation data model.
//!
//! A [`Message`] is an ordered, role-tagged unit of conversation content:
//! interleaved text runs and embedded images. Messages are owned by the
//! caller and never mutated by the pipeline.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Speaker role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// Human turn
    User,
    /// Model turn
    Assistant,
    /// Tool/function output fed back to the model
    Tool,
}

impl Role {
    /// Canonical lowercase name, as emitted in message headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single content item within a message.
#[derive(Debug, Clone)]
pub enum Content {
    /// A run of plain text
    Text(String),
    /// An embedded raw image, processed into tiles by the pipeline
    Image(DynamicImage),
}

/// One role-tagged conversation turn.
#[derive(Debug, Clone)]
pub struct Message {
    /// Speaker role
    pub role: Role,
    /// Ordered content items (text runs and images)
    pub content: Vec<Content>,
    /// When true, this message's tokens are excluded from the loss
    pub masked: bool,
}

impl Message {
    /// Create a message from ordered content items.
    ///
    /// Non-assistant messages are masked from the loss by default, the
    /// usual supervised fine-tuning convention.
    #[must_use]
    pub fn new(role: Role, content: Vec<Content>) -> Self {
        Self {
            role,
            content,
            masked: role != Role::Assistant,
        }
    }

    /// Create a text-only message.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Content::Text(text.into())])
    }

    /// Override the loss-masking flag.
    #[must_use]
    pub fn with_masked(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    /// Embedded images, in content order.
    pub fn media(&self) -> impl Iterator<Item = &DynamicImage> {
        self.content.iter().filter_map(|item| match item {
            Content::Image(image) => Some(image),
            Content::Text(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_names() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
        assert_eq!(Role::Tool.as_str(), "tool");
    }

    #[test]
    fn test_default_masking_follows_role() {
        assert!(Message::text(Role::User, "hi").masked);
        assert!(Message::text(Role::System, "hi").masked);
        assert!(!Message::text(Role::Assistant, "hi").masked);
    }

    #[test]
    fn test_with_masked_override() {
        let msg = Message::text(Role::User, "hi").with_masked(false);
        assert!(!msg.masked);
    }

    #[test]
    fn test_media_iterates_images_in_order() {
        let img = DynamicImage::new_rgb8(4, 4);
        let msg = Message::new(
            Role::User,
            vec![
                Content::Text("before".into()),
                Content::Image(img.clone()),
                Content::Text("between".into()),
                Content::Image(img),
            ],
        );
        assert_eq!(msg.media().count(), 2);
    }

    #[test]
    fn test_role_serde_roundtrip() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(role, Role::Assistant);
    }
}
