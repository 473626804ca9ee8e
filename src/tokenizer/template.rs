//! Prompt templates.
//!
//! A template wraps a message's text content with per-role structured
//! text. The wrapping text is tokenized as plain text, never as special
//! tokens.

use serde::{Deserialize, Serialize};

use crate::message::Role;

/// Prefix/suffix pair wrapped around one role's message text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTemplate {
    /// Text inserted before the message content
    #[serde(default)]
    pub prefix: String,
    /// Text appended after the message content
    #[serde(default)]
    pub suffix: String,
}

/// Per-role structured text applied around message content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub system: Option<RoleTemplate>,
    #[serde(default)]
    pub user: Option<RoleTemplate>,
    #[serde(default)]
    pub assistant: Option<RoleTemplate>,
    #[serde(default)]
    pub tool: Option<RoleTemplate>,
}

impl PromptTemplate {
    /// Empty template: all roles pass through unchanged.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prefix/suffix pair for one role.
    #[must_use]
    pub fn with_role(mut self, role: Role, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        let entry = RoleTemplate {
            prefix: prefix.into(),
            suffix: suffix.into(),
        };
        match role {
            Role::System => self.system = Some(entry),
            Role::User => self.user = Some(entry),
            Role::Assistant => self.assistant = Some(entry),
            Role::Tool => self.tool = Some(entry),
        }
        self
    }

    /// The template registered for a role, if any.
    #[must_use]
    pub fn role(&self, role: Role) -> Option<&RoleTemplate> {
        match role {
            Role::System => self.system.as_ref(),
            Role::User => self.user.as_ref(),
            Role::Assistant => self.assistant.as_ref(),
            Role::Tool => self.tool.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_template_passes_through() {
        let template = PromptTemplate::new();
        assert!(template.role(Role::User).is_none());
    }

    #[test]
    fn test_with_role() {
        let template = PromptTemplate::new().with_role(Role::User, "[INST] ", " [/INST]");
        let entry = template.role(Role::User).unwrap();
        assert_eq!(entry.prefix, "[INST] ");
        assert_eq!(entry.suffix, " [/INST]");
        assert!(template.role(Role::Assistant).is_none());
    }

    #[test]
    fn test_template_serde_roundtrip() {
        let template = PromptTemplate::new().with_role(Role::System, "## ", "\n");
        let json = serde_json::to_string(&template).unwrap();
        let back: PromptTemplate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, template);
    }
}
