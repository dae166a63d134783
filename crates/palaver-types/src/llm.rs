//! Chat history entries and per-call language-model options.

use serde::{Deserialize, Serialize};

/// Speaker of a chat history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One entry of the bounded per-session conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        ChatTurn {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatTurn {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Options applied to a single language-model call.
///
/// Sessions may pin a model, sampling temperature, and completion budget;
/// unset options defer to the provider's own defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmOptions {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

impl Default for LlmOptions {
    fn default() -> Self {
        LlmOptions {
            model: String::new(),
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_role_serializes_snake_case() {
        let json = serde_json::to_string(&ChatTurn::user("hi")).expect("serialize turn");
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn llm_options_default_leaves_sampling_unset() {
        let options = LlmOptions::default();
        assert!(options.model.is_empty());
        assert!(options.temperature.is_none());
        assert!(options.max_tokens.is_none());
        assert!(!options.stream);
    }
}
