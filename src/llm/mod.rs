// Capability boundary for the external judgment and moderation services.
//
// The game core only ever sees these two traits; `openai` provides the
// HTTP-backed implementation.

pub mod openai;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::OpenAiClient;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Service not configured")]
    NotConfigured,
}

/// Result of a content-safety classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModerationResult {
    pub flagged: bool,
    #[serde(default)]
    pub categories: HashMap<String, bool>,
}

/// Free-form chat completion used for spell judgment and healing
/// classification.
#[async_trait]
pub trait JudgeService: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError>;

    /// Like `chat`, but asks the service to constrain the reply to a single
    /// JSON object where it supports that.
    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        self.chat(system_prompt, user_prompt).await
    }
}

#[async_trait]
pub trait ModerationService: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationResult, LlmError>;
}

/// Pull the outermost `{...}` span out of a model reply that may carry
/// surrounding prose. Returns the trimmed reply unchanged when no span exists.
pub fn extract_json_object(reply: &str) -> &str {
    let trimmed = reply.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_plain() {
        assert_eq!(extract_json_object(r#" {"a":1} "#), r#"{"a":1}"#);
    }

    #[test]
    fn test_extract_json_object_with_prose() {
        let reply = "Sure! Here is the verdict:\n{\"a\": {\"b\": 2}}\nGood luck.";
        assert_eq!(extract_json_object(reply), "{\"a\": {\"b\": 2}}");
    }

    #[test]
    fn test_extract_json_object_without_braces() {
        assert_eq!(extract_json_object("  no json here "), "no json here");
        assert_eq!(extract_json_object("} backwards {"), "} backwards {");
    }

    #[test]
    fn test_moderation_result_deserializes_sparse() {
        let r: ModerationResult = serde_json::from_str(r#"{"flagged":false}"#).unwrap();
        assert!(!r.flagged);
        assert!(r.categories.is_empty());
    }
}
