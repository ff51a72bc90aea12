// OpenAI-compatible HTTP client for chat completions and moderation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{JudgeService, LlmError, ModerationResult, ModerationService};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_JUDGE_MODEL: &str = "gpt-5-nano";
pub const DEFAULT_MODERATION_MODEL: &str = "omni-moderation-latest";

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    judge_model: String,
    moderation_model: String,
}

impl OpenAiClient {
    /// Every request is bounded by `timeout`; there is no retry.
    pub fn new(
        api_key: &str,
        base_url: &str,
        judge_model: &str,
        moderation_model: &str,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            judge_model: judge_model.to_string(),
            moderation_model: moderation_model.to_string(),
        }
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, LlmError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!("{status}: {error_text}")));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn chat_request(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        response_format: Option<ResponseFormat>,
    ) -> ChatRequest {
        ChatRequest {
            model: self.judge_model.clone(),
            messages: vec![
                Message {
                    role: "system".into(),
                    content: system_prompt.into(),
                },
                Message {
                    role: "user".into(),
                    content: user_prompt.into(),
                },
            ],
            response_format,
        }
    }

    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        let response: ChatResponse = self.post("/chat/completions", &request).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("Invalid API response structure".into()))?;

        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse("Empty response from AI".into()));
        }
        Ok(content)
    }
}

#[async_trait]
impl JudgeService for OpenAiClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        self.complete(self.chat_request(system_prompt, user_prompt, None))
            .await
    }

    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        let format = ResponseFormat {
            kind: "json_object",
        };
        self.complete(self.chat_request(system_prompt, user_prompt, Some(format)))
            .await
    }
}

#[async_trait]
impl ModerationService for OpenAiClient {
    async fn moderate(&self, text: &str) -> Result<ModerationResult, LlmError> {
        let request = ModerationRequest {
            model: self.moderation_model.clone(),
            input: text.to_string(),
        };

        let response: ModerationResponse = self.post("/moderations", &request).await?;

        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No moderation results".into()))
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct ModerationRequest {
    model: String,
    input: String,
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_trims_base_url() {
        let client = OpenAiClient::new(
            "test-key",
            "https://api.example.com/v1/",
            DEFAULT_JUDGE_MODEL,
            DEFAULT_MODERATION_MODEL,
            Duration::from_secs(5),
        );
        assert_eq!(client.base_url, "https://api.example.com/v1");
        assert_eq!(client.judge_model, "gpt-5-nano");
        assert_eq!(client.moderation_model, "omni-moderation-latest");
    }

    #[test]
    fn test_chat_request_response_format() {
        let client = OpenAiClient::new(
            "k",
            DEFAULT_BASE_URL,
            DEFAULT_JUDGE_MODEL,
            DEFAULT_MODERATION_MODEL,
            Duration::from_secs(5),
        );
        let plain = serde_json::to_value(client.chat_request("sys", "user", None)).unwrap();
        assert!(plain.get("response_format").is_none());
        assert_eq!(plain["messages"][1]["content"], "user");

        let format = ResponseFormat {
            kind: "json_object",
        };
        let constrained =
            serde_json::to_value(client.chat_request("sys", "user", Some(format))).unwrap();
        assert_eq!(constrained["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_moderation_response_shape() {
        let json = r#"{"id":"modr-1","model":"omni","results":[{"flagged":true,
            "categories":{"harassment":true,"violence":false},
            "category_scores":{"harassment":0.9}}]}"#;
        let parsed: ModerationResponse = serde_json::from_str(json).unwrap();
        let first = &parsed.results[0];
        assert!(first.flagged);
        assert_eq!(first.categories.get("harassment"), Some(&true));
        assert_eq!(first.categories.get("violence"), Some(&false));
    }

    #[test]
    fn test_chat_response_null_content() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_request_failure() {
        let client = OpenAiClient::new(
            "k",
            "http://127.0.0.1:9",
            DEFAULT_JUDGE_MODEL,
            DEFAULT_MODERATION_MODEL,
            Duration::from_millis(500),
        );
        let err = client.chat("sys", "user").await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
    }
}
