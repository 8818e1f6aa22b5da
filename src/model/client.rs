//! Model client for multimodal inference.
//!
//! Two wire flavors are supported: OpenAI-compatible `/chat/completions` and
//! Gemini `generateContent`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::page::Screenshot;

/// Default number of retry attempts for failed requests.
///
/// Zero: one planner invocation is one round trip.
pub const DEFAULT_MAX_RETRIES: u32 = 0;

/// Default delay between retry attempts in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;

/// Gemini harm categories relaxed to `BLOCK_NONE`.
const GEMINI_HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Model client errors.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Max retries exceeded after {0} attempts: {1}")]
    MaxRetriesExceeded(u32, String),
}

/// Which wire protocol the endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiProvider {
    #[serde(rename = "openai")]
    OpenAiCompatible,
    #[default]
    Gemini,
}

impl fmt::Display for ApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiProvider::OpenAiCompatible => write!(f, "openai"),
            ApiProvider::Gemini => write!(f, "gemini"),
        }
    }
}

impl FromStr for ApiProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "openai-compatible" | "oai" => Ok(ApiProvider::OpenAiCompatible),
            "gemini" | "google" => Ok(ApiProvider::Gemini),
            other => Err(format!("unknown model provider: {}", other)),
        }
    }
}

/// Configuration for the AI model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: ApiProvider,
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Extra top-level fields merged into OpenAI-compatible request bodies.
    pub extra_body: HashMap<String, Value>,
    /// Maximum number of retry attempts for failed requests.
    pub max_retries: u32,
    /// Delay between retry attempts in seconds.
    pub retry_delay_secs: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ApiProvider::Gemini,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            model_name: "gemini-1.5-flash".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
            top_p: 0.85,
            extra_body: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            timeout_secs: 60,
        }
    }
}

impl ModelConfig {
    /// Set the wire protocol.
    pub fn with_provider(mut self, provider: ApiProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Create a new ModelConfig with custom base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Create a new ModelConfig with custom API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Create a new ModelConfig with custom model name.
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Set the maximum number of retry attempts for failed requests.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between retry attempts in seconds.
    pub fn with_retry_delay(mut self, delay_secs: u64) -> Self {
        self.retry_delay_secs = delay_secs;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// A single-turn multimodal request.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub prompt: String,
    pub image: Option<Screenshot>,
}

impl ReasoningRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: Screenshot) -> Self {
        self.image = Some(image);
        self
    }
}

/// Response from the AI model.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Reasoning text, if the model wrapped it in `<think>` tags.
    pub thinking: String,
    /// The answer part of the response.
    pub answer: String,
    pub raw_content: String,
}

impl ModelResponse {
    pub fn from_content(raw_content: impl Into<String>) -> Self {
        let raw_content = raw_content.into();
        let (thinking, answer) = ModelClient::parse_response(&raw_content);
        Self {
            thinking,
            answer,
            raw_content,
        }
    }
}

/// Anything that can answer a [`ReasoningRequest`].
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn complete(&self, request: &ReasoningRequest) -> Result<ModelResponse, ModelError>;
}

/// OpenAI API response structures.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

/// Gemini API response structures.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Client for multimodal reasoning endpoints.
pub struct ModelClient {
    config: ModelConfig,
    client: Client,
}

impl ModelClient {
    /// Create a new ModelClient with the given configuration.
    pub fn new(config: ModelConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { config, client }
    }

    /// Create a new ModelClient with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ModelConfig::default())
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Send a request to the model, retrying transient failures.
    pub async fn request(&self, request: &ReasoningRequest) -> Result<ModelResponse, ModelError> {
        let (url, body) = match self.config.provider {
            ApiProvider::OpenAiCompatible => (
                format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')),
                self.openai_body(request),
            ),
            ApiProvider::Gemini => (
                format!(
                    "{}/models/{}:generateContent",
                    self.config.base_url.trim_end_matches('/'),
                    self.config.model_name
                ),
                self.gemini_body(request),
            ),
        };

        let mut last_error: Option<ModelError> = None;
        let max_attempts = self.config.max_retries + 1; // +1 for the initial attempt

        for attempt in 1..=max_attempts {
            match self.send_request(&url, &body).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let is_retryable = Self::is_retryable_error(&e);

                    if !is_retryable {
                        return Err(e);
                    }
                    if max_attempts == 1 {
                        // No retry budget: surface the transport error as is.
                        return Err(e);
                    }
                    if attempt < max_attempts {
                        warn!(
                            "Request failed (attempt {}/{}): {}. Retrying in {} seconds",
                            attempt, max_attempts, e, self.config.retry_delay_secs
                        );
                        sleep(Duration::from_secs(self.config.retry_delay_secs)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        // All retries exhausted
        Err(ModelError::MaxRetriesExceeded(
            self.config.max_retries,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }

    /// Check if an error is retryable (network errors, timeouts, etc.)
    fn is_retryable_error(error: &ModelError) -> bool {
        match error {
            ModelError::RequestFailed(_) => true,
            ModelError::ApiError(msg) => {
                // Retry on server errors (5xx) or rate limits (429)
                let lower = msg.to_lowercase();
                ["500", "502", "503", "504", "429"]
                    .iter()
                    .any(|code| msg.contains(code))
                    || lower.contains("timeout")
                    || lower.contains("rate limit")
            }
            ModelError::ParseError(_) => false,
            ModelError::MaxRetriesExceeded(_, _) => false,
        }
    }

    fn openai_body(&self, request: &ReasoningRequest) -> Value {
        let messages = [MessageBuilder::create_user_message(
            &request.prompt,
            request.image.as_ref(),
        )];
        let mut body = json!({
            "messages": messages,
            "model": self.config.model_name,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
        });

        if let Value::Object(ref mut map) = body {
            for (key, value) in &self.config.extra_body {
                map.insert(key.clone(), value.clone());
            }
        }
        body
    }

    fn gemini_body(&self, request: &ReasoningRequest) -> Value {
        let mut body = MessageBuilder::create_gemini_contents(&request.prompt, request.image.as_ref());
        if let Value::Object(ref mut map) = body {
            map.insert(
                "generationConfig".to_string(),
                json!({
                    "temperature": self.config.temperature,
                    "topP": self.config.top_p,
                    "maxOutputTokens": self.config.max_tokens,
                }),
            );
        }
        body
    }

    /// Send a single request to the API.
    async fn send_request(&self, url: &str, body: &Value) -> Result<ModelResponse, ModelError> {
        let builder = self.client.post(url).header("Content-Type", "application/json");
        let builder = match self.config.provider {
            ApiProvider::OpenAiCompatible => {
                builder.header("Authorization", format!("Bearer {}", self.config.api_key))
            }
            ApiProvider::Gemini => builder.query(&[("key", self.config.api_key.as_str())]),
        };

        let response = builder.json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelError::ApiError(format!("{} {}", status.as_u16(), error_text)));
        }

        let content = match self.config.provider {
            ApiProvider::OpenAiCompatible => {
                let completion: ChatCompletionResponse = response.json().await?;
                completion
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| ModelError::ParseError("No choices in response".to_string()))?
            }
            ApiProvider::Gemini => {
                let generated: GenerateContentResponse = response.json().await?;
                Self::gemini_text(generated)?
            }
        };

        debug!(chars = content.len(), "Model responded");
        Ok(ModelResponse::from_content(content))
    }

    fn gemini_text(response: GenerateContentResponse) -> Result<String, ModelError> {
        let feedback = response.prompt_feedback.clone();
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ModelError::ParseError(match feedback {
                Some(feedback) => format!("No candidates in response ({})", feedback),
                None => "No candidates in response".to_string(),
            }));
        }
        Ok(text)
    }

    /// Split `<think>...</think><answer>...</answer>` responses.
    fn parse_response(content: &str) -> (String, String) {
        if let Some((before, after)) = content.split_once("<answer>") {
            let thinking = before
                .replace("<think>", "")
                .replace("</think>", "")
                .trim()
                .to_string();
            let answer = after.replace("</answer>", "").trim().to_string();
            return (thinking, answer);
        }

        if let Some((before, after)) = content.split_once("</think>") {
            let thinking = before.replace("<think>", "").trim().to_string();
            return (thinking, after.trim().to_string());
        }

        (String::new(), content.to_string())
    }
}

#[async_trait]
impl ReasoningBackend for ModelClient {
    async fn complete(&self, request: &ReasoningRequest) -> Result<ModelResponse, ModelError> {
        self.request(request).await
    }
}

/// Helper for building request payloads.
pub struct MessageBuilder;

impl MessageBuilder {
    /// Create an OpenAI-style user message with optional image.
    pub fn create_user_message(text: &str, image: Option<&Screenshot>) -> Value {
        let mut content = Vec::new();

        if let Some(image) = image {
            content.push(json!({
                "type": "image_url",
                "image_url": {
                    "url": image.data_url()
                }
            }));
        }

        content.push(json!({
            "type": "text",
            "text": text
        }));

        json!({
            "role": "user",
            "content": content
        })
    }

    /// Create a Gemini `generateContent` body with permissive safety settings.
    pub fn create_gemini_contents(text: &str, image: Option<&Screenshot>) -> Value {
        let mut parts = vec![json!({ "text": text })];

        if let Some(image) = image {
            parts.push(json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": image.base64_data
                }
            }));
        }

        let safety_settings: Vec<Value> = GEMINI_HARM_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
            .collect();

        json!({
            "contents": [{ "parts": parts }],
            "safetySettings": safety_settings
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Screenshot {
        Screenshot::new("aGVsbG8=".to_string(), "image/jpeg", 10, 10)
    }

    #[test]
    fn test_model_config_default() {
        let config = ModelConfig::default();
        assert_eq!(config.provider, ApiProvider::Gemini);
        assert_eq!(config.model_name, "gemini-1.5-flash");
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("OpenAI".parse::<ApiProvider>(), Ok(ApiProvider::OpenAiCompatible));
        assert_eq!("gemini".parse::<ApiProvider>(), Ok(ApiProvider::Gemini));
        assert!("other".parse::<ApiProvider>().is_err());
    }

    #[test]
    fn test_parse_response() {
        let content = "<think>The button is top right</think><answer>{\"action\":\"finish\"}</answer>";
        let (thinking, answer) = ModelClient::parse_response(content);
        assert_eq!(thinking, "The button is top right");
        assert_eq!(answer, "{\"action\":\"finish\"}");

        let (thinking, answer) = ModelClient::parse_response("<think>{maybe}</think> {\"a\":1}");
        assert_eq!(thinking, "{maybe}");
        assert_eq!(answer, "{\"a\":1}");
    }

    #[test]
    fn test_parse_response_no_answer() {
        let content = "some raw content";
        let (thinking, answer) = ModelClient::parse_response(content);
        assert_eq!(thinking, "");
        assert_eq!(answer, "some raw content");
    }

    #[test]
    fn test_openai_user_message() {
        let msg = MessageBuilder::create_user_message("Hello", None);
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"][0]["type"], "text");

        let msg = MessageBuilder::create_user_message("Look at this", Some(&image()));
        assert_eq!(msg["content"][0]["type"], "image_url");
        assert_eq!(
            msg["content"][0]["image_url"]["url"],
            "data:image/jpeg;base64,aGVsbG8="
        );
    }

    #[test]
    fn test_gemini_body() {
        let body = MessageBuilder::create_gemini_contents("Goal", Some(&image()));
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Goal");
        assert_eq!(
            body["contents"][0]["parts"][1]["inline_data"]["mime_type"],
            "image/jpeg"
        );
        let settings = body["safetySettings"].as_array().unwrap();
        assert_eq!(settings.len(), 4);
        assert!(settings.iter().all(|s| s["threshold"] == "BLOCK_NONE"));
    }

    #[test]
    fn test_gemini_text_joins_parts() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"action\":"}, {"text": "\"finish\"}"}]}}]
        }))
        .unwrap();
        assert_eq!(
            ModelClient::gemini_text(response).unwrap(),
            "{\"action\":\"finish\"}"
        );

        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "OTHER"}})).unwrap();
        assert!(ModelClient::gemini_text(blocked).is_err());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ModelClient::is_retryable_error(&ModelError::ApiError(
            "503 overloaded".to_string()
        )));
        assert!(!ModelClient::is_retryable_error(&ModelError::ApiError(
            "400 bad request".to_string()
        )));
        assert!(!ModelClient::is_retryable_error(&ModelError::ParseError(
            "x".to_string()
        )));
    }
}
