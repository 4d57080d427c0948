//! OpenAI-compatible chat-completions backend for answers and translation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use parley_core::config::BackendConfig;
use parley_core::types::{Language, Role};

use crate::generator::{AnswerGenerator, FragmentStream, GenerationError, GenerationRequest};
use crate::translate::{TranslationError, Translator};

#[derive(Debug, Clone, Serialize, PartialEq)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
    delta: Option<CompletionMessage>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn read_api_key(config: &BackendConfig) -> Option<String> {
    std::env::var(&config.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
}

async fn post_completion(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    body: &ChatCompletionRequest<'_>,
) -> Result<reqwest::Response, String> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| format!("failed to reach {}: {}", url, e))?;

    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) => Err(format!("HTTP {}: {}", status, body.error.message)),
        Err(_) => Err(format!("HTTP {}: {}", status, text)),
    }
}

/// Parse one server-sent-event line of a streaming completion.
///
/// Returns `None` for lines that carry no text (comments, keep-alives, role
/// deltas and the `[DONE]` sentinel).
fn parse_stream_line(line: &str) -> Option<Result<String, GenerationError>> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<ChatCompletionResponse>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
            .map(Ok),
        Err(e) => Some(Err(GenerationError::Protocol(format!(
            "failed to parse stream chunk: {}",
            e
        )))),
    }
}

// =============================================================================
// Generator
// =============================================================================

/// Streams answers from a chat-completions endpoint.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let defaults = BackendConfig::default();
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: defaults.base_url,
            system_prompt: defaults.system_prompt,
        }
    }

    /// Build from configuration, reading the API key from the configured
    /// environment variable.
    pub fn from_config(config: &BackendConfig) -> Result<Self, GenerationError> {
        let api_key = read_api_key(config).ok_or_else(|| {
            GenerationError::Unavailable(format!("{} is not set", config.api_key_env))
        })?;
        Ok(Self::new(api_key, config.model.clone())
            .with_base_url(config.base_url.clone())
            .with_system_prompt(config.system_prompt.clone()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_messages(&self, request: &GenerationRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.context.len() + 3);
        messages.push(ChatMessage {
            role: "system",
            content: self.system_prompt.clone(),
        });
        if request.language == Language::RomanUrdu {
            messages.push(ChatMessage {
                role: "system",
                content: "The user is writing in Roman Urdu. Reply in Roman Urdu.".to_string(),
            });
        }
        for turn in &request.context {
            messages.push(ChatMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.content.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.message.clone(),
        });
        messages
    }
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, GenerationError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: self.build_messages(&request),
            temperature: None,
            stream: true,
        };
        debug!(model = %self.model, messages = body.messages.len(), "Opening completion stream");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            response = post_completion(&self.client, &self.base_url, &self.api_key, &body) => {
                response.map_err(GenerationError::Request)?
            }
        };

        let reader = tokio_util::io::StreamReader::new(
            response
                .bytes_stream()
                .map(|r| r.map_err(std::io::Error::other)),
        );
        let lines = LinesStream::new(tokio::io::BufReader::new(reader).lines());
        let fragments = lines.filter_map(|line| match line {
            Ok(line) => parse_stream_line(&line),
            Err(e) => Some(Err(GenerationError::Request(format!(
                "stream read error: {}",
                e
            )))),
        });

        // Dropping the response body closes the upstream connection.
        let fragments = futures::StreamExt::take_until(fragments, cancel.cancelled_owned());
        Ok(Box::pin(fragments))
    }
}

// =============================================================================
// Translator
// =============================================================================

/// Prompt asking the model for a translation into `target`.
fn translation_prompt(text: &str, target: Language) -> String {
    match target {
        Language::RomanUrdu => format!(
            "Translate the following English text to Roman Urdu (Urdu written using English alphabet).\n\
             Use natural Pakistani Roman Urdu. Keep common technical terms in English.\n\n\
             English: {}\n\nRoman Urdu:",
            text
        ),
        Language::English => format!(
            "Translate the following Roman Urdu text to clear, natural English.\n\n\
             Roman Urdu: {}\n\nEnglish:",
            text
        ),
    }
}

/// Trim the model output and drop one pair of wrapping double quotes.
fn tidy_translation(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Translates through a chat-completions endpoint.
pub struct OpenAiTranslator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl OpenAiTranslator {
    pub fn from_config(config: &BackendConfig) -> Result<Self, TranslationError> {
        let api_key = read_api_key(config).ok_or_else(|| {
            TranslationError::Unavailable(format!("{} is not set", config.api_key_env))
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: config.translation_model.clone(),
            base_url: config.base_url.clone(),
            temperature: config.temperature,
        })
    }
}

impl std::fmt::Debug for OpenAiTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiTranslator")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn translate(&self, text: &str, target: Language) -> Result<String, TranslationError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: translation_prompt(text, target),
            }],
            temperature: Some(self.temperature),
            stream: false,
        };
        let response = post_completion(&self.client, &self.base_url, &self.api_key, &body)
            .await
            .map_err(TranslationError::Request)?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::Request(format!("invalid response body: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or(TranslationError::Empty)?;
        let translated = tidy_translation(&content);
        if translated.is_empty() {
            return Err(TranslationError::Empty);
        }
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::{Turn, TurnStatus};
    use uuid::Uuid;

    #[test]
    fn test_parse_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_stream_line(line).unwrap().unwrap(), "Hello");
    }

    #[test]
    fn test_parse_ignores_non_content_lines() {
        assert!(parse_stream_line("").is_none());
        assert!(parse_stream_line(": keep-alive").is_none());
        assert!(parse_stream_line("data: [DONE]").is_none());
        assert!(parse_stream_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).is_none());
        assert!(parse_stream_line(r#"data: {"choices":[]}"#).is_none());
        assert!(parse_stream_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#).is_none());
    }

    #[test]
    fn test_parse_malformed_chunk_is_protocol_error() {
        let parsed = parse_stream_line("data: {not json").unwrap();
        assert!(matches!(parsed, Err(GenerationError::Protocol(_))));
    }

    #[test]
    fn test_messages_carry_context_in_order() {
        let generator = OpenAiGenerator::new("key", "gpt-4o-mini").with_system_prompt("Be brief.");
        let request = GenerationRequest {
            context: vec![
                Turn::user("hi", Language::English),
                Turn::assistant(Uuid::new_v4(), "hello", Language::English, TurnStatus::Complete),
            ],
            message: "plans?".to_string(),
            language: Language::English,
        };
        let messages = generator.build_messages(&request);
        let roles: Vec<&str> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[0].content, "Be brief.");
        assert_eq!(messages[3].content, "plans?");
    }

    #[test]
    fn test_roman_urdu_adds_language_instruction() {
        let generator = OpenAiGenerator::new("key", "gpt-4o-mini");
        let request = GenerationRequest {
            context: Vec::new(),
            message: "kya hal hai".to_string(),
            language: Language::RomanUrdu,
        };
        let messages = generator.build_messages(&request);
        assert_eq!(messages.len(), 3);
        assert!(messages[1].content.contains("Roman Urdu"));
    }

    #[test]
    fn test_translation_prompt_direction() {
        let to_urdu = translation_prompt("Hello", Language::RomanUrdu);
        assert!(to_urdu.contains("English: Hello"));
        assert!(to_urdu.trim_end().ends_with("Roman Urdu:"));

        let to_english = translation_prompt("Shukriya", Language::English);
        assert!(to_english.contains("Roman Urdu: Shukriya"));
        assert!(to_english.trim_end().ends_with("English:"));
    }

    #[test]
    fn test_tidy_translation() {
        assert_eq!(tidy_translation("  \"Aap kaise hain?\" \n"), "Aap kaise hain?");
        assert_eq!(tidy_translation("No quotes"), "No quotes");
        assert_eq!(tidy_translation("\"unbalanced"), "\"unbalanced");
        assert_eq!(tidy_translation("\"\""), "");
    }

    #[test]
    fn test_missing_api_key_is_unavailable() {
        let config = BackendConfig {
            api_key_env: "PARLEY_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..BackendConfig::default()
        };
        assert!(matches!(
            OpenAiGenerator::from_config(&config),
            Err(GenerationError::Unavailable(_))
        ));
        assert!(matches!(
            OpenAiTranslator::from_config(&config),
            Err(TranslationError::Unavailable(_))
        ));
    }
}
