//! The text-generation port.
//!
//! The engine only needs one thing from a language model: given an ordered
//! conversation and a response mode, return some text and the number of
//! tokens it cost. [`TextGenerator`] is that seam; [`ClaudeGenerator`] is the
//! production adapter over the `claude` client, and tests swap in
//! [`ScriptedGenerator`](crate::testing::ScriptedGenerator).

use crate::config::env_or;
use crate::history::{ChatMessage, Role};
use async_trait::async_trait;
use claude::{Claude, Message, Request, Tool};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// Types that can describe themselves as a JSON object schema.
///
/// Usually derived with `#[derive(StructuredOutput)]`.
pub trait StructuredOutput {
    /// Name of the schema, used as the forced tool name.
    fn schema_name() -> &'static str;

    /// Human-readable description of what the object means.
    fn schema_description() -> &'static str;

    /// JSON Schema for the object.
    fn json_schema() -> serde_json::Value;
}

/// A JSON schema the response must conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub description: String,
    pub schema: serde_json::Value,
}

impl OutputSchema {
    pub fn of<T: StructuredOutput>() -> Self {
        Self {
            name: T::schema_name().to_string(),
            description: T::schema_description().to_string(),
            schema: T::json_schema(),
        }
    }
}

/// What kind of answer is wanted.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseMode {
    /// Prose for the player.
    FreeText,
    /// A JSON object matching the schema, returned as its serialized text.
    Json(OutputSchema),
}

impl ResponseMode {
    pub fn json<T: StructuredOutput>() -> Self {
        Self::Json(OutputSchema::of::<T>())
    }

    /// The schema name for structured modes.
    pub fn schema_name(&self) -> Option<&str> {
        match self {
            Self::FreeText => None,
            Self::Json(schema) => Some(&schema.name),
        }
    }
}

/// A successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
}

impl Completion {
    pub fn new(text: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            text: text.into(),
            tokens_used,
        }
    }
}

/// Errors from the text-generation service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("service returned no usable content")]
    EmptyResponse,

    #[error("structured response did not match the schema: {0}")]
    Malformed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<claude::Error> for GenerationError {
    fn from(err: claude::Error) -> Self {
        match err {
            claude::Error::Timeout(after) => Self::Timeout(after),
            claude::Error::Network(msg) => Self::Transport(msg),
            claude::Error::Api { status, message } => Self::Api { status, message },
            claude::Error::Parse(msg) => Self::Transport(format!("unreadable response: {msg}")),
            claude::Error::NoApiKey => Self::Config("ANTHROPIC_API_KEY is not set".to_string()),
            claude::Error::Config(msg) => Self::Config(msg),
        }
    }
}

/// Parse a structured completion into `T`.
pub fn parse_structured<T: DeserializeOwned>(completion: &Completion) -> Result<T, GenerationError> {
    serde_json::from_str(&completion.text).map_err(|e| GenerationError::Malformed(e.to_string()))
}

/// A text-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn send(
        &self,
        messages: &[ChatMessage],
        mode: &ResponseMode,
    ) -> Result<Completion, GenerationError>;
}

// ============================================================================
// Claude adapter
// ============================================================================

const DEFAULT_MAX_TOKENS: usize = 1024;

/// [`TextGenerator`] backed by the Anthropic Messages API.
///
/// Structured modes are served by forcing a single tool whose input schema
/// is the requested schema; the tool input becomes the completion text.
#[derive(Debug, Clone)]
pub struct ClaudeGenerator {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl ClaudeGenerator {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    /// Build from the environment.
    ///
    /// Requires `ANTHROPIC_API_KEY`. `OCTOPUS_MODEL`, `OCTOPUS_MAX_TOKENS`
    /// and `OCTOPUS_TEMPERATURE` are optional.
    pub fn from_env() -> Result<Self, GenerationError> {
        let mut client = Claude::from_env()?;
        if let Ok(model) = std::env::var("OCTOPUS_MODEL") {
            client = client.with_model(model);
        }

        let mut generator =
            Self::new(client).with_max_tokens(env_or("OCTOPUS_MAX_TOKENS", DEFAULT_MAX_TOKENS));
        if let Ok(raw) = std::env::var("OCTOPUS_TEMPERATURE") {
            match raw.trim().parse::<f32>() {
                Ok(temperature) => generator = generator.with_temperature(temperature),
                Err(_) => tracing::warn!(value = %raw, "ignoring unparseable OCTOPUS_TEMPERATURE"),
            }
        }
        Ok(generator)
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    fn build_request(&self, messages: &[ChatMessage], mode: &ResponseMode) -> Result<Request, GenerationError> {
        let (system, conversation) = split_system(messages);
        if conversation.is_empty() {
            return Err(GenerationError::Config(
                "conversation has no user message".to_string(),
            ));
        }

        let mut request = Request::new(conversation).with_max_tokens(self.max_tokens);
        if !system.is_empty() {
            request = request.with_system(system);
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let ResponseMode::Json(schema) = mode {
            request = request.with_forced_tool(Tool {
                name: schema.name.clone(),
                description: schema.description.clone(),
                input_schema: schema.schema.clone(),
            });
        }
        Ok(request)
    }
}

/// Fold system messages into one system prompt and convert the rest.
///
/// The Messages API wants the conversation to open with a user turn, so any
/// leading assistant messages are dropped.
fn split_system(messages: &[ChatMessage]) -> (String, Vec<Message>) {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let conversation = messages
        .iter()
        .filter_map(|m| match m.role {
            Role::System => None,
            Role::User => Some(Message::user(&m.content)),
            Role::Assistant => Some(Message::assistant(&m.content)),
        })
        .skip_while(|m| m.role == claude::Role::Assistant)
        .collect();

    (system, conversation)
}

#[async_trait]
impl TextGenerator for ClaudeGenerator {
    async fn send(
        &self,
        messages: &[ChatMessage],
        mode: &ResponseMode,
    ) -> Result<Completion, GenerationError> {
        let request = self.build_request(messages, mode)?;
        let response = self.client.complete(request).await?;
        let tokens_used = response.usage.total() as u64;

        let text = match mode {
            ResponseMode::FreeText => response.text(),
            ResponseMode::Json(schema) => match response.tool_input(&schema.name) {
                Some(input) => serde_json::to_string(input)
                    .map_err(|e| GenerationError::Malformed(e.to_string()))?,
                // The model occasionally answers in prose despite the forced
                // tool; let the caller try to parse whatever came back.
                None => response.text(),
            },
        };

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        tracing::debug!(tokens_used, model = %self.client.model(), "generation complete");
        Ok(Completion { text, tokens_used })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, crate::StructuredOutput)]
    #[structured(name = "record_mood")]
    /// The narrator's mood
    struct Mood {
        /// One word
        mood: String,
        intensity: Option<u8>,
    }

    #[test]
    fn test_derived_schema() {
        let schema = OutputSchema::of::<Mood>();
        assert_eq!(schema.name, "record_mood");
        assert_eq!(schema.description, "The narrator's mood");
        assert_eq!(schema.schema["properties"]["mood"]["type"], "string");
        assert_eq!(schema.schema["required"], serde_json::json!(["mood"]));
    }

    #[test]
    fn test_parse_structured() {
        let ok: Mood = parse_structured(&Completion::new(r#"{"mood":"grim"}"#, 3)).unwrap();
        assert_eq!(ok.mood, "grim");
        assert!(ok.intensity.is_none());

        let err = parse_structured::<Mood>(&Completion::new("not json", 3)).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[test]
    fn test_split_system_folds_and_trims() {
        let messages = vec![
            ChatMessage::system("one"),
            ChatMessage::assistant("stale reply"),
            ChatMessage::system("two"),
            ChatMessage::user("look"),
            ChatMessage::assistant("A room."),
        ];
        let (system, conversation) = split_system(&messages);
        assert_eq!(system, "one\n\ntwo");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].role, claude::Role::User);
    }

    #[test]
    fn test_build_request_forces_tool() {
        let generator = ClaudeGenerator::new(Claude::new("test-key").unwrap());
        let request = generator
            .build_request(&[ChatMessage::user("go")], &ResponseMode::json::<Mood>())
            .unwrap();
        assert_eq!(request.tools.as_ref().map(Vec::len), Some(1));

        let err = generator
            .build_request(&[ChatMessage::system("only")], &ResponseMode::FreeText)
            .unwrap_err();
        assert!(matches!(err, GenerationError::Config(_)));
    }

    #[test]
    fn test_claude_errors_map() {
        let err: GenerationError = claude::Error::Timeout(Duration::from_secs(30)).into();
        assert_eq!(err, GenerationError::Timeout(Duration::from_secs(30)));
    }
}
