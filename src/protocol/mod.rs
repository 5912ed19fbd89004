pub mod encoder;
pub mod response_decoder;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use encoder::encode_chat_request;
pub use response_decoder::{decode_chat_response, decode_stream_chunk, is_done_payload};

// ---------------------------------------------------------------------------
// Request side
// ---------------------------------------------------------------------------

/// Role of a chat message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One content block of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Text(String),
    Image { url: String, mime_type: String },
}

impl ContentBlock {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(text.into())
    }

    #[must_use]
    pub fn image(url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentBlock::Image {
            url: url.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// A single turn of a conversation. The payload encoder reads it; nothing
/// mutates it once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
    pub web_search: Option<bool>,
    pub thinking: Option<bool>,
    pub thinking_budget: Option<u32>,
    pub output_schema: Option<String>,
}

impl ChatMessage {
    /// Message carrying a single text block.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::blocks(role, vec![ContentBlock::Text(text.into())])
    }

    #[must_use]
    pub fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            blocks,
            web_search: None,
            thinking: None,
            thinking_budget: None,
            output_schema: None,
        }
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    #[must_use]
    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = Some(enabled);
        self
    }

    /// Enable "thinking" with an optional step budget.
    #[must_use]
    pub fn with_thinking(mut self, budget: Option<u32>) -> Self {
        self.thinking = Some(true);
        self.thinking_budget = budget;
        self
    }

    #[must_use]
    pub fn with_output_schema(mut self, schema: impl Into<String>) -> Self {
        self.output_schema = Some(schema.into());
        self
    }

    /// The text when the message is exactly one text block.
    #[must_use]
    pub fn simple_text(&self) -> Option<&str> {
        match self.blocks.as_slice() {
            [ContentBlock::Text(text)] => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Chat completion request. `stream` is always overwritten by the operation
/// that sends the request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: Option<bool>,
    pub incremental_output: bool,
}

impl ChatRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            stream: None,
            incremental_output: true,
        }
    }

    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn incremental_output(mut self, enabled: bool) -> Self {
        self.incremental_output = enabled;
        self
    }
}

// ---------------------------------------------------------------------------
// Response side
// ---------------------------------------------------------------------------

/// Non-streaming chat completion response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Content of the first choice's message, if any.
    #[must_use]
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.as_deref())
    }
}

/// One decoded SSE frame of a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl StreamChunk {
    /// Concatenated delta content of all choices; empty for role-only frames.
    #[must_use]
    pub fn delta_text(&self) -> String {
        let mut out = String::new();
        for choice in &self.choices {
            if let Some(content) = choice.delta.as_ref().and_then(|d| d.content.as_deref()) {
                out.push_str(content);
            }
        }
        out
    }

    /// Finish reason of the first choice that reports one.
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .iter()
            .find_map(|choice| choice.finish_reason.as_deref())
    }
}

/// A choice carries `message` in full responses and `delta` in stream chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ResponseMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ResponseMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    /// JSON-encoded arguments, as sent by the server.
    #[serde(default)]
    pub arguments: String,
}

/// Token usage in the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}
