use serde::Serialize;

use crate::error::QwenError;

use super::{ChatMessage, ChatRequest, ContentBlock, Role};

/// Chat request as it goes on the wire. Borrows from the caller's
/// [`ChatRequest`] so the original is never touched.
#[derive(Debug, Serialize)]
struct WireChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    incremental_output: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: WireContent<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_search: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_budget: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_schema: Option<&'a str>,
}

/// `content` is a bare string for a single text block, an array of typed
/// parts otherwise.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent<'a> {
    Text(&'a str),
    Parts(Vec<WirePart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: WireImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct WireImageUrl<'a> {
    url: &'a str,
}

/// Encode a chat request into its JSON payload.
///
/// `stream` always overrides whatever the request carries; a blank model is
/// replaced by `default_model`.
///
/// # Errors
///
/// Returns [`QwenError::InvalidRequest`] when the request has no messages or no
/// usable model, and [`QwenError::Decode`] if serialization fails.
pub fn encode_chat_request(
    request: &ChatRequest,
    stream: bool,
    default_model: &str,
) -> Result<Vec<u8>, QwenError> {
    if request.messages.is_empty() {
        return Err(QwenError::InvalidRequest(
            "messages cannot be empty".to_string(),
        ));
    }

    let model = match request.model.trim() {
        "" => default_model.trim(),
        model => model,
    };
    if model.is_empty() {
        return Err(QwenError::InvalidRequest("model cannot be empty".to_string()));
    }

    let wire = WireChatRequest {
        model,
        messages: request.messages.iter().map(encode_message).collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        stream,
        incremental_output: request.incremental_output,
    };

    let body = serde_json::to_vec(&wire)?;
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!(body = %String::from_utf8_lossy(&body), "request JSON");
    }
    Ok(body)
}

fn encode_message(message: &ChatMessage) -> WireMessage<'_> {
    WireMessage {
        role: message.role,
        content: encode_content(&message.blocks),
        web_search: message.web_search,
        thinking: message.thinking,
        thinking_budget: message.thinking_budget,
        output_schema: message.output_schema.as_deref(),
    }
}

fn encode_content(blocks: &[ContentBlock]) -> WireContent<'_> {
    if let [ContentBlock::Text(text)] = blocks {
        return WireContent::Text(text);
    }
    WireContent::Parts(
        blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text(text) => WirePart::Text { text },
                ContentBlock::Image { url, .. } => WirePart::ImageUrl {
                    image_url: WireImageUrl { url },
                },
            })
            .collect(),
    )
}
