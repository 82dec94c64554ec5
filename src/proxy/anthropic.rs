//! Claude Messages API compatibility.
//!
//! Converts Messages requests into the canonical request, canonical completions
//! into Messages responses, and re-encodes the completion stream as Claude
//! stream events.

use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::content::validate_image_url;
use super::types::{
    CanonicalRequest, ChatCompletionResponse, Content, ContentPart, Message, Role, SamplingParams,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    #[serde(default)]
    pub model: Option<String>,
    /// Decoded message by message in [`to_canonical`] so a malformed entry is
    /// reported with its index.
    #[serde(default)]
    pub messages: serde_json::Value,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system: Option<SystemContent>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    /// Accepted for compatibility; the upstream has no equivalent.
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    /// Tool use, documents and other blocks the upstream cannot take.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub user_id: Option<String>,
}

impl SystemContent {
    pub fn as_text(&self) -> String {
        match self {
            SystemContent::Text(t) => t.clone(),
            SystemContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: String,
    pub content: Vec<ResponseContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: ClaudeUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClaudeUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart { message: MessagesResponse },
    ContentBlockStart { index: usize, content_block: ResponseContentBlock },
    ContentBlockDelta { index: usize, delta: TextDelta },
    ContentBlockStop { index: usize },
    MessageDelta { delta: MessageDeltaBody, usage: DeltaUsage },
    MessageStop,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextDelta {
    #[serde(rename = "type")]
    pub delta_type: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDeltaBody {
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeltaUsage {
    pub output_tokens: u32,
}

impl StreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
        }
    }

    /// Encode as one SSE event: `event: <name>\ndata: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", self.event_name(), data)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
}

impl ErrorResponse {
    pub fn from_error(err: &Error) -> Self {
        let error_type = match err {
            Error::Validation(_) | Error::ModelUnavailable(_) => "invalid_request_error",
            Error::Unauthorized => "authentication_error",
            _ => "api_error",
        };
        Self {
            response_type: "error",
            error: ErrorBody {
                error_type,
                message: err.to_string(),
            },
        }
    }

    /// Inline stream error event.
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: error\ndata: {}\n\n", data)
    }
}

/// Render an error in Claude's error shape with the matching status code.
pub fn error_response(err: Error) -> Response {
    (err.status(), axum::Json(ErrorResponse::from_error(&err))).into_response()
}

fn convert_blocks(content: &MessageContent) -> std::result::Result<Content, String> {
    let blocks = match content {
        MessageContent::Text(text) => return Ok(Content::Text(text.clone())),
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut texts: Vec<&str> = Vec::new();
    let mut parts: Vec<ContentPart> = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                texts.push(text);
                parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                let url = match (source.source_type.as_str(), &source.data, &source.url) {
                    ("base64", Some(data), _) => format!(
                        "data:{};base64,{}",
                        source.media_type.as_deref().unwrap_or("image/png"),
                        data
                    ),
                    ("url", _, Some(url)) => url.clone(),
                    (other, _, _) => return Err(format!("unsupported image source '{}'", other)),
                };
                parts.push(ContentPart::ImageUrl {
                    image_url: validate_image_url(&url)?,
                });
            }
            ContentBlock::Unsupported => {}
        }
    }

    // Tool turns carry no text; they stay in the conversation as empty text
    if parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })) {
        Ok(Content::Parts(parts))
    } else {
        Ok(Content::Text(texts.join("\n")))
    }
}

fn into_parts(content: Content) -> Vec<ContentPart> {
    match content {
        Content::Text(text) => vec![ContentPart::Text { text }],
        Content::Parts(parts) => parts,
    }
}

/// Merge consecutive messages from the same speaker.
///
/// Two plain texts are joined with a single space; anything involving parts
/// concatenates the part lists.
pub fn merge_consecutive(messages: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(last) if last.role == message.role => {
                let previous = std::mem::replace(&mut last.content, Content::Text(String::new()));
                last.content = match (previous, message.content) {
                    (Content::Text(a), Content::Text(b)) if b.is_empty() => Content::Text(a),
                    (Content::Text(a), Content::Text(b)) if a.is_empty() => Content::Text(b),
                    (Content::Text(a), Content::Text(b)) => Content::Text(format!("{} {}", a, b)),
                    (a, b) => {
                        let mut parts = into_parts(a);
                        parts.extend(into_parts(b));
                        Content::Parts(parts)
                    }
                };
            }
            _ => merged.push(message),
        }
    }
    merged
}

/// Normalize a Messages request into the canonical request.
pub fn to_canonical(req: MessagesRequest) -> Result<CanonicalRequest> {
    let items = match req.messages.as_array() {
        Some(items) if !items.is_empty() => items,
        _ => {
            return Err(Error::Validation(
                "'messages' must be a non-empty array".to_string(),
            ))
        }
    };

    let mut messages = Vec::with_capacity(items.len() + 1);
    if let Some(system) = req.system.as_ref().map(SystemContent::as_text) {
        if !system.is_empty() {
            messages.push(Message::text(Role::System, system));
        }
    }

    for (idx, raw) in items.iter().enumerate() {
        let message = ClaudeMessage::deserialize(raw)
            .map_err(|e| Error::Validation(format!("Message {}: {}", idx, e)))?;
        let role = match Role::parse(&message.role) {
            Some(role @ (Role::User | Role::Assistant)) => role,
            _ => {
                return Err(Error::Validation(format!(
                    "Message {}: unsupported role '{}'",
                    idx, message.role
                )))
            }
        };
        let content = convert_blocks(&message.content)
            .map_err(|e| Error::Validation(format!("Message {}: {}", idx, e)))?;
        messages.push(Message { role, content });
    }

    if req.top_k.is_some() {
        tracing::debug!("Dropping top_k, not supported upstream");
    }

    Ok(CanonicalRequest {
        model: req.model,
        messages: merge_consecutive(messages),
        stream: req.stream.unwrap_or(false),
        params: SamplingParams {
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            top_p: req.top_p,
            stop: req.stop_sequences.filter(|s| !s.is_empty()),
            ..Default::default()
        },
        session_id: req.session_id,
        user_id: req
            .user_id
            .or_else(|| req.metadata.and_then(|m| m.user_id)),
    })
}

/// Map an OpenAI finish reason to a Claude stop reason.
pub fn map_stop_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        Some("content_filter") => "content_filter",
        _ => "end_turn",
    }
}

fn message_id(completion_id: &str) -> String {
    format!("msg_{}", completion_id.trim_start_matches("chatcmpl-"))
}

/// Render a canonical completion as a Messages response.
pub fn to_claude_response(resp: &ChatCompletionResponse) -> MessagesResponse {
    let choice = resp.choices.first();
    MessagesResponse {
        id: message_id(&resp.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![ResponseContentBlock::Text {
            text: resp.assistant_text(),
        }],
        model: resp.model.clone(),
        stop_reason: Some(
            map_stop_reason(choice.and_then(|c| c.finish_reason.as_deref())).to_string(),
        ),
        stop_sequence: None,
        usage: ClaudeUsage {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
        },
    }
}

/// Re-encodes a text completion stream as Claude stream events.
///
/// Emits `message_start` and opens a single text block up front, one
/// `content_block_delta` per text delta, and closes with `content_block_stop`,
/// `message_delta` and `message_stop`.
#[derive(Debug)]
pub struct ClaudeStreamEncoder {
    model: String,
    msg_id: String,
    input_tokens: u32,
    started: bool,
    finished: bool,
}

impl ClaudeStreamEncoder {
    pub fn new(model: &str, completion_id: &str, input_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            msg_id: message_id(completion_id),
            input_tokens,
            started: false,
            finished: false,
        }
    }

    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![
            StreamEvent::MessageStart {
                message: MessagesResponse {
                    id: self.msg_id.clone(),
                    response_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: ClaudeUsage {
                        input_tokens: self.input_tokens,
                        output_tokens: 0,
                    },
                },
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            },
        ]
    }

    pub fn text(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut events = self.start();
        if !self.finished && !text.is_empty() {
            events.push(StreamEvent::ContentBlockDelta {
                index: 0,
                delta: TextDelta {
                    delta_type: "text_delta",
                    text: text.to_string(),
                },
            });
        }
        events
    }

    pub fn finish(&mut self, finish_reason: Option<&str>, output_tokens: u32) -> Vec<StreamEvent> {
        let mut events = self.start();
        if self.finished {
            return events;
        }
        self.finished = true;
        events.push(StreamEvent::ContentBlockStop { index: 0 });
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: map_stop_reason(finish_reason).to_string(),
                stop_sequence: None,
            },
            usage: DeltaUsage { output_tokens },
        });
        events.push(StreamEvent::MessageStop);
        events
    }
}
