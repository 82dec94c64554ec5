//! Validation and classification of inbound message content.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::sync::OnceLock;

use super::types::{
    CanonicalRequest, ChatCompletionRequest, Content, ContentPart, ImageUrl, Message, Role,
    SamplingParams,
};
use crate::error::{Error, Result};

/// Largest accepted inline image, after base64 decoding.
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

const IMAGE_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Whether a request carries images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Multimodal,
}

impl ContentKind {
    pub fn of(messages: &[Message]) -> Self {
        if messages.iter().any(Message::has_image) {
            ContentKind::Multimodal
        } else {
            ContentKind::Text
        }
    }
}

fn image_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            RegexBuilder::new(
                r"^https?://(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,6}\.?|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/?|[/?]\S+)$",
            )
            .case_insensitive(true)
            .build()
            .ok()
        })
        .as_ref()
}

/// Check an image reference and describe it.
///
/// Accepts `data:image/{jpeg,png,gif,webp};base64,...` URIs whose payload
/// decodes to at most [`MAX_IMAGE_BYTES`], or `http(s)` URLs with a domain,
/// `localhost` or IPv4 host.
pub fn validate_image_url(url: &str) -> std::result::Result<ImageUrl, String> {
    if url.is_empty() {
        return Err("image URL is empty".to_string());
    }

    if let Some(rest) = url.strip_prefix("data:") {
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| "data URI has no payload".to_string())?;
        let mime = header.split(';').next().unwrap_or_default().to_ascii_lowercase();
        if !IMAGE_MIME_TYPES.contains(&mime.as_str()) {
            return Err(format!("unsupported image type '{}'", mime));
        }
        let decoded = STANDARD
            .decode(payload.trim())
            .map_err(|e| format!("invalid base64 image data: {}", e))?;
        if decoded.len() > MAX_IMAGE_BYTES {
            return Err(format!(
                "image is {} bytes, limit is {} bytes",
                decoded.len(),
                MAX_IMAGE_BYTES
            ));
        }

        let mut image = ImageUrl::new(url);
        image.mime = Some(mime);
        image.byte_size = Some(decoded.len());
        return Ok(image);
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        return match image_url_pattern() {
            Some(re) if re.is_match(url) => Ok(ImageUrl::new(url)),
            _ => Err(format!("invalid image URL '{}'", url)),
        };
    }

    Err("image must be a base64 data URI or an http(s) URL".to_string())
}

fn validate_part(part: &Value) -> std::result::Result<ContentPart, String> {
    let kind = part
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "content part needs a 'type' field".to_string())?;

    match kind {
        "text" => {
            let text = part
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| "text part needs a 'text' field".to_string())?;
            if text.is_empty() {
                return Err("text part is empty".to_string());
            }
            Ok(ContentPart::Text {
                text: text.to_string(),
            })
        }
        "image_url" => {
            let image_url = part.get("image_url");
            let url = image_url
                .and_then(|i| i.get("url"))
                .and_then(Value::as_str)
                .ok_or_else(|| "image part needs 'image_url.url'".to_string())?;
            let mut image = validate_image_url(url)?;
            image.detail = image_url
                .and_then(|i| i.get("detail"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(ContentPart::ImageUrl { image_url: image })
        }
        other => Err(format!("unsupported content type '{}'", other)),
    }
}

fn validate_message(message: &Value) -> std::result::Result<Message, String> {
    let role = message
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing 'role'".to_string())?;
    let role = Role::parse(role).ok_or_else(|| format!("unsupported role '{}'", role))?;

    let content = match message.get("content") {
        Some(Value::String(text)) => Content::Text(text.clone()),
        Some(Value::Array(parts)) if parts.is_empty() => {
            return Err("content array is empty".to_string())
        }
        Some(Value::Array(parts)) => Content::Parts(
            parts
                .iter()
                .enumerate()
                .map(|(i, p)| validate_part(p).map_err(|e| format!("part {}: {}", i, e)))
                .collect::<std::result::Result<_, _>>()?,
        ),
        _ => return Err("content must be a string or an array of parts".to_string()),
    };

    Ok(Message { role, content })
}

/// Validate an OpenAI-style `messages` array into canonical messages.
///
/// The first offending message fails the whole request; the error names its index.
pub fn validate_messages(messages: &Value) -> Result<Vec<Message>> {
    let items = match messages.as_array() {
        Some(items) if !items.is_empty() => items,
        _ => {
            return Err(Error::Validation(
                "'messages' must be a non-empty array".to_string(),
            ))
        }
    };

    items
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            validate_message(m).map_err(|e| Error::Validation(format!("Message {}: {}", idx, e)))
        })
        .collect()
}

/// Normalize a chat completion request into the canonical request.
pub fn to_canonical(req: ChatCompletionRequest) -> Result<CanonicalRequest> {
    let messages = validate_messages(&req.messages)?;
    Ok(CanonicalRequest {
        model: req.model,
        messages,
        stream: req.stream.unwrap_or(false),
        params: SamplingParams {
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            top_p: req.top_p,
            frequency_penalty: req.frequency_penalty,
            presence_penalty: req.presence_penalty,
            stop: req.stop.map(|s| s.into_vec()).filter(|s| !s.is_empty()),
        },
        session_id: req.session_id,
        user_id: req.user_id,
    })
}
