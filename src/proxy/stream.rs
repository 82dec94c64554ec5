//! Upstream SSE relay.
//!
//! The upstream always streams. [`SseObserver`] reassembles `data:` lines
//! across TCP chunk boundaries and accumulates the completion; [`relay`] turns
//! the upstream body into either a live client stream (OpenAI or Claude event
//! format) or one buffered completion, and settles session and health state
//! once the upstream signals `[DONE]`.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;

use super::anthropic::{ClaudeStreamEncoder, ErrorResponse};
use super::tokens;
use super::types::{ChatCompletionResponse, Choice, Message, Role, Usage};
use crate::error::{Error, Result};
use crate::router::HealthTracker;
use crate::session::SessionStore;

/// Longest accepted SSE line; longer partial lines are dropped.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// One decoded upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// A completion chunk, with vendor reasoning fields already folded into `content`.
    Chunk(Value),
    /// `data: [DONE]`
    Done,
}

/// What the upstream produced, accumulated over the stream.
#[derive(Debug, Clone, Default)]
pub struct StreamResult {
    /// Concatenated delta text.
    pub content: String,
    /// Token usage from the chunk that carried one, if any.
    pub usage: Option<Usage>,
    /// The finish_reason from the last chunk with a non-null finish_reason.
    pub finish_reason: Option<String>,
    /// Whether `data: [DONE]` was received.
    pub done_received: bool,
}

impl StreamResult {
    /// An empty result for streams that ended without `[DONE]`.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Line-buffering SSE decoder and accumulator.
///
/// Buffers raw bytes across chunk boundaries, reassembles complete lines,
/// and decodes `data:` lines into [`UpstreamEvent`]s.
pub(crate) struct SseObserver {
    buffer: Vec<u8>,
    result: StreamResult,
}

impl SseObserver {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            result: StreamResult::empty(),
        }
    }

    /// Process a chunk of bytes, returning the events it completed.
    pub fn process_chunk(&mut self, bytes: &[u8]) -> Vec<UpstreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(bytes = self.buffer.len(), "Dropping oversized SSE line");
            self.buffer.clear();
        }

        events
    }

    /// Treat whatever is left in the buffer as a final line.
    pub fn flush(&mut self) -> Vec<UpstreamEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.process_line(&String::from_utf8_lossy(&line))
            .into_iter()
            .collect()
    }

    fn process_line(&mut self, line: &str) -> Option<UpstreamEvent> {
        let line = line.trim_end_matches(['\n', '\r']);
        let data = line.strip_prefix("data:")?.trim();
        if data.is_empty() {
            return None;
        }
        self.process_data(data)
    }

    fn process_data(&mut self, data: &str) -> Option<UpstreamEvent> {
        if data == "[DONE]" {
            self.result.done_received = true;
            return Some(UpstreamEvent::Done);
        }

        let mut chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed upstream chunk");
                return None;
            }
        };

        fold_reasoning(&mut chunk);

        if let Some(text) = delta_text(&chunk) {
            self.result.content.push_str(text);
        }
        if let Some(reason) = chunk
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
        {
            self.result.finish_reason = Some(reason.to_string());
        }
        if let Some(usage) = extract_usage(&chunk) {
            self.result.usage = Some(usage);
        }

        Some(UpstreamEvent::Chunk(chunk))
    }

    /// Current accumulated state.
    pub fn result(&self) -> &StreamResult {
        &self.result
    }

    /// Consume the observer and produce the final result.
    ///
    /// Flushes any remaining buffer content, then returns
    /// `StreamResult::empty()` if `[DONE]` was not received.
    #[cfg(test)]
    pub fn into_result(mut self) -> StreamResult {
        self.flush();
        if self.result.done_received {
            self.result
        } else {
            StreamResult::empty()
        }
    }
}

/// Move vendor reasoning text into `delta.content`.
///
/// Reasoning models stream their chain of thought as `reasoning_content` (or
/// `reasoning`) with an empty `content`. Clients only read `content`, so the
/// reasoning text takes its place; the vendor fields are removed either way.
pub fn fold_reasoning(chunk: &mut Value) {
    let Some(choices) = chunk.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };
    for choice in choices {
        let Some(delta) = choice.get_mut("delta").and_then(Value::as_object_mut) else {
            continue;
        };
        let reasoning = ["reasoning_content", "reasoning"]
            .iter()
            .filter_map(|key| delta.remove(*key))
            .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_string));

        let has_content = delta
            .get("content")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        if let (Some(text), false) = (reasoning, has_content) {
            delta.insert("content".to_string(), Value::String(text));
        }
    }
}

fn delta_text(chunk: &Value) -> Option<&str> {
    chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn extract_usage(chunk: &Value) -> Option<Usage> {
    let usage = chunk.get("usage").filter(|u| !u.is_null())?;
    let prompt = usage.get("prompt_tokens")?.as_u64()? as u32;
    let completion = usage.get("completion_tokens")?.as_u64()? as u32;
    Some(Usage::new(prompt, completion))
}

/// Client-facing protocol of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    OpenAi,
    Anthropic,
}

/// How the relay answered the client.
pub enum RelayOutcome {
    /// Live SSE response; session and health settle when the stream ends.
    Streaming(Response),
    /// Complete, already settled completion.
    Buffered(ChatCompletionResponse),
}

/// Everything the relay needs to settle a finished completion.
pub struct RelayContext {
    /// Model the upstream was asked for.
    pub model: String,
    pub protocol: Protocol,
    /// Messages sent upstream, for usage estimation.
    pub prompt: Vec<Message>,
    /// Session to record the assistant turn in.
    pub session: Option<(Arc<SessionStore>, String)>,
    pub health: Arc<HealthTracker>,
    pub completion_id: String,
    pub created: i64,
}

impl RelayContext {
    fn usage(&self, result: &StreamResult) -> Usage {
        result
            .usage
            .unwrap_or_else(|| tokens::estimate_usage(&self.prompt, &result.content))
    }

    /// Record success and persist the assistant turn.
    fn complete(&self, result: &StreamResult) {
        self.health.record_outcome(&self.model, true);
        if let Some((store, key)) = &self.session {
            store.append(key, [Message::text(Role::Assistant, result.content.clone())]);
        }
        tracing::info!(
            model = %self.model,
            chars = result.content.len(),
            finish_reason = ?result.finish_reason,
            "Completion finished"
        );
    }

    fn fail(&self, err: &Error) {
        tracing::error!(model = %self.model, error = %err, "Upstream stream failed");
        self.health.record_outcome(&self.model, false);
    }

    fn completion(&self, result: &StreamResult) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: self.completion_id.clone(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: Message::text(Role::Assistant, result.content.clone()),
                finish_reason: Some(
                    result
                        .finish_reason
                        .clone()
                        .unwrap_or_else(|| "stop".to_string()),
                ),
            }],
            usage: self.usage(result),
        }
    }
}

/// Consume an upstream response for a client.
pub async fn relay(upstream: reqwest::Response, ctx: RelayContext, stream: bool) -> Result<RelayOutcome> {
    let body = upstream.bytes_stream();
    if stream {
        let events = relay_events(body, ctx);
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(events))
            .map_err(|e| Error::Internal(format!("failed to build stream response: {}", e)))?;
        Ok(RelayOutcome::Streaming(response))
    } else {
        let result = collect(body).await;
        match result {
            Ok(result) => {
                ctx.complete(&result);
                Ok(RelayOutcome::Buffered(ctx.completion(&result)))
            }
            Err(e) => {
                ctx.fail(&e);
                Err(e)
            }
        }
    }
}

/// Read an upstream stream to `[DONE]`.
async fn collect<S>(body: S) -> Result<StreamResult>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    let mut body = std::pin::pin!(body);
    let mut observer = SseObserver::new();

    loop {
        let events = match body.next().await {
            Some(Ok(bytes)) => observer.process_chunk(&bytes),
            Some(Err(e)) => return Err(Error::Stream(e.to_string())),
            None => {
                observer.flush();
                break;
            }
        };
        if events.contains(&UpstreamEvent::Done) {
            return Ok(observer.result().clone());
        }
    }

    if observer.result().done_received {
        Ok(observer.result().clone())
    } else {
        Err(Error::Stream(
            "upstream ended the stream before [DONE]".to_string(),
        ))
    }
}

fn openai_error_event(err: &Error) -> String {
    let body = serde_json::json!({
        "error": {
            "message": err.to_string(),
            "type": err.kind(),
            "code": err.status().as_u16()
        }
    });
    format!("data: {}\n\n", body)
}

/// Re-shape the upstream stream into client SSE events.
///
/// OpenAI clients get each chunk as `data: <json>\n\n` and a final
/// `data: [DONE]\n\n`. Claude clients get the Messages event sequence.
/// A broken or truncated upstream ends the stream with an inline error event.
fn relay_events<S>(
    body: S,
    ctx: RelayContext,
) -> impl Stream<Item = std::result::Result<String, std::io::Error>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut observer = SseObserver::new();
        let mut encoder = match ctx.protocol {
            Protocol::Anthropic => {
                let input_tokens = serde_json::to_string(&ctx.prompt)
                    .map(|s| tokens::count_tokens(&s))
                    .unwrap_or(0);
                Some(ClaudeStreamEncoder::new(&ctx.model, &ctx.completion_id, input_tokens))
            }
            Protocol::OpenAi => None,
        };

        if let Some(enc) = encoder.as_mut() {
            for event in enc.start() {
                yield Ok(event.to_sse());
            }
        }

        loop {
            let (events, exhausted) = match body.next().await {
                Some(Ok(bytes)) => (observer.process_chunk(&bytes), false),
                Some(Err(e)) => {
                    let err = Error::Stream(e.to_string());
                    ctx.fail(&err);
                    yield Ok(error_event(ctx.protocol, &err));
                    return;
                }
                None => (observer.flush(), true),
            };

            for event in events {
                match event {
                    UpstreamEvent::Chunk(chunk) => match encoder.as_mut() {
                        Some(enc) => {
                            if let Some(text) = delta_text(&chunk) {
                                for event in enc.text(text) {
                                    yield Ok(event.to_sse());
                                }
                            }
                        }
                        None => {
                            yield Ok(format!("data: {}\n\n", chunk));
                        }
                    },
                    UpstreamEvent::Done => {
                        let result = observer.result().clone();
                        ctx.complete(&result);
                        match encoder.as_mut() {
                            Some(enc) => {
                                let usage = ctx.usage(&result);
                                for event in enc.finish(result.finish_reason.as_deref(), usage.completion_tokens) {
                                    yield Ok(event.to_sse());
                                }
                            }
                            None => {
                                yield Ok("data: [DONE]\n\n".to_string());
                            }
                        }
                        return;
                    }
                }
            }

            if exhausted {
                let err = Error::Stream("upstream ended the stream before [DONE]".to_string());
                ctx.fail(&err);
                yield Ok(error_event(ctx.protocol, &err));
                return;
            }
        }
    }
}

fn error_event(protocol: Protocol, err: &Error) -> String {
    match protocol {
        Protocol::OpenAi => openai_error_event(err),
        Protocol::Anthropic => ErrorResponse::from_error(err).to_sse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    /// Build SSE data from event lines, then split at the given byte positions.
    ///
    /// Each event string is appended with `\n\n` (SSE event delimiter).
    /// The resulting byte buffer is split at the specified positions to
    /// simulate TCP chunk boundaries.
    fn split_sse_at_positions(events: &[&str], split_positions: &[usize]) -> Vec<Vec<u8>> {
        let full: Vec<u8> = events
            .iter()
            .flat_map(|e| format!("{}\n\n", e).into_bytes())
            .collect();

        let mut chunks = Vec::new();
        let mut prev = 0;
        for &pos in split_positions {
            if pos > prev && pos < full.len() {
                chunks.push(full[prev..pos].to_vec());
                prev = pos;
            }
        }
        chunks.push(full[prev..].to_vec());
        chunks
    }

    fn observe(chunks: &[Vec<u8>]) -> StreamResult {
        let mut observer = SseObserver::new();
        for chunk in chunks {
            observer.process_chunk(chunk);
        }
        observer.into_result()
    }

    fn context(protocol: Protocol) -> (RelayContext, Arc<HealthTracker>, Arc<SessionStore>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let health = Arc::new(HealthTracker::new("d", Duration::seconds(300), clock.clone()));
        let sessions = Arc::new(SessionStore::new(Duration::seconds(60), clock));
        let ctx = RelayContext {
            model: "m1".to_string(),
            protocol,
            prompt: vec![Message::text(Role::User, "hi")],
            session: Some((sessions.clone(), "s1".to_string())),
            health: health.clone(),
            completion_id: "chatcmpl-test".to_string(),
            created: 0,
        };
        (ctx, health, sessions)
    }

    fn byte_stream(
        chunks: Vec<&'static str>,
    ) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))))
    }

    async fn collect_events(
        stream: impl Stream<Item = std::result::Result<String, std::io::Error>>,
    ) -> Vec<String> {
        stream.map(|e| e.unwrap()).collect().await
    }

    #[test]
    fn test_single_chunk_full_stream() {
        let events = [
            r#"data: {"id":"abc","choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}],"usage":null}"#,
            r#"data: {"id":"abc","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}],"usage":null}"#,
            r#"data: {"id":"abc","choices":[{"index":0,"delta":{"content":" world"},"finish_reason":"stop"}],"usage":null}"#,
            r#"data: {"id":"abc","choices":[],"usage":{"prompt_tokens":6,"completion_tokens":10,"total_tokens":16}}"#,
            "data: [DONE]",
        ];

        let chunks = split_sse_at_positions(&events, &[]);
        assert_eq!(chunks.len(), 1, "Should be a single chunk");

        let result = observe(&chunks);
        assert!(result.done_received);
        assert_eq!(result.content, "Hello world");
        assert_eq!(result.usage, Some(Usage::new(6, 10)));
        assert_eq!(result.finish_reason, Some("stop".to_string()));
    }

    #[test]
    fn test_usage_split_across_chunks() {
        let events = [
            r#"data: {"id":"abc","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":"stop"}],"usage":null}"#,
            r#"data: {"id":"abc","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
            "data: [DONE]",
        ];

        // Split at multiple positions inside the usage JSON line
        let chunks = split_sse_at_positions(&events, &[50, 120, 180]);
        assert!(chunks.len() > 1, "Should be split into multiple chunks");

        let result = observe(&chunks);
        assert!(result.done_received);
        assert_eq!(result.usage, Some(Usage::new(10, 5)));
        assert_eq!(result.finish_reason, Some("stop".to_string()));
    }

    #[test]
    fn test_three_deltas_concatenate() {
        let events = [
            r#"data: {"choices":[{"index":0,"delta":{"content":"The "},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"index":0,"delta":{"content":"quick "},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"index":0,"delta":{"content":"fox"},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ];
        let result = observe(&split_sse_at_positions(&events, &[7, 64, 65, 140]));
        assert_eq!(result.content, "The quick fox");
        assert!(result.usage.is_none());
    }

    #[test]
    fn test_no_done_returns_empty() {
        // Stream ends without [DONE] -- should return empty result
        let events = [
            r#"data: {"id":"abc","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":"stop"}],"usage":null}"#,
        ];

        let result = observe(&split_sse_at_positions(&events, &[]));
        assert!(!result.done_received);
        assert!(result.content.is_empty());
        assert!(result.finish_reason.is_none());
    }

    #[test]
    fn test_malformed_json_skipped() {
        let events = [
            "data: {this is not valid json}",
            r#"data: {"id":"abc","choices":[],"usage":{"prompt_tokens":8,"completion_tokens":3,"total_tokens":11}}"#,
            "data: [DONE]",
        ];

        let result = observe(&split_sse_at_positions(&events, &[]));
        assert!(result.done_received);
        assert_eq!(result.usage, Some(Usage::new(8, 3)));
    }

    #[test]
    fn test_non_data_sse_fields_skipped() {
        // Mix in event:, id:, retry:, and comment lines
        let raw = b"event: message\nid: 123\nretry: 5000\n: this is a comment\ndata: {\"id\":\"abc\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":\"stop\"}],\"usage\":null}\n\ndata: [DONE]\n\n";

        let result = observe(&[raw.to_vec()]);
        assert!(result.done_received);
        assert_eq!(result.finish_reason, Some("stop".to_string()));
    }

    #[test]
    fn test_crlf_line_endings() {
        let raw = b"data: {\"id\":\"abc\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":\"stop\"}],\"usage\":null}\r\n\r\ndata: {\"id\":\"abc\",\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2,\"total_tokens\":6}}\r\n\r\ndata: [DONE]\r\n\r\n";

        let result = observe(&[raw.to_vec()]);
        assert!(result.done_received);
        assert_eq!(result.usage, Some(Usage::new(4, 2)));
        assert_eq!(result.finish_reason, Some("stop".to_string()));
    }

    #[test]
    fn test_data_without_space() {
        // data:{...} without space after colon
        let raw = b"data:{\"id\":\"abc\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":\"stop\"}],\"usage\":null}\n\ndata:[DONE]\n\n";

        let result = observe(&[raw.to_vec()]);
        assert!(result.done_received);
        assert_eq!(result.content, "Hi");
    }

    #[test]
    fn test_done_without_trailing_newline() {
        // [DONE] is the last bytes without a trailing newline
        let raw = b"data: {\"id\":\"abc\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":\"stop\"}],\"usage\":null}\n\ndata: [DONE]";

        let result = observe(&[raw.to_vec()]);
        // flush in into_result should handle this
        assert!(result.done_received);
        assert_eq!(result.finish_reason, Some("stop".to_string()));
    }

    #[test]
    fn test_empty_stream() {
        let result = SseObserver::new().into_result();
        assert!(!result.done_received);
        assert!(result.usage.is_none());
        assert!(result.finish_reason.is_none());
    }

    #[test]
    fn test_buffer_cap() {
        // Create a chunk exceeding 64KB without any newlines
        let huge_chunk = vec![b'x'; 65 * 1024];

        let mut observer = SseObserver::new();
        observer.process_chunk(&huge_chunk);

        // After exceeding 64KB, the buffer should be drained.
        // Then we can still process normal data.
        let normal = b"data: {\"id\":\"abc\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}],\"usage\":null}\n\ndata: [DONE]\n\n";
        observer.process_chunk(normal);
        let result = observer.into_result();

        assert!(result.done_received);
        assert_eq!(result.content, "ok");
    }

    #[test]
    fn test_reasoning_folded_into_content() {
        let mut chunk = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": "", "reasoning_content": "thinking"}}]
        });
        fold_reasoning(&mut chunk);
        assert_eq!(
            chunk["choices"][0]["delta"],
            serde_json::json!({"content": "thinking"})
        );

        let mut both = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": "answer", "reasoning": "why"}}]
        });
        fold_reasoning(&mut both);
        assert_eq!(both["choices"][0]["delta"], serde_json::json!({"content": "answer"}));
    }

    #[tokio::test]
    async fn test_collect_requires_done() {
        let err = collect(byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
        ]))
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[tokio::test]
    async fn test_openai_events_end_with_done() {
        let (ctx, health, sessions) = context(Protocol::OpenAi);
        let events = collect_events(relay_events(
            byte_stream(vec![
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"reasoning_content\":\"hm\"}}]}\n",
                "\ndata: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"yes\"},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            ]),
            ctx,
        ))
        .await;

        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.ends_with("\n\n")));
        assert!(events[0].contains("\"content\":\"hm\""));
        assert!(!events[0].contains("reasoning_content"));
        assert_eq!(events[2], "data: [DONE]\n\n");

        assert_eq!(health.snapshot()[0].calls, 1);
        assert_eq!(health.snapshot()[0].fails, 0);
        assert_eq!(sessions.get("s1")[0].text_content(), "hmyes");
    }

    #[tokio::test]
    async fn test_truncated_stream_emits_error_event() {
        let (ctx, health, sessions) = context(Protocol::OpenAi);
        let events = collect_events(relay_events(
            byte_stream(vec!["data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"par\"}}]}\n\n"]),
            ctx,
        ))
        .await;

        assert_eq!(events.len(), 2);
        assert!(events[1].starts_with("data: {\"error\""));
        assert!(events[1].ends_with("\n\n"));
        assert_eq!(health.snapshot()[0].fails, 1);
        assert!(sessions.get("s1").is_empty());
    }

    #[tokio::test]
    async fn test_claude_event_sequence() {
        let (ctx, _health, _sessions) = context(Protocol::Anthropic);
        let events = collect_events(relay_events(
            byte_stream(vec![
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"!\"},\"finish_reason\":\"length\"}]}\n\n",
                "data: [DONE]\n\n",
            ]),
            ctx,
        ))
        .await;

        let names: Vec<&str> = events
            .iter()
            .map(|e| e.lines().next().unwrap().trim_start_matches("event: "))
            .collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop"
            ]
        );
        assert!(events.iter().all(|e| e.ends_with("\n\n")));
        assert!(events[5].contains("\"stop_reason\":\"max_tokens\""));
    }

    #[tokio::test]
    async fn test_claude_truncated_stream_error_event() {
        let (ctx, _health, _sessions) = context(Protocol::Anthropic);
        let events = collect_events(relay_events(byte_stream(vec![]), ctx)).await;
        let last = events.last().unwrap();
        assert!(last.starts_with("event: error\ndata: "));
        assert!(last.contains("\"type\":\"error\""));
    }
}
